//! Fingerprint and classification tests
//!
//! Covers change detection across snapshots and strategy selection.

use ember_build::{
    build_graph, classify_changes, BuildStrategy, ChangeKind, ChangeRecord, FileNode,
    FingerprintEngine, HashAlgorithm,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn snapshot(files: &[(&str, &str)]) -> FileNode {
    let mut root = FileNode::folder();
    for (path, content) in files {
        root.insert(path, *content).unwrap();
    }
    root
}

#[test]
fn test_single_code_edit_patches() {
    let mut engine = FingerprintEngine::default();
    engine.diff(engine.graph(&snapshot(&[("a.ts", "x"), ("b.png", "y")])));

    let changes = engine.diff(engine.graph(&snapshot(&[("a.ts", "x2"), ("b.png", "y")])));

    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].path, "a.ts");
    assert_eq!(changes[0].classification, ChangeKind::Code);
    assert_eq!(classify_changes(&changes), BuildStrategy::Patch);
}

#[test]
fn test_code_and_asset_edit_rebuilds() {
    let mut engine = FingerprintEngine::default();
    engine.diff(engine.graph(&snapshot(&[("a.ts", "x"), ("b.png", "y")])));

    let changes = engine.diff(engine.graph(&snapshot(&[("a.ts", "x2"), ("b.png", "y2")])));

    let kinds: Vec<ChangeKind> = changes.iter().map(|c| c.classification).collect();
    assert_eq!(kinds, vec![ChangeKind::Code, ChangeKind::Asset]);
    assert_eq!(classify_changes(&changes), BuildStrategy::Full);
}

#[test]
fn test_identical_snapshot_is_noop() {
    let files = [("src/main.ts", "main"), ("art/a.png", "png")];
    let mut engine = FingerprintEngine::default();
    engine.diff(engine.graph(&snapshot(&files)));

    let changes = engine.diff(engine.graph(&snapshot(&files)));
    assert!(changes.is_empty());
    assert_eq!(classify_changes(&changes), BuildStrategy::Noop);
}

#[test]
fn test_deletion_is_reported() {
    let mut engine = FingerprintEngine::default();
    engine.diff(engine.graph(&snapshot(&[("a.ts", "x"), ("level.unity", "s")])));

    let changes = engine.diff(engine.graph(&snapshot(&[("a.ts", "x")])));
    assert_eq!(changes.len(), 1);
    assert!(changes[0].is_deletion());
    assert_eq!(changes[0].classification, ChangeKind::Scene);
    assert_eq!(classify_changes(&changes), BuildStrategy::Full);
}

#[test]
fn test_algorithms_agree_on_change_sets() {
    let before = snapshot(&[("a.ts", "1"), ("b.ts", "2")]);
    let after = snapshot(&[("a.ts", "1"), ("b.ts", "3")]);

    for algorithm in [HashAlgorithm::Rolling, HashAlgorithm::Sha256] {
        let old = build_graph(&before, algorithm);
        let new = build_graph(&after, algorithm);
        let changes = ember_build::diff(&old, &new, &Default::default());
        let paths: Vec<&str> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["b.ts"], "{:?}", algorithm);
    }
}

fn arb_kind() -> impl Strategy<Value = ChangeKind> {
    prop_oneof![
        Just(ChangeKind::Code),
        Just(ChangeKind::Asset),
        Just(ChangeKind::Scene),
        Just(ChangeKind::Config),
        Just(ChangeKind::Other),
    ]
}

fn record(index: usize, classification: ChangeKind) -> ChangeRecord {
    ChangeRecord {
        path: format!("file{}", index),
        changed: true,
        classification,
        old_hash: None,
        new_hash: Some("00000000".to_string()),
    }
}

proptest! {
    #[test]
    fn prop_strategy_ignores_record_order(kinds in prop::collection::vec(arb_kind(), 0..10)) {
        let records: Vec<ChangeRecord> = kinds.iter().enumerate().map(|(i, k)| record(i, *k)).collect();
        let mut reversed = records.clone();
        reversed.reverse();
        prop_assert_eq!(classify_changes(&records), classify_changes(&reversed));
    }

    #[test]
    fn prop_scene_always_full(kinds in prop::collection::vec(arb_kind(), 0..10), at in 0usize..10) {
        let mut records: Vec<ChangeRecord> = kinds.iter().enumerate().map(|(i, k)| record(i, *k)).collect();
        let position = at.min(records.len());
        records.insert(position, record(99, ChangeKind::Scene));
        prop_assert_eq!(classify_changes(&records), BuildStrategy::Full);
    }
}
