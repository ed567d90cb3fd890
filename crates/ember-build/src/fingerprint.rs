//! Content fingerprints and change detection
//!
//! A [`FingerprintGraph`] maps every file of a snapshot to a content hash.
//! Diffing two graphs yields the [`ChangeRecord`]s the orchestrator classifies
//! into a build strategy.

use crate::classify::{ChangeKind, ClassificationTable};
use crate::fs::{normalize_path, FileNode};
use ember_config::HashAlgorithm;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

/// Hash file content
///
/// `Rolling` is a 32-bit `h = h * 31 + byte` hash printed as 8 hex digits; it
/// only detects changes. `Sha256` is lowercase hex.
pub fn hash(content: &str, algorithm: HashAlgorithm) -> String {
    match algorithm {
        HashAlgorithm::Rolling => {
            let h = content
                .bytes()
                .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)));
            format!("{:08x}", h)
        }
        HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(content.as_bytes())),
    }
}

/// Ordered `path -> hash` map for one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintGraph {
    entries: BTreeMap<String, String>,
}

impl FingerprintGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, hash: impl Into<String>) {
        self.entries.insert(normalize_path(path), hash.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, h)| (p.as_str(), h.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for FingerprintGraph {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut graph = Self::new();
        for (path, hash) in iter {
            graph.insert(&path, hash);
        }
        graph
    }
}

/// Fingerprint every file in a snapshot; empty folders contribute nothing
pub fn build_graph(snapshot: &FileNode, algorithm: HashAlgorithm) -> FingerprintGraph {
    let files: Vec<(String, String)> = snapshot.files().into_iter().collect();
    let entries: BTreeMap<String, String> = files
        .par_iter()
        .map(|(path, content)| (path.clone(), hash(content, algorithm)))
        .collect();

    debug!(files = entries.len(), algorithm = algorithm.name(), "built fingerprint graph");
    FingerprintGraph { entries }
}

/// One changed path between two graphs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub path: String,
    pub changed: bool,
    pub classification: ChangeKind,
    /// `None` for an added file
    pub old_hash: Option<String>,
    /// `None` for a deleted file
    pub new_hash: Option<String>,
}

impl ChangeRecord {
    pub fn is_addition(&self) -> bool {
        self.old_hash.is_none()
    }

    pub fn is_deletion(&self) -> bool {
        self.new_hash.is_none()
    }
}

/// Compare two graphs; records are ordered by path
pub fn diff(
    old: &FingerprintGraph,
    new: &FingerprintGraph,
    table: &ClassificationTable,
) -> Vec<ChangeRecord> {
    let mut changes: Vec<ChangeRecord> = new
        .iter()
        .filter(|(path, hash)| old.get(path) != Some(*hash))
        .map(|(path, hash)| ChangeRecord {
            path: path.to_string(),
            changed: true,
            classification: table.classify(path),
            old_hash: old.get(path).map(str::to_string),
            new_hash: Some(hash.to_string()),
        })
        .collect();

    changes.extend(
        old.iter()
            .filter(|(path, _)| !new.contains(path))
            .map(|(path, hash)| ChangeRecord {
                path: path.to_string(),
                changed: true,
                classification: table.classify(path),
                old_hash: Some(hash.to_string()),
                new_hash: None,
            }),
    );

    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

/// Tracks the fingerprint baseline between builds
#[derive(Debug, Clone)]
pub struct FingerprintEngine {
    algorithm: HashAlgorithm,
    table: ClassificationTable,
    baseline: FingerprintGraph,
}

impl FingerprintEngine {
    pub fn new(algorithm: HashAlgorithm, table: ClassificationTable) -> Self {
        Self {
            algorithm,
            table,
            baseline: FingerprintGraph::new(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn table(&self) -> &ClassificationTable {
        &self.table
    }

    /// Fingerprint a snapshot with this engine's algorithm
    pub fn graph(&self, snapshot: &FileNode) -> FingerprintGraph {
        build_graph(snapshot, self.algorithm)
    }

    /// Diff against the baseline, then make `new` the baseline
    pub fn diff(&mut self, new: FingerprintGraph) -> Vec<ChangeRecord> {
        let changes = self.pending_changes(&new);
        self.commit(new);
        changes
    }

    /// Diff against the baseline without committing
    pub fn pending_changes(&self, new: &FingerprintGraph) -> Vec<ChangeRecord> {
        diff(&self.baseline, new, &self.table)
    }

    pub fn commit(&mut self, graph: FingerprintGraph) {
        self.baseline = graph;
    }

    pub fn last_graph(&self) -> FingerprintGraph {
        self.baseline.clone()
    }

    /// Forget the baseline; the next diff reports every file as added
    pub fn reset(&mut self) {
        self.baseline = FingerprintGraph::new();
    }
}

impl Default for FingerprintEngine {
    fn default() -> Self {
        Self::new(HashAlgorithm::default(), ClassificationTable::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn test_rolling_hash_known_values() {
        assert_eq!(hash("", HashAlgorithm::Rolling), "00000000");
        assert_eq!(hash("a", HashAlgorithm::Rolling), "00000061");
        // 'a' * 31 + 'b' = 97 * 31 + 98
        assert_eq!(hash("ab", HashAlgorithm::Rolling), format!("{:08x}", 97 * 31 + 98));
    }

    #[test]
    fn test_sha256_hash() {
        assert_eq!(
            hash("abc", HashAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_build_graph_paths() {
        let mut root = snapshot(&[("src/main.ts", "x"), ("README.md", "y")]);
        if let FileNode::Folder { children } = &mut root {
            children.insert("empty".into(), FileNode::folder());
        }

        let graph = build_graph(&root, HashAlgorithm::Rolling);
        let paths: Vec<&str> = graph.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["README.md", "src/main.ts"]);
    }

    #[test]
    fn test_diff_reports_add_modify_delete() {
        let table = ClassificationTable::default();
        let old: FingerprintGraph = [
            ("a.ts".to_string(), "1".to_string()),
            ("b.png".to_string(), "2".to_string()),
            ("c.json".to_string(), "3".to_string()),
        ]
        .into_iter()
        .collect();
        let new: FingerprintGraph = [
            ("a.ts".to_string(), "1".to_string()),
            ("b.png".to_string(), "9".to_string()),
            ("d.unity".to_string(), "4".to_string()),
        ]
        .into_iter()
        .collect();

        let changes = diff(&old, &new, &table);
        let summary: Vec<(&str, ChangeKind, bool, bool)> = changes
            .iter()
            .map(|c| (c.path.as_str(), c.classification, c.is_addition(), c.is_deletion()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("b.png", ChangeKind::Asset, false, false),
                ("c.json", ChangeKind::Config, false, true),
                ("d.unity", ChangeKind::Scene, true, false),
            ]
        );
    }

    #[test]
    fn test_engine_diff_commits() {
        let mut engine = FingerprintEngine::default();
        let graph = engine.graph(&snapshot(&[("a.ts", "x")]));

        assert_eq!(engine.pending_changes(&graph).len(), 1);
        assert_eq!(engine.diff(graph.clone()).len(), 1);
        assert!(engine.diff(graph.clone()).is_empty());
        assert_eq!(engine.last_graph(), graph);

        engine.reset();
        assert_eq!(engine.pending_changes(&graph).len(), 1);
    }

    fn arb_graph() -> impl Strategy<Value = BTreeMap<String, String>> {
        prop::collection::btree_map("[a-d]{1,2}\\.(ts|png|json|md)", "[0-9a-f]{2}", 0..12)
    }

    proptest! {
        #[test]
        fn prop_hash_is_deterministic(content in ".*") {
            prop_assert_eq!(hash(&content, HashAlgorithm::Rolling), hash(&content, HashAlgorithm::Rolling));
            prop_assert_eq!(hash(&content, HashAlgorithm::Rolling).len(), 8);
            prop_assert_eq!(hash(&content, HashAlgorithm::Sha256).len(), 64);
        }

        #[test]
        fn prop_diff_with_self_is_empty(entries in arb_graph()) {
            let graph: FingerprintGraph = entries.into_iter().collect();
            prop_assert!(diff(&graph, &graph, &ClassificationTable::default()).is_empty());
        }

        #[test]
        fn prop_diff_is_complete(old in arb_graph(), new in arb_graph()) {
            let table = ClassificationTable::default();
            let changes = diff(&old.clone().into_iter().collect(), &new.clone().into_iter().collect(), &table);

            let mut expected: Vec<&String> = new
                .iter()
                .filter(|(p, h)| old.get(*p) != Some(*h))
                .map(|(p, _)| p)
                .chain(old.keys().filter(|p| !new.contains_key(*p)))
                .collect();
            expected.sort();

            let reported: Vec<&String> = changes.iter().map(|c| &c.path).collect();
            prop_assert_eq!(reported, expected);
            prop_assert!(changes.iter().all(|c| c.changed));
        }
    }
}
