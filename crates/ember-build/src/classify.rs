//! Change classification and build strategy selection

use crate::fingerprint::ChangeRecord;
use ember_config::ClassifySettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// What kind of project file changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Code,
    Asset,
    Scene,
    Config,
    Other,
}

/// How much of the build to redo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStrategy {
    /// Nothing changed; reuse the previous bundle
    Noop,
    /// Recompile only the changed modules
    Patch,
    /// Refresh the asset table only
    Asset,
    /// Rebuild everything from the entry point
    Full,
}

impl BuildStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Patch => "patch",
            Self::Asset => "asset",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for BuildStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extension to [`ChangeKind`] lookup
///
/// An extension listed under several classes resolves to the first of
/// code, asset, scene, config.
#[derive(Debug, Clone)]
pub struct ClassificationTable {
    by_extension: HashMap<String, ChangeKind>,
}

impl ClassificationTable {
    pub fn new(settings: &ClassifySettings) -> Self {
        let mut by_extension = HashMap::new();
        let classes = [
            (&settings.code, ChangeKind::Code),
            (&settings.asset, ChangeKind::Asset),
            (&settings.scene, ChangeKind::Scene),
            (&settings.config, ChangeKind::Config),
        ];
        for (extensions, kind) in classes {
            for ext in extensions {
                by_extension
                    .entry(ext.trim_start_matches('.').to_ascii_lowercase())
                    .or_insert(kind);
            }
        }
        Self { by_extension }
    }

    /// Classify a path by the extension of its final segment (case-insensitive)
    pub fn classify(&self, path: &str) -> ChangeKind {
        let name = path.rsplit('/').next().unwrap_or(path);
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => self
                .by_extension
                .get(&ext.to_ascii_lowercase())
                .copied()
                .unwrap_or(ChangeKind::Other),
            _ => ChangeKind::Other,
        }
    }
}

impl Default for ClassificationTable {
    fn default() -> Self {
        Self::new(&ClassifySettings::default())
    }
}

/// Pick the cheapest strategy that keeps the bundle correct
///
/// First matching rule wins:
/// 1. no changes: noop
/// 2. any scene change: full
/// 3. code changes and no asset changes: patch
/// 4. asset changes and no code changes: asset
/// 5. code and asset changes together: full
/// 6. only config changes: patch
/// 7. anything else: full
pub fn classify_changes(changes: &[ChangeRecord]) -> BuildStrategy {
    if changes.is_empty() {
        return BuildStrategy::Noop;
    }

    let has = |kind: ChangeKind| changes.iter().any(|c| c.classification == kind);
    let code = has(ChangeKind::Code);
    let asset = has(ChangeKind::Asset);

    if has(ChangeKind::Scene) {
        BuildStrategy::Full
    } else if code && !asset {
        BuildStrategy::Patch
    } else if asset && !code {
        BuildStrategy::Asset
    } else if code && asset {
        BuildStrategy::Full
    } else if changes
        .iter()
        .all(|c| c.classification == ChangeKind::Config)
    {
        BuildStrategy::Patch
    } else {
        BuildStrategy::Full
    }
}
