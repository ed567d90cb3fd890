//! Build orchestration
//!
//! The [`Orchestrator`] ties the pipeline together: it snapshots the store,
//! diffs fingerprints against the last successful build, picks a strategy and
//! produces a bundle. It never returns an error; every failure is reported
//! through [`BuildResult`].

use crate::bundle::{assemble, CompiledModule};
use crate::classify::{classify_changes, BuildStrategy, ChangeKind, ClassificationTable};
use crate::compiler::{CompilerFactory, ModuleCompilerFactory};
use crate::error::{describe_panic, BuildError, Result};
use crate::fingerprint::{ChangeRecord, FingerprintEngine, FingerprintGraph};
use crate::fs::{normalize_path, FileStore};
use crate::module_graph::ModuleGraph;
use crate::transform::TransformPipeline;
use async_trait::async_trait;
use ember_config::{BuildSettings, Settings};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of one build call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Strategy actually executed, after any escalation
    pub strategy_used: BuildStrategy,
    pub changes: Vec<ChangeRecord>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub modules_compiled: usize,
}

impl BuildResult {
    fn failure(
        strategy: BuildStrategy,
        changes: Vec<ChangeRecord>,
        error: String,
        started: Instant,
    ) -> Self {
        Self {
            success: false,
            bundle_text: None,
            error_message: Some(error),
            strategy_used: strategy,
            changes,
            duration_ms: elapsed_ms(started),
            message: None,
            modules_compiled: 0,
        }
    }

    /// The bundle, if this result can be executed
    ///
    /// A successful result without a bundle, or with a blank one, is not runnable.
    pub fn runnable_bundle(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.bundle_text
            .as_deref()
            .filter(|bundle| !bundle.trim().is_empty())
    }

    pub fn has_runnable_bundle(&self) -> bool {
        self.runnable_bundle().is_some()
    }
}

/// Build statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStats {
    pub builds_run: usize,
    pub successful_builds: usize,
    pub last_strategy: Option<BuildStrategy>,
    pub cached_modules: usize,
    /// Approximate bytes held by the module cache and bundle
    pub cache_bytes: usize,
}

/// Something that can run an incremental build
#[async_trait]
pub trait IncrementalBuilder: Send {
    async fn run_incremental_build(&mut self, entry: &str) -> BuildResult;
}

/// State of the last successful build
#[derive(Debug, Clone)]
struct BuildCache {
    entry: String,
    order: Vec<String>,
    graph: ModuleGraph,
    modules: BTreeMap<String, CompiledModule>,
    assets: BTreeMap<String, String>,
    bundle: String,
}

impl BuildCache {
    fn ordered_modules(&self) -> Vec<&CompiledModule> {
        self.order
            .iter()
            .filter_map(|id| self.modules.get(id))
            .collect()
    }

    fn size(&self) -> usize {
        self.bundle.len() + self.modules.values().map(CompiledModule::size).sum::<usize>()
    }
}

enum Outcome {
    Reused,
    Built { cache: BuildCache, compiled: usize },
}

/// Incremental build orchestrator
pub struct Orchestrator {
    store: Arc<dyn FileStore>,
    engine: FingerprintEngine,
    pipeline: TransformPipeline,
    settings: BuildSettings,
    cache: Option<BuildCache>,
    last_build_at: Option<Instant>,
    stats: BuildStats,
}

impl Orchestrator {
    /// Create an orchestrator using the built-in compiler
    pub fn new(store: Arc<dyn FileStore>, settings: &Settings) -> Self {
        Self::with_compiler(store, settings, Arc::new(ModuleCompilerFactory))
    }

    /// Create an orchestrator with a custom compiler
    pub fn with_compiler(
        store: Arc<dyn FileStore>,
        settings: &Settings,
        factory: Arc<dyn CompilerFactory>,
    ) -> Self {
        let pipeline = TransformPipeline::new(Arc::clone(&store), factory)
            .with_concurrency(settings.build.concurrency)
            .with_source_maps(settings.build.source_maps);
        let engine = FingerprintEngine::new(
            settings.build.hash,
            ClassificationTable::new(&settings.classify),
        );

        Self {
            store,
            engine,
            pipeline,
            settings: settings.build.clone(),
            cache: None,
            last_build_at: None,
            stats: BuildStats::default(),
        }
    }

    pub fn engine(&self) -> &FingerprintEngine {
        &self.engine
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    /// Source map of a module from the last successful build
    pub fn source_map(&self, path: &str) -> Option<&str> {
        self.cache
            .as_ref()?
            .modules
            .get(&normalize_path(path))?
            .source_map
            .as_deref()
    }

    pub fn stats(&self) -> BuildStats {
        let mut stats = self.stats.clone();
        if let Some(cache) = &self.cache {
            stats.cached_modules = cache.modules.len();
            stats.cache_bytes = cache.size();
        }
        stats
    }

    /// Whether the store differs from the last successful build
    pub fn needs_rebuild(&self) -> bool {
        let graph = self.engine.graph(&self.store.snapshot());
        !self.engine.pending_changes(&graph).is_empty()
    }

    /// Forget all previous state and build from scratch
    pub async fn run_full_build(&mut self, entry: &str) -> BuildResult {
        self.engine.reset();
        self.cache = None;
        self.last_build_at = None;
        self.run_incremental_build(entry).await
    }

    /// Build `entry`, redoing only what the detected changes require
    pub async fn run_incremental_build(&mut self, entry: &str) -> BuildResult {
        let started = Instant::now();
        let entry = normalize_path(entry);
        self.stats.builds_run += 1;

        if let Some(result) = self.cooldown_result(&entry, started) {
            return result;
        }
        self.last_build_at = Some(started);

        let snapshot = self.store.snapshot();
        let graph = self.engine.graph(&snapshot);
        let changes = self.engine.pending_changes(&graph);
        let planned = classify_changes(&changes);
        let files = snapshot.files();

        info!(entry = %entry, strategy = %planned, changes = changes.len(), "starting build");

        let mut attempted = planned;
        let attempt =
            AssertUnwindSafe(self.execute(&entry, &mut attempted, &changes, &files, &graph))
                .catch_unwind()
                .await;

        let (strategy, outcome) = match attempt {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                warn!(entry = %entry, error = %e, "build failed");
                return BuildResult::failure(attempted, changes, e.to_string(), started);
            }
            Err(panic) => {
                let message = format!("internal build error: {}", describe_panic(panic.as_ref()));
                warn!(entry = %entry, error = %message, "build panicked");
                return BuildResult::failure(attempted, changes, message, started);
            }
        };

        let modules_compiled = match outcome {
            Outcome::Reused => 0,
            Outcome::Built { cache, compiled } => {
                self.cache = Some(cache);
                compiled
            }
        };
        self.engine.commit(graph);
        self.stats.successful_builds += 1;
        self.stats.last_strategy = Some(strategy);

        let bundle_text = self.cache.as_ref().map(|cache| cache.bundle.clone());
        let duration_ms = elapsed_ms(started);
        info!(
            entry = %entry,
            strategy = %strategy,
            modules_compiled,
            duration_ms,
            "build finished"
        );

        BuildResult {
            success: true,
            bundle_text,
            error_message: None,
            strategy_used: strategy,
            changes,
            duration_ms,
            message: Some(summary(strategy, modules_compiled)),
            modules_compiled,
        }
    }

    fn cooldown_result(&self, entry: &str, now: Instant) -> Option<BuildResult> {
        let cooldown = self.settings.cooldown;
        let last = self.last_build_at?;
        if cooldown.is_zero() || now.duration_since(last) >= cooldown {
            return None;
        }

        Some(BuildResult {
            success: true,
            bundle_text: self
                .cached_for(entry)
                .map(|cache| cache.bundle.clone()),
            error_message: None,
            strategy_used: BuildStrategy::Noop,
            changes: Vec::new(),
            duration_ms: elapsed_ms(now),
            message: Some("Build cooldown active".to_string()),
            modules_compiled: 0,
        })
    }

    fn cached_for(&self, entry: &str) -> Option<&BuildCache> {
        self.cache.as_ref().filter(|cache| cache.entry == entry)
    }

    /// Run the planned strategy; `attempted` tracks escalation so failures
    /// report the strategy that actually ran
    async fn execute(
        &self,
        entry: &str,
        attempted: &mut BuildStrategy,
        changes: &[ChangeRecord],
        files: &BTreeMap<String, String>,
        graph: &FingerprintGraph,
    ) -> Result<(BuildStrategy, Outcome)> {
        if !files.contains_key(entry) {
            return Err(BuildError::EntryNotFound {
                entry: entry.to_string(),
            });
        }

        let planned = *attempted;
        let Some(cache) = self.cached_for(entry) else {
            if planned != BuildStrategy::Full {
                warn!(strategy = %planned, "no previous bundle, escalating to full build");
            }
            *attempted = BuildStrategy::Full;
            return self.full(entry, files, graph).await;
        };

        let incremental = match planned {
            BuildStrategy::Noop => Some(Outcome::Reused),
            BuildStrategy::Patch => self.patch(cache, changes, files, graph).await?,
            BuildStrategy::Asset => self.refresh_assets(cache, files, graph),
            BuildStrategy::Full => None,
        };

        match incremental {
            Some(outcome) => Ok((planned, outcome)),
            None => {
                *attempted = BuildStrategy::Full;
                self.full(entry, files, graph).await
            }
        }
    }

    async fn full(
        &self,
        entry: &str,
        files: &BTreeMap<String, String>,
        graph: &FingerprintGraph,
    ) -> Result<(BuildStrategy, Outcome)> {
        let module_graph = ModuleGraph::resolve(entry, files)?;
        let order = module_graph.compute_build_order()?;
        let mut outputs = self.pipeline.transform_files(&order).await?;

        let mut modules = BTreeMap::new();
        for id in &order {
            let output = outputs
                .remove(id)
                .ok_or_else(|| BuildError::BuildFailed(format!("no output for module {}", id)))?;
            let dependencies = module_graph
                .get_module(id)
                .map(|node| node.resolved.clone())
                .unwrap_or_default();
            modules.insert(
                id.clone(),
                CompiledModule {
                    id: id.clone(),
                    code: output.code,
                    source_map: output.source_map,
                    dependencies,
                },
            );
        }

        let compiled = order.len();
        let cache = self.assemble_cache(entry, order, module_graph, modules, graph)?;
        Ok((BuildStrategy::Full, Outcome::Built { cache, compiled }))
    }

    /// Recompile changed modules in place; `None` when the import graph moved
    async fn patch(
        &self,
        cache: &BuildCache,
        changes: &[ChangeRecord],
        files: &BTreeMap<String, String>,
        graph: &FingerprintGraph,
    ) -> Result<Option<Outcome>> {
        let module_graph = ModuleGraph::resolve(&cache.entry, files)?;
        if module_graph != cache.graph {
            warn!("import graph changed, escalating to full build");
            return Ok(None);
        }

        let targets: Vec<String> = changes
            .iter()
            .filter(|change| !change.is_deletion() && module_graph.contains(&change.path))
            .map(|change| change.path.clone())
            .collect();
        let outputs = self.pipeline.transform_files(&targets).await?;

        let mut modules = cache.modules.clone();
        for (path, output) in outputs {
            if let Some(module) = modules.get_mut(&path) {
                module.code = output.code;
                module.source_map = output.source_map;
            }
        }

        let compiled = targets.len();
        let cache = self.assemble_cache(
            &cache.entry,
            cache.order.clone(),
            module_graph,
            modules,
            graph,
        )?;
        Ok(Some(Outcome::Built { cache, compiled }))
    }

    /// Rebuild the asset table only; `None` when a referenced file is gone
    fn refresh_assets(
        &self,
        cache: &BuildCache,
        files: &BTreeMap<String, String>,
        graph: &FingerprintGraph,
    ) -> Option<Outcome> {
        let dangling = cache
            .graph
            .modules()
            .values()
            .flat_map(|node| node.resolved.values())
            .any(|target| !files.contains_key(target));
        if dangling {
            warn!("referenced file removed, escalating to full build");
            return None;
        }

        let assets = self.asset_table(graph);
        let bundle = assemble(&cache.entry, &cache.ordered_modules(), &assets);
        Some(Outcome::Built {
            cache: BuildCache {
                assets,
                bundle,
                ..cache.clone()
            },
            compiled: 0,
        })
    }

    fn assemble_cache(
        &self,
        entry: &str,
        order: Vec<String>,
        graph: ModuleGraph,
        modules: BTreeMap<String, CompiledModule>,
        fingerprints: &FingerprintGraph,
    ) -> Result<BuildCache> {
        let assets = self.asset_table(fingerprints);
        let ordered: Vec<&CompiledModule> = order.iter().filter_map(|id| modules.get(id)).collect();
        let bundle = assemble(entry, &ordered, &assets);
        if bundle.trim().is_empty() {
            return Err(BuildError::EmptyBundle);
        }

        Ok(BuildCache {
            entry: entry.to_string(),
            order,
            graph,
            modules,
            assets,
            bundle,
        })
    }

    fn asset_table(&self, graph: &FingerprintGraph) -> BTreeMap<String, String> {
        graph
            .iter()
            .filter(|(path, _)| self.engine.table().classify(path) == ChangeKind::Asset)
            .map(|(path, hash)| (path.to_string(), hash.to_string()))
            .collect()
    }
}

#[async_trait]
impl IncrementalBuilder for Orchestrator {
    async fn run_incremental_build(&mut self, entry: &str) -> BuildResult {
        Orchestrator::run_incremental_build(self, entry).await
    }
}

fn summary(strategy: BuildStrategy, compiled: usize) -> String {
    match strategy {
        BuildStrategy::Noop => "No changes".to_string(),
        BuildStrategy::Patch => format!("Recompiled {} module(s)", compiled),
        BuildStrategy::Asset => "Refreshed asset table".to_string(),
        BuildStrategy::Full => format!("Compiled {} module(s)", compiled),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileStore;

    fn orchestrator(files: &[(&str, &str)]) -> (Arc<MemoryFileStore>, Orchestrator) {
        let store = Arc::new(MemoryFileStore::from_files(files.iter().copied()).unwrap());
        let orchestrator = Orchestrator::new(store.clone(), &Settings::default());
        (store, orchestrator)
    }

    #[test]
    fn test_runnable_bundle() {
        let mut result = BuildResult::failure(BuildStrategy::Full, Vec::new(), "x".into(), Instant::now());
        assert!(!result.has_runnable_bundle());

        result.success = true;
        result.bundle_text = Some("  \n".into());
        assert!(!result.has_runnable_bundle());

        result.bundle_text = Some("run();".into());
        assert_eq!(result.runnable_bundle(), Some("run();"));
    }

    #[tokio::test]
    async fn test_stats_track_cache() {
        let (_store, mut orchestrator) = orchestrator(&[("main.js", "console.log(1);")]);
        assert!(orchestrator.needs_rebuild());

        let result = orchestrator.run_incremental_build("main.js").await;
        assert!(result.success, "{:?}", result.error_message);
        assert!(!orchestrator.needs_rebuild());

        let stats = orchestrator.stats();
        assert_eq!(stats.builds_run, 1);
        assert_eq!(stats.successful_builds, 1);
        assert_eq!(stats.last_strategy, Some(BuildStrategy::Full));
        assert_eq!(stats.cached_modules, 1);
        assert!(stats.cache_bytes > 0);
    }

    #[tokio::test]
    async fn test_source_map_kept_for_module() {
        let store = Arc::new(MemoryFileStore::from_files([("main.js", "a();")]).unwrap());
        let mut settings = Settings::default();
        settings.build.source_maps = true;
        let mut orchestrator = Orchestrator::new(store, &settings);

        assert!(orchestrator.run_incremental_build("main.js").await.success);
        assert!(orchestrator.source_map("./main.js").is_some());
    }
}
