//! Transform pipeline
//!
//! Reads modules from the [`FileStore`] and compiles them with a lazily
//! created [`Compiler`]. Batches fan out with bounded concurrency.

use crate::compiler::{Compiler, CompilerFactory, TransformMode, TransformOutput, TransformRequest};
use crate::error::{BuildError, Result};
use crate::fs::{normalize_path, FileStore};
use ember_config::settings::DEFAULT_CONCURRENCY;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info};

pub struct TransformPipeline {
    store: Arc<dyn FileStore>,
    factory: Arc<dyn CompilerFactory>,
    compiler: OnceCell<Arc<dyn Compiler>>,
    concurrency: usize,
    source_maps: bool,
}

impl TransformPipeline {
    pub fn new(store: Arc<dyn FileStore>, factory: Arc<dyn CompilerFactory>) -> Self {
        Self {
            store,
            factory,
            compiler: OnceCell::new(),
            concurrency: DEFAULT_CONCURRENCY,
            source_maps: false,
        }
    }

    /// Maximum number of files compiled at once
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_source_maps(mut self, source_maps: bool) -> Self {
        self.source_maps = source_maps;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.compiler.initialized()
    }

    /// Create the compiler once
    ///
    /// Concurrent callers wait on the same initialization. A failed
    /// initialization is not cached.
    pub async fn init(&self) -> Result<Arc<dyn Compiler>> {
        let compiler = self
            .compiler
            .get_or_try_init(|| async {
                let compiler = self.factory.create().await.map_err(|e| match e {
                    BuildError::CompilerInit(_) => e,
                    other => BuildError::CompilerInit(other.to_string()),
                })?;
                info!(compiler = compiler.name(), "compiler initialized");
                Ok::<_, BuildError>(compiler)
            })
            .await?;
        Ok(Arc::clone(compiler))
    }

    /// Compile one file from the store
    pub async fn transform_file(&self, path: &str) -> Result<TransformOutput> {
        let compiler = self.init().await?;
        compile_from_store(self.store.as_ref(), compiler.as_ref(), path, self.source_maps)
    }

    /// Compile a batch; the first failing file fails the whole batch
    pub async fn transform_files(&self, paths: &[String]) -> Result<BTreeMap<String, TransformOutput>> {
        if paths.is_empty() {
            return Ok(BTreeMap::new());
        }

        let compiler = self.init().await?;
        let source_maps = self.source_maps;

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for path in paths.iter().cloned() {
            let store = Arc::clone(&self.store);
            let compiler = Arc::clone(&compiler);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| BuildError::BuildFailed(format!("transform queue closed: {}", e)))?;
                tokio::task::spawn_blocking(move || {
                    let output =
                        compile_from_store(store.as_ref(), compiler.as_ref(), &path, source_maps)?;
                    Ok::<_, BuildError>((path, output))
                })
                .await
                .map_err(|e| BuildError::BuildFailed(format!("transform task failed: {}", e)))?
            });
        }

        let mut outputs = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (path, output) = joined
                .map_err(|e| BuildError::BuildFailed(format!("transform task failed: {}", e)))??;
            outputs.insert(path, output);
        }

        debug!(files = outputs.len(), "transformed batch");
        Ok(outputs)
    }
}

fn compile_from_store(
    store: &dyn FileStore,
    compiler: &dyn Compiler,
    path: &str,
    source_map: bool,
) -> Result<TransformOutput> {
    let path = normalize_path(path);
    let mode = TransformMode::from_path(&path)
        .ok_or_else(|| BuildError::UnsupportedFile { path: path.clone() })?;
    let source = store
        .read_file(&path)
        .ok_or_else(|| BuildError::transform(&path, "file not found"))?;

    debug!(path = %path, ?mode, "transforming");
    compiler
        .transform(&TransformRequest {
            path: &path,
            source: &source,
            mode,
            source_map,
        })
        .map_err(|e| BuildError::transform(&path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{CompileError, ModuleCompilerFactory};
    use crate::fs::MemoryFileStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingFactory {
        created: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl CompilerFactory for CountingFactory {
        async fn create(&self) -> Result<Arc<dyn Compiler>> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let attempt = self.created.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && attempt == 0 {
                return Err(BuildError::CompilerInit("toolchain not ready".into()));
            }
            ModuleCompilerFactory.create().await
        }
    }

    struct Shouty;

    impl Compiler for Shouty {
        fn name(&self) -> &str {
            "shouty"
        }

        fn transform(
            &self,
            request: &TransformRequest<'_>,
        ) -> std::result::Result<TransformOutput, CompileError> {
            Ok(TransformOutput {
                code: request.source.to_uppercase(),
                source_map: None,
            })
        }
    }

    fn store(files: &[(&str, &str)]) -> Arc<dyn FileStore> {
        Arc::new(MemoryFileStore::from_files(files.iter().copied()).unwrap())
    }

    #[tokio::test]
    async fn test_concurrent_init_creates_once() {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
            fail_first: false,
        });
        let pipeline = TransformPipeline::new(store(&[]), factory.clone());

        let (a, b, c) = tokio::join!(pipeline.init(), pipeline.init(), pipeline.init());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(pipeline.is_initialized());
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
            fail_first: true,
        });
        let pipeline = TransformPipeline::new(store(&[]), factory.clone());

        assert!(matches!(pipeline.init().await, Err(BuildError::CompilerInit(_))));
        assert!(!pipeline.is_initialized());
        assert!(pipeline.init().await.is_ok());
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transform_file_uses_injected_compiler() {
        struct ShoutyFactory;

        #[async_trait]
        impl CompilerFactory for ShoutyFactory {
            async fn create(&self) -> Result<Arc<dyn Compiler>> {
                Ok(Arc::new(Shouty))
            }
        }

        let pipeline = TransformPipeline::new(store(&[("a.js", "hello")]), Arc::new(ShoutyFactory));
        let output = pipeline.transform_file("./a.js").await.unwrap();
        assert_eq!(output.code, "HELLO");
    }

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let pipeline = TransformPipeline::new(store(&[]), Arc::new(ModuleCompilerFactory));
        let err = pipeline.transform_file("src/gone.ts").await.unwrap_err();
        assert_eq!(err.to_string(), "src/gone.ts: file not found");
    }

    #[tokio::test]
    async fn test_unsupported_file() {
        let pipeline =
            TransformPipeline::new(store(&[("logo.png", "..")]), Arc::new(ModuleCompilerFactory));
        assert!(matches!(
            pipeline.transform_file("logo.png").await,
            Err(BuildError::UnsupportedFile { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_fails_on_bad_file() {
        let pipeline = TransformPipeline::new(
            store(&[("a.js", "ok();"), ("b.js", "broken(;"), ("c.js", "fine();")]),
            Arc::new(ModuleCompilerFactory),
        )
        .with_concurrency(2);

        let paths: Vec<String> = ["a.js", "b.js", "c.js"].iter().map(|s| s.to_string()).collect();
        match pipeline.transform_files(&paths).await {
            Err(BuildError::Transform { path, message }) => {
                assert_eq!(path, "b.js");
                assert!(message.starts_with("1:7"), "{}", message);
            }
            other => panic!("expected transform error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_returns_every_file() {
        let pipeline = TransformPipeline::new(
            store(&[("a.js", "a();"), ("b.json", "[1]")]),
            Arc::new(ModuleCompilerFactory),
        )
        .with_source_maps(true);

        let paths = vec!["a.js".to_string(), "b.json".to_string()];
        let outputs = pipeline.transform_files(&paths).await.unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["b.json"].code, "module.exports = [1];\n");
        assert!(outputs["a.js"].source_map.is_some());
    }

    struct Tracking {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Compiler for Tracking {
        fn name(&self) -> &str {
            "tracking"
        }

        fn transform(
            &self,
            request: &TransformRequest<'_>,
        ) -> std::result::Result<TransformOutput, CompileError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(15));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(TransformOutput {
                code: request.source.to_string(),
                source_map: None,
            })
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_respects_concurrency_limit() {
        struct TrackingFactory(Arc<AtomicUsize>);

        #[async_trait]
        impl CompilerFactory for TrackingFactory {
            async fn create(&self) -> Result<Arc<dyn Compiler>> {
                Ok(Arc::new(Tracking {
                    in_flight: Arc::new(AtomicUsize::new(0)),
                    peak: Arc::clone(&self.0),
                }))
            }
        }

        let files: Vec<(String, String)> =
            (0..8).map(|i| (format!("m{}.js", i), format!("m{}();", i))).collect();
        let store: Arc<dyn FileStore> = Arc::new(
            MemoryFileStore::from_files(files.iter().map(|(p, s)| (p.as_str(), s.as_str()))).unwrap(),
        );
        let peak = Arc::new(AtomicUsize::new(0));
        let pipeline =
            TransformPipeline::new(store, Arc::new(TrackingFactory(Arc::clone(&peak)))).with_concurrency(2);

        let paths: Vec<String> = files.iter().map(|(p, _)| p.clone()).collect();
        let outputs = pipeline.transform_files(&paths).await.unwrap();
        assert_eq!(outputs.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2, "peak {}", peak.load(Ordering::SeqCst));
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }
}
