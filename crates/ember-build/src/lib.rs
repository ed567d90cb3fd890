//! Ember incremental build pipeline
//!
//! Turns a project tree into a single runnable bundle, redoing as little work
//! as the detected changes allow:
//! - Content fingerprints and change detection
//! - Change classification into a build strategy (noop, patch, asset, full)
//! - Lazily initialized, concurrent module transforms with TypeScript type
//!   erasure
//! - Module graph resolution and dependency ordering
//! - Bundle assembly and the incremental build orchestrator

pub mod bundle;
pub mod classify;
pub mod compiler;
pub mod error;
pub mod fingerprint;
pub mod fs;
pub mod lexer;
pub mod module_graph;
pub mod orchestrator;
pub mod transform;
pub mod typestrip;

// Re-export main types
pub use bundle::{assemble, CompiledModule};
pub use classify::{classify_changes, BuildStrategy, ChangeKind, ClassificationTable};
pub use compiler::{
    CompileError, Compiler, CompilerFactory, ModuleCompiler, ModuleCompilerFactory,
    TransformMode, TransformOutput, TransformRequest,
};
pub use error::{describe_panic, BuildError, Result};
pub use fingerprint::{build_graph, diff, hash, ChangeRecord, FingerprintEngine, FingerprintGraph};
pub use fs::{normalize_path, DiskFileStore, FileNode, FileStore, MemoryFileStore};
pub use module_graph::{ModuleGraph, ModuleNode};
pub use orchestrator::{BuildResult, BuildStats, IncrementalBuilder, Orchestrator};
pub use transform::TransformPipeline;

// Re-export config types used in the public API
pub use ember_config::{HashAlgorithm, Settings};
