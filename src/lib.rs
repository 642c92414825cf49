//! # transpile-native
//!
//! Native transformation backbone for an in-browser editor and runner.
//!
//! ## Pipeline
//!
//! 1. **Detect**: one oxc traversal emits node events; a pure reducer turns
//!    them into language features and framework signals. Unparseable input
//!    goes through regex detectors that emit the same events.
//! 2. **Resolve**: base configuration, language defaults, framework defaults
//!    and explicit options merge into one `TransformConfiguration`, ordered
//!    types phase, syntax phase, environment phase.
//! 3. **Cache**: lowerings are keyed by `sha256(source) : sha256(canonical config)`
//!    and bounded by byte size and age.
//! 4. **Lower**: large inputs with a file key are compiled chunk by chunk,
//!    everything else in a single backend call.
//! 5. **Recover**: backend failures are classified, annotated with ranked
//!    suggestions and, for a closed set of syntax failures, rewritten into a
//!    degraded but runnable form.
//!
//! No process-wide mutable state: every `TransformOrchestrator` owns its
//! cache, chunk store and memory manager.

pub mod backend;
pub mod cache;
pub mod detect;
pub mod diagnostics;
pub mod error;
pub mod frameworks;
pub mod incremental;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod project_config;
pub mod recovery;
pub mod registry;
pub mod resolve;
pub mod rewrite;
pub mod visitor;

#[cfg(feature = "napi")]
mod napi_bindings;

#[cfg(test)]
mod detect_tests;
#[cfg(test)]
mod recovery_tests;

pub use backend::{BackendOutput, OxcBackend, TransformBackend};
pub use cache::{CacheEntry, CacheLimits, CacheStats, TransformCache};
pub use detect::{derive_dependencies, FeatureDetector};
pub use error::{
    BackendError, ConfigError, DetailedError, ErrorKind, Priority, Suggestion, SuggestionAction,
    SuggestionKind,
};
pub use incremental::IncrementalCompiler;
pub use memory::{MemoryManager, MemorySampler, MemoryUsage};
pub use model::*;
pub use orchestrator::{
    OrchestratorBuilder, OrchestratorSettings, PipelineStats, TransformOrchestrator,
};
pub use recovery::ErrorEngine;
pub use registry::{KnownModule, ModuleId, ModuleRegistry, Phase};
pub use resolve::{ConfigResolver, ValidationResult};
