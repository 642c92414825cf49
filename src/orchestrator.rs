//! Transformation Orchestrator
//!
//! Facade over the pipeline: detect, resolve, cache lookup, incremental or
//! full backend invocation, recovery, cache store. One orchestrator per
//! session; every collaborator is injected through the builder.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use crate::backend::{BackendOutput, TransformBackend};
use crate::cache::{CacheLimits, CacheStats, Clock, SystemClock, TransformCache};
use crate::detect::FeatureDetector;
use crate::diagnostics::DiagnosticReport;
use crate::error::{BackendError, DebugInfo, DetailedError};
use crate::incremental::IncrementalCompiler;
use crate::memory::{MemoryManager, MemorySampler, ProcfsSampler};
use crate::model::{
    Detection, PartialConfiguration, PerformanceInfo, TransformConfiguration, TransformMetadata,
    TransformOptions, TransformResult,
};
use crate::recovery::ErrorEngine;
use crate::registry::{ModuleDescriptor, ModuleRegistry};
use crate::resolve::ConfigResolver;

/// Logs a pipeline step at `info` in debug mode and at `debug` otherwise.
macro_rules! step {
    ($debug:expr, $($arg:tt)+) => {
        if $debug {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestratorSettings {
    /// Inputs larger than this with a file key go through incremental mode.
    pub incremental_threshold_bytes: usize,
    pub chunk_lines: usize,
    pub backend_timeout_ms: Option<u64>,
    pub cache: CacheLimits,
    pub memory_threshold_bytes: u64,
    /// Fraction of the cache kept when memory pressure is detected.
    pub pressure_shrink_fraction: f64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            incremental_threshold_bytes: 100 * 1024,
            chunk_lines: 1000,
            backend_timeout_ms: None,
            cache: CacheLimits::default(),
            memory_threshold_bytes: 512 * 1024 * 1024,
            pressure_shrink_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub transforms: u64,
    pub cache_hits: u64,
    pub recoveries: u64,
    pub failures: u64,
    pub incremental_runs: u64,
    pub total_time_ms: f64,
}

#[derive(Default)]
struct Counters {
    transforms: AtomicU64,
    cache_hits: AtomicU64,
    recoveries: AtomicU64,
    failures: AtomicU64,
    incremental_runs: AtomicU64,
    total_time_us: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_time(&self, elapsed: Duration) {
        self.total_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            transforms: self.transforms.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            incremental_runs: self.incremental_runs.load(Ordering::Relaxed),
            total_time_ms: self.total_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct OrchestratorBuilder {
    backend: Arc<dyn TransformBackend>,
    settings: OrchestratorSettings,
    base_config: PartialConfiguration,
    registry: ModuleRegistry,
    sampler: Arc<dyn MemorySampler>,
    clock: Arc<dyn Clock>,
}

impl OrchestratorBuilder {
    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn base_config(mut self, base: PartialConfiguration) -> Self {
        self.base_config = base;
        self
    }

    pub fn registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn memory_sampler(mut self, sampler: Arc<dyn MemorySampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> TransformOrchestrator {
        let cache = Arc::new(TransformCache::with_clock(self.settings.cache, self.clock));
        let memory = MemoryManager::new(self.sampler, self.settings.memory_threshold_bytes);
        let hook_cache = cache.clone();
        let fraction = self.settings.pressure_shrink_fraction;
        memory.register_reclaim_hook(move || {
            let evicted = hook_cache.shrink(fraction);
            tracing::debug!(evicted, "cache shrunk under memory pressure");
        });

        TransformOrchestrator {
            backend: self.backend,
            detector: FeatureDetector::new(),
            resolver: ConfigResolver::new(self.registry.clone()),
            engine: ErrorEngine::new(self.registry),
            incremental: IncrementalCompiler::new(self.settings.chunk_lines),
            cache,
            memory,
            base_config: self.base_config,
            settings: self.settings,
            debug: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORCHESTRATOR
// ═══════════════════════════════════════════════════════════════════════════════

pub struct TransformOrchestrator {
    backend: Arc<dyn TransformBackend>,
    detector: FeatureDetector,
    resolver: ConfigResolver,
    engine: ErrorEngine,
    cache: Arc<TransformCache>,
    incremental: IncrementalCompiler,
    memory: MemoryManager,
    base_config: PartialConfiguration,
    settings: OrchestratorSettings,
    debug: AtomicBool,
    counters: Counters,
}

impl TransformOrchestrator {
    pub fn builder(backend: Arc<dyn TransformBackend>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            backend,
            settings: OrchestratorSettings::default(),
            base_config: PartialConfiguration::default(),
            registry: ModuleRegistry::builtin(),
            sampler: Arc::new(ProcfsSampler),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn new(backend: Arc<dyn TransformBackend>) -> Self {
        Self::builder(backend).build()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn incremental(&self) -> &IncrementalCompiler {
        &self.incremental
    }

    pub fn register_module(&mut self, descriptor: ModuleDescriptor) {
        self.resolver.registry_mut().register(descriptor.clone());
        self.engine.registry_mut().register(descriptor);
    }

    fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn enable_debug_mode(&self, enabled: bool) {
        self.debug.store(enabled, Ordering::Relaxed);
    }

    pub fn detect(&self, source: &str, filename: Option<&str>) -> Detection {
        self.detector.detect(source, filename)
    }

    fn detection_for(&self, source: &str, options: &TransformOptions) -> Detection {
        if options.skip_detection && options.config.is_fully_explicit() {
            Detection::empty()
        } else {
            self.detector.detect(source, options.filename.as_deref())
        }
    }

    /// The configuration `transform` would use for this input.
    pub fn resolve_config(
        &self,
        source: &str,
        options: &TransformOptions,
    ) -> TransformConfiguration {
        let detection = self.detection_for(source, options);
        self.resolver.resolve(&detection, &options.config, &self.base_config)
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drops cached lowerings and every incremental chunk record.
    pub fn clear_cache(&self) {
        self.cache.clear();
        self.incremental.clear_all();
    }

    pub fn cleanup(&self) -> usize {
        self.cache.cleanup()
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    async fn invoke_backend(
        &self,
        source: &str,
        config: &TransformConfiguration,
    ) -> Result<BackendOutput, BackendError> {
        match self.settings.backend_timeout_ms {
            Some(ms) => {
                let invocation = self.backend.invoke(source, config);
                match tokio::time::timeout(Duration::from_millis(ms), invocation).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::Timeout(ms)),
                }
            }
            None => self.backend.invoke(source, config).await,
        }
    }

    fn performance(&self, start: Instant, cache_hit: bool) -> PerformanceInfo {
        let elapsed = start.elapsed();
        self.counters.record_time(elapsed);
        PerformanceInfo {
            transform_time_ms: elapsed.as_secs_f64() * 1000.0,
            cache_hit,
            memory_usage_bytes: self.memory.usage().used,
        }
    }

    fn metadata(
        &self,
        config: &TransformConfiguration,
        detection: &Detection,
    ) -> TransformMetadata {
        TransformMetadata {
            applied_modules: config.module_names(),
            warnings: Vec::new(),
            features: detection.feature_names(),
            frameworks: detection
                .frameworks
                .iter()
                .map(|f| f.framework_name.clone())
                .collect(),
            recovered: false,
            incremental: None,
        }
    }

    pub async fn transform(
        &self,
        source: &str,
        options: &TransformOptions,
    ) -> Result<TransformResult, DetailedError> {
        let start = Instant::now();
        let debug = self.is_debug();
        Counters::bump(&self.counters.transforms);

        let detection = self.detection_for(source, options);
        step!(
            debug,
            path = ?detection.path,
            features = detection.features.len(),
            frameworks = detection.frameworks.len(),
            "detection complete"
        );

        let config = self.resolver.resolve(&detection, &options.config, &self.base_config);
        step!(
            debug,
            modules = ?config.module_names(),
            target = %config.target_environment,
            "configuration resolved"
        );

        if !options.bypass_cache {
            if let Some(entry) = self.cache.get(source, &config) {
                Counters::bump(&self.counters.cache_hits);
                step!(debug, access_count = entry.access_count, "cache hit");
                return Ok(TransformResult {
                    lowered_text: entry.lowered_text,
                    metadata: entry.metadata,
                    performance: self.performance(start, true),
                });
            }
            step!(debug, "cache miss");
        }

        if self.memory.is_under_pressure() {
            warn!(
                used = self.memory.usage().used,
                threshold = self.memory.threshold_bytes(),
                "memory pressure, reclaiming"
            );
            self.memory.request_reclaim();
        }

        let mut metadata = self.metadata(&config, &detection);
        let outcome = match options.file_key.as_deref() {
            Some(file_key) if source.len() > self.settings.incremental_threshold_bytes => {
                Counters::bump(&self.counters.incremental_runs);
                let config_ref = &config;
                let incremental = self
                    .incremental
                    .compile(file_key, source, |chunk| async move {
                        self.invoke_backend(&chunk, config_ref)
                            .await
                            .map(|out| out.lowered_text)
                    })
                    .await;
                match incremental {
                    Ok((text, summary)) => {
                        step!(
                            debug,
                            changed = summary.changed_chunks,
                            total = summary.total_chunks,
                            "incremental compilation"
                        );
                        metadata.incremental = Some(summary);
                        Ok(BackendOutput::new(text))
                    }
                    Err(e) => {
                        warn!(error = %e, "incremental pass failed, retrying full text");
                        self.incremental.clear_file(file_key);
                        self.invoke_backend(source, &config).await
                    }
                }
            }
            _ => self.invoke_backend(source, &config).await,
        };

        match outcome {
            Ok(output) => {
                metadata.warnings.extend(output.warnings);
                if !options.bypass_cache {
                    self.cache.set(source, &config, &output.lowered_text, &metadata);
                }
                Ok(TransformResult {
                    lowered_text: output.lowered_text,
                    metadata,
                    performance: self.performance(start, false),
                })
            }
            Err(error) => {
                warn!(error = %error, backend = self.backend.name(), "backend failed");
                let mut detailed = self.engine.process(&error, source, &config, &detection);
                if debug {
                    detailed.debug = Some(DebugInfo {
                        detection_path: detection.path,
                        features: detection.feature_names(),
                        frameworks: metadata.frameworks.clone(),
                        configuration: config.canonical_json(),
                        backend_message: error.to_string(),
                    });
                }

                let performance = self.performance(start, false);
                match detailed.recovery_result.clone() {
                    Some(recovery) => {
                        Counters::bump(&self.counters.recoveries);
                        metadata.recovered = true;
                        metadata.warnings.extend(recovery.warnings);
                        Ok(TransformResult {
                            lowered_text: recovery.lowered_text,
                            metadata,
                            performance,
                        })
                    }
                    None => {
                        Counters::bump(&self.counters.failures);
                        detailed.performance = Some(performance);
                        Err(detailed)
                    }
                }
            }
        }
    }

    /// Human-readable report over an input, its configuration and an optional
    /// result or failure.
    pub fn create_diagnostic_report(
        &self,
        source: &str,
        config: &TransformConfiguration,
        result: Option<&TransformResult>,
        error: Option<&DetailedError>,
    ) -> String {
        let mut report = DiagnosticReport::new(source, config, self.is_debug());
        if let Some(result) = result {
            report = report.with_result(result);
        }
        if let Some(error) = error {
            report.add_error(error);
        }
        report.to_string()
    }
}
