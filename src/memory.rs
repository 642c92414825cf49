//! Memory sampling and pressure-triggered reclaim.

use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub used: u64,
    pub total: u64,
    pub percentage: f64,
}

impl MemoryUsage {
    pub fn new(used: u64, total: u64) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        Self {
            used,
            total,
            percentage,
        }
    }
}

/// Source of process memory figures. `None` means the platform offers none.
pub trait MemorySampler: Send + Sync {
    fn sample(&self) -> Option<MemoryUsage>;
}

/// Reads resident set size and total memory from procfs.
#[derive(Debug, Default)]
pub struct ProcfsSampler;

fn read_kib(path: &str, field: &str) -> Option<u64> {
    let text = fs::read_to_string(path).ok()?;
    let line = text.lines().find(|l| l.starts_with(field))?;
    let value = line[field.len()..].trim().trim_end_matches("kB").trim();
    value.parse::<u64>().ok().map(|kib| kib * 1024)
}

impl MemorySampler for ProcfsSampler {
    fn sample(&self) -> Option<MemoryUsage> {
        let used = read_kib("/proc/self/status", "VmRSS:")?;
        let total = read_kib("/proc/meminfo", "MemTotal:").unwrap_or(0);
        Some(MemoryUsage::new(used, total))
    }
}

/// Sampler returning a settable figure.
#[derive(Debug, Default)]
pub struct FixedSampler {
    usage: Mutex<Option<MemoryUsage>>,
}

impl FixedSampler {
    pub fn new(used: u64, total: u64) -> Self {
        Self {
            usage: Mutex::new(Some(MemoryUsage::new(used, total))),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set(&self, used: u64, total: u64) {
        let mut usage = self.usage.lock().unwrap_or_else(PoisonError::into_inner);
        *usage = Some(MemoryUsage::new(used, total));
    }
}

impl MemorySampler for FixedSampler {
    fn sample(&self) -> Option<MemoryUsage> {
        *self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type ReclaimHook = Box<dyn Fn() + Send + Sync>;

pub struct MemoryManager {
    sampler: Arc<dyn MemorySampler>,
    threshold_bytes: u64,
    hooks: Mutex<Vec<ReclaimHook>>,
}

impl MemoryManager {
    pub fn new(sampler: Arc<dyn MemorySampler>, threshold_bytes: u64) -> Self {
        Self {
            sampler,
            threshold_bytes,
            hooks: Mutex::new(Vec::new()),
        }
    }

    pub fn threshold_bytes(&self) -> u64 {
        self.threshold_bytes
    }

    /// Current usage; zeros when the sampler has nothing to report.
    pub fn usage(&self) -> MemoryUsage {
        self.sampler.sample().unwrap_or_default()
    }

    pub fn is_under_pressure(&self) -> bool {
        match self.sampler.sample() {
            Some(usage) => usage.used > self.threshold_bytes,
            None => false,
        }
    }

    pub fn register_reclaim_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(hook));
    }

    /// Runs every reclaim hook. A panicking hook is logged and skipped.
    pub fn request_reclaim(&self) -> usize {
        let hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ran = 0;
        for hook in hooks.iter() {
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook())) {
                Ok(()) => ran += 1,
                Err(_) => warn!("reclaim hook panicked"),
            }
        }
        debug!(hooks = ran, "memory reclaim requested");
        ran
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(Arc::new(ProcfsSampler), 512 * 1024 * 1024)
    }
}
