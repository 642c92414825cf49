use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::model::{TransformConfiguration, TransformMetadata};

pub fn compute_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `hash(source) ":" hash(canonical configuration)`.
pub fn cache_key(source: &str, config: &TransformConfiguration) -> String {
    format!(
        "{}:{}",
        compute_hash(source),
        compute_hash(&config.canonical_json())
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// Millisecond wall clock. Injected so age limits can be tested.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRIES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub lowered_text: String,
    pub metadata: TransformMetadata,
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub access_count: u64,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheLimits {
    pub max_bytes: usize,
    pub max_age_ms: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_bytes: 50 * 1024 * 1024,
            max_age_ms: 30 * 60 * 1000,
        }
    }
}

struct Slot {
    entry: CacheEntry,
    /// Monotonic access sequence; breaks ties between equal timestamps.
    seq: u64,
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<String, Slot>,
    total_size: usize,
    hits: u64,
    misses: u64,
    seq: u64,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.total_size -= slot.entry.size_bytes;
        Some(slot)
    }

    fn lru_key(&self) -> Option<String> {
        self.slots
            .iter()
            .min_by_key(|(_, s)| (s.entry.last_accessed_at, s.seq))
            .map(|(k, _)| k.clone())
    }

    /// Evicts least recently used entries until `total_size <= limit`.
    fn evict_to(&mut self, limit: usize) -> usize {
        let mut evicted = 0;
        while self.total_size > limit {
            let Some(key) = self.lru_key() else { break };
            self.remove(&key);
            evicted += 1;
        }
        evicted
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════════

/// Content-addressed store of lowered output, bounded by total bytes and entry
/// age. Callers always receive clones.
pub struct TransformCache {
    limits: CacheLimits,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState>,
}

impl TransformCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_clock(limits: CacheLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: u64) -> bool {
        now.saturating_sub(entry.created_at) > self.limits.max_age_ms
    }

    pub fn get(&self, source: &str, config: &TransformConfiguration) -> Option<CacheEntry> {
        self.get_by_key(&cache_key(source, config))
    }

    pub fn get_by_key(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now_ms();
        let mut state = self.state();

        let expired = match state.slots.get(key) {
            Some(slot) => self.is_expired(&slot.entry, now),
            None => {
                state.misses += 1;
                return None;
            }
        };
        if expired {
            state.remove(key);
            state.misses += 1;
            debug!(key, "cache entry expired");
            return None;
        }

        let seq = state.next_seq();
        state.hits += 1;
        let slot = state.slots.get_mut(key)?;
        slot.seq = seq;
        slot.entry.last_accessed_at = now;
        slot.entry.access_count += 1;
        Some(slot.entry.clone())
    }

    /// Stores a lowering. Returns `false` when the entry alone exceeds the
    /// byte budget and was not stored.
    pub fn set(
        &self,
        source: &str,
        config: &TransformConfiguration,
        lowered_text: &str,
        metadata: &TransformMetadata,
    ) -> bool {
        let key = cache_key(source, config);
        let metadata_size = serde_json::to_string(metadata).map(|s| s.len()).unwrap_or(0);
        let size_bytes = key.len() + lowered_text.len() + metadata_size;
        if size_bytes > self.limits.max_bytes {
            debug!(
                size_bytes,
                max = self.limits.max_bytes,
                "entry exceeds cache budget, not stored"
            );
            return false;
        }

        let now = self.clock.now_ms();
        let mut state = self.state();
        state.remove(&key);
        let evicted = state.evict_to(self.limits.max_bytes - size_bytes);
        if evicted > 0 {
            debug!(evicted, "evicted cache entries");
        }

        let seq = state.next_seq();
        state.total_size += size_bytes;
        state.slots.insert(
            key.clone(),
            Slot {
                entry: CacheEntry {
                    key,
                    lowered_text: lowered_text.to_string(),
                    metadata: metadata.clone(),
                    created_at: now,
                    last_accessed_at: now,
                    access_count: 0,
                    size_bytes,
                },
                seq,
            },
        );
        true
    }

    /// Purges aged entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state();
        let expired: Vec<String> = state
            .slots
            .iter()
            .filter(|(_, s)| self.is_expired(&s.entry, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    /// Evicts least recently used entries until the cache holds at most
    /// `fraction` of its current size.
    pub fn shrink(&self, fraction: f64) -> usize {
        let mut state = self.state();
        let limit = (state.total_size as f64 * fraction.clamp(0.0, 1.0)) as usize;
        state.evict_to(limit)
    }

    /// Drops every entry. Hit and miss counters are kept.
    pub fn clear(&self) {
        let mut state = self.state();
        state.slots.clear();
        state.total_size = 0;
    }

    pub fn len(&self) -> usize {
        self.state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        let lookups = state.hits + state.misses;
        let (hit_rate, miss_rate) = if lookups == 0 {
            (0.0, 0.0)
        } else {
            (
                state.hits as f64 / lookups as f64,
                state.misses as f64 / lookups as f64,
            )
        };
        CacheStats {
            total_entries: state.slots.len(),
            total_size: state.total_size,
            hits: state.hits,
            misses: state.misses,
            hit_rate,
            miss_rate,
        }
    }
}

impl Default for TransformCache {
    fn default() -> Self {
        Self::new(CacheLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModuleSpec;
    use crate::registry::KnownModule;
    use proptest::prelude::*;
    use serde_json::json;

    fn config() -> TransformConfiguration {
        TransformConfiguration {
            modules: vec![
                ModuleSpec::new(KnownModule::PresetReact).with_option("runtime", json!("classic")),
            ],
            ..Default::default()
        }
    }

    fn cache_with(max_bytes: usize, max_age_ms: u64) -> (TransformCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let cache = TransformCache::with_clock(
            CacheLimits {
                max_bytes,
                max_age_ms,
            },
            clock.clone(),
        );
        (cache, clock)
    }

    #[test]
    fn test_round_trip() {
        let (cache, _) = cache_with(1 << 20, 60_000);
        let meta = TransformMetadata::default();
        assert!(cache.set("const x = 1;", &config(), "var x = 1;", &meta));

        let entry = cache.get("const x = 1;", &config()).unwrap();
        assert_eq!(entry.lowered_text, "var x = 1;");
        assert_eq!(entry.access_count, 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_option_change_misses() {
        let (cache, _) = cache_with(1 << 20, 60_000);
        cache.set("<a/>", &config(), "h('a')", &TransformMetadata::default());

        let mut other = config();
        other.modules[0].options.insert("runtime".into(), json!("automatic"));
        assert!(cache.get("<a/>", &other).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_aged_entries_are_absent() {
        let (cache, clock) = cache_with(1 << 20, 500);
        cache.set("a", &config(), "a", &TransformMetadata::default());
        cache.set("b", &config(), "b", &TransformMetadata::default());
        clock.advance(501);
        assert!(cache.get("a", &config()).is_none());
        assert_eq!(cache.cleanup(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_prefers_untouched_entries() {
        let metadata_len = serde_json::to_string(&TransformMetadata::default())
            .unwrap()
            .len();
        let entry_len = cache_key("a", &config()).len() + 1 + metadata_len;
        let (cache, clock) = cache_with(entry_len * 2, 60_000);
        let meta = TransformMetadata::default();

        cache.set("a", &config(), "1", &meta);
        clock.advance(1);
        cache.set("b", &config(), "2", &meta);
        clock.advance(1);
        assert!(cache.get("a", &config()).is_some());
        clock.advance(1);
        cache.set("c", &config(), "3", &meta);

        assert!(cache.get("b", &config()).is_none());
        assert!(cache.get("a", &config()).is_some());
        assert!(cache.get("c", &config()).is_some());
    }

    #[test]
    fn test_oversized_entry_not_stored() {
        let (cache, _) = cache_with(64, 60_000);
        let big = "x".repeat(1000);
        assert!(!cache.set("src", &config(), &big, &TransformMetadata::default()));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_keeps_counters() {
        let (cache, _) = cache_with(1 << 20, 60_000);
        cache.set("a", &config(), "a", &TransformMetadata::default());
        cache.get("a", &config());
        cache.get("z", &config());
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.total_size, 0);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_shrink_halves_size() {
        let (cache, clock) = cache_with(1 << 20, 60_000);
        for i in 0..10 {
            cache.set(&format!("src{}", i), &config(), "out", &TransformMetadata::default());
            clock.advance(1);
        }
        let before = cache.stats().total_size;
        cache.shrink(0.5);
        assert!(cache.stats().total_size <= before / 2);
        assert!(cache.get("src9", &config()).is_some());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_total_size_never_exceeds_budget(
            budget in 200usize..4_000,
            ops in prop::collection::vec((0u8..32, 0usize..600, any::<bool>()), 1..80),
        ) {
            let (cache, clock) = cache_with(budget, 60_000);
            let meta = TransformMetadata::default();
            for (id, len, read) in ops {
                let source = format!("src-{}", id);
                if read {
                    cache.get(&source, &config());
                } else {
                    cache.set(&source, &config(), &"y".repeat(len), &meta);
                }
                clock.advance(1);
                let stats = cache.stats();
                prop_assert!(stats.total_size <= budget);
            }
        }
    }
}
