//! Render result caching.
//!
//! Rendered SQL depends only on the business type, the validated parameter
//! values (through conditional blocks) and the dynamic clauses, so those are
//! hashed into a [`Fingerprint`] and the whole [`RenderResult`] is cached
//! under it.
//!
//! ## Design
//!
//! - **Cache Key**: SHA-256 over business type, parameters sorted by name,
//!   group fields sorted and de-duplicated, sort entries in request order
//! - **Concurrent Access**: DashMap storage with atomic hit/miss counters
//! - **Clear**: bumps an epoch; entries tagged with an older epoch are never
//!   served, so a store racing a clear cannot bring pre-clear results back
//! - **Eviction**: none besides [`RenderCache::clear`]

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::clause::{GroupClause, SortClause};
use crate::params::ValidatedParams;
use crate::render::RenderResult;

/// Cache key for one logical query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(
        biz_type: &str,
        params: &ValidatedParams,
        group: Option<&GroupClause>,
        sort: Option<&SortClause>,
    ) -> Self {
        let mut hasher = Sha256::new();
        feed(&mut hasher, biz_type);

        let mut sorted: Vec<_> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));
        hasher.update(b"params");
        for (name, value) in sorted {
            feed(&mut hasher, name);
            feed(&mut hasher, value.param_type().as_str());
            feed(&mut hasher, &value.canonical());
        }

        hasher.update(b"group");
        if let Some(group) = group {
            for field in group.canonical_fields() {
                feed(&mut hasher, field);
            }
        }

        hasher.update(b"sort");
        if let Some(sort) = sort {
            for (field, direction) in sort.entries() {
                feed(&mut hasher, field);
                feed(&mut hasher, direction.as_sql());
            }
        }

        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Length-prefixed so adjacent components cannot run into each other.
fn feed(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_le_bytes());
    hasher.update(part.as_bytes());
}

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(RenderResult),
    /// Miss; pass `epoch` back to [`RenderCache::store`].
    Miss { epoch: u64 },
}

/// A point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    #[serde(rename = "size")]
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub enabled: bool,
}

struct CacheEntry {
    result: RenderResult,
    epoch: u64,
}

/// Thread-safe render cache.
pub struct RenderCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    enabled: bool,
}

impl std::fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCache")
            .field("size", &self.entries.len())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            epoch: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            enabled: true,
        }
    }

    /// Create a disabled cache (no-op).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current clear generation.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Look up a render result, counting the hit or miss.
    pub fn lookup(&self, key: &Fingerprint) -> CacheLookup {
        let epoch = self.epoch.load(Ordering::Acquire);
        if !self.enabled {
            return CacheLookup::Miss { epoch };
        }

        if let Some(entry) = self.entries.get(key) {
            if entry.epoch == epoch {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return CacheLookup::Hit(entry.result.clone());
            }
            drop(entry); // Release read lock before removing
            self.entries.remove_if(key, |_, e| e.epoch != epoch);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        CacheLookup::Miss { epoch }
    }

    /// Store a render result produced after a miss at `epoch`.
    ///
    /// Results from before the latest [`clear`](Self::clear) are dropped.
    pub fn store(&self, key: Fingerprint, result: RenderResult, epoch: u64) {
        if !self.enabled || epoch != self.epoch.load(Ordering::Acquire) {
            return;
        }
        self.entries.insert(key, CacheEntry { result, epoch });
    }

    /// Remove all entries and reset the hit/miss counters.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Calculate hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;

        if total == 0.0 { 0.0 } else { hits / total }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            hit_ratio: self.hit_ratio(),
            enabled: self.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clause::{SortParam, build_group_clause, build_sort_clause};
    use crate::params::ParamValue;
    use std::time::Duration;

    fn params(pairs: &[(&str, ParamValue)]) -> ValidatedParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn result(sql: &str) -> RenderResult {
        RenderResult {
            sql: sql.to_string(),
            binds: Default::default(),
            render_duration: Duration::from_micros(5),
        }
    }

    fn miss_epoch(lookup: CacheLookup) -> u64 {
        match lookup {
            CacheLookup::Miss { epoch } => epoch,
            CacheLookup::Hit(_) => panic!("expected a miss"),
        }
    }

    #[test]
    fn fingerprint_ignores_parameter_order() {
        let a = params(&[("x", ParamValue::Integer(1)), ("y", ParamValue::Text("b".into()))]);
        let b = params(&[("y", ParamValue::Text("b".into())), ("x", ParamValue::Integer(1))]);
        assert_eq!(
            Fingerprint::compute("t", &a, None, None),
            Fingerprint::compute("t", &b, None, None)
        );
    }

    #[test]
    fn fingerprint_distinguishes_values_types_and_biz_type() {
        let base = Fingerprint::compute("t", &params(&[("x", ParamValue::Integer(1))]), None, None);
        assert_ne!(
            base,
            Fingerprint::compute("t", &params(&[("x", ParamValue::Integer(2))]), None, None)
        );
        assert_ne!(
            base,
            Fingerprint::compute("t", &params(&[("x", ParamValue::Text("1".into()))]), None, None)
        );
        assert_ne!(
            base,
            Fingerprint::compute("u", &params(&[("x", ParamValue::Integer(1))]), None, None)
        );
        assert_eq!(base.as_str().len(), 64);
    }

    #[test]
    fn fingerprint_group_is_a_set_and_sort_is_a_sequence() {
        let p = ValidatedParams::default();
        let g1 = build_group_clause(Some("a,b")).unwrap();
        let g2 = build_group_clause(Some("b,a,b")).unwrap();
        assert_eq!(
            Fingerprint::compute("t", &p, g1.as_ref(), None),
            Fingerprint::compute("t", &p, g2.as_ref(), None)
        );

        let a = SortParam::new("a", None);
        let b = SortParam::new("b", None);
        let s1 = build_sort_clause(&[a.clone(), b.clone()]).unwrap();
        let s2 = build_sort_clause(&[b, a]).unwrap();
        assert_ne!(
            Fingerprint::compute("t", &p, None, s1.as_ref()),
            Fingerprint::compute("t", &p, None, s2.as_ref())
        );
    }

    #[test]
    fn miss_then_hit_and_stats() {
        let cache = RenderCache::new();
        let key = Fingerprint::compute("t", &ValidatedParams::default(), None, None);
        assert_eq!(cache.hit_ratio(), 0.0);

        let epoch = miss_epoch(cache.lookup(&key));
        cache.store(key.clone(), result("SELECT 1"), epoch);
        assert_eq!(cache.lookup(&key), CacheLookup::Hit(result("SELECT 1")));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.5);
    }

    #[test]
    fn clear_resets_entries_and_counters() {
        let cache = RenderCache::new();
        let key = Fingerprint::compute("t", &ValidatedParams::default(), None, None);
        let epoch = miss_epoch(cache.lookup(&key));
        cache.store(key.clone(), result("SELECT 1"), epoch);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 0);
        assert_eq!(cache.stats().misses, 0);
        assert!(matches!(cache.lookup(&key), CacheLookup::Miss { .. }));
    }

    #[test]
    fn store_from_before_clear_is_dropped() {
        let cache = RenderCache::new();
        let key = Fingerprint::compute("t", &ValidatedParams::default(), None, None);
        let stale = miss_epoch(cache.lookup(&key));

        cache.clear();
        cache.store(key.clone(), result("SELECT stale"), stale);
        assert!(cache.is_empty());
        assert!(matches!(cache.lookup(&key), CacheLookup::Miss { .. }));
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = RenderCache::disabled();
        let key = Fingerprint::compute("t", &ValidatedParams::default(), None, None);
        let epoch = miss_epoch(cache.lookup(&key));
        cache.store(key.clone(), result("SELECT 1"), epoch);
        assert!(matches!(cache.lookup(&key), CacheLookup::Miss { .. }));
        assert!(cache.is_empty());
        assert!(!cache.stats().enabled);
    }

    #[test]
    fn concurrent_lookups_keep_counters_and_entries_consistent() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 500;
        const KEYS: usize = 10;

        let cache = RenderCache::new();
        let keys: Vec<_> = (0..KEYS)
            .map(|k| {
                let p = params(&[("k", ParamValue::Integer(k as i64))]);
                (Fingerprint::compute("t", &p, None, None), format!("SELECT {k}"))
            })
            .collect();

        std::thread::scope(|scope| {
            for t in 0..THREADS {
                let cache = &cache;
                let keys = &keys;
                scope.spawn(move || {
                    for round in 0..ROUNDS {
                        let (key, sql) = &keys[(t + round) % KEYS];
                        match cache.lookup(key) {
                            CacheLookup::Hit(hit) => assert_eq!(&hit.sql, sql),
                            CacheLookup::Miss { epoch } => {
                                cache.store(key.clone(), result(sql), epoch)
                            }
                        }
                    }
                });
            }
        });

        let stats = cache.stats();
        assert_eq!(stats.hits + stats.misses, (THREADS * ROUNDS) as u64);
        assert!(stats.misses >= KEYS as u64);
        assert_eq!(stats.entries, KEYS);
        for (key, sql) in &keys {
            match cache.lookup(key) {
                CacheLookup::Hit(hit) => assert_eq!(&hit.sql, sql),
                CacheLookup::Miss { .. } => panic!("entry lost"),
            }
        }
    }
}
