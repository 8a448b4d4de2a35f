//! Plan cache
//!
//! Compiled plans keyed by a canonical query fingerprint hashed with
//! xxh3 under a fixed seed: the same query string hashes identically in
//! every process, so a warm store means a warm cache. Platform hashers
//! randomize per process and would miss on every startup.
//!
//! Entries remember the schema version they were planned against; a
//! version bump invalidates them lazily on lookup. Eviction drops the
//! oldest insertion once the cache is full.

use crate::cost::QueryCost;
use crate::filter::Filter;
use crate::plan::{QueryPlan, SortKey};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;
use xxhash_rust::xxh3::xxh3_64_with_seed;

const CACHE_KEY_SEED: u64 = 0x6c61_7474_6963_65;

/// Default bound on cached plans
pub const DEFAULT_MAX_CACHED_PLANS: usize = 1_000;

/// Stable fingerprint of a query: record type, canonical filter key,
/// sort spec, and limit
pub fn query_cache_key(
    record_type: &str,
    filter: Option<&Filter>,
    sort: &[SortKey],
    limit: Option<usize>,
) -> u64 {
    let filter_key = filter.map(|f| f.cache_key()).unwrap_or_default();
    let sort_key: Vec<String> = sort
        .iter()
        .map(|k| {
            format!("{}:{}", k.field, if k.ascending { "asc" } else { "desc" })
        })
        .collect();
    let canonical = format!(
        "{}|{}|sort:{}|limit:{}",
        record_type,
        filter_key,
        sort_key.join(","),
        limit.map(|l| l.to_string()).unwrap_or_default()
    );
    xxh3_64_with_seed(canonical.as_bytes(), CACHE_KEY_SEED)
}

struct CacheEntry {
    plan: Arc<QueryPlan>,
    cost: QueryCost,
    metadata_version: u64,
    inserted_seq: u64,
    inserted_at: Instant,
    hit_count: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<u64, CacheEntry>,
    insert_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCacheStats {
    /// Entries currently cached
    pub size: usize,
    /// Lookup hits
    pub hits: u64,
    /// Lookup misses (including version invalidations)
    pub misses: u64,
    /// Entries evicted by the size bound
    pub evictions: u64,
}

/// Thread-safe bounded plan cache
pub struct PlanCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHED_PLANS)
    }
}

impl PlanCache {
    /// Cache bounded to `max_size` entries
    pub fn new(max_size: usize) -> Self {
        Self { inner: Mutex::new(CacheInner::default()), max_size: max_size.max(1) }
    }

    /// Look up a plan. A schema-version mismatch drops the stale entry
    /// and reports a miss.
    pub fn get(&self, key: u64, metadata_version: u64) -> Option<Arc<QueryPlan>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let current = inner
            .entries
            .get(&key)
            .map(|e| e.metadata_version == metadata_version);
        match current {
            Some(true) => {
                let entry = inner.entries.get_mut(&key).expect("entry just seen");
                entry.hit_count += 1;
                let plan = entry.plan.clone();
                inner.hits += 1;
                Some(plan)
            }
            Some(false) => {
                trace!(key, "plan cache entry invalidated by schema version");
                inner.entries.remove(&key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert a plan, evicting the oldest insertion when full
    pub fn put(&self, key: u64, plan: Arc<QueryPlan>, cost: QueryCost, metadata_version: u64) {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_size {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_seq)
                .map(|(k, _)| *k)
            {
                inner.entries.remove(&oldest);
                inner.evictions += 1;
            }
        }
        inner.insert_seq += 1;
        let seq = inner.insert_seq;
        inner.entries.insert(
            key,
            CacheEntry {
                plan,
                cost,
                metadata_version,
                inserted_seq: seq,
                inserted_at: Instant::now(),
                hit_count: 0,
            },
        );
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Counters snapshot
    pub fn stats(&self) -> PlanCacheStats {
        let inner = self.inner.lock();
        PlanCacheStats {
            size: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    /// Hit count of one entry, if cached
    pub fn hit_count(&self, key: u64) -> Option<u64> {
        self.inner.lock().entries.get(&key).map(|e| e.hit_count)
    }

    /// Estimated cost recorded with one entry, if cached
    pub fn cached_cost(&self, key: u64) -> Option<QueryCost> {
        self.inner.lock().entries.get(&key).map(|e| e.cost)
    }

    /// Age of one entry, if cached
    pub fn entry_age(&self, key: u64) -> Option<std::time::Duration> {
        self.inner.lock().entries.get(&key).map(|e| e.inserted_at.elapsed())
    }
}
