//! Statistics layer - collection, caching, and persistence
//!
//! The [`StatisticsManager`] is process-wide and thread-safe. Table and
//! index statistics live in two independent mutex-guarded caches so
//! readers of disjoint maps don't contend; KV I/O always happens outside
//! either lock, which is reacquired only to insert. Collected statistics
//! persist as bincode blobs under `statistics/{table|index}/<name>` and
//! are advisory: any failure degrades silently to heuristic estimation.

pub mod histogram;
pub mod hll;
pub mod reservoir;

pub use histogram::{Bucket, Histogram};
pub use hll::HyperLogLog;
pub use reservoir::ReservoirSampler;

use crate::error::{Error, Result};
use crate::kv::{KvStore, Subspace};
use crate::schema::{Index, Schema};
use crate::store::{index_subspace, record_type_subspace, statistics_subspace};
use crate::tuple::{TupleElement, pack_elements};
use parking_lot::Mutex;
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on histogram bucket counts
pub const MAX_BUCKET_COUNT: usize = 10_000;
/// Upper bound on reservoir sizes
pub const MAX_RESERVOIR_SIZE: usize = 100_000;

/// Table-level statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    /// Record type name
    pub record_type: String,
    /// Total row count (exact at collection time)
    pub row_count: u64,
    /// Average serialized row size from the Bernoulli sample
    pub avg_row_size: f64,
    /// Sample rate used for row sizing
    pub sample_rate: f64,
    /// Collection time, epoch millis
    pub collected_at: i64,
}

/// Index-level statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Index name
    pub index_name: String,
    /// Total entries scanned
    pub entry_count: u64,
    /// HLL-estimated distinct indexed values
    pub distinct_values: u64,
    /// Entries whose indexed value is null
    pub null_count: u64,
    /// Smallest indexed value seen
    pub min: Option<TupleElement>,
    /// Largest indexed value seen
    pub max: Option<TupleElement>,
    /// Histogram over the leading indexed column
    pub histogram: Histogram,
    /// Collection time, epoch millis
    pub collected_at: i64,
}

/// Thread-safe statistics manager
pub struct StatisticsManager<S> {
    store: Arc<S>,
    root: Subspace,
    schema: Arc<Schema>,
    table_cache: Mutex<HashMap<String, Arc<TableStats>>>,
    index_cache: Mutex<HashMap<String, Arc<IndexStats>>>,
}

impl<S: KvStore> StatisticsManager<S> {
    /// New manager rooted at `root`
    pub fn new(store: Arc<S>, root: Subspace, schema: Arc<Schema>) -> Self {
        Self {
            store,
            root,
            schema,
            table_cache: Mutex::new(HashMap::new()),
            index_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Schema the manager consults for index lookup
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Cached or persisted table statistics, if any exist
    pub fn get_table_stats(&self, record_type: &str) -> Result<Option<Arc<TableStats>>> {
        if let Some(stats) = self.table_cache.lock().get(record_type) {
            return Ok(Some(stats.clone()));
        }
        // load outside the lock
        let key = self.table_stats_key(record_type);
        let loaded = {
            let txn = self.store.begin_read()?;
            txn.get(&key, true)?
        };
        let Some(bytes) = loaded else {
            return Ok(None);
        };
        let stats: TableStats =
            bincode::deserialize(&bytes).map_err(|e| Error::serialization(e.to_string()))?;
        let stats = Arc::new(stats);
        self.table_cache
            .lock()
            .insert(record_type.to_string(), stats.clone());
        Ok(Some(stats))
    }

    /// Cached or persisted index statistics, if any exist
    pub fn get_index_stats(&self, index_name: &str) -> Result<Option<Arc<IndexStats>>> {
        if let Some(stats) = self.index_cache.lock().get(index_name) {
            return Ok(Some(stats.clone()));
        }
        let key = self.index_stats_key(index_name);
        let loaded = {
            let txn = self.store.begin_read()?;
            txn.get(&key, true)?
        };
        let Some(bytes) = loaded else {
            return Ok(None);
        };
        let stats: IndexStats =
            bincode::deserialize(&bytes).map_err(|e| Error::serialization(e.to_string()))?;
        let stats = Arc::new(stats);
        self.index_cache
            .lock()
            .insert(index_name.to_string(), stats.clone());
        Ok(Some(stats))
    }

    /// Scan a record type and collect table statistics.
    /// `sample_rate` is the Bernoulli probability of including a row in
    /// the size sample; the row count itself is always exact.
    pub fn collect_table_stats(
        &self,
        record_type: &str,
        sample_rate: f64,
    ) -> Result<Arc<TableStats>> {
        if !(sample_rate > 0.0 && sample_rate <= 1.0) {
            return Err(Error::invalid_argument(format!(
                "sample rate must be in (0, 1], got {}",
                sample_rate
            )));
        }
        self.schema.record_type(record_type)?;

        let sub = record_type_subspace(&self.root, record_type);
        let (begin, end) = sub.range();
        let mut rng = StdRng::from_entropy();
        let mut row_count = 0u64;
        let mut sampled_rows = 0u64;
        let mut sampled_bytes = 0u64;
        {
            let txn = self.store.begin_read()?;
            for entry in txn.get_range(&begin, &end, true)? {
                let (_, value) = entry?;
                row_count += 1;
                if rng.gen_bool(sample_rate) {
                    sampled_rows += 1;
                    sampled_bytes += value.len() as u64;
                }
            }
        }

        let stats = Arc::new(TableStats {
            record_type: record_type.to_string(),
            row_count,
            avg_row_size: if sampled_rows > 0 {
                sampled_bytes as f64 / sampled_rows as f64
            } else {
                0.0
            },
            sample_rate,
            collected_at: chrono::Utc::now().timestamp_millis(),
        });
        debug!(record_type, rows = row_count, "collected table statistics");

        self.persist(&self.table_stats_key(record_type), &*stats)?;
        self.table_cache
            .lock()
            .insert(record_type.to_string(), stats.clone());
        Ok(stats)
    }

    /// Scan an index and collect value statistics over its leading
    /// column: HLL distinct count, reservoir-sampled histogram,
    /// min/max/null tracking.
    pub fn collect_index_stats(
        &self,
        index: &Index,
        bucket_count: usize,
        reservoir_size: usize,
    ) -> Result<Arc<IndexStats>> {
        if bucket_count == 0 || bucket_count > MAX_BUCKET_COUNT {
            return Err(Error::invalid_argument(format!(
                "bucket count must be in (0, {}], got {}",
                MAX_BUCKET_COUNT, bucket_count
            )));
        }
        if reservoir_size == 0 || reservoir_size > MAX_RESERVOIR_SIZE {
            return Err(Error::invalid_argument(format!(
                "reservoir size must be in (0, {}], got {}",
                MAX_RESERVOIR_SIZE, reservoir_size
            )));
        }

        let sub = index_subspace(&self.root, index);
        let (begin, end) = sub.range();
        let mut hll = HyperLogLog::new();
        let mut reservoir = ReservoirSampler::new(reservoir_size);
        let mut entry_count = 0u64;
        let mut null_count = 0u64;
        let mut min: Option<TupleElement> = None;
        let mut max: Option<TupleElement> = None;
        {
            let txn = self.store.begin_read()?;
            for entry in txn.get_range(&begin, &end, true)? {
                let (key, _) = entry?;
                entry_count += 1;
                let tuple = sub.unpack(&key)?;
                let Some(value) = tuple.first() else {
                    return Err(Error::internal(format!(
                        "empty entry tuple in index '{}'",
                        index.name
                    )));
                };
                if value.is_null() {
                    null_count += 1;
                    continue;
                }
                hll.add(&pack_elements(std::slice::from_ref(value)));
                reservoir.add(value.clone());
                if min.as_ref().is_none_or(|m| value < m) {
                    min = Some(value.clone());
                }
                if max.as_ref().is_none_or(|m| value > m) {
                    max = Some(value.clone());
                }
            }
        }

        let non_null = reservoir.seen();
        let histogram = Histogram::from_sample(reservoir.into_sample(), non_null, bucket_count);
        let stats = Arc::new(IndexStats {
            index_name: index.name.clone(),
            entry_count,
            distinct_values: hll.estimate(),
            null_count,
            min,
            max,
            histogram,
            collected_at: chrono::Utc::now().timestamp_millis(),
        });
        debug!(
            index = index.name.as_str(),
            entries = entry_count,
            distinct = stats.distinct_values,
            "collected index statistics"
        );

        self.persist(&self.index_stats_key(&index.name), &*stats)?;
        self.index_cache
            .lock()
            .insert(index.name.clone(), stats.clone());
        Ok(stats)
    }

    /// Drop cached entries without touching persisted blobs
    pub fn clear_cache(&self) {
        self.table_cache.lock().clear();
        self.index_cache.lock().clear();
    }

    /// Drop caches and delete every persisted statistics blob
    pub fn clear_all(&self) -> Result<()> {
        self.clear_cache();
        let (begin, end) = statistics_subspace(&self.root).range();
        self.store.with_write(|txn| txn.delete_range(&begin, &end))
    }

    /// Index stats for the index whose leading field is `field`, used by
    /// selectivity estimation. Failures degrade to `None`.
    pub fn leading_field_stats(
        &self,
        record_type: &str,
        field: &str,
    ) -> Option<Arc<IndexStats>> {
        let def = self.schema.record_type(record_type).ok()?;
        let index = def
            .indexes
            .iter()
            .find(|i| i.is_scannable() && i.leading_field() == Some(field))?;
        match self.get_index_stats(&index.name) {
            Ok(stats) => stats,
            Err(e) => {
                warn!(
                    index = index.name.as_str(),
                    error = %e,
                    "statistics load failed, falling back to heuristics"
                );
                None
            }
        }
    }

    fn persist(&self, key: &[u8], value: &impl Serialize) -> Result<()> {
        let bytes = bincode::serialize(value).map_err(|e| Error::serialization(e.to_string()))?;
        self.store.with_write(|txn| txn.put(key, &bytes))
    }

    fn table_stats_key(&self, record_type: &str) -> Vec<u8> {
        statistics_subspace(&self.root).pack(&[
            TupleElement::String("table".into()),
            TupleElement::String(record_type.to_string()),
        ])
    }

    fn index_stats_key(&self, index_name: &str) -> Vec<u8> {
        statistics_subspace(&self.root).pack(&[
            TupleElement::String("index".into()),
            TupleElement::String(index_name.to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::LmdbStore;
    use crate::record::{MapRecord, MapRecordAccess};
    use crate::schema::KeyExpression;
    use crate::store::RecordStore;
    use crate::schema::Index as SchemaIndex;

    fn fixture() -> (
        tempfile::TempDir,
        RecordStore<LmdbStore, MapRecord>,
        StatisticsManager<LmdbStore>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(LmdbStore::open_with_map_size(dir.path(), 32 * 1024 * 1024).unwrap());
        let schema = Arc::new(
            Schema::builder()
                .record_type(
                    "Person",
                    KeyExpression::Field("id".into()),
                    vec![SchemaIndex::value("person_city", "Person", ["city"])],
                )
                .build()
                .unwrap(),
        );
        let store = RecordStore::new(
            kv.clone(),
            Subspace::root(),
            schema.clone(),
            Arc::new(MapRecordAccess),
        );
        let stats = StatisticsManager::new(kv, Subspace::root(), schema);
        (dir, store, stats)
    }

    fn seed_people(store: &RecordStore<LmdbStore, MapRecord>, n: i64) {
        for i in 0..n {
            let city = if i % 10 == 0 { "NYC" } else { "Elsewhere" };
            store
                .save(
                    &MapRecord::new("Person")
                        .with_field("id", i)
                        .with_field("city", city),
                )
                .unwrap();
        }
    }

    #[test]
    fn test_collect_table_stats_counts_all_rows() {
        let (_dir, store, stats) = fixture();
        seed_people(&store, 200);
        let table = stats.collect_table_stats("Person", 0.5).unwrap();
        assert_eq!(table.row_count, 200);
        assert!(table.avg_row_size > 0.0);
    }

    #[test]
    fn test_sample_rate_validation() {
        let (_dir, _store, stats) = fixture();
        assert!(stats.collect_table_stats("Person", 0.0).is_err());
        assert!(stats.collect_table_stats("Person", 1.5).is_err());
    }

    #[test]
    fn test_collect_index_stats() {
        let (_dir, store, stats) = fixture();
        seed_people(&store, 200);
        let index = stats
            .schema()
            .record_type("Person")
            .unwrap()
            .index("person_city")
            .unwrap()
            .clone();
        let idx_stats = stats.collect_index_stats(&index, 100, 1000).unwrap();
        assert_eq!(idx_stats.entry_count, 200);
        assert_eq!(idx_stats.null_count, 0);
        assert_eq!(idx_stats.distinct_values, 2);
        assert_eq!(idx_stats.min, Some(TupleElement::String("Elsewhere".into())));
        assert_eq!(idx_stats.max, Some(TupleElement::String("NYC".into())));

        let nyc_sel = idx_stats
            .histogram
            .estimate(crate::filter::CompareOp::Eq, &TupleElement::String("NYC".into()))
            .unwrap();
        assert!((0.05..=0.15).contains(&nyc_sel), "got {}", nyc_sel);
    }

    #[test]
    fn test_bucket_and_reservoir_validation() {
        let (_dir, _store, stats) = fixture();
        let index = SchemaIndex::value("person_city", "Person", ["city"]);
        assert!(stats.collect_index_stats(&index, 0, 100).is_err());
        assert!(stats.collect_index_stats(&index, 100, 0).is_err());
        assert!(
            stats
                .collect_index_stats(&index, MAX_BUCKET_COUNT + 1, 100)
                .is_err()
        );
        assert!(
            stats
                .collect_index_stats(&index, 100, MAX_RESERVOIR_SIZE + 1)
                .is_err()
        );
    }

    #[test]
    fn test_persistence_survives_cache_clear() {
        let (_dir, store, stats) = fixture();
        seed_people(&store, 50);
        stats.collect_table_stats("Person", 1.0).unwrap();
        stats.clear_cache();
        let reloaded = stats.get_table_stats("Person").unwrap().unwrap();
        assert_eq!(reloaded.row_count, 50);
    }

    #[test]
    fn test_clear_all_removes_persisted_blobs() {
        let (_dir, store, stats) = fixture();
        seed_people(&store, 10);
        stats.collect_table_stats("Person", 1.0).unwrap();
        stats.clear_all().unwrap();
        assert!(stats.get_table_stats("Person").unwrap().is_none());
    }

    #[test]
    fn test_missing_stats_is_none_not_error() {
        let (_dir, _store, stats) = fixture();
        assert!(stats.get_table_stats("Person").unwrap().is_none());
        assert!(stats.get_index_stats("person_city").unwrap().is_none());
    }
}
