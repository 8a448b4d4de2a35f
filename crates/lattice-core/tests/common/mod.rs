//! Shared test fixture: an LMDB-backed record store with a small schema,
//! a statistics manager, and a planner, plus a read-counting transaction
//! wrapper for I/O assertions.

use lattice_core::kv::{KeySelector, KvIter, KvRead, KvStore};
use lattice_core::{
    ExecutionContext, ExecutionLimits, LmdbStore, MapRecord, MapRecordAccess, QueryPlan,
    QueryPlanner, RecordStore, Result, Schema, StatisticsManager, Subspace, VectorRuntime,
    execute,
};
use std::cell::Cell;
use std::sync::Arc;

pub struct Fixture {
    _dir: tempfile::TempDir,
    pub kv: Arc<LmdbStore>,
    pub schema: Arc<Schema>,
    pub store: RecordStore<LmdbStore, MapRecord>,
    pub stats: Arc<StatisticsManager<LmdbStore>>,
    pub planner: QueryPlanner<LmdbStore>,
    pub vectors: VectorRuntime,
    pub limits: ExecutionLimits,
    pub root: Subspace,
    pub access: MapRecordAccess,
}

impl Fixture {
    pub fn new(schema: Schema) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let kv = Arc::new(
            LmdbStore::open_with_map_size(dir.path(), 64 * 1024 * 1024).expect("open lmdb"),
        );
        let schema = Arc::new(schema);
        let root = Subspace::root();
        let store = RecordStore::new(
            kv.clone(),
            root.clone(),
            schema.clone(),
            Arc::new(MapRecordAccess),
        );
        let stats = Arc::new(StatisticsManager::new(kv.clone(), root.clone(), schema.clone()));
        let planner = QueryPlanner::new(schema.clone(), stats.clone());
        Fixture {
            _dir: dir,
            kv,
            schema,
            store,
            stats,
            planner,
            vectors: VectorRuntime::default(),
            limits: ExecutionLimits::default(),
            root,
            access: MapRecordAccess,
        }
    }

    pub fn ctx(&self) -> ExecutionContext<'_, MapRecord> {
        ExecutionContext {
            root: &self.root,
            schema: &self.schema,
            access: &self.access,
            limits: &self.limits,
            vectors: &self.vectors,
        }
    }

    /// Execute a plan and collect its records
    pub fn run(&self, plan: &QueryPlan) -> Result<Vec<MapRecord>> {
        let txn = self.kv.begin_read()?;
        execute(plan, self.ctx(), &*txn, true)?.collect_records()
    }

    /// Execute a plan over a counting transaction; returns the records
    /// and the number of KV reads performed
    pub fn run_counting(&self, plan: &QueryPlan) -> Result<(Vec<MapRecord>, u64)> {
        let txn = self.kv.begin_read()?;
        let counting = CountingTxn { inner: &*txn, reads: Cell::new(0) };
        let records = execute(plan, self.ctx(), &counting, true)?.collect_records()?;
        let reads = counting.reads.get();
        Ok((records, reads))
    }

    /// Integer field of a record, for assertions
    pub fn int_field(record: &MapRecord, field: &str) -> i64 {
        match record.field(field) {
            Some(lattice_core::TupleElement::Int(v)) => *v,
            other => panic!("field {} is not an int: {:?}", field, other),
        }
    }

    /// Sorted ids of the given records
    pub fn ids(records: &[MapRecord]) -> Vec<i64> {
        let mut ids: Vec<i64> = records.iter().map(|r| Self::int_field(r, "id")).collect();
        ids.sort_unstable();
        ids
    }
}

/// Counts point reads and range-entry reads flowing through a txn
pub struct CountingTxn<'a> {
    inner: &'a dyn KvRead,
    pub reads: Cell<u64>,
}

impl<'a> KvRead for CountingTxn<'a> {
    fn get(&self, key: &[u8], snapshot: bool) -> Result<Option<Vec<u8>>> {
        self.reads.set(self.reads.get() + 1);
        self.inner.get(key, snapshot)
    }

    fn get_key(&self, selector: &KeySelector, snapshot: bool) -> Result<Option<Vec<u8>>> {
        self.reads.set(self.reads.get() + 1);
        self.inner.get_key(selector, snapshot)
    }

    fn get_range<'t>(&'t self, begin: &[u8], end: &[u8], snapshot: bool) -> Result<KvIter<'t>> {
        let iter = self.inner.get_range(begin, end, snapshot)?;
        Ok(Box::new(iter.inspect(|_| {
            self.reads.set(self.reads.get() + 1);
        })))
    }
}
