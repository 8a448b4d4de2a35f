//! Cursor layer - streaming physical operators
//!
//! Executing a [`QueryPlan`] against a read transaction yields a
//! [`RecordCursor`]: a lazy, single-consumer stream of records whose
//! lifetime is bound to the transaction that produced it. Operators
//! compose as iterators; KV errors surface through the `Result` items
//! and terminate consumption.

pub mod group;
pub mod intersection;
pub mod scan;
pub mod transform;
pub mod union;

pub use group::{GroupedRow, group_by};

use crate::error::{Error, Result};
use crate::kv::{KvRead, Subspace};
use crate::plan::{IntersectionVariant, QueryPlan};
use crate::record::RecordAccess;
use crate::schema::Schema;
use crate::tuple::pack_elements;
use crate::vector::VectorRuntime;

/// In-memory materialization budgets enforced by operators
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    /// Rows a sort may materialize before failing
    pub max_rows_in_memory: usize,
    /// Groups a GROUP BY may hold before failing
    pub max_groups_in_memory: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_rows_in_memory: 1_000_000,
            max_groups_in_memory: 100_000,
        }
    }
}

/// Everything an operator needs besides the transaction
pub struct ExecutionContext<'t, R> {
    /// Root subspace of the record store
    pub root: &'t Subspace,
    /// Schema in effect
    pub schema: &'t Schema,
    /// Record access collaborator
    pub access: &'t dyn RecordAccess<R>,
    /// Materialization budgets
    pub limits: &'t ExecutionLimits,
    /// Vector graphs and circuit breakers
    pub vectors: &'t VectorRuntime,
}

impl<'t, R> Clone for ExecutionContext<'t, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'t, R> Copy for ExecutionContext<'t, R> {}

impl<'t, R> ExecutionContext<'t, R> {
    /// Packed primary key of a record, used for dedup and merge joins
    pub(crate) fn packed_primary_key(&self, record: &R) -> Result<Vec<u8>> {
        let type_name = self.access.record_name(record);
        let def = self.schema.record_type(type_name)?;
        let pk = self.access.primary_key(record, &def.primary_key)?;
        Ok(pack_elements(&pk))
    }
}

/// A lazy, single-consumer stream of records
pub struct RecordCursor<'t, R> {
    inner: Box<dyn Iterator<Item = Result<R>> + 't>,
}

impl<'t, R: 't> RecordCursor<'t, R> {
    /// Wrap any iterator of record results
    pub fn new(inner: impl Iterator<Item = Result<R>> + 't) -> Self {
        Self { inner: Box::new(inner) }
    }

    /// Empty cursor
    pub fn empty() -> Self {
        Self { inner: Box::new(std::iter::empty()) }
    }

    /// Drain the cursor into a vector, stopping at the first error
    pub fn collect_records(self) -> Result<Vec<R>> {
        self.into_iter().collect()
    }
}

impl<'t, R> Iterator for RecordCursor<'t, R> {
    type Item = Result<R>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Execute a plan against a read transaction
pub fn execute<'t, R: Clone + 't>(
    plan: &'t QueryPlan,
    ctx: ExecutionContext<'t, R>,
    txn: &'t dyn KvRead,
    snapshot: bool,
) -> Result<RecordCursor<'t, R>> {
    match plan {
        QueryPlan::FullScan { record_type, residual } => {
            scan::full_scan(ctx, txn, snapshot, record_type, residual.as_ref())
        }
        QueryPlan::IndexScan { index, range, residual } => {
            scan::index_scan(ctx, txn, snapshot, index, range, residual.as_ref())
        }
        QueryPlan::CoveringIndexScan { index, range, residual } => {
            scan::covering_index_scan(ctx, txn, snapshot, index, range, residual.as_ref())
        }
        QueryPlan::Filter { child, predicate } => {
            let input = execute(child, ctx, txn, snapshot)?;
            Ok(transform::filter(input, ctx, predicate))
        }
        QueryPlan::Limit { child, limit } => {
            let input = execute(child, ctx, txn, snapshot)?;
            Ok(transform::limit(input, *limit))
        }
        QueryPlan::Sort { child, keys } => {
            let input = execute(child, ctx, txn, snapshot)?;
            transform::sort(input, ctx, keys)
        }
        QueryPlan::Intersection { children, variant } => {
            let mut cursors = Vec::with_capacity(children.len());
            // children open in submission order; the cost model assumes
            // positional order is preserved
            for child in children {
                cursors.push(execute(child, ctx, txn, snapshot)?);
            }
            match variant {
                IntersectionVariant::SortedMerge => {
                    intersection::sorted_merge(cursors, ctx)
                }
                IntersectionVariant::Hash => intersection::hash(cursors, ctx),
            }
        }
        QueryPlan::Union { children, merge } => {
            let mut cursors = Vec::with_capacity(children.len());
            for child in children {
                cursors.push(execute(child, ctx, txn, snapshot)?);
            }
            if *merge {
                union::merge_union(cursors, ctx)
            } else {
                Ok(union::hash_union(cursors, ctx))
            }
        }
        QueryPlan::InJoin { index, values, residual } => {
            union::in_join(ctx, txn, snapshot, index, values, residual.as_ref())
        }
        QueryPlan::VectorSearch { index, k, query, residual } => {
            crate::vector::execute_vector(ctx, txn, snapshot, index, *k, query, residual.as_ref())
        }
        QueryPlan::SpatialRange { index, query, residual } => {
            crate::spatial::execute_spatial(ctx, txn, snapshot, index, query, residual.as_ref())
        }
    }
}

/// Deduplicate a stream by packed primary key
pub(crate) fn dedup_by_pk<'t, R: 't>(
    input: impl Iterator<Item = Result<R>> + 't,
    ctx: ExecutionContext<'t, R>,
) -> impl Iterator<Item = Result<R>> + 't {
    let mut seen = std::collections::HashSet::new();
    input.filter_map(move |item| match item {
        Ok(record) => match ctx.packed_primary_key(&record) {
            Ok(pk) => {
                if seen.insert(pk) {
                    Some(Ok(record))
                } else {
                    None
                }
            }
            Err(e) => Some(Err(e)),
        },
        Err(e) => Some(Err(e)),
    })
}

pub(crate) fn internal_missing_record(index_name: &str) -> Error {
    Error::internal(format!(
        "index '{}' entry points at a missing record; the index may need rebuilding",
        index_name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{CompareOp, Filter};
    use crate::kv::{KvStore, MemoryStore};
    use crate::plan::{ScanRange, SortKey};
    use crate::record::{MapRecord, MapRecordAccess};
    use crate::schema::{Index, KeyExpression};
    use crate::store::RecordStore;
    use std::sync::Arc;

    struct Harness {
        store: RecordStore<MemoryStore, MapRecord>,
        schema: std::sync::Arc<Schema>,
        limits: ExecutionLimits,
        vectors: VectorRuntime,
        root: Subspace,
        access: MapRecordAccess,
    }

    impl Harness {
        fn new() -> Harness {
            let schema = Arc::new(
                Schema::builder()
                    .record_type(
                        "Event",
                        KeyExpression::Field("id".into()),
                        vec![
                            Index::value("event_kind", "Event", ["kind"]),
                            Index::value("event_level", "Event", ["level"]),
                        ],
                    )
                    .build()
                    .unwrap(),
            );
            let root = Subspace::root();
            let store = RecordStore::new(
                Arc::new(MemoryStore::new()),
                root.clone(),
                schema.clone(),
                Arc::new(MapRecordAccess),
            );
            Harness {
                store,
                schema,
                limits: ExecutionLimits::default(),
                vectors: VectorRuntime::default(),
                root,
                access: MapRecordAccess,
            }
        }

        fn seed(&self, n: i64) {
            // levels rise with id so level-range scans stay PK-ordered
            for id in 0..n {
                let kind = if id % 2 == 0 { "audit" } else { "metric" };
                self.store
                    .save(
                        &MapRecord::new("Event")
                            .with_field("id", id)
                            .with_field("kind", kind)
                            .with_field("level", id / 4),
                    )
                    .unwrap();
            }
        }

        fn ctx(&self) -> ExecutionContext<'_, MapRecord> {
            ExecutionContext {
                root: &self.root,
                schema: &self.schema,
                access: &self.access,
                limits: &self.limits,
                vectors: &self.vectors,
            }
        }

        fn run(&self, plan: &QueryPlan) -> Result<Vec<i64>> {
            let txn = self.store.kv().begin_read()?;
            let records = execute(plan, self.ctx(), &*txn, true)?.collect_records()?;
            Ok(records
                .iter()
                .map(|r| match r.field("id") {
                    Some(crate::tuple::TupleElement::Int(v)) => *v,
                    other => panic!("bad id field: {:?}", other),
                })
                .collect())
        }

        fn index(&self, name: &str) -> Index {
            self.schema
                .record_type("Event")
                .unwrap()
                .index(name)
                .unwrap()
                .clone()
        }
    }

    fn kind_scan(harness: &Harness, kind: &str) -> QueryPlan {
        QueryPlan::IndexScan {
            index: harness.index("event_kind"),
            range: ScanRange::equals(vec![kind.into()]),
            residual: None,
        }
    }

    fn level_ge_scan(harness: &Harness, level: i64) -> QueryPlan {
        QueryPlan::IndexScan {
            index: harness.index("event_level"),
            range: ScanRange {
                begin: vec![crate::tuple::TupleElement::Int(level)],
                end: vec![],
                end_mode: crate::plan::EndMode::Exclusive,
            },
            residual: None,
        }
    }

    #[test]
    fn test_full_scan_in_pk_order() {
        let harness = Harness::new();
        harness.seed(10);
        let ids = harness.run(&QueryPlan::full_scan("Event", None)).unwrap();
        assert_eq!(ids, (0..10).collect::<Vec<i64>>());
    }

    #[test]
    fn test_index_scan_applies_residual() {
        let harness = Harness::new();
        harness.seed(20);
        let plan = QueryPlan::IndexScan {
            index: harness.index("event_kind"),
            range: ScanRange::equals(vec!["audit".into()]),
            residual: Some(Filter::compare("level", CompareOp::Ge, 3i64)),
        };
        let ids = harness.run(&plan).unwrap();
        assert_eq!(ids, vec![12, 14, 16, 18]);
    }

    #[test]
    fn test_sorted_merge_intersection() {
        let harness = Harness::new();
        harness.seed(40);
        let plan = QueryPlan::Intersection {
            children: vec![kind_scan(&harness, "audit"), level_ge_scan(&harness, 5)],
            variant: IntersectionVariant::SortedMerge,
        };
        let ids = harness.run(&plan).unwrap();
        // even ids with id/4 >= 5
        assert_eq!(ids, vec![20, 22, 24, 26, 28, 30, 32, 34, 36, 38]);
    }

    #[test]
    fn test_hash_intersection_matches_merge() {
        let harness = Harness::new();
        harness.seed(40);
        let children =
            vec![kind_scan(&harness, "metric"), level_ge_scan(&harness, 3)];
        let merge = QueryPlan::Intersection {
            children: children.clone(),
            variant: IntersectionVariant::SortedMerge,
        };
        let hash = QueryPlan::Intersection {
            children,
            variant: IntersectionVariant::Hash,
        };
        assert_eq!(harness.run(&merge).unwrap(), harness.run(&hash).unwrap());
    }

    #[test]
    fn test_empty_intersection_short_circuits() {
        let harness = Harness::new();
        harness.seed(8);
        let plan = QueryPlan::Intersection {
            children: vec![
                kind_scan(&harness, "audit"),
                kind_scan(&harness, "metric"),
            ],
            variant: IntersectionVariant::Hash,
        };
        assert!(harness.run(&plan).unwrap().is_empty());
    }

    #[test]
    fn test_merge_union_dedups_in_pk_order() {
        let harness = Harness::new();
        harness.seed(12);
        let plan = QueryPlan::Union {
            children: vec![kind_scan(&harness, "audit"), level_ge_scan(&harness, 1)],
            merge: true,
        };
        let ids = harness.run(&plan).unwrap();
        // even ids union ids >= 4, each once, ascending
        let expected: Vec<i64> = (0..12).filter(|id| id % 2 == 0 || *id >= 4).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_in_join_dedups() {
        let harness = Harness::new();
        harness.seed(10);
        let plan = QueryPlan::InJoin {
            index: harness.index("event_kind"),
            values: vec!["audit".into(), "metric".into()],
            residual: None,
        };
        let mut ids = harness.run(&plan).unwrap();
        ids.sort_unstable();
        assert_eq!(ids, (0..10).collect::<Vec<i64>>());
    }

    #[test]
    fn test_sort_descending_with_limit() {
        let harness = Harness::new();
        harness.seed(9);
        let plan = QueryPlan::Limit {
            child: Box::new(QueryPlan::Sort {
                child: Box::new(QueryPlan::full_scan("Event", None)),
                keys: vec![SortKey::desc("id")],
            }),
            limit: 3,
        };
        assert_eq!(harness.run(&plan).unwrap(), vec![8, 7, 6]);
    }

    #[test]
    fn test_filter_plan_wraps_child() {
        let harness = Harness::new();
        harness.seed(10);
        let plan = QueryPlan::Filter {
            child: Box::new(QueryPlan::full_scan("Event", None)),
            predicate: Filter::eq("kind", "metric"),
        };
        assert_eq!(harness.run(&plan).unwrap(), vec![1, 3, 5, 7, 9]);
    }
}
