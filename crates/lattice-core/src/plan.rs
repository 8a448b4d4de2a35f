//! Physical query plans
//!
//! A [`QueryPlan`] is an immutable tree of physical operators. The
//! enumerator builds candidates, the cost model ranks them, the cache
//! shares them by `Arc`, and the cursor engine executes them. Nothing in
//! a plan borrows the transaction; execution binds one later.

use crate::filter::Filter;
use crate::schema::Index;
use crate::tuple::{Tuple, TupleElement};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One sort component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Field to sort by
    pub field: String,
    /// Ascending when true
    pub ascending: bool,
}

impl SortKey {
    /// Ascending sort on a field
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), ascending: true }
    }

    /// Descending sort on a field
    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), ascending: false }
    }
}

/// How the end boundary of a scan range is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndMode {
    /// The end tuple is a prefix whose extensions are all included
    /// (equality ranges: scan every entry under the prefix)
    PrefixInclusive,
    /// The scan stops at the first key `>=` the packed end tuple
    Exclusive,
}

/// A key range over one index's entries
///
/// `begin`/`end` are tuples of indexed values; empty means the subspace
/// boundary on that side. The byte range is half-open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRange {
    /// Inclusive begin values (prefix)
    pub begin: Tuple,
    /// End values, interpreted per `end_mode`
    pub end: Tuple,
    /// End interpretation
    pub end_mode: EndMode,
}

impl ScanRange {
    /// Scan everything in the index
    pub fn full() -> Self {
        Self { begin: Vec::new(), end: Vec::new(), end_mode: EndMode::Exclusive }
    }

    /// Equality scan over one value prefix
    pub fn equals(values: Tuple) -> Self {
        Self { begin: values.clone(), end: values, end_mode: EndMode::PrefixInclusive }
    }

    /// True when both boundaries are open
    pub fn is_full(&self) -> bool {
        self.begin.is_empty() && self.end.is_empty()
    }

    /// True when exactly one boundary is open
    pub fn is_half_open(&self) -> bool {
        self.begin.is_empty() != self.end.is_empty()
    }

    /// True for a pure equality prefix scan
    pub fn is_equality(&self) -> bool {
        self.end_mode == EndMode::PrefixInclusive && self.begin == self.end && !self.begin.is_empty()
    }

    /// Resolve to a half-open byte range under the index subspace
    pub fn to_byte_range(&self, subspace: &crate::kv::Subspace) -> (Vec<u8>, Vec<u8>) {
        let (sub_begin, sub_end) = subspace.range();
        let begin = if self.begin.is_empty() {
            sub_begin
        } else {
            subspace.pack(&self.begin)
        };
        let end = if self.end.is_empty() {
            sub_end
        } else {
            match self.end_mode {
                EndMode::Exclusive => subspace.pack(&self.end),
                EndMode::PrefixInclusive => {
                    let mut key = subspace.pack(&self.end);
                    key.push(0xFF);
                    key
                }
            }
        };
        (begin, end)
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |t: &Tuple| {
            t.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(",")
        };
        match self.end_mode {
            EndMode::PrefixInclusive => write!(f, "[{} ..= {}]", render(&self.begin), render(&self.end)),
            EndMode::Exclusive => write!(f, "[{} .. {})", render(&self.begin), render(&self.end)),
        }
    }
}

/// Intersection algorithm selected by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntersectionVariant {
    /// k-way merge on primary key; requires PK-ordered children
    SortedMerge,
    /// Build-side hash map; works on any children
    Hash,
}

/// A physical operator tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryPlan {
    /// Scan every record of a type, applying the residual in memory
    FullScan {
        /// Record type to scan
        record_type: String,
        /// Residual predicate
        residual: Option<Filter>,
    },
    /// Range-scan an index, point-read each record, apply the residual
    IndexScan {
        /// Index to scan
        index: Index,
        /// Key range over the index entries
        range: ScanRange,
        /// Residual predicate
        residual: Option<Filter>,
    },
    /// Like `IndexScan` but reconstructs records from entries, skipping
    /// the record fetch; the residual only touches covered fields
    CoveringIndexScan {
        /// Covering index to scan
        index: Index,
        /// Key range over the index entries
        range: ScanRange,
        /// Residual predicate over covered fields
        residual: Option<Filter>,
    },
    /// In-memory predicate over a child
    Filter {
        /// Input plan
        child: Box<QueryPlan>,
        /// Predicate
        predicate: Filter,
    },
    /// Stop after N records
    Limit {
        /// Input plan
        child: Box<QueryPlan>,
        /// Maximum records to emit
        limit: usize,
    },
    /// Materialize and sort in memory
    Sort {
        /// Input plan
        child: Box<QueryPlan>,
        /// Sort specification
        keys: Vec<SortKey>,
    },
    /// Records present in every child, deduplicated by primary key
    Intersection {
        /// Input plans
        children: Vec<QueryPlan>,
        /// Algorithm
        variant: IntersectionVariant,
    },
    /// Records present in any child, deduplicated by primary key.
    /// `merge` selects the single-pass PK-merge when all children are
    /// PK-ordered.
    Union {
        /// Input plans
        children: Vec<QueryPlan>,
        /// Use the ordered merge instead of hash dedup
        merge: bool,
    },
    /// Per-value equality scans over one index, concatenated and
    /// deduplicated by primary key
    InJoin {
        /// Index providing the point scans
        index: Index,
        /// Equality values, one scan each
        values: Vec<TupleElement>,
        /// Residual predicate
        residual: Option<Filter>,
    },
    /// k nearest neighbors by vector distance
    VectorSearch {
        /// Vector index queried
        index: Index,
        /// Neighbor count
        k: usize,
        /// Query vector
        query: Vec<f32>,
        /// Residual predicate
        residual: Option<Filter>,
    },
    /// Records whose indexed coordinates fall in a spatial query region
    SpatialRange {
        /// Spatial index queried
        index: Index,
        /// Query region
        query: crate::spatial::SpatialQuery,
        /// Residual predicate
        residual: Option<Filter>,
    },
}

impl QueryPlan {
    /// Baseline plan: full scan with the whole filter as residual
    pub fn full_scan(record_type: impl Into<String>, residual: Option<Filter>) -> QueryPlan {
        QueryPlan::FullScan { record_type: record_type.into(), residual }
    }

    /// True when the plan emits records in ascending primary-key order.
    /// Index scans embed the PK as the entry suffix, so their output is
    /// PK-ordered within each indexed value.
    pub fn is_pk_ordered(&self) -> bool {
        match self {
            QueryPlan::FullScan { .. } => true,
            QueryPlan::IndexScan { .. } | QueryPlan::CoveringIndexScan { .. } => true,
            QueryPlan::Filter { child, .. } | QueryPlan::Limit { child, .. } => {
                child.is_pk_ordered()
            }
            QueryPlan::Intersection { variant, .. } => {
                *variant == IntersectionVariant::SortedMerge
            }
            _ => false,
        }
    }

    /// True when the plan already emits records in the requested sort
    /// order: only index scans do, and only when the index's leading
    /// fields match the sort keys ascending. Descending sorts always
    /// fall back to the in-memory sort (reverse range scans are a known
    /// future improvement).
    pub fn provides_sort(&self, keys: &[SortKey]) -> bool {
        if keys.is_empty() {
            return true;
        }
        match self {
            QueryPlan::IndexScan { index, range, .. }
            | QueryPlan::CoveringIndexScan { index, range, .. } => {
                // a range that pins a prefix by equality still emits the
                // remaining fields in index order, but keep to the
                // conservative leading-field rule
                if !(range.is_full() || range.begin.len() <= keys.len()) {
                    return false;
                }
                let fields = index.key_fields();
                keys.len() <= fields.len()
                    && keys
                        .iter()
                        .zip(fields.iter())
                        .all(|(k, f)| k.ascending && k.field == *f)
            }
            QueryPlan::Limit { child, .. } | QueryPlan::Filter { child, .. } => {
                child.provides_sort(keys)
            }
            QueryPlan::Sort { keys: own, .. } => own == keys,
            _ => false,
        }
    }

    /// Short operator description for logs
    pub fn describe(&self) -> String {
        match self {
            QueryPlan::FullScan { record_type, .. } => format!("full-scan({})", record_type),
            QueryPlan::IndexScan { index, range, .. } => {
                format!("index-scan({} {})", index.name, range)
            }
            QueryPlan::CoveringIndexScan { index, range, .. } => {
                format!("covering-scan({} {})", index.name, range)
            }
            QueryPlan::Filter { child, .. } => format!("filter({})", child.describe()),
            QueryPlan::Limit { child, limit } => format!("limit({}, {})", limit, child.describe()),
            QueryPlan::Sort { child, .. } => format!("sort({})", child.describe()),
            QueryPlan::Intersection { children, variant } => format!(
                "intersection[{:?}]({})",
                variant,
                children.iter().map(|c| c.describe()).collect::<Vec<_>>().join(", ")
            ),
            QueryPlan::Union { children, merge } => format!(
                "union[merge={}]({})",
                merge,
                children.iter().map(|c| c.describe()).collect::<Vec<_>>().join(", ")
            ),
            QueryPlan::InJoin { index, values, .. } => {
                format!("in-join({}, {} values)", index.name, values.len())
            }
            QueryPlan::VectorSearch { index, k, .. } => {
                format!("vector-search({}, k={})", index.name, k)
            }
            QueryPlan::SpatialRange { index, .. } => format!("spatial-range({})", index.name),
        }
    }
}
