//! Cost model
//!
//! Ranks candidate plans by estimated I/O and CPU work. Row counts come
//! from table statistics when collected; selectivities come from index
//! histograms when present and fixed heuristics otherwise. Statistics
//! are advisory: every lookup failure degrades to the heuristic path.

use crate::filter::{CompareOp, Filter};
use crate::kv::KvStore;
use crate::plan::{QueryPlan, ScanRange};
use crate::schema::Index;
use crate::stats::StatisticsManager;
use crate::tuple::TupleElement;

/// Cost of one KV read
pub const COST_IO_READ: f64 = 1.0;
/// CPU cost of deserializing one record
pub const COST_CPU_DESERIALIZE: f64 = 0.5;
/// CPU cost of evaluating a residual filter on one record
pub const COST_CPU_FILTER: f64 = 0.2;
/// Row count assumed when no table statistics exist
pub const DEFAULT_ROW_COUNT: u64 = 1_000;
/// Selectivities never drop below this
pub const SELECTIVITY_FLOOR: f64 = 1e-4;

/// Estimated execution cost of a plan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryCost {
    /// Estimated KV reads, weighted
    pub io_cost: f64,
    /// Estimated CPU work, weighted
    pub cpu_cost: f64,
    /// Estimated output rows
    pub estimated_rows: f64,
    /// Whether an in-memory sort still has to happen downstream
    pub needs_sort: bool,
}

impl QueryCost {
    /// Scalar used to order candidate plans
    pub fn total_cost(&self) -> f64 {
        let sort_term = if self.needs_sort {
            let n = self.estimated_rows.max(1.0);
            0.01 * n * n.log2().max(0.0)
        } else {
            0.0
        };
        self.io_cost + 0.1 * self.cpu_cost + sort_term
    }
}

/// Source of row counts and per-comparison selectivities
pub trait SelectivitySource {
    /// Row count of a record type, if statistics exist
    fn table_row_count(&self, record_type: &str) -> Option<u64>;

    /// Selectivity of `field <op> value`, histogram-driven when possible
    fn compare_selectivity(
        &self,
        record_type: &str,
        field: &str,
        op: CompareOp,
        value: &TupleElement,
    ) -> f64;

    /// Selectivity of a whole filter tree under the independence
    /// assumption, clamped to `[SELECTIVITY_FLOOR, 1]`
    fn filter_selectivity(&self, record_type: &str, filter: &Filter) -> f64 {
        let raw = match filter {
            Filter::Compare { field, op, value } => {
                self.compare_selectivity(record_type, field, *op, value)
            }
            Filter::In { field, values } => values
                .iter()
                .map(|v| self.compare_selectivity(record_type, field, CompareOp::Eq, v))
                .sum(),
            Filter::And(children) => children
                .iter()
                .map(|c| self.filter_selectivity(record_type, c))
                .product(),
            Filter::Or(children) => {
                1.0 - children
                    .iter()
                    .map(|c| 1.0 - self.filter_selectivity(record_type, c))
                    .product::<f64>()
            }
            Filter::Not(child) => 1.0 - self.filter_selectivity(record_type, child),
        };
        raw.clamp(SELECTIVITY_FLOOR, 1.0)
    }

    /// Selectivity of an index scan range: histogram estimates per
    /// matched field when available, otherwise the shape heuristic
    /// (1.0 full, 0.5 half-open, 0.1 closed)
    fn range_selectivity(&self, index: &Index, range: &ScanRange) -> f64 {
        if range.is_full() {
            return 1.0;
        }
        let fields = index.key_fields();
        let record_type = index.record_type.as_str();

        let equal_prefix = range
            .begin
            .iter()
            .zip(range.end.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let mut selectivity = 1.0;
        let mut estimated = false;
        for (i, value) in range.begin.iter().take(equal_prefix).enumerate() {
            if let Some(field) = fields.get(i) {
                selectivity *= self.compare_selectivity(record_type, field, CompareOp::Eq, value);
                estimated = true;
            }
        }
        if let Some(value) = range.begin.get(equal_prefix) {
            if let Some(field) = fields.get(equal_prefix) {
                selectivity *= self.compare_selectivity(record_type, field, CompareOp::Ge, value);
                estimated = true;
            }
        }
        if range.end.len() > equal_prefix {
            if let (Some(value), Some(field)) =
                (range.end.get(equal_prefix), fields.get(equal_prefix))
            {
                if range.begin.len() <= equal_prefix {
                    selectivity *=
                        self.compare_selectivity(record_type, field, CompareOp::Lt, value);
                    estimated = true;
                }
            }
        }
        if !estimated {
            selectivity = if range.is_half_open() { 0.5 } else { 0.1 };
        }
        selectivity.clamp(SELECTIVITY_FLOOR, 1.0)
    }
}

/// Fixed heuristics used when no comparison statistics exist
pub fn heuristic_selectivity(op: CompareOp) -> f64 {
    match op {
        CompareOp::Eq => 0.01,
        CompareOp::NotEq => 0.99,
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => 0.33,
        CompareOp::StartsWith => 0.1,
        CompareOp::Contains => 0.2,
    }
}

/// Selectivity source with no statistics at all
#[derive(Debug, Clone, Copy, Default)]
pub struct NoStatistics;

impl SelectivitySource for NoStatistics {
    fn table_row_count(&self, _record_type: &str) -> Option<u64> {
        None
    }

    fn compare_selectivity(
        &self,
        _record_type: &str,
        _field: &str,
        op: CompareOp,
        _value: &TupleElement,
    ) -> f64 {
        heuristic_selectivity(op)
    }
}

impl<S: KvStore> SelectivitySource for StatisticsManager<S> {
    fn table_row_count(&self, record_type: &str) -> Option<u64> {
        match self.get_table_stats(record_type) {
            Ok(Some(stats)) => Some(stats.row_count),
            _ => None,
        }
    }

    fn compare_selectivity(
        &self,
        record_type: &str,
        field: &str,
        op: CompareOp,
        value: &TupleElement,
    ) -> f64 {
        if let Some(stats) = self.leading_field_stats(record_type, field) {
            if let Some(estimate) = stats.histogram.estimate(op, value) {
                return estimate.clamp(SELECTIVITY_FLOOR, 1.0);
            }
        }
        heuristic_selectivity(op)
    }
}

/// Plan cost estimator
pub struct CostModel<'a> {
    stats: &'a dyn SelectivitySource,
}

impl<'a> CostModel<'a> {
    /// Cost model over the given statistics
    pub fn new(stats: &'a dyn SelectivitySource) -> Self {
        Self { stats }
    }

    /// Estimate the cost of a plan
    pub fn estimate(&self, plan: &QueryPlan) -> QueryCost {
        match plan {
            QueryPlan::FullScan { record_type, residual } => {
                let n = self.rows(record_type);
                let selectivity = residual
                    .as_ref()
                    .map(|f| self.stats.filter_selectivity(record_type, f))
                    .unwrap_or(1.0);
                QueryCost {
                    io_cost: n * COST_IO_READ,
                    cpu_cost: n * (COST_CPU_DESERIALIZE + COST_CPU_FILTER),
                    estimated_rows: n * selectivity,
                    needs_sort: false,
                }
            }
            QueryPlan::IndexScan { index, range, residual } => {
                let n = self.rows(&index.record_type);
                let rows = self.index_rows(index, range, residual.as_ref(), n);
                QueryCost {
                    // one index entry read plus one record read per row
                    io_cost: 2.0 * rows * COST_IO_READ,
                    cpu_cost: rows * (COST_CPU_DESERIALIZE + COST_CPU_FILTER),
                    estimated_rows: rows,
                    needs_sort: false,
                }
            }
            QueryPlan::CoveringIndexScan { index, range, residual } => {
                let n = self.rows(&index.record_type);
                let rows = self.index_rows(index, range, residual.as_ref(), n);
                QueryCost {
                    io_cost: rows * COST_IO_READ,
                    cpu_cost: rows * (COST_CPU_DESERIALIZE + COST_CPU_FILTER),
                    estimated_rows: rows,
                    needs_sort: false,
                }
            }
            QueryPlan::InJoin { index, values, residual } => {
                let n = self.rows(&index.record_type);
                let record_type = index.record_type.as_str();
                let field = index.leading_field().unwrap_or_default();
                let value_rows: f64 = values
                    .iter()
                    .map(|v| {
                        n * self.stats.compare_selectivity(record_type, field, CompareOp::Eq, v)
                    })
                    .sum();
                let filter_sel = residual
                    .as_ref()
                    .map(|f| self.stats.filter_selectivity(record_type, f))
                    .unwrap_or(1.0);
                let rows = (value_rows * filter_sel).min(n);
                QueryCost {
                    io_cost: 2.0 * rows.max(values.len() as f64) * COST_IO_READ,
                    cpu_cost: rows * (COST_CPU_DESERIALIZE + COST_CPU_FILTER),
                    estimated_rows: rows,
                    needs_sort: false,
                }
            }
            QueryPlan::Intersection { children, .. } => {
                let costs: Vec<QueryCost> = children.iter().map(|c| self.estimate(c)).collect();
                let n = children
                    .first()
                    .map(|c| self.rows(plan_record_type(c).unwrap_or_default()))
                    .unwrap_or(DEFAULT_ROW_COUNT as f64);
                // independence assumption across children
                let combined_sel: f64 = costs
                    .iter()
                    .map(|c| (c.estimated_rows / n.max(1.0)).clamp(SELECTIVITY_FLOOR, 1.0))
                    .product();
                let min_child_rows = costs
                    .iter()
                    .map(|c| c.estimated_rows)
                    .fold(f64::INFINITY, f64::min);
                QueryCost {
                    // children run concurrently; I/O still adds up
                    io_cost: costs.iter().map(|c| c.io_cost).sum(),
                    cpu_cost: min_child_rows.max(0.0) * COST_CPU_FILTER
                        + costs.iter().map(|c| c.cpu_cost).sum::<f64>(),
                    estimated_rows: n * combined_sel,
                    needs_sort: false,
                }
            }
            QueryPlan::Union { children, .. } => {
                let costs: Vec<QueryCost> = children.iter().map(|c| self.estimate(c)).collect();
                QueryCost {
                    io_cost: costs.iter().map(|c| c.io_cost).sum(),
                    cpu_cost: costs.iter().map(|c| c.cpu_cost).sum(),
                    // 10% dedup allowance
                    estimated_rows: 0.9 * costs.iter().map(|c| c.estimated_rows).sum::<f64>(),
                    needs_sort: false,
                }
            }
            QueryPlan::Filter { child, predicate } => {
                let child_cost = self.estimate(child);
                let record_type = plan_record_type(child).unwrap_or_default();
                let selectivity = self.stats.filter_selectivity(record_type, predicate);
                QueryCost {
                    io_cost: child_cost.io_cost,
                    cpu_cost: child_cost.cpu_cost + child_cost.estimated_rows * COST_CPU_FILTER,
                    estimated_rows: child_cost.estimated_rows * selectivity,
                    needs_sort: child_cost.needs_sort,
                }
            }
            QueryPlan::Limit { child, limit } => {
                let child_cost = self.estimate(child);
                let fraction =
                    (*limit as f64 / child_cost.estimated_rows.max(1.0)).min(1.0);
                QueryCost {
                    io_cost: child_cost.io_cost * fraction,
                    cpu_cost: child_cost.cpu_cost * fraction,
                    estimated_rows: child_cost.estimated_rows.min(*limit as f64),
                    needs_sort: child_cost.needs_sort,
                }
            }
            QueryPlan::Sort { child, .. } => {
                let child_cost = self.estimate(child);
                QueryCost { needs_sort: true, ..child_cost }
            }
            QueryPlan::VectorSearch { index, k, .. } => {
                let rows = *k as f64;
                let n = self.rows(&index.record_type);
                QueryCost {
                    io_cost: (2.0 * rows).min(n) * COST_IO_READ,
                    cpu_cost: rows * COST_CPU_DESERIALIZE,
                    estimated_rows: rows,
                    needs_sort: false,
                }
            }
            QueryPlan::SpatialRange { index, residual, .. } => {
                let n = self.rows(&index.record_type);
                let filter_sel = residual
                    .as_ref()
                    .map(|f| self.stats.filter_selectivity(&index.record_type, f))
                    .unwrap_or(1.0);
                let rows = n * 0.1 * filter_sel;
                QueryCost {
                    io_cost: 2.0 * rows * COST_IO_READ,
                    cpu_cost: rows * (COST_CPU_DESERIALIZE + COST_CPU_FILTER),
                    estimated_rows: rows,
                    needs_sort: false,
                }
            }
        }
    }

    fn rows(&self, record_type: &str) -> f64 {
        self.stats
            .table_row_count(record_type)
            .unwrap_or(DEFAULT_ROW_COUNT) as f64
    }

    fn index_rows(
        &self,
        index: &Index,
        range: &ScanRange,
        residual: Option<&Filter>,
        n: f64,
    ) -> f64 {
        let range_sel = self.stats.range_selectivity(index, range);
        let filter_sel = residual
            .map(|f| self.stats.filter_selectivity(&index.record_type, f))
            .unwrap_or(1.0);
        n * range_sel * filter_sel
    }
}

/// Record type a plan subtree reads, when it has a single one
pub fn plan_record_type(plan: &QueryPlan) -> Option<&str> {
    match plan {
        QueryPlan::FullScan { record_type, .. } => Some(record_type),
        QueryPlan::IndexScan { index, .. }
        | QueryPlan::CoveringIndexScan { index, .. }
        | QueryPlan::InJoin { index, .. }
        | QueryPlan::VectorSearch { index, .. }
        | QueryPlan::SpatialRange { index, .. } => Some(&index.record_type),
        QueryPlan::Filter { child, .. }
        | QueryPlan::Limit { child, .. }
        | QueryPlan::Sort { child, .. } => plan_record_type(child),
        QueryPlan::Intersection { children, .. } | QueryPlan::Union { children, .. } => {
            children.first().and_then(plan_record_type)
        }
    }
}
