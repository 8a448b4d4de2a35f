//! Planner layer - cost-based query planning
//!
//! [`QueryPlanner`] turns a declarative [`RecordQuery`] into a physical
//! [`QueryPlan`]: cache lookup, filter canonicalization, candidate
//! enumeration against the schema's indexes, cost ranking with whatever
//! statistics exist, then sort and limit wrapping. Planning never
//! touches record data; all I/O belongs to execution.

pub mod cache;
pub mod enumerate;
pub mod matcher;

pub use cache::{PlanCache, PlanCacheStats, query_cache_key};
pub use enumerate::enumerate_plans;
pub use matcher::{IndexMatch, match_filter_with_index};

use crate::cost::{CostModel, QueryCost, SelectivitySource};
use crate::error::{Error, Result};
use crate::filter::{Filter, RewriteOptions, rewrite};
use crate::kv::KvStore;
use crate::plan::{QueryPlan, SortKey};
use crate::schema::{IndexKind, Schema};
use crate::spatial::SpatialQuery;
use crate::stats::StatisticsManager;
use std::sync::Arc;
use tracing::debug;

/// Planner tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanGenerationConfig {
    /// Upper bound on enumerator output (1..=100)
    pub max_candidate_plans: usize,
    /// Abort DNF conversion above this projected term count (1..=50)
    pub max_dnf_branches: usize,
    /// Allow the unique-index short-circuit
    pub enable_heuristic_pruning: bool,
    /// IN filters larger than this fall back to a full scan
    pub max_in_values: usize,
}

impl Default for PlanGenerationConfig {
    fn default() -> Self {
        Self {
            max_candidate_plans: 20,
            max_dnf_branches: 10,
            enable_heuristic_pruning: true,
            max_in_values: 100,
        }
    }
}

impl PlanGenerationConfig {
    /// Wider enumeration, deeper DNF
    pub fn aggressive() -> Self {
        Self {
            max_candidate_plans: 50,
            max_dnf_branches: 25,
            enable_heuristic_pruning: true,
            max_in_values: 500,
        }
    }

    /// Narrower enumeration for planning-latency-sensitive callers
    pub fn conservative() -> Self {
        Self {
            max_candidate_plans: 10,
            max_dnf_branches: 5,
            enable_heuristic_pruning: true,
            max_in_values: 50,
        }
    }

    /// Baseline plus single-index scans only
    pub fn minimal() -> Self {
        Self {
            max_candidate_plans: 3,
            max_dnf_branches: 1,
            enable_heuristic_pruning: true,
            max_in_values: 10,
        }
    }

    /// Everything the enumerator can produce, no pruning
    pub fn exhaustive() -> Self {
        Self {
            max_candidate_plans: 100,
            max_dnf_branches: 50,
            enable_heuristic_pruning: false,
            max_in_values: 1_000,
        }
    }

    /// Check the documented option ranges
    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.max_candidate_plans) {
            return Err(Error::invalid_argument(format!(
                "max_candidate_plans must be in 1..=100, got {}",
                self.max_candidate_plans
            )));
        }
        if !(1..=50).contains(&self.max_dnf_branches) {
            return Err(Error::invalid_argument(format!(
                "max_dnf_branches must be in 1..=50, got {}",
                self.max_dnf_branches
            )));
        }
        if self.max_in_values == 0 {
            return Err(Error::invalid_argument("max_in_values must be positive"));
        }
        Ok(())
    }
}

/// A declarative query: filter + sort + limit over one record type
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    /// Record type to query
    pub record_type: String,
    /// Optional predicate
    pub filter: Option<Filter>,
    /// Requested output order
    pub sort: Vec<SortKey>,
    /// Maximum records to return
    pub limit: Option<usize>,
}

impl RecordQuery {
    /// Query returning every record of a type
    pub fn all(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            filter: None,
            sort: Vec::new(),
            limit: None,
        }
    }

    /// Set the filter
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the sort specification
    pub fn with_sort(mut self, sort: impl IntoIterator<Item = SortKey>) -> Self {
        self.sort = sort.into_iter().collect();
        self
    }

    /// Set the limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Cache fingerprint of this query
    pub fn cache_key(&self) -> u64 {
        query_cache_key(
            &self.record_type,
            self.filter.as_ref(),
            &self.sort,
            self.limit,
        )
    }
}

/// Cost-based planner over one schema
pub struct QueryPlanner<S> {
    schema: Arc<Schema>,
    stats: Arc<StatisticsManager<S>>,
    cache: PlanCache,
    config: PlanGenerationConfig,
}

impl<S: KvStore> QueryPlanner<S> {
    /// Planner with the default configuration
    pub fn new(schema: Arc<Schema>, stats: Arc<StatisticsManager<S>>) -> Self {
        Self::with_config(schema, stats, PlanGenerationConfig::default())
    }

    /// Planner with explicit configuration
    pub fn with_config(
        schema: Arc<Schema>,
        stats: Arc<StatisticsManager<S>>,
        config: PlanGenerationConfig,
    ) -> Self {
        Self { schema, stats, cache: PlanCache::default(), config }
    }

    /// Schema the planner consults
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The plan cache, exposed for inspection
    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Active configuration
    pub fn config(&self) -> &PlanGenerationConfig {
        &self.config
    }

    /// Plan a query: cache hit or full planning pass
    pub fn plan(&self, query: &RecordQuery) -> Result<Arc<QueryPlan>> {
        if query.record_type.is_empty() {
            return Err(Error::invalid_argument("record type name must not be empty"));
        }
        self.config.validate()?;
        let def = self.schema.record_type(&query.record_type)?;

        let key = query.cache_key();
        if let Some(plan) = self.cache.get(key, self.schema.version()) {
            debug!(query = %describe_query(query), "plan cache hit");
            return Ok(plan);
        }

        let rewritten = query.filter.as_ref().map(|f| {
            rewrite(f, RewriteOptions { max_dnf_branches: self.config.max_dnf_branches })
        });
        let candidates = enumerate_plans(def, rewritten.as_ref(), &self.config);

        let model = CostModel::new(self.stats.as_ref());
        let (mut best, mut best_cost) = candidates
            .into_iter()
            .map(|plan| {
                let mut cost = model.estimate(&plan);
                // a plan that cannot produce the requested order pays
                // the in-memory sort it will be wrapped with
                if !query.sort.is_empty() && !plan.provides_sort(&query.sort) {
                    cost.needs_sort = true;
                }
                (plan, cost)
            })
            .min_by(|(_, a), (_, b)| {
                a.total_cost()
                    .partial_cmp(&b.total_cost())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("enumerator always emits at least one plan");

        if !query.sort.is_empty() && !best.provides_sort(&query.sort) {
            best = QueryPlan::Sort { child: Box::new(best), keys: query.sort.clone() };
            best_cost = model.estimate(&best);
        }
        if let Some(limit) = query.limit {
            best = QueryPlan::Limit { child: Box::new(best), limit };
            best_cost = model.estimate(&best);
        }

        debug!(
            query = %describe_query(query),
            plan = %best.describe(),
            cost = best_cost.total_cost(),
            "plan selected"
        );
        let plan = Arc::new(best);
        self.cache
            .put(key, plan.clone(), best_cost, self.schema.version());
        Ok(plan)
    }

    /// Estimated cost of a plan under this planner's statistics
    pub fn estimate_cost(&self, plan: &QueryPlan) -> QueryCost {
        CostModel::new(self.stats.as_ref()).estimate(plan)
    }

    /// Estimated selectivity of a filter over a record type
    pub fn estimate_selectivity(&self, record_type: &str, filter: &Filter) -> f64 {
        self.stats.filter_selectivity(record_type, filter)
    }

    /// Build a k-NN plan against a named vector index
    pub fn plan_vector_search(
        &self,
        index_name: &str,
        k: usize,
        query: Vec<f32>,
        residual: Option<Filter>,
    ) -> Result<Arc<QueryPlan>> {
        if k == 0 {
            return Err(Error::invalid_argument("k must be positive for k-NN search"));
        }
        let (_, index) = self.schema.find_index(index_name).ok_or_else(|| {
            Error::invalid_argument(format!("unknown vector index '{}'", index_name))
        })?;
        if !matches!(index.kind, IndexKind::Vector(_)) {
            return Err(Error::invalid_argument(format!(
                "index '{}' is not a vector index",
                index_name
            )));
        }
        Ok(Arc::new(QueryPlan::VectorSearch {
            index: index.clone(),
            k,
            query,
            residual,
        }))
    }

    /// Build a spatial range plan against a named spatial index
    pub fn plan_spatial_range(
        &self,
        index_name: &str,
        query: SpatialQuery,
        residual: Option<Filter>,
    ) -> Result<Arc<QueryPlan>> {
        let (_, index) = self.schema.find_index(index_name).ok_or_else(|| {
            Error::invalid_argument(format!("unknown spatial index '{}'", index_name))
        })?;
        if !matches!(index.kind, IndexKind::Spatial(_)) {
            return Err(Error::invalid_argument(format!(
                "index '{}' is not a spatial index",
                index_name
            )));
        }
        Ok(Arc::new(QueryPlan::SpatialRange {
            index: index.clone(),
            query,
            residual,
        }))
    }
}

fn describe_query(query: &RecordQuery) -> String {
    format!(
        "{}[{}]",
        query.record_type,
        query
            .filter
            .as_ref()
            .map(|f| f.cache_key())
            .unwrap_or_else(|| "*".to_string())
    )
}
