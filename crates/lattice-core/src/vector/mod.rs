//! Vector layer - k-NN search with HNSW fallback
//!
//! The k-NN operator checks index readability, then dispatches on the
//! index strategy: `FlatScan` brute-forces every stored vector through a
//! bounded top-k heap; `Hnsw` consults the per-index circuit breaker,
//! asks the graph maintainer for candidates, and falls back to the flat
//! scan when the graph is unbuilt or the breaker is open. Residual
//! filters over-fetch graph candidates (2k, 3k, up to 5 attempts) to
//! compensate for post-filter losses without re-processing seen keys.

pub mod breaker;
pub mod graph;
pub mod metric;

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use graph::{HnswGraph, VectorGraph};

use crate::cursor::{ExecutionContext, RecordCursor};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::kv::{KvRead, KvStore};
use crate::schema::{Index, IndexKind, IndexState, VectorOptions, VectorStrategy};
use crate::store::{RecordStore, record_type_subspace};
use crate::tuple::pack_elements;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Process-wide vector search state: registered graphs and per-index
/// circuit breakers
pub struct VectorRuntime {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    graphs: RwLock<HashMap<String, Arc<dyn VectorGraph>>>,
}

impl Default for VectorRuntime {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl VectorRuntime {
    /// Runtime with the given breaker tuning
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            graphs: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the graph maintainer for an index
    pub fn register_graph(&self, index_name: impl Into<String>, graph: Arc<dyn VectorGraph>) {
        self.graphs.write().insert(index_name.into(), graph);
    }

    /// Graph maintainer for an index, if registered
    pub fn graph(&self, index_name: &str) -> Option<Arc<dyn VectorGraph>> {
        self.graphs.read().get(index_name).cloned()
    }

    /// Consult the breaker before an HNSW attempt
    pub fn should_use_hnsw(&self, index_name: &str) -> bool {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(index_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config))
            .should_use_hnsw()
    }

    /// Record a successful graph search
    pub fn record_success(&self, index_name: &str) {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(index_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config))
            .record_success();
    }

    /// Record a failed graph search
    pub fn record_failure(&self, index_name: &str) {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(index_name.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config))
            .record_failure();
    }

    /// Breaker state for an index (healthy when never consulted)
    pub fn breaker_state(&self, index_name: &str) -> BreakerState {
        self.breakers
            .lock()
            .get(index_name)
            .map(|b| b.state())
            .unwrap_or(BreakerState::Healthy)
    }
}

/// Build an [`HnswGraph`] from every stored record of the index's type
pub fn build_hnsw_graph<S: KvStore, R>(
    store: &RecordStore<S, R>,
    index: &Index,
) -> Result<Arc<HnswGraph>> {
    let IndexKind::Vector(options) = &index.kind else {
        return Err(Error::invalid_argument(format!(
            "index '{}' is not a vector index",
            index.name
        )));
    };
    let field = index.leading_field().ok_or_else(|| {
        Error::internal(format!("vector index '{}' has no key field", index.name))
    })?;
    let def = store.schema().record_type(&index.record_type)?;

    let sub = record_type_subspace(store.root(), &index.record_type);
    let (begin, end) = sub.range();
    let mut items = Vec::new();
    {
        let txn = store.kv().begin_read()?;
        for entry in txn.get_range(&begin, &end, true)? {
            let (_, bytes) = entry?;
            let record = store.access().deserialize(&bytes)?;
            let Some(vector) = store.access().extract_vector(&record, field) else {
                continue;
            };
            let pk = store.access().primary_key(&record, &def.primary_key)?;
            items.push((pk, vector));
        }
    }

    let graph = Arc::new(HnswGraph::new(index.name.clone(), options.clone()));
    graph.build(items)?;
    Ok(graph)
}

/// Execute a vector k-NN plan
pub fn execute_vector<'t, R: 't>(
    ctx: ExecutionContext<'t, R>,
    txn: &'t dyn KvRead,
    snapshot: bool,
    index: &Index,
    k: usize,
    query: &[f32],
    residual: Option<&'t Filter>,
) -> Result<RecordCursor<'t, R>> {
    if k == 0 {
        return Err(Error::invalid_argument("k must be positive for k-NN search"));
    }
    if index.state != IndexState::Readable {
        return Err(Error::index_not_readable(
            &index.name,
            index.state.to_string(),
            "enable the index before issuing vector queries",
        ));
    }
    let IndexKind::Vector(options) = &index.kind else {
        return Err(Error::invalid_argument(format!(
            "index '{}' is not a vector index",
            index.name
        )));
    };
    if query.len() != options.dimension {
        return Err(Error::invalid_argument(format!(
            "query vector has dimension {}, index '{}' expects {}",
            query.len(),
            index.name,
            options.dimension
        )));
    }

    let records = match options.strategy {
        VectorStrategy::FlatScan => {
            flat_scan_knn(ctx, txn, snapshot, index, options, k, query, residual)?
        }
        VectorStrategy::Hnsw { .. } => {
            if ctx.vectors.should_use_hnsw(&index.name) {
                match hnsw_knn(ctx, txn, snapshot, index, k, query, residual) {
                    Ok(records) => {
                        ctx.vectors.record_success(&index.name);
                        records
                    }
                    Err(Error::HnswGraphNotBuilt(_)) => {
                        debug!(
                            index = index.name.as_str(),
                            "HNSW graph not built, falling back to flat scan"
                        );
                        ctx.vectors.record_failure(&index.name);
                        flat_scan_knn(ctx, txn, snapshot, index, options, k, query, residual)?
                    }
                    Err(other) => {
                        ctx.vectors.record_failure(&index.name);
                        return Err(other);
                    }
                }
            } else {
                trace!(
                    index = index.name.as_str(),
                    "circuit breaker open, using flat scan"
                );
                flat_scan_knn(ctx, txn, snapshot, index, options, k, query, residual)?
            }
        }
    };
    Ok(RecordCursor::new(records.into_iter().map(Ok)))
}

fn hnsw_knn<'t, R>(
    ctx: ExecutionContext<'t, R>,
    txn: &'t dyn KvRead,
    snapshot: bool,
    index: &Index,
    k: usize,
    query: &[f32],
    residual: Option<&Filter>,
) -> Result<Vec<R>> {
    let graph = ctx
        .vectors
        .graph(&index.name)
        .ok_or_else(|| Error::HnswGraphNotBuilt(index.name.clone()))?;
    let record_sub = record_type_subspace(ctx.root, &index.record_type);

    let mut results = Vec::with_capacity(k);
    let mut seen: HashSet<Vec<u8>> = HashSet::new();
    let attempts = if residual.is_some() { 5 } else { 1 };
    for attempt in 0..attempts {
        // 2k on the first filtered attempt, growing each retry
        let fetch_k = if residual.is_some() { k * (attempt + 2) } else { k };
        let candidates = graph.search(query, fetch_k, fetch_k.max(50))?;
        let exhausted = candidates.len() < fetch_k;
        for (pk, _) in candidates {
            if !seen.insert(pack_elements(&pk)) {
                continue;
            }
            let Some(bytes) = txn.get(&record_sub.pack(&pk), snapshot)? else {
                continue;
            };
            let record = ctx.access.deserialize(&bytes)?;
            if let Some(filter) = residual {
                if !filter.matches(&record, ctx.access) {
                    continue;
                }
            }
            results.push(record);
            if results.len() == k {
                return Ok(results);
            }
        }
        if exhausted {
            break;
        }
    }
    Ok(results)
}

fn flat_scan_knn<'t, R>(
    ctx: ExecutionContext<'t, R>,
    txn: &'t dyn KvRead,
    snapshot: bool,
    index: &Index,
    options: &VectorOptions,
    k: usize,
    query: &[f32],
    residual: Option<&Filter>,
) -> Result<Vec<R>> {
    let field = index.leading_field().ok_or_else(|| {
        Error::internal(format!("vector index '{}' has no key field", index.name))
    })?;
    let sub = record_type_subspace(ctx.root, &index.record_type);
    let (begin, end) = sub.range();

    let mut heap: std::collections::BinaryHeap<FlatCandidate<R>> =
        std::collections::BinaryHeap::with_capacity(k + 1);
    let mut seq = 0u64;
    for entry in txn.get_range(&begin, &end, snapshot)? {
        let (_, bytes) = entry?;
        let record = ctx.access.deserialize(&bytes)?;
        if let Some(filter) = residual {
            if !filter.matches(&record, ctx.access) {
                continue;
            }
        }
        let Some(vector) = ctx.access.extract_vector(&record, field) else {
            continue;
        };
        let distance = metric::distance(options.metric, query, &vector);
        heap.push(FlatCandidate { distance, seq, record });
        seq += 1;
        if heap.len() > k {
            heap.pop();
        }
    }

    Ok(heap
        .into_sorted_vec()
        .into_iter()
        .map(|c| c.record)
        .collect())
}

struct FlatCandidate<R> {
    distance: f32,
    seq: u64,
    record: R,
}

impl<R> PartialEq for FlatCandidate<R> {
    fn eq(&self, other: &Self) -> bool {
        self.distance.total_cmp(&other.distance) == Ordering::Equal && self.seq == other.seq
    }
}

impl<R> Eq for FlatCandidate<R> {}

impl<R> PartialOrd for FlatCandidate<R> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<R> Ord for FlatCandidate<R> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.seq.cmp(&other.seq))
    }
}
