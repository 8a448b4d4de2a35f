//! HNSW graph collaborator
//!
//! The graph builder lives outside the planner; queries reach it through
//! [`VectorGraph`]. [`HnswGraph`] is the built-in implementation over
//! `hnsw_rs`, mapping internal vector ids to primary-key tuples. Until
//! [`HnswGraph::build`] runs it reports [`Error::HnswGraphNotBuilt`],
//! which is exactly the error the k-NN operator catches to fall back to
//! a flat scan.

use crate::error::{Error, Result};
use crate::schema::{VectorMetric, VectorOptions};
use crate::tuple::Tuple;
use hnsw_rs::prelude::*;
use parking_lot::RwLock;

/// Search surface of a maintained vector graph
pub trait VectorGraph: Send + Sync {
    /// Whether the graph has been built
    fn is_built(&self) -> bool;

    /// k nearest candidates as `(primary key, distance)`, ascending by
    /// distance. Fails with [`Error::HnswGraphNotBuilt`] when unbuilt.
    fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<(Tuple, f32)>>;
}

enum GraphIndex {
    Cosine(Hnsw<'static, f32, DistCosine>),
    Euclidean(Hnsw<'static, f32, DistL2>),
    Dot(Hnsw<'static, f32, DistDot>),
}

impl GraphIndex {
    fn new(metric: VectorMetric, capacity: usize) -> GraphIndex {
        // parameters: max_nb_connection, max_elements, max_layer,
        // ef_construction, distance
        let capacity = capacity.max(16);
        match metric {
            VectorMetric::Cosine => {
                GraphIndex::Cosine(Hnsw::new(16, capacity, 16, 200, DistCosine))
            }
            VectorMetric::Euclidean => {
                GraphIndex::Euclidean(Hnsw::new(16, capacity, 16, 200, DistL2))
            }
            VectorMetric::DotProduct => {
                GraphIndex::Dot(Hnsw::new(16, capacity, 16, 200, DistDot))
            }
        }
    }

    fn insert(&self, vector: &Vec<f32>, id: usize) {
        match self {
            GraphIndex::Cosine(h) => h.insert((vector, id)),
            GraphIndex::Euclidean(h) => h.insert((vector, id)),
            GraphIndex::Dot(h) => h.insert((vector, id)),
        }
    }

    fn search(&self, query: &[f32], k: usize, ef: usize) -> Vec<Neighbour> {
        match self {
            GraphIndex::Cosine(h) => h.search(query, k, ef),
            GraphIndex::Euclidean(h) => h.search(query, k, ef),
            GraphIndex::Dot(h) => h.search(query, k, ef),
        }
    }
}

struct BuiltGraph {
    index: GraphIndex,
    primary_keys: Vec<Tuple>,
}

/// `hnsw_rs`-backed graph for one vector index
pub struct HnswGraph {
    index_name: String,
    options: VectorOptions,
    inner: RwLock<Option<BuiltGraph>>,
}

impl HnswGraph {
    /// New unbuilt graph for the named index
    pub fn new(index_name: impl Into<String>, options: VectorOptions) -> Self {
        Self {
            index_name: index_name.into(),
            options,
            inner: RwLock::new(None),
        }
    }

    /// Build the graph from `(primary key, vector)` pairs, replacing any
    /// previous build
    pub fn build<I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = (Tuple, Vec<f32>)>,
    {
        let items: Vec<(Tuple, Vec<f32>)> = items.into_iter().collect();
        for (pk, vector) in &items {
            if vector.len() != self.options.dimension {
                return Err(Error::invalid_argument(format!(
                    "vector for key ({}) has dimension {}, index '{}' expects {}",
                    pk.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(","),
                    vector.len(),
                    self.index_name,
                    self.options.dimension
                )));
            }
        }

        let index = GraphIndex::new(self.options.metric, items.len());
        let mut primary_keys = Vec::with_capacity(items.len());
        for (id, (pk, vector)) in items.into_iter().enumerate() {
            index.insert(&vector, id);
            primary_keys.push(pk);
        }
        *self.inner.write() = Some(BuiltGraph { index, primary_keys });
        Ok(())
    }

    /// Drop the built graph, returning the index to the unbuilt state
    pub fn clear(&self) {
        *self.inner.write() = None;
    }
}

impl VectorGraph for HnswGraph {
    fn is_built(&self) -> bool {
        self.inner.read().is_some()
    }

    fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<(Tuple, f32)>> {
        if query.len() != self.options.dimension {
            return Err(Error::invalid_argument(format!(
                "query vector has dimension {}, index '{}' expects {}",
                query.len(),
                self.index_name,
                self.options.dimension
            )));
        }
        let guard = self.inner.read();
        let Some(built) = guard.as_ref() else {
            return Err(Error::HnswGraphNotBuilt(self.index_name.clone()));
        };
        let neighbours = built.index.search(query, k, ef.max(k));
        let mut out = Vec::with_capacity(neighbours.len());
        for neighbour in neighbours {
            if let Some(pk) = built.primary_keys.get(neighbour.d_id) {
                out.push((pk.clone(), neighbour.distance));
            }
        }
        out.sort_by(|a, b| a.1.total_cmp(&b.1));
        Ok(out)
    }
}
