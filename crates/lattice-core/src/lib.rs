//! Lattice Core - Record Layer Query Engine
//!
//! This crate provides the planning and execution core of the Lattice
//! record layer, implementing:
//! - Typed record schemas with primary keys and secondary indexes
//!   (value, covering, rank, spatial, vector)
//! - An order-preserving tuple codec over a transactional, ordered
//!   key-value store (LMDB via heed)
//! - A cost-based query planner: filter canonicalization, index
//!   matching, candidate enumeration, histogram/HLL statistics
//! - A streaming cursor engine: scans, filter/limit/sort, sorted-merge
//!   and hash intersection, union, IN-join
//! - k-NN vector search (HNSW with circuit-breaker flat-scan fallback)
//!   and spatial range search over Morton-coded indexes
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Query Planner                   │
//! │ (Rewriter, Matcher, Enumerator, Cost, Cache)│
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │              Cursor Engine                   │
//! │ (Scans, Sort, Intersection, Union, k-NN)    │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │       Records, Indexes & Statistics          │
//! │ (Schema, Tuple Codec, Histograms, HLL)      │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │             KV Store (LMDB)                  │
//! │  (Subspaces, Selectors, Snapshots, Ranges)  │
//! └─────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![allow(missing_docs)]

pub mod cost;
pub mod cursor;
pub mod error;
pub mod filter;
pub mod kv;
pub mod plan;
pub mod planner;
pub mod record;
pub mod schema;
pub mod spatial;
pub mod stats;
pub mod store;
pub mod tuple;
pub mod vector;

pub use cost::{CostModel, QueryCost, SelectivitySource};
pub use cursor::{ExecutionContext, ExecutionLimits, RecordCursor, execute};
pub use error::{Error, Result};
pub use filter::{CompareOp, Filter, RewriteOptions, rewrite};
pub use kv::{KeySelector, KvRead, KvStore, KvWrite, LmdbStore, MemoryStore, Subspace};
pub use plan::{QueryPlan, ScanRange, SortKey};
pub use planner::{
    PlanCache, PlanCacheStats, PlanGenerationConfig, QueryPlanner, RecordQuery, query_cache_key,
};
pub use record::{MapRecord, MapRecordAccess, RecordAccess};
pub use schema::{
    CoordinateSystem, Index, IndexKind, IndexState, KeyExpression, RecordTypeDef, Schema,
    SpatialOptions, VectorMetric, VectorOptions, VectorStrategy,
};
pub use spatial::{BoundingBox, SpatialQuery};
pub use stats::{Histogram, HyperLogLog, IndexStats, StatisticsManager, TableStats};
pub use store::RecordStore;
pub use tuple::{Tuple, TupleElement};
pub use vector::{BreakerConfig, BreakerState, HnswGraph, VectorGraph, VectorRuntime};
