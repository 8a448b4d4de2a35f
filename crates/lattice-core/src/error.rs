//! Error types for Lattice Core

use thiserror::Error;

/// Result type alias using Lattice Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Lattice record layer
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from storage operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// LMDB/heed database errors
    #[error("Database error: {0}")]
    Database(#[from] heed::Error),

    /// Serialization errors (record codec, statistics blobs)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid caller-supplied argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An index exists but is not in a queryable state
    #[error("Index '{name}' is not readable (state: {state}): {message}")]
    IndexNotReadable {
        /// Index name
        name: String,
        /// Current index state
        state: String,
        /// What to do about it
        message: String,
    },

    /// An in-memory materialization exceeded its configured budget
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The HNSW graph for a vector index has not been built yet
    #[error(
        "HNSW graph for index '{0}' is not built; run the graph builder or switch the index to the flat-scan strategy"
    )]
    HnswGraphNotBuilt(String),

    /// Malformed key layout, unexpected tuple shape, or other internal invariant breakage
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an index-not-readable error
    pub fn index_not_readable(
        name: impl Into<String>,
        state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::IndexNotReadable {
            name: name.into(),
            state: state.into(),
            message: message.into(),
        }
    }

    /// Create a resource-exhausted error
    pub fn resource_exhausted(msg: impl Into<String>) -> Self {
        Self::ResourceExhausted(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
