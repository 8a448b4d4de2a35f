//! KV layer - the ordered key-value collaborator interface
//!
//! The record layer talks to its store through three small traits:
//! - [`KvStore`]: opens transactions
//! - [`KvRead`]: point reads, selector resolution, ordered range reads
//! - [`KvWrite`]: mutations inside a write transaction
//!
//! Ranges are half-open `[begin, end)` in raw key order. [`Subspace`]
//! carves the keyspace into prefixed regions and packs/unpacks tuples
//! relative to its prefix.

pub mod lmdb;
pub mod memory;

pub use lmdb::LmdbStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::tuple::{Tuple, TupleElement, pack_elements, unpack_elements};

/// Resolves to a concrete key relative to the committed key order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    /// The first key `>=` the given key
    FirstGreaterOrEqual(Vec<u8>),
    /// The first key `>` the given key
    FirstGreaterThan(Vec<u8>),
    /// The last key `<` the given key
    LastLessThan(Vec<u8>),
}

impl KeySelector {
    /// Key the selector is anchored on
    pub fn key(&self) -> &[u8] {
        match self {
            KeySelector::FirstGreaterOrEqual(k)
            | KeySelector::FirstGreaterThan(k)
            | KeySelector::LastLessThan(k) => k,
        }
    }
}

/// Streaming iterator over `(key, value)` pairs in key order
pub type KvIter<'t> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 't>;

/// Read surface of a transaction
pub trait KvRead {
    /// Point read. `snapshot` asks for a read without conflict tracking
    /// where the store distinguishes the two.
    fn get(&self, key: &[u8], snapshot: bool) -> Result<Option<Vec<u8>>>;

    /// Resolve a selector to a concrete key, if any key satisfies it
    fn get_key(&self, selector: &KeySelector, snapshot: bool) -> Result<Option<Vec<u8>>>;

    /// Ordered scan of `[begin, end)`
    fn get_range<'t>(&'t self, begin: &[u8], end: &[u8], snapshot: bool) -> Result<KvIter<'t>>;
}

/// Write surface of a transaction; also readable for read-your-writes
pub trait KvWrite: KvRead {
    /// Insert or overwrite a key
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key if present
    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Delete every key in `[begin, end)`
    fn delete_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()>;
}

/// A store that can open transactions
pub trait KvStore: Send + Sync {
    /// Begin a read-only transaction. The returned handle borrows the
    /// store; cursors built on it must not outlive it.
    fn begin_read(&self) -> Result<Box<dyn KvRead + '_>>;

    /// Run `f` inside a write transaction, committing only on `Ok`
    fn with_write<T>(&self, f: impl FnOnce(&mut dyn KvWrite) -> Result<T>) -> Result<T>
    where
        Self: Sized;
}

/// A prefixed region of the keyspace
///
/// Subspaces nest: `root.child("index").child_element(&name)` yields the
/// region for one index. `pack` appends a tuple's order-preserving
/// encoding to the prefix; `unpack` strips it back off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    /// Subspace rooted at a raw prefix
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Root subspace with an empty prefix
    pub fn root() -> Self {
        Self { prefix: Vec::new() }
    }

    /// Raw prefix bytes
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Child subspace extended by a packed string element
    pub fn child(&self, part: &str) -> Subspace {
        self.child_element(&TupleElement::String(part.to_string()))
    }

    /// Child subspace extended by one packed element
    pub fn child_element(&self, element: &TupleElement) -> Subspace {
        let mut prefix = self.prefix.clone();
        crate::tuple::pack_into(std::slice::from_ref(element), &mut prefix);
        Subspace { prefix }
    }

    /// Pack a tuple under this subspace's prefix
    pub fn pack(&self, tuple: &[TupleElement]) -> Vec<u8> {
        let mut out = self.prefix.clone();
        out.extend_from_slice(&pack_elements(tuple));
        out
    }

    /// Unpack a full key back into the tuple relative to this subspace
    pub fn unpack(&self, key: &[u8]) -> Result<Tuple> {
        let rest = key.strip_prefix(self.prefix.as_slice()).ok_or_else(|| {
            crate::error::Error::internal("key does not belong to this subspace")
        })?;
        unpack_elements(rest)
    }

    /// True when `key` lies inside this subspace
    pub fn contains(&self, key: &[u8]) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Half-open byte range covering every packed tuple in the subspace
    ///
    /// Element tag bytes are all `< 0xFF`, so `prefix .. prefix+0xFF`
    /// covers exactly the packed keys under the prefix.
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        let begin = self.prefix.clone();
        let mut end = self.prefix.clone();
        end.push(0xFF);
        (begin, end)
    }
}
