//! In-memory store
//!
//! A `BTreeMap`-backed [`KvStore`] with the same snapshot semantics as
//! the LMDB store: read transactions see the state at open time, write
//! transactions commit atomically on success. Used by unit tests and
//! embedders that want the engine without a disk footprint.

use super::{KeySelector, KvIter, KvRead, KvStore, KvWrite};
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

type Map = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered in-memory store
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Map>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently committed
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// True when nothing is committed
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn begin_read(&self) -> Result<Box<dyn KvRead + '_>> {
        // the copy is the snapshot
        let snapshot = self.data.read().clone();
        Ok(Box::new(MemoryTxn { data: snapshot }))
    }

    fn with_write<T>(&self, f: impl FnOnce(&mut dyn KvWrite) -> Result<T>) -> Result<T> {
        let mut staged = MemoryTxn { data: self.data.read().clone() };
        let out = f(&mut staged)?;
        *self.data.write() = staged.data;
        Ok(out)
    }
}

struct MemoryTxn {
    data: Map,
}

impl KvRead for MemoryTxn {
    fn get(&self, key: &[u8], _snapshot: bool) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn get_key(&self, selector: &KeySelector, _snapshot: bool) -> Result<Option<Vec<u8>>> {
        let found = match selector {
            KeySelector::FirstGreaterOrEqual(k) => self
                .data
                .range::<[u8], _>((Bound::Included(k.as_slice()), Bound::Unbounded))
                .next(),
            KeySelector::FirstGreaterThan(k) => self
                .data
                .range::<[u8], _>((Bound::Excluded(k.as_slice()), Bound::Unbounded))
                .next(),
            KeySelector::LastLessThan(k) => self
                .data
                .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(k.as_slice())))
                .next_back(),
        };
        Ok(found.map(|(k, _)| k.clone()))
    }

    fn get_range<'t>(&'t self, begin: &[u8], end: &[u8], _snapshot: bool) -> Result<KvIter<'t>> {
        let bounds = (
            Bound::Included(begin.to_vec()),
            Bound::Excluded(end.to_vec()),
        );
        Ok(Box::new(
            self.data
                .range(bounds)
                .map(|(k, v)| Ok((k.clone(), v.clone()))),
        ))
    }
}

impl KvWrite for MemoryTxn {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    fn delete_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        let doomed: Vec<Vec<u8>> = self
            .data
            .range((Bound::Included(begin.to_vec()), Bound::Excluded(end.to_vec())))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            self.data.remove(&key);
        }
        Ok(())
    }
}
