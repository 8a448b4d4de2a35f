//! LMDB-backed store
//!
//! One unnamed-environment, one `Bytes -> Bytes` database holding every
//! record row, index entry, and statistics blob. LMDB read transactions
//! are MVCC snapshots, so the `snapshot` flag on reads is already
//! satisfied; it exists for stores that track read conflicts.

use super::{KeySelector, KvIter, KvRead, KvStore, KvWrite};
use crate::error::Result;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use std::ops::Bound;
use std::path::Path;

const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

/// LMDB store
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open or create an LMDB environment at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    /// Open with an explicit map size (tests use a small one)
    pub fn open_with_map_size(path: impl AsRef<Path>, map_size: usize) -> Result<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())?
        };
        let mut wtxn = env.write_txn()?;
        let db = env.create_database(&mut wtxn, Some("lattice"))?;
        wtxn.commit()?;
        Ok(Self { env, db })
    }
}

impl KvStore for LmdbStore {
    fn begin_read(&self) -> Result<Box<dyn KvRead + '_>> {
        let txn = self.env.read_txn()?;
        Ok(Box::new(LmdbReadTxn { txn, db: self.db }))
    }

    fn with_write<T>(&self, f: impl FnOnce(&mut dyn KvWrite) -> Result<T>) -> Result<T> {
        let txn = self.env.write_txn()?;
        let mut write = LmdbWriteTxn { txn, db: self.db };
        let out = f(&mut write)?;
        write.txn.commit()?;
        Ok(out)
    }
}

struct LmdbReadTxn<'e> {
    txn: RoTxn<'e>,
    db: Database<Bytes, Bytes>,
}

struct LmdbWriteTxn<'e> {
    txn: RwTxn<'e>,
    db: Database<Bytes, Bytes>,
}

fn get_impl(db: &Database<Bytes, Bytes>, txn: &RoTxn<'_>, key: &[u8]) -> Result<Option<Vec<u8>>> {
    Ok(db.get(txn, key)?.map(|v| v.to_vec()))
}

fn get_key_impl(
    db: &Database<Bytes, Bytes>,
    txn: &RoTxn<'_>,
    selector: &KeySelector,
) -> Result<Option<Vec<u8>>> {
    let found = match selector {
        KeySelector::FirstGreaterOrEqual(k) => {
            let bounds: (Bound<&[u8]>, Bound<&[u8]>) =
                (Bound::Included(k.as_slice()), Bound::Unbounded);
            db.range(txn, &bounds)?.next()
        }
        KeySelector::FirstGreaterThan(k) => {
            let bounds: (Bound<&[u8]>, Bound<&[u8]>) =
                (Bound::Excluded(k.as_slice()), Bound::Unbounded);
            db.range(txn, &bounds)?.next()
        }
        KeySelector::LastLessThan(k) => {
            let bounds: (Bound<&[u8]>, Bound<&[u8]>) =
                (Bound::Unbounded, Bound::Excluded(k.as_slice()));
            db.rev_range(txn, &bounds)?.next()
        }
    };
    match found {
        Some(entry) => {
            let (key, _) = entry?;
            Ok(Some(key.to_vec()))
        }
        None => Ok(None),
    }
}

fn range_impl<'t>(
    db: &Database<Bytes, Bytes>,
    txn: &'t RoTxn<'_>,
    begin: &[u8],
    end: &[u8],
) -> Result<KvIter<'t>> {
    let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(begin), Bound::Excluded(end));
    let iter = db.range(txn, &bounds)?;
    Ok(Box::new(iter.map(|entry| {
        entry
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .map_err(crate::error::Error::from)
    })))
}

impl KvRead for LmdbReadTxn<'_> {
    fn get(&self, key: &[u8], _snapshot: bool) -> Result<Option<Vec<u8>>> {
        get_impl(&self.db, &self.txn, key)
    }

    fn get_key(&self, selector: &KeySelector, _snapshot: bool) -> Result<Option<Vec<u8>>> {
        get_key_impl(&self.db, &self.txn, selector)
    }

    fn get_range<'t>(&'t self, begin: &[u8], end: &[u8], _snapshot: bool) -> Result<KvIter<'t>> {
        range_impl(&self.db, &self.txn, begin, end)
    }
}

impl KvRead for LmdbWriteTxn<'_> {
    fn get(&self, key: &[u8], _snapshot: bool) -> Result<Option<Vec<u8>>> {
        get_impl(&self.db, &self.txn, key)
    }

    fn get_key(&self, selector: &KeySelector, _snapshot: bool) -> Result<Option<Vec<u8>>> {
        get_key_impl(&self.db, &self.txn, selector)
    }

    fn get_range<'t>(&'t self, begin: &[u8], end: &[u8], _snapshot: bool) -> Result<KvIter<'t>> {
        range_impl(&self.db, &self.txn, begin, end)
    }
}

impl KvWrite for LmdbWriteTxn<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put(&mut self.txn, key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.db.delete(&mut self.txn, key)?;
        Ok(())
    }

    fn delete_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(begin), Bound::Excluded(end));
        self.db.delete_range(&mut self.txn, &bounds)?;
        Ok(())
    }
}
