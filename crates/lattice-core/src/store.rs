//! Record store - key layouts and write-side index maintenance
//!
//! Key layouts produced and consumed by the engine:
//! - record row:    `<root> "records" <type-name> <pk…>` → record bytes
//! - value index:   `<root> "indexes" <subspace-key> <indexed…> <pk…>` → empty
//! - covering:      same key, value = serialized stored-field map
//! - spatial index: `<root> "indexes" <subspace-key> <cell> <pk…>` → empty
//! - statistics:    `<root> "statistics" ("table"|"index") <name>` → blob
//!
//! [`RecordStore`] maintains rows and index entries on save/delete so the
//! planner has something to scan. Vector indexes keep no KV entries; the
//! graph maintainer owns those (see `vector::graph`).

use crate::error::{Error, Result};
use crate::kv::{KeySelector, KvStore, KvWrite, Subspace};
use crate::record::RecordAccess;
use crate::schema::{Index, IndexKind, RecordTypeDef, Schema};
use crate::spatial::morton_cell;
use crate::tuple::{Tuple, TupleElement};
use std::sync::Arc;

/// Subspace holding all record rows
pub fn records_subspace(root: &Subspace) -> Subspace {
    root.child("records")
}

/// Subspace holding one record type's rows
pub fn record_type_subspace(root: &Subspace, record_type: &str) -> Subspace {
    records_subspace(root).child(record_type)
}

/// Subspace holding one index's entries
pub fn index_subspace(root: &Subspace, index: &Index) -> Subspace {
    root.child("indexes").child(&index.subspace_key())
}

/// Subspace holding persisted statistics blobs
pub fn statistics_subspace(root: &Subspace) -> Subspace {
    root.child("statistics")
}

/// Typed record store over a KV store
pub struct RecordStore<S, R> {
    store: Arc<S>,
    root: Subspace,
    schema: Arc<Schema>,
    access: Arc<dyn RecordAccess<R>>,
}

impl<S: KvStore, R> RecordStore<S, R> {
    /// New store rooted at `root`
    pub fn new(
        store: Arc<S>,
        root: Subspace,
        schema: Arc<Schema>,
        access: Arc<dyn RecordAccess<R>>,
    ) -> Self {
        Self { store, root, schema, access }
    }

    /// Underlying KV store
    pub fn kv(&self) -> &Arc<S> {
        &self.store
    }

    /// Root subspace
    pub fn root(&self) -> &Subspace {
        &self.root
    }

    /// Schema in effect
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Record access collaborator
    pub fn access(&self) -> &Arc<dyn RecordAccess<R>> {
        &self.access
    }

    /// Save a record, replacing any previous version and rewriting its
    /// index entries
    pub fn save(&self, record: &R) -> Result<Tuple> {
        let type_name = self.access.record_name(record).to_string();
        let def = self.schema.record_type(&type_name)?;
        let pk = self.access.primary_key(record, &def.primary_key)?;
        if pk.len() != def.primary_key_length() {
            return Err(Error::internal(format!(
                "primary key for '{}' evaluated to {} elements, schema declares {}",
                type_name,
                pk.len(),
                def.primary_key_length()
            )));
        }
        let bytes = self.access.serialize(record)?;

        self.store.with_write(|txn| {
            let row_key = record_type_subspace(&self.root, &type_name).pack(&pk);
            if let Some(old_bytes) = txn.get(&row_key, false)? {
                let old = self.access.deserialize(&old_bytes)?;
                self.clear_index_entries(txn, def, &old, &pk)?;
            }
            txn.put(&row_key, &bytes)?;
            self.write_index_entries(txn, def, record, &pk)
        })?;
        Ok(pk)
    }

    /// Load a record by primary key
    pub fn load(&self, record_type: &str, pk: &[TupleElement]) -> Result<Option<R>> {
        self.schema.record_type(record_type)?;
        let key = record_type_subspace(&self.root, record_type).pack(pk);
        let txn = self.store.begin_read()?;
        match txn.get(&key, true)? {
            Some(bytes) => Ok(Some(self.access.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a record and its index entries; returns whether it existed
    pub fn delete(&self, record_type: &str, pk: &[TupleElement]) -> Result<bool> {
        let def = self.schema.record_type(record_type)?;
        let key = record_type_subspace(&self.root, record_type).pack(pk);
        self.store.with_write(|txn| {
            let Some(bytes) = txn.get(&key, false)? else {
                return Ok(false);
            };
            let record = self.access.deserialize(&bytes)?;
            self.clear_index_entries(txn, def, &record, pk)?;
            txn.delete(&key)?;
            Ok(true)
        })
    }

    /// Smallest value stored in an index, resolved with one key-selector
    /// read instead of a scan
    pub fn index_min_value(&self, index: &Index) -> Result<Option<TupleElement>> {
        let sub = index_subspace(&self.root, index);
        let (begin, end) = sub.range();
        let txn = self.store.begin_read()?;
        let key = txn.get_key(&KeySelector::FirstGreaterOrEqual(begin), true)?;
        match key {
            Some(k) if k < end && sub.contains(&k) => {
                Ok(sub.unpack(&k)?.into_iter().next())
            }
            _ => Ok(None),
        }
    }

    /// Largest value stored in an index, resolved with one key-selector
    /// read instead of a scan
    pub fn index_max_value(&self, index: &Index) -> Result<Option<TupleElement>> {
        let sub = index_subspace(&self.root, index);
        let (begin, end) = sub.range();
        let txn = self.store.begin_read()?;
        let key = txn.get_key(&KeySelector::LastLessThan(end), true)?;
        match key {
            Some(k) if k >= begin && sub.contains(&k) => {
                Ok(sub.unpack(&k)?.into_iter().next())
            }
            _ => Ok(None),
        }
    }

    /// Plan and run a query, materializing the results. Callers that
    /// need streaming open a read transaction and drive
    /// [`crate::cursor::execute`] themselves; the cursor must not
    /// outlive that transaction.
    pub fn execute_query(
        &self,
        planner: &crate::planner::QueryPlanner<S>,
        query: &crate::planner::RecordQuery,
        vectors: &crate::vector::VectorRuntime,
        limits: &crate::cursor::ExecutionLimits,
    ) -> Result<Vec<R>>
    where
        R: Clone,
    {
        let plan = planner.plan(query)?;
        let txn = self.store.begin_read()?;
        let ctx = crate::cursor::ExecutionContext {
            root: &self.root,
            schema: &self.schema,
            access: self.access.as_ref(),
            limits,
            vectors,
        };
        crate::cursor::execute(&plan, ctx, &*txn, true)?.collect_records()
    }

    fn write_index_entries(
        &self,
        txn: &mut dyn KvWrite,
        def: &RecordTypeDef,
        record: &R,
        pk: &[TupleElement],
    ) -> Result<()> {
        for index in &def.indexes {
            if index.state == crate::schema::IndexState::Disabled {
                continue;
            }
            match self.index_entry(index, record, pk)? {
                Some((key, value)) => txn.put(&key, &value)?,
                None => continue,
            }
        }
        Ok(())
    }

    fn clear_index_entries(
        &self,
        txn: &mut dyn KvWrite,
        def: &RecordTypeDef,
        record: &R,
        pk: &[TupleElement],
    ) -> Result<()> {
        for index in &def.indexes {
            if index.state == crate::schema::IndexState::Disabled {
                continue;
            }
            if let Some((key, _)) = self.index_entry(index, record, pk)? {
                txn.delete(&key)?;
            }
        }
        Ok(())
    }

    /// Entry for one index, or `None` when the index kind keeps no KV
    /// entries for this record
    fn index_entry(
        &self,
        index: &Index,
        record: &R,
        pk: &[TupleElement],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let sub = index_subspace(&self.root, index);
        match &index.kind {
            IndexKind::Value | IndexKind::Rank => {
                let mut tuple = self.access.evaluate(record, &index.key_expression)?;
                tuple.extend_from_slice(pk);
                Ok(Some((sub.pack(&tuple), Vec::new())))
            }
            IndexKind::Covering { stored_fields } => {
                let mut tuple = self.access.evaluate(record, &index.key_expression)?;
                tuple.extend_from_slice(pk);
                let stored: std::collections::BTreeMap<String, TupleElement> = stored_fields
                    .iter()
                    .map(|f| {
                        (
                            f.clone(),
                            self.access.extract_field(record, f).unwrap_or(TupleElement::Null),
                        )
                    })
                    .collect();
                let value = bincode::serialize(&stored)
                    .map_err(|e| Error::serialization(e.to_string()))?;
                Ok(Some((sub.pack(&tuple), value)))
            }
            IndexKind::Spatial(options) => {
                let x = self.access.extract_field(record, &options.x_field);
                let y = self.access.extract_field(record, &options.y_field);
                let (Some(x), Some(y)) = (x, y) else {
                    return Ok(None);
                };
                let (Some(x), Some(y)) = (as_f64(&x), as_f64(&y)) else {
                    return Ok(None);
                };
                let cell = morton_cell(x, y, &options.bounds);
                let mut tuple = vec![TupleElement::Int(cell as i64)];
                tuple.extend_from_slice(pk);
                Ok(Some((sub.pack(&tuple), Vec::new())))
            }
            // graph maintainer owns vector storage
            IndexKind::Vector(_) => Ok(None),
        }
    }
}

pub(crate) fn as_f64(element: &TupleElement) -> Option<f64> {
    match element {
        TupleElement::Int(v) => Some(*v as f64),
        TupleElement::Float(v) => Some(*v as f64),
        TupleElement::Double(v) => Some(*v),
        _ => None,
    }
}
