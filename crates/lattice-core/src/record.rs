//! Record access - how the engine sees opaque user records
//!
//! The planner and cursors never assume a record representation; they go
//! through [`RecordAccess`] for deserialization, field extraction, and
//! primary-key evaluation. [`MapRecord`] is the built-in field-map record
//! used by tests and by embedders without their own codec.

use crate::error::{Error, Result};
use crate::schema::{Index, KeyExpression};
use crate::tuple::{Tuple, TupleElement};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capability surface the engine needs per record type
pub trait RecordAccess<R>: Send + Sync {
    /// Deserialize a record from its stored bytes
    fn deserialize(&self, bytes: &[u8]) -> Result<R>;

    /// Serialize a record to its stored bytes
    fn serialize(&self, record: &R) -> Result<Vec<u8>>;

    /// Name of the record's type
    fn record_name<'r>(&self, record: &'r R) -> &'r str;

    /// Value of a named scalar field; `None` when absent
    fn extract_field(&self, record: &R, field: &str) -> Option<TupleElement>;

    /// Value of a named vector field; `None` when absent
    fn extract_vector(&self, record: &R, field: &str) -> Option<Vec<f32>>;

    /// Evaluate a key expression against the record
    fn evaluate(&self, record: &R, expression: &KeyExpression) -> Result<Tuple>;

    /// Primary-key tuple of the record under the given expression
    fn primary_key(&self, record: &R, pk_expression: &KeyExpression) -> Result<Tuple> {
        self.evaluate(record, pk_expression)
    }

    /// Whether [`RecordAccess::reconstruct`] is implemented
    fn supports_reconstruction(&self) -> bool {
        false
    }

    /// Rebuild a record from a covering index entry without a record
    /// fetch. `key_tuple` is the entry tuple relative to the index
    /// subspace (indexed values followed by the primary key); `value` is
    /// the stored entry value.
    fn reconstruct(
        &self,
        _index: &Index,
        _pk_expression: &KeyExpression,
        _key_tuple: &[TupleElement],
        _value: &[u8],
    ) -> Result<R> {
        Err(Error::internal(
            "record access does not support covering-index reconstruction",
        ))
    }
}

/// Built-in record: a type name plus ordered field and vector maps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRecord {
    record_type: String,
    fields: BTreeMap<String, TupleElement>,
    #[serde(default)]
    vectors: BTreeMap<String, Vec<f32>>,
}

impl MapRecord {
    /// New empty record of the given type
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            fields: BTreeMap::new(),
            vectors: BTreeMap::new(),
        }
    }

    /// Set a scalar field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<TupleElement>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Set a vector field
    pub fn with_vector(mut self, name: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(name.into(), vector);
        self
    }

    /// Record type name
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Scalar field value
    pub fn field(&self, name: &str) -> Option<&TupleElement> {
        self.fields.get(name)
    }

    /// Vector field value
    pub fn vector(&self, name: &str) -> Option<&[f32]> {
        self.vectors.get(name).map(|v| v.as_slice())
    }
}

/// [`RecordAccess`] over [`MapRecord`] using bincode
#[derive(Debug, Clone, Copy, Default)]
pub struct MapRecordAccess;

impl RecordAccess<MapRecord> for MapRecordAccess {
    fn deserialize(&self, bytes: &[u8]) -> Result<MapRecord> {
        bincode::deserialize(bytes).map_err(|e| Error::serialization(e.to_string()))
    }

    fn serialize(&self, record: &MapRecord) -> Result<Vec<u8>> {
        bincode::serialize(record).map_err(|e| Error::serialization(e.to_string()))
    }

    fn record_name<'r>(&self, record: &'r MapRecord) -> &'r str {
        &record.record_type
    }

    fn extract_field(&self, record: &MapRecord, field: &str) -> Option<TupleElement> {
        record.fields.get(field).cloned()
    }

    fn extract_vector(&self, record: &MapRecord, field: &str) -> Option<Vec<f32>> {
        record.vectors.get(field).cloned()
    }

    fn evaluate(&self, record: &MapRecord, expression: &KeyExpression) -> Result<Tuple> {
        match expression {
            KeyExpression::Field(name) => Ok(vec![
                record.fields.get(name).cloned().unwrap_or(TupleElement::Null),
            ]),
            KeyExpression::Concat(children) => {
                let mut out = Vec::with_capacity(children.len());
                for child in children {
                    out.extend(self.evaluate(record, child)?);
                }
                Ok(out)
            }
            KeyExpression::RangeBoundary(child) => self.evaluate(record, child),
        }
    }

    fn supports_reconstruction(&self) -> bool {
        true
    }

    fn reconstruct(
        &self,
        index: &Index,
        pk_expression: &KeyExpression,
        key_tuple: &[TupleElement],
        value: &[u8],
    ) -> Result<MapRecord> {
        let key_fields = index.key_fields();
        let pk_names = pk_expression.field_names();
        if key_tuple.len() != key_fields.len() + pk_names.len() {
            return Err(Error::internal(format!(
                "index '{}' entry has {} elements, expected {} indexed + {} key",
                index.name,
                key_tuple.len(),
                key_fields.len(),
                pk_names.len()
            )));
        }
        let mut record = MapRecord::new(index.record_type.clone());
        for (name, element) in key_fields.iter().zip(key_tuple.iter()) {
            record.fields.insert((*name).to_string(), element.clone());
        }
        for (name, element) in pk_names.iter().zip(key_tuple[key_fields.len()..].iter()) {
            record.fields.insert((*name).to_string(), element.clone());
        }
        // stored fields ride in the entry value as a serialized map
        if !value.is_empty() {
            let stored: BTreeMap<String, TupleElement> =
                bincode::deserialize(value).map_err(|e| Error::serialization(e.to_string()))?;
            record.fields.extend(stored);
        }
        Ok(record)
    }
}
