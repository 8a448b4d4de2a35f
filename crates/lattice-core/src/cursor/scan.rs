//! Scan operators: full scan, index scan, covering index scan

use super::{ExecutionContext, RecordCursor, internal_missing_record};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::kv::KvRead;
use crate::plan::ScanRange;
use crate::schema::{Index, IndexState};
use crate::store::{index_subspace, record_type_subspace};
use tracing::trace;

/// Scan every record of a type in primary-key order, dropping records
/// whose stored type name differs and applying the residual in memory
pub fn full_scan<'t, R: 't>(
    ctx: ExecutionContext<'t, R>,
    txn: &'t dyn KvRead,
    snapshot: bool,
    record_type: &str,
    residual: Option<&'t Filter>,
) -> Result<RecordCursor<'t, R>> {
    ctx.schema.record_type(record_type)?;
    let sub = record_type_subspace(ctx.root, record_type);
    let (begin, end) = sub.range();
    trace!(record_type, "opening full scan");

    let expected = record_type.to_string();
    let iter = txn
        .get_range(&begin, &end, snapshot)?
        .filter_map(move |entry| {
            let bytes = match entry {
                Ok((_, bytes)) => bytes,
                Err(e) => return Some(Err(e)),
            };
            let record = match ctx.access.deserialize(&bytes) {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            if ctx.access.record_name(&record) != expected {
                return None;
            }
            if let Some(filter) = residual {
                if !filter.matches(&record, ctx.access) {
                    return None;
                }
            }
            Some(Ok(record))
        });
    Ok(RecordCursor::new(iter))
}

/// Range-scan an index, extract the primary-key suffix of each entry,
/// point-read the record, and apply the residual
pub fn index_scan<'t, R: 't>(
    ctx: ExecutionContext<'t, R>,
    txn: &'t dyn KvRead,
    snapshot: bool,
    index: &'t Index,
    range: &ScanRange,
    residual: Option<&'t Filter>,
) -> Result<RecordCursor<'t, R>> {
    check_readable(index)?;
    let def = ctx.schema.record_type(&index.record_type)?;
    let pk_length = def.primary_key_length();
    let sub = index_subspace(ctx.root, index);
    let record_sub = record_type_subspace(ctx.root, &index.record_type);
    let (begin, end) = range.to_byte_range(&sub);
    trace!(index = index.name.as_str(), range = %range, "opening index scan");

    let iter = txn
        .get_range(&begin, &end, snapshot)?
        .filter_map(move |entry| {
            let key = match entry {
                Ok((key, _)) => key,
                Err(e) => return Some(Err(e)),
            };
            let tuple = match sub.unpack(&key) {
                Ok(tuple) => tuple,
                Err(e) => return Some(Err(e)),
            };
            if tuple.len() < pk_length {
                return Some(Err(Error::internal(format!(
                    "entry in index '{}' is shorter than the primary key",
                    index.name
                ))));
            }
            let pk = &tuple[tuple.len() - pk_length..];
            let record_key = record_sub.pack(pk);
            let record = match txn.get(&record_key, snapshot) {
                Ok(Some(bytes)) => match ctx.access.deserialize(&bytes) {
                    Ok(record) => record,
                    Err(e) => return Some(Err(e)),
                },
                Ok(None) => return Some(Err(internal_missing_record(&index.name))),
                Err(e) => return Some(Err(e)),
            };
            if let Some(filter) = residual {
                if !filter.matches(&record, ctx.access) {
                    return None;
                }
            }
            Some(Ok(record))
        });
    Ok(RecordCursor::new(iter))
}

/// Like [`index_scan`] but reconstructs each record from the entry's key
/// and value, skipping the record fetch entirely
pub fn covering_index_scan<'t, R: 't>(
    ctx: ExecutionContext<'t, R>,
    txn: &'t dyn KvRead,
    snapshot: bool,
    index: &'t Index,
    range: &ScanRange,
    residual: Option<&'t Filter>,
) -> Result<RecordCursor<'t, R>> {
    check_readable(index)?;
    if !ctx.access.supports_reconstruction() {
        return Err(Error::internal(format!(
            "covering plan over '{}' but the record access cannot reconstruct records",
            index.name
        )));
    }
    let def = ctx.schema.record_type(&index.record_type)?;
    let pk_expression = &def.primary_key;
    let sub = index_subspace(ctx.root, index);
    let (begin, end) = range.to_byte_range(&sub);
    trace!(index = index.name.as_str(), range = %range, "opening covering scan");

    let iter = txn
        .get_range(&begin, &end, snapshot)?
        .filter_map(move |entry| {
            let (key, value) = match entry {
                Ok(pair) => pair,
                Err(e) => return Some(Err(e)),
            };
            let tuple = match sub.unpack(&key) {
                Ok(tuple) => tuple,
                Err(e) => return Some(Err(e)),
            };
            let record = match ctx.access.reconstruct(index, pk_expression, &tuple, &value) {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            if let Some(filter) = residual {
                if !filter.matches(&record, ctx.access) {
                    return None;
                }
            }
            Some(Ok(record))
        });
    Ok(RecordCursor::new(iter))
}

fn check_readable(index: &Index) -> Result<()> {
    if index.state != IndexState::Readable {
        return Err(Error::index_not_readable(
            &index.name,
            index.state.to_string(),
            "enable the index or wait for its build to finish",
        ));
    }
    Ok(())
}
