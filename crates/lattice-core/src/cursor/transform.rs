//! Record-stream transforms: filter, limit, materializing sort

use super::{ExecutionContext, RecordCursor};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::plan::SortKey;
use crate::tuple::TupleElement;
use std::cmp::Ordering;

/// Forward only records the predicate accepts
pub fn filter<'t, R: 't>(
    input: RecordCursor<'t, R>,
    ctx: ExecutionContext<'t, R>,
    predicate: &'t Filter,
) -> RecordCursor<'t, R> {
    RecordCursor::new(input.filter(move |item| match item {
        Ok(record) => predicate.matches(record, ctx.access),
        Err(_) => true,
    }))
}

/// Stop after `limit` records; errors pass through but do not count
pub fn limit<'t, R: 't>(input: RecordCursor<'t, R>, limit: usize) -> RecordCursor<'t, R> {
    let mut emitted = 0usize;
    RecordCursor::new(input.map_while(move |item| {
        if emitted >= limit {
            return None;
        }
        if item.is_ok() {
            emitted += 1;
        }
        Some(item)
    }))
}

/// Materialize the input and sort it by the given keys, ties preserving
/// input order. Fails with a resource error instead of exceeding the
/// configured row budget.
pub fn sort<'t, R: 't>(
    input: RecordCursor<'t, R>,
    ctx: ExecutionContext<'t, R>,
    keys: &[SortKey],
) -> Result<RecordCursor<'t, R>> {
    let budget = ctx.limits.max_rows_in_memory;
    let mut rows: Vec<R> = Vec::new();
    for item in input {
        rows.push(item?);
        if rows.len() > budget {
            return Err(Error::resource_exhausted(format!(
                "sort would materialize more than {} rows; raise max_rows_in_memory or narrow the query",
                budget
            )));
        }
    }

    let keys = keys.to_vec();
    rows.sort_by(|a, b| compare_by_keys(a, b, &keys, ctx));
    Ok(RecordCursor::new(rows.into_iter().map(Ok)))
}

fn compare_by_keys<R>(
    a: &R,
    b: &R,
    keys: &[SortKey],
    ctx: ExecutionContext<'_, R>,
) -> Ordering {
    for key in keys {
        let left = ctx
            .access
            .extract_field(a, &key.field)
            .unwrap_or(TupleElement::Null);
        let right = ctx
            .access
            .extract_field(b, &key.field)
            .unwrap_or(TupleElement::Null);
        let ordering = if key.ascending {
            left.cmp(&right)
        } else {
            right.cmp(&left)
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
