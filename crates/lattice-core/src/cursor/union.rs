//! Union and IN-join operators
//!
//! Union concatenates branch outputs and deduplicates by primary key.
//! When the planner knows every branch is PK-ordered it picks the
//! single-pass merge; otherwise a hash set does the dedup. IN-join is a
//! union of per-value equality scans over one index.

use super::{ExecutionContext, RecordCursor, dedup_by_pk, scan};
use crate::error::Result;
use crate::filter::Filter;
use crate::kv::KvRead;
use crate::plan::ScanRange;
use crate::schema::Index;
use crate::tuple::TupleElement;

/// Concatenate children and deduplicate by primary key; output order is
/// unspecified beyond "children in submission order"
pub fn hash_union<'t, R: 't>(
    children: Vec<RecordCursor<'t, R>>,
    ctx: ExecutionContext<'t, R>,
) -> RecordCursor<'t, R> {
    let chained = children.into_iter().flatten();
    RecordCursor::new(dedup_by_pk(chained, ctx))
}

/// Single-pass merge over PK-ordered children: emits in ascending PK
/// order, each PK once
pub fn merge_union<'t, R: Clone + 't>(
    children: Vec<RecordCursor<'t, R>>,
    ctx: ExecutionContext<'t, R>,
) -> Result<RecordCursor<'t, R>> {
    if children.is_empty() {
        return Ok(RecordCursor::empty());
    }
    let mut state = MergeUnionState { children, heads: Vec::new(), ctx, primed: false };
    Ok(RecordCursor::new(std::iter::from_fn(move || state.next_min())))
}

struct MergeUnionState<'t, R> {
    children: Vec<RecordCursor<'t, R>>,
    heads: Vec<Option<(Vec<u8>, R)>>,
    ctx: ExecutionContext<'t, R>,
    primed: bool,
}

impl<'t, R: Clone> MergeUnionState<'t, R> {
    fn advance(&mut self, i: usize) -> Result<()> {
        self.heads[i] = match self.children[i].next() {
            Some(Ok(record)) => {
                let pk = self.ctx.packed_primary_key(&record)?;
                Some((pk, record))
            }
            Some(Err(e)) => return Err(e),
            None => None,
        };
        Ok(())
    }

    fn next_min(&mut self) -> Option<Result<R>> {
        if !self.primed {
            self.primed = true;
            self.heads = vec![None; self.children.len()];
            for i in 0..self.children.len() {
                if let Err(e) = self.advance(i) {
                    return Some(Err(e));
                }
            }
        }
        let min_pk = self
            .heads
            .iter()
            .filter_map(|h| h.as_ref().map(|(pk, _)| pk.clone()))
            .min()?;
        let record = self
            .heads
            .iter()
            .find_map(|h| h.as_ref().filter(|(pk, _)| pk == &min_pk).map(|(_, r)| r.clone()))
            .expect("a head holds the minimum");
        // advance every child sitting at the emitted PK
        for i in 0..self.heads.len() {
            let at_min = self.heads[i]
                .as_ref()
                .map(|(pk, _)| pk == &min_pk)
                .unwrap_or(false);
            if at_min {
                if let Err(e) = self.advance(i) {
                    return Some(Err(e));
                }
            }
        }
        Some(Ok(record))
    }
}

/// One equality index scan per value, concatenated and deduplicated by
/// primary key
pub fn in_join<'t, R: 't>(
    ctx: ExecutionContext<'t, R>,
    txn: &'t dyn KvRead,
    snapshot: bool,
    index: &'t Index,
    values: &[TupleElement],
    residual: Option<&'t Filter>,
) -> Result<RecordCursor<'t, R>> {
    let mut cursors = Vec::with_capacity(values.len());
    for value in values {
        let range = ScanRange::equals(vec![value.clone()]);
        cursors.push(scan::index_scan(ctx, txn, snapshot, index, &range, residual)?);
    }
    let chained = cursors.into_iter().flatten();
    Ok(RecordCursor::new(dedup_by_pk(chained, ctx)))
}
