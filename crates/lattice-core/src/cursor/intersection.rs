//! Intersection operators
//!
//! Two variants, selected by the planner:
//! - sorted-merge: k-way merge over PK-ordered children, O(1) memory
//! - hash: sample children to find the smallest, materialize it into a
//!   map keyed by packed PK, then stream the rest filtering the map down
//!   to the running intersection

use super::{ExecutionContext, RecordCursor};
use crate::error::Result;
use std::collections::HashMap;
use tracing::trace;

const SAMPLE_INITIAL: usize = 100;
const SAMPLE_TIE_BREAK: usize = 200;

/// k-way merge on primary key; every child must emit in strictly
/// ascending PK order. Emits each common PK once, in PK order.
pub fn sorted_merge<'t, R: Clone + 't>(
    children: Vec<RecordCursor<'t, R>>,
    ctx: ExecutionContext<'t, R>,
) -> Result<RecordCursor<'t, R>> {
    if children.is_empty() {
        return Ok(RecordCursor::empty());
    }
    let mut merge = SortedMergeState { children, heads: Vec::new(), ctx, primed: false };
    Ok(RecordCursor::new(std::iter::from_fn(move || {
        merge.next_match()
    })))
}

struct SortedMergeState<'t, R> {
    children: Vec<RecordCursor<'t, R>>,
    heads: Vec<Option<(Vec<u8>, R)>>,
    ctx: ExecutionContext<'t, R>,
    primed: bool,
}

impl<'t, R: Clone> SortedMergeState<'t, R> {
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

    fn next_match(&mut self) -> Option<Result<R>> {
        if !self.primed {
            self.primed = true;
            self.heads = vec![None; self.children.len()];
            for i in 0..self.children.len() {
                if let Err(e) = self.advance(i) {
                    return Some(Err(e));
                }
            }
        }
        loop {
            // any exhausted child ends the intersection
            if self.heads.iter().any(|h| h.is_none()) {
                return None;
            }
            let min_pk = self
                .heads
                .iter()
                .filter_map(|h| h.as_ref().map(|(pk, _)| pk.clone()))
                .min()
                .expect("all heads present");
            let all_equal = self
                .heads
                .iter()
                .all(|h| h.as_ref().map(|(pk, _)| pk == &min_pk).unwrap_or(false));

            if all_equal {
                let record = self.heads[0]
                    .as_ref()
                    .map(|(_, r)| r.clone())
                    .expect("head present");
                for i in 0..self.heads.len() {
                    if let Err(e) = self.advance(i) {
                        return Some(Err(e));
                    }
                }
                return Some(Ok(record));
            }
            // advance only the cursors sitting at the minimum PK
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
        }
    }
}

/// Hash intersection: works on children in any order. Lightly samples
/// each child to estimate the smallest, materializes that child into a
/// PK-keyed map, then streams the remaining children, shrinking the map
/// to the running intersection and exiting early when it empties.
pub fn hash<'t, R: 't>(
    children: Vec<RecordCursor<'t, R>>,
    ctx: ExecutionContext<'t, R>,
) -> Result<RecordCursor<'t, R>> {
    if children.is_empty() {
        return Ok(RecordCursor::empty());
    }

    // sample up to 100 records from each child; extend tied children to
    // 200 to break the tie
    let mut buffered: Vec<Vec<R>> = Vec::with_capacity(children.len());
    let mut cursors: Vec<RecordCursor<'t, R>> = Vec::with_capacity(children.len());
    for child in children {
        let mut buffer = Vec::with_capacity(SAMPLE_INITIAL);
        let mut cursor = child;
        take_into(&mut cursor, &mut buffer, SAMPLE_INITIAL)?;
        buffered.push(buffer);
        cursors.push(cursor);
    }
    let min_sample = buffered.iter().map(|b| b.len()).min().unwrap_or(0);
    if min_sample == SAMPLE_INITIAL {
        for (buffer, cursor) in buffered.iter_mut().zip(cursors.iter_mut()) {
            if buffer.len() == SAMPLE_INITIAL {
                take_into(cursor, buffer, SAMPLE_TIE_BREAK - SAMPLE_INITIAL)?;
            }
        }
    }

    // smallest sampled child becomes the build side
    let build_side = buffered
        .iter()
        .enumerate()
        .min_by_key(|(_, b)| b.len())
        .map(|(i, _)| i)
        .expect("at least one child");
    trace!(build_side, children = buffered.len(), "hash intersection build side chosen");

    let mut map: HashMap<Vec<u8>, R> = HashMap::new();
    {
        let buffer = buffered.remove(build_side);
        let mut cursor = cursors.remove(build_side);
        for record in buffer {
            map.insert(ctx.packed_primary_key(&record)?, record);
        }
        for item in &mut cursor {
            let record = item?;
            map.insert(ctx.packed_primary_key(&record)?, record);
        }
    }

    // stream every probe side, keeping only PKs seen in all of them
    for (buffer, cursor) in buffered.into_iter().zip(cursors.into_iter()) {
        if map.is_empty() {
            return Ok(RecordCursor::empty());
        }
        let mut surviving: HashMap<Vec<u8>, R> = HashMap::with_capacity(map.len());
        for record in buffer.into_iter().map(Ok).chain(cursor) {
            let record = record?;
            let pk = ctx.packed_primary_key(&record)?;
            if let Some(kept) = map.remove(&pk) {
                surviving.insert(pk, kept);
            }
        }
        map = surviving;
    }

    let mut rows: Vec<(Vec<u8>, R)> = map.into_iter().collect();
    // deterministic output: ascend by PK
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(RecordCursor::new(rows.into_iter().map(|(_, r)| Ok(r))))
}

fn take_into<'t, R>(
    cursor: &mut RecordCursor<'t, R>,
    buffer: &mut Vec<R>,
    n: usize,
) -> Result<()> {
    for _ in 0..n {
        match cursor.next() {
            Some(Ok(record)) => buffer.push(record),
            Some(Err(e)) => return Err(e),
            None => break,
        }
    }
    Ok(())
}
