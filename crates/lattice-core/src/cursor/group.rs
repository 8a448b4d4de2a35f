//! Hash grouping
//!
//! Adjacent to the planning core: groups a record stream by a field list
//! and counts members. The one hard rule is the resource contract: when
//! the group count would exceed the configured budget the operator fails
//! with a resource-exhausted error rather than spilling or truncating.

use super::{ExecutionContext, RecordCursor};
use crate::error::{Error, Result};
use crate::tuple::{Tuple, TupleElement, pack_elements};
use std::collections::HashMap;

/// One output group
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedRow {
    /// Grouping key values, in field order
    pub key: Tuple,
    /// Number of records in the group
    pub count: u64,
}

/// Group the input by the given fields, counting members. Output is
/// ordered by grouping key.
pub fn group_by<'t, R>(
    input: RecordCursor<'t, R>,
    ctx: ExecutionContext<'t, R>,
    fields: &[String],
) -> Result<Vec<GroupedRow>> {
    if fields.is_empty() {
        return Err(Error::invalid_argument("GROUP BY needs at least one field"));
    }
    let budget = ctx.limits.max_groups_in_memory;
    let mut groups: HashMap<Vec<u8>, GroupedRow> = HashMap::new();
    for item in input {
        let record = item?;
        let key: Tuple = fields
            .iter()
            .map(|f| {
                ctx.access
                    .extract_field(&record, f)
                    .unwrap_or(TupleElement::Null)
            })
            .collect();
        let packed = pack_elements(&key);
        match groups.get_mut(&packed) {
            Some(group) => group.count += 1,
            None => {
                if groups.len() >= budget {
                    return Err(Error::resource_exhausted(format!(
                        "GROUP BY exceeded {} groups; raise max_groups_in_memory or narrow the query",
                        budget
                    )));
                }
                groups.insert(packed, GroupedRow { key, count: 1 });
            }
        }
    }
    let mut rows: Vec<GroupedRow> = groups.into_values().collect();
    rows.sort_by(|a, b| crate::tuple::compare_tuples(&a.key, &b.key));
    Ok(rows)
}
