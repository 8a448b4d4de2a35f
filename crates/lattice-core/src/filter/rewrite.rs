//! Filter canonicalization
//!
//! Four passes, in order:
//! 1. push NOT down (De Morgan, double-negation elimination, leaf
//!    operator inversion)
//! 2. flatten nested AND/AND and OR/OR, collapse single-child nodes
//! 3. structural dedup of AND/OR children by cache key
//! 4. bounded DNF: distribute AND over OR only when the projected term
//!    count stays within budget, estimated before any work is done
//!
//! The result accepts exactly the records the input accepts.

use super::{CompareOp, Filter};
use tracing::debug;

/// Rewrite options
#[derive(Debug, Clone, Copy)]
pub struct RewriteOptions {
    /// Abort DNF distribution when the projected term count exceeds this
    pub max_dnf_branches: usize,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self { max_dnf_branches: 10 }
    }
}

/// Canonicalize a filter tree
pub fn rewrite(filter: &Filter, options: RewriteOptions) -> Filter {
    let pushed = push_not(filter, false);
    let flat = dedup(flatten(pushed));
    let projected = projected_terms(&flat);
    if projected > options.max_dnf_branches {
        debug!(
            projected,
            budget = options.max_dnf_branches,
            "skipping DNF conversion, projected term count over budget"
        );
        return flat;
    }
    dedup(flatten(to_dnf(flat)))
}

/// Push negations to the leaves
fn push_not(filter: &Filter, negate: bool) -> Filter {
    match filter {
        Filter::Not(child) => push_not(child, !negate),
        Filter::And(children) => {
            let rewritten = children.iter().map(|c| push_not(c, negate)).collect();
            if negate { Filter::Or(rewritten) } else { Filter::And(rewritten) }
        }
        Filter::Or(children) => {
            let rewritten = children.iter().map(|c| push_not(c, negate)).collect();
            if negate { Filter::And(rewritten) } else { Filter::Or(rewritten) }
        }
        Filter::Compare { field, op, value } => {
            if !negate {
                return filter.clone();
            }
            match op.negated() {
                Some(inverted) => Filter::Compare {
                    field: field.clone(),
                    op: inverted,
                    value: value.clone(),
                },
                // starts-with / contains have no inverse operator
                None => Filter::Not(Box::new(filter.clone())),
            }
        }
        Filter::In { .. } => {
            if negate {
                Filter::Not(Box::new(filter.clone()))
            } else {
                filter.clone()
            }
        }
    }
}

/// Collapse nested same-kind booleans and single-child nodes
fn flatten(filter: Filter) -> Filter {
    match filter {
        Filter::And(children) => {
            let mut flat = Vec::with_capacity(children.len());
            for child in children {
                match flatten(child) {
                    Filter::And(nested) => flat.extend(nested),
                    other => flat.push(other),
                }
            }
            collapse(flat, true)
        }
        Filter::Or(children) => {
            let mut flat = Vec::with_capacity(children.len());
            for child in children {
                match flatten(child) {
                    Filter::Or(nested) => flat.extend(nested),
                    other => flat.push(other),
                }
            }
            collapse(flat, false)
        }
        Filter::Not(child) => Filter::Not(Box::new(flatten(*child))),
        leaf => leaf,
    }
}

fn collapse(mut children: Vec<Filter>, conjunction: bool) -> Filter {
    if children.len() == 1 {
        return children.pop().expect("non-empty");
    }
    if conjunction { Filter::And(children) } else { Filter::Or(children) }
}

/// Drop structurally duplicate AND/OR children, keeping first occurrence
fn dedup(filter: Filter) -> Filter {
    match filter {
        Filter::And(children) => collapse(dedup_children(children), true),
        Filter::Or(children) => collapse(dedup_children(children), false),
        Filter::Not(child) => Filter::Not(Box::new(dedup(*child))),
        leaf => leaf,
    }
}

fn dedup_children(children: Vec<Filter>) -> Vec<Filter> {
    let mut seen = std::collections::HashSet::new();
    children
        .into_iter()
        .map(dedup)
        .filter(|c| seen.insert(c.cache_key()))
        .collect()
}

/// Projected DNF term count: product of OR fan-outs under an AND
fn projected_terms(filter: &Filter) -> usize {
    match filter {
        Filter::And(children) => children
            .iter()
            .map(projected_terms)
            .fold(1usize, |acc, n| acc.saturating_mul(n)),
        Filter::Or(children) => children.iter().map(projected_terms).sum(),
        _ => 1,
    }
}

/// Distribute AND over OR; the caller has already checked the budget
fn to_dnf(filter: Filter) -> Filter {
    match filter {
        Filter::And(children) => {
            let converted: Vec<Filter> = children.into_iter().map(to_dnf).collect();
            // cartesian product of each child's OR branches
            let mut terms: Vec<Vec<Filter>> = vec![Vec::new()];
            for child in converted {
                let branches: Vec<Filter> = match child {
                    Filter::Or(branches) => branches,
                    other => vec![other],
                };
                let mut next = Vec::with_capacity(terms.len() * branches.len());
                for term in &terms {
                    for branch in &branches {
                        let mut extended = term.clone();
                        extended.push(branch.clone());
                        next.push(extended);
                    }
                }
                terms = next;
            }
            if terms.len() == 1 {
                collapse(terms.pop().expect("non-empty"), true)
            } else {
                Filter::Or(terms.into_iter().map(|t| collapse(t, true)).collect())
            }
        }
        Filter::Or(children) => Filter::Or(children.into_iter().map(to_dnf).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MapRecord, MapRecordAccess};

    fn opts(max: usize) -> RewriteOptions {
        RewriteOptions { max_dnf_branches: max }
    }

    #[test]
    fn test_double_negation() {
        let filter = Filter::negate(Filter::negate(Filter::eq("a", 1i64)));
        assert_eq!(rewrite(&filter, opts(10)), Filter::eq("a", 1i64));
    }

    #[test]
    fn test_de_morgan() {
        let filter = Filter::negate(Filter::and([
            Filter::eq("a", 1i64),
            Filter::compare("b", CompareOp::Lt, 2i64),
        ]));
        let expected = Filter::or([
            Filter::compare("a", CompareOp::NotEq, 1i64),
            Filter::compare("b", CompareOp::Ge, 2i64),
        ]);
        assert_eq!(rewrite(&filter, opts(10)), expected);
    }

    #[test]
    fn test_not_starts_with_is_preserved() {
        let leaf = Filter::compare("name", CompareOp::StartsWith, "a");
        let filter = Filter::negate(leaf.clone());
        assert_eq!(rewrite(&filter, opts(10)), Filter::Not(Box::new(leaf)));
    }

    #[test]
    fn test_flatten_and_collapse() {
        let filter = Filter::and([
            Filter::and([Filter::eq("a", 1i64), Filter::eq("b", 2i64)]),
            Filter::eq("c", 3i64),
        ]);
        match rewrite(&filter, opts(1)) {
            Filter::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected flat AND, got {}", other),
        }

        let single = Filter::and([Filter::eq("a", 1i64)]);
        assert_eq!(rewrite(&single, opts(10)), Filter::eq("a", 1i64));
    }

    #[test]
    fn test_dedup() {
        let filter = Filter::and([
            Filter::eq("a", 1i64),
            Filter::eq("a", 1i64),
            Filter::eq("b", 2i64),
        ]);
        match rewrite(&filter, opts(1)) {
            Filter::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected AND, got {}", other),
        }
    }

    #[test]
    fn test_dnf_distribution() {
        // a=1 AND (b=1 OR b=2)  =>  (a=1 AND b=1) OR (a=1 AND b=2)
        let filter = Filter::and([
            Filter::eq("a", 1i64),
            Filter::or([Filter::eq("b", 1i64), Filter::eq("b", 2i64)]),
        ]);
        let rewritten = rewrite(&filter, opts(10));
        match &rewritten {
            Filter::Or(branches) => {
                assert_eq!(branches.len(), 2);
                for branch in branches {
                    assert!(matches!(branch, Filter::And(c) if c.len() == 2));
                }
            }
            other => panic!("expected OR of ANDs, got {}", other),
        }
    }

    #[test]
    fn test_dnf_budget_guard() {
        // three OR-triples project to 27 terms; budget 10 skips DNF
        let triple = |f: &str| {
            Filter::or([
                Filter::eq(f, 1i64),
                Filter::eq(f, 2i64),
                Filter::eq(f, 3i64),
            ])
        };
        let filter = Filter::and([triple("a"), triple("b"), triple("c")]);
        let rewritten = rewrite(&filter, opts(10));
        // untouched shape: AND of three ORs
        match &rewritten {
            Filter::And(children) => {
                assert_eq!(children.len(), 3);
                assert!(children.iter().all(|c| matches!(c, Filter::Or(b) if b.len() == 3)));
            }
            other => panic!("expected AND preserved, got {}", other),
        }
        assert!(rewritten.term_count() <= 10 || rewritten == rewrite(&filter, opts(0)));
    }

    #[test]
    fn test_rewrite_preserves_semantics() {
        let access = MapRecordAccess;
        let records: Vec<MapRecord> = (0..4)
            .flat_map(|a| {
                (0..4).map(move |b| {
                    MapRecord::new("T").with_field("a", a as i64).with_field("b", b as i64)
                })
            })
            .collect();

        let filters = vec![
            Filter::negate(Filter::and([
                Filter::eq("a", 1i64),
                Filter::negate(Filter::eq("b", 2i64)),
            ])),
            Filter::and([
                Filter::or([Filter::eq("a", 0i64), Filter::eq("a", 1i64)]),
                Filter::or([Filter::eq("b", 2i64), Filter::eq("b", 3i64)]),
            ]),
            Filter::or([
                Filter::negate(Filter::or([Filter::eq("a", 0i64), Filter::eq("b", 0i64)])),
                Filter::eq("a", 2i64),
            ]),
        ];

        for filter in &filters {
            for budget in [1usize, 4, 50] {
                let rewritten = rewrite(filter, opts(budget));
                for record in &records {
                    assert_eq!(
                        filter.matches(record, &access),
                        rewritten.matches(record, &access),
                        "semantics changed for {} (budget {})",
                        filter,
                        budget
                    );
                }
            }
        }
    }
}
