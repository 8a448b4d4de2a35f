//! Filter layer - query predicates over records
//!
//! A [`Filter`] is a tree of field comparisons combined with AND/OR/NOT.
//! Filters evaluate against records through [`RecordAccess`], produce a
//! canonical [`Filter::cache_key`] used by the plan cache, and are
//! normalized by [`rewrite`] before the planner matches them against
//! indexes.

pub mod rewrite;

pub use rewrite::{RewriteOptions, rewrite};

use crate::record::RecordAccess;
use crate::tuple::TupleElement;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operator in a filter leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `≠`
    NotEq,
    /// `<`
    Lt,
    /// `≤`
    Le,
    /// `>`
    Gt,
    /// `≥`
    Ge,
    /// String/bytes prefix match
    StartsWith,
    /// Substring match
    Contains,
}

impl CompareOp {
    /// The operator accepting exactly the complement set of records,
    /// where one exists. `StartsWith`/`Contains` have no inverse
    /// operator; NOT stays in the tree for those.
    pub fn negated(&self) -> Option<CompareOp> {
        match self {
            CompareOp::Eq => Some(CompareOp::NotEq),
            CompareOp::NotEq => Some(CompareOp::Eq),
            CompareOp::Lt => Some(CompareOp::Ge),
            CompareOp::Ge => Some(CompareOp::Lt),
            CompareOp::Gt => Some(CompareOp::Le),
            CompareOp::Le => Some(CompareOp::Gt),
            CompareOp::StartsWith | CompareOp::Contains => None,
        }
    }

    /// True for `<`, `≤`, `>`, `≥`
    pub fn is_range(&self) -> bool {
        matches!(self, CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "eq",
            CompareOp::NotEq => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::StartsWith => "starts-with",
            CompareOp::Contains => "contains",
        };
        write!(f, "{}", s)
    }
}

/// A query predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// `field <op> literal`
    Compare {
        /// Field name
        field: String,
        /// Comparison operator
        op: CompareOp,
        /// Literal operand
        value: TupleElement,
    },
    /// `field IN {v1, …, vm}`
    In {
        /// Field name
        field: String,
        /// Literal set
        values: Vec<TupleElement>,
    },
    /// Conjunction
    And(Vec<Filter>),
    /// Disjunction
    Or(Vec<Filter>),
    /// Negation
    Not(Box<Filter>),
}

impl Filter {
    /// `field = value`
    pub fn eq(field: impl Into<String>, value: impl Into<TupleElement>) -> Filter {
        Filter::Compare { field: field.into(), op: CompareOp::Eq, value: value.into() }
    }

    /// `field <op> value`
    pub fn compare(
        field: impl Into<String>,
        op: CompareOp,
        value: impl Into<TupleElement>,
    ) -> Filter {
        Filter::Compare { field: field.into(), op, value: value.into() }
    }

    /// `field IN values`
    pub fn is_in<V: Into<TupleElement>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Filter {
        Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction of the given filters
    pub fn and(children: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::And(children.into_iter().collect())
    }

    /// Disjunction of the given filters
    pub fn or(children: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::Or(children.into_iter().collect())
    }

    /// Negation
    pub fn negate(child: Filter) -> Filter {
        Filter::Not(Box::new(child))
    }

    /// Evaluate the filter against a record. Absent fields evaluate as
    /// null; comparisons use the tuple total order.
    pub fn matches<R>(&self, record: &R, access: &dyn RecordAccess<R>) -> bool {
        match self {
            Filter::Compare { field, op, value } => {
                let actual = access
                    .extract_field(record, field)
                    .unwrap_or(TupleElement::Null);
                compare_matches(&actual, *op, value)
            }
            Filter::In { field, values } => {
                let actual = access
                    .extract_field(record, field)
                    .unwrap_or(TupleElement::Null);
                values.iter().any(|v| v == &actual)
            }
            Filter::And(children) => children.iter().all(|c| c.matches(record, access)),
            Filter::Or(children) => children.iter().any(|c| c.matches(record, access)),
            Filter::Not(child) => !child.matches(record, access),
        }
    }

    /// Canonical textual fingerprint. AND/OR children are sorted, so the
    /// key is invariant under any permutation of commutative children;
    /// the plan cache hashes this string with a process-stable hash.
    pub fn cache_key(&self) -> String {
        match self {
            Filter::Compare { field, op, value } => {
                format!("field:{}:{}:{}", field, op, value)
            }
            Filter::In { field, values } => {
                let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("in:{}:[{}]", field, rendered.join(","))
            }
            Filter::And(children) => {
                let mut keys: Vec<String> = children.iter().map(|c| c.cache_key()).collect();
                keys.sort();
                format!("and({})", keys.join("&"))
            }
            Filter::Or(children) => {
                let mut keys: Vec<String> = children.iter().map(|c| c.cache_key()).collect();
                keys.sort();
                format!("or({})", keys.join("|"))
            }
            Filter::Not(child) => format!("not:{}", child.cache_key()),
        }
    }

    /// Field names referenced anywhere in the tree
    pub fn referenced_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields<'f>(&'f self, out: &mut Vec<&'f str>) {
        match self {
            Filter::Compare { field, .. } | Filter::In { field, .. } => out.push(field),
            Filter::And(children) | Filter::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
            Filter::Not(child) => child.collect_fields(out),
        }
    }

    /// Number of terms a DNF view of this filter has: OR fan-out at the
    /// top, 1 for everything else.
    pub fn term_count(&self) -> usize {
        match self {
            Filter::Or(children) => children.len(),
            _ => 1,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

fn compare_matches(actual: &TupleElement, op: CompareOp, literal: &TupleElement) -> bool {
    match op {
        CompareOp::Eq => actual == literal,
        CompareOp::NotEq => actual != literal,
        CompareOp::Lt => actual < literal,
        CompareOp::Le => actual <= literal,
        CompareOp::Gt => actual > literal,
        CompareOp::Ge => actual >= literal,
        CompareOp::StartsWith => match (actual, literal) {
            (TupleElement::String(a), TupleElement::String(p)) => a.starts_with(p.as_str()),
            (TupleElement::Bytes(a), TupleElement::Bytes(p)) => a.starts_with(p.as_slice()),
            _ => false,
        },
        CompareOp::Contains => match (actual, literal) {
            (TupleElement::String(a), TupleElement::String(p)) => a.contains(p.as_str()),
            _ => false,
        },
    }
}
