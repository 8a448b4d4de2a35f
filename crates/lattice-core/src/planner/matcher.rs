//! Index matching
//!
//! Maps `(filter, index)` to a key range plus residual predicate such
//! that range scan + residual returns exactly the records the filter
//! accepts. Compound indexes match greedily: equality conjuncts bind
//! fields left to right, then at most one trailing range conjunct binds
//! the next field; everything else becomes residual.
//!
//! Boundary construction follows the half-open range table; `> v` and
//! `<= v` need `successor(v)`, and when the successor does not exist
//! (integer at its maximum, float at infinity) the match is abandoned
//! entirely. Returning an approximate `>= v` range instead would change
//! query results.

use crate::filter::{CompareOp, Filter};
use crate::plan::{EndMode, ScanRange};
use crate::schema::{Index, IndexKind};
use crate::tuple::TupleElement;

/// A successful match of a filter against one index
#[derive(Debug, Clone)]
pub struct IndexMatch {
    /// Key range to scan
    pub range: ScanRange,
    /// Predicate to apply to each fetched record, if any remains
    pub residual: Option<Filter>,
    /// How many residual conjuncts are plain field predicates
    pub residual_field_predicates: usize,
}

/// Try to serve `filter` from `index`. `None` means the index cannot
/// serve it and the caller should fall back to other plans.
pub fn match_filter_with_index(filter: &Filter, index: &Index) -> Option<IndexMatch> {
    if !matches!(index.kind, IndexKind::Value | IndexKind::Covering { .. }) {
        return None;
    }
    let conjuncts: Vec<&Filter> = match filter {
        Filter::And(children) => children.iter().collect(),
        other => vec![other],
    };
    let fields = index.key_fields();
    let mut used = vec![false; conjuncts.len()];

    let mut equality_prefix: Vec<TupleElement> = Vec::new();
    let mut trailing: Option<(CompareOp, TupleElement)> = None;
    for field in &fields {
        if let Some(i) = find_conjunct(&conjuncts, &used, field, |op| op == CompareOp::Eq) {
            used[i] = true;
            equality_prefix.push(literal_of(conjuncts[i]).clone());
            continue;
        }
        if let Some(i) = find_conjunct(&conjuncts, &used, field, |op| op.is_range()) {
            used[i] = true;
            let Filter::Compare { op, value, .. } = conjuncts[i] else {
                unreachable!("find_conjunct only returns comparisons");
            };
            trailing = Some((*op, value.clone()));
        }
        break;
    }

    if equality_prefix.is_empty() && trailing.is_none() {
        return None;
    }

    let range = build_range(equality_prefix, trailing)?;
    let leftovers: Vec<Filter> = conjuncts
        .iter()
        .zip(used.iter())
        .filter(|(_, used)| !**used)
        .map(|(c, _)| (*c).clone())
        .collect();
    let residual_field_predicates = leftovers
        .iter()
        .filter(|f| matches!(f, Filter::Compare { .. } | Filter::In { .. }))
        .count();
    let residual = match leftovers.len() {
        0 => None,
        1 => Some(leftovers.into_iter().next().expect("one leftover")),
        _ => Some(Filter::And(leftovers)),
    };

    Some(IndexMatch { range, residual, residual_field_predicates })
}

/// Whether a covering plan is sound: every residual field must be
/// reconstructible from the index entry alone
pub fn covering_residual_is_covered(index: &Index, residual: Option<&Filter>) -> bool {
    let Some(residual) = residual else {
        return true;
    };
    let covered = index.covered_fields();
    residual
        .referenced_fields()
        .iter()
        .all(|f| covered.contains(f))
}

fn build_range(
    equality_prefix: Vec<TupleElement>,
    trailing: Option<(CompareOp, TupleElement)>,
) -> Option<ScanRange> {
    let Some((op, value)) = trailing else {
        return Some(ScanRange {
            begin: equality_prefix.clone(),
            end: equality_prefix,
            end_mode: EndMode::PrefixInclusive,
        });
    };
    let mut begin = equality_prefix.clone();
    let mut end = equality_prefix.clone();
    let range = match op {
        CompareOp::Lt => {
            end.push(value);
            ScanRange { begin, end, end_mode: EndMode::Exclusive }
        }
        CompareOp::Le => {
            // (prefix, v, pk...) entries sort below (prefix, next(v)),
            // so the exclusive boundary lands after every v entry
            end.push(value.successor()?);
            ScanRange { begin, end, end_mode: EndMode::Exclusive }
        }
        CompareOp::Gt => {
            begin.push(value.successor()?);
            ScanRange { begin, end, end_mode: EndMode::PrefixInclusive }
        }
        CompareOp::Ge => {
            begin.push(value);
            ScanRange { begin, end, end_mode: EndMode::PrefixInclusive }
        }
        _ => return None,
    };
    Some(range)
}

fn find_conjunct(
    conjuncts: &[&Filter],
    used: &[bool],
    field: &str,
    accepts: impl Fn(CompareOp) -> bool,
) -> Option<usize> {
    conjuncts.iter().enumerate().position(|(i, c)| {
        !used[i]
            && matches!(c, Filter::Compare { field: f, op, .. } if f == field && accepts(*op))
    })
}

fn literal_of<'f>(filter: &'f Filter) -> &'f TupleElement {
    match filter {
        Filter::Compare { value, .. } => value,
        _ => unreachable!("only comparisons reach literal_of"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Index;

    fn simple_index() -> Index {
        Index::value("qty_idx", "Item", ["qty"])
    }

    fn compound_index() -> Index {
        Index::value("city_age_idx", "Person", ["city", "age"])
    }

    #[test]
    fn test_equality_leaf_matches() {
        let matched =
            match_filter_with_index(&Filter::eq("qty", 5i64), &simple_index()).unwrap();
        assert!(matched.range.is_equality());
        assert!(matched.residual.is_none());
    }

    #[test]
    fn test_range_leaf_matches() {
        let filter = Filter::compare("qty", CompareOp::Gt, 10i64);
        let matched = match_filter_with_index(&filter, &simple_index()).unwrap();
        assert_eq!(matched.range.begin, vec![TupleElement::Int(11)]);
        assert!(matched.range.end.is_empty());
        assert!(matched.residual.is_none());
    }

    #[test]
    fn test_successor_overflow_returns_none() {
        // qty > i64::MAX has no representable begin boundary; an
        // approximate >= range would wrongly return the max value itself
        let gt = Filter::compare("qty", CompareOp::Gt, i64::MAX);
        assert!(match_filter_with_index(&gt, &simple_index()).is_none());

        let le = Filter::compare("qty", CompareOp::Le, i64::MAX);
        assert!(match_filter_with_index(&le, &simple_index()).is_none());

        let le_inf = Filter::compare("score", CompareOp::Le, f64::INFINITY);
        let score_index = Index::value("score_idx", "Item", ["score"]);
        assert!(match_filter_with_index(&le_inf, &score_index).is_none());
    }

    #[test]
    fn test_compound_equality_then_range() {
        let filter = Filter::and([
            Filter::eq("city", "NYC"),
            Filter::compare("age", CompareOp::Ge, 30i64),
        ]);
        let matched = match_filter_with_index(&filter, &compound_index()).unwrap();
        assert_eq!(
            matched.range.begin,
            vec![TupleElement::String("NYC".into()), TupleElement::Int(30)]
        );
        assert_eq!(matched.range.end, vec![TupleElement::String("NYC".into())]);
        assert_eq!(matched.range.end_mode, EndMode::PrefixInclusive);
        assert!(matched.residual.is_none());
    }

    #[test]
    fn test_unmatched_conjuncts_become_residual() {
        let filter = Filter::and([
            Filter::eq("city", "NYC"),
            Filter::eq("name", "Ada"),
            Filter::negate(Filter::eq("age", 1i64)),
        ]);
        let matched = match_filter_with_index(&filter, &compound_index()).unwrap();
        assert_eq!(matched.range.begin, vec![TupleElement::String("NYC".into())]);
        let residual = matched.residual.unwrap();
        match residual {
            Filter::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected AND residual, got {}", other),
        }
        assert_eq!(matched.residual_field_predicates, 1);
    }

    #[test]
    fn test_no_leading_match_returns_none() {
        // age alone cannot drive a (city, age) index
        let filter = Filter::eq("age", 30i64);
        assert!(match_filter_with_index(&filter, &compound_index()).is_none());
    }

    #[test]
    fn test_unsupported_ops_do_not_match() {
        let filter = Filter::compare("qty", CompareOp::NotEq, 5i64);
        assert!(match_filter_with_index(&filter, &simple_index()).is_none());
        let filter = Filter::compare("qty", CompareOp::StartsWith, "x");
        assert!(match_filter_with_index(&filter, &simple_index()).is_none());
    }

    #[test]
    fn test_second_range_on_same_field_goes_to_residual() {
        let filter = Filter::and([
            Filter::compare("qty", CompareOp::Gt, 1i64),
            Filter::compare("qty", CompareOp::Lt, 10i64),
        ]);
        let matched = match_filter_with_index(&filter, &simple_index()).unwrap();
        assert_eq!(matched.range.begin, vec![TupleElement::Int(2)]);
        assert!(matched.residual.is_some());
        assert_eq!(matched.residual_field_predicates, 1);
    }

    #[test]
    fn test_covering_residual_check() {
        let index = Index {
            name: "cover".into(),
            record_type: "Person".into(),
            key_expression: crate::schema::KeyExpression::concat_fields(["city"]),
            kind: IndexKind::Covering { stored_fields: vec!["age".into()] },
            unique: false,
            state: crate::schema::IndexState::Readable,
        };
        assert!(covering_residual_is_covered(&index, Some(&Filter::eq("age", 1i64))));
        assert!(!covering_residual_is_covered(&index, Some(&Filter::eq("name", 1i64))));
        assert!(covering_residual_is_covered(&index, None));
    }
}
