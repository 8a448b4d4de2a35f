//! Candidate plan enumeration
//!
//! Emits a bounded set of semantically equivalent physical plans for a
//! rewritten query, in a fixed order:
//! 1. unique-index short-circuit (when heuristic pruning is on)
//! 2. baseline full scan, always
//! 3. IN-join
//! 4. single-index scans
//! 5. multi-index intersection / union, budget permitting

use super::matcher::{covering_residual_is_covered, match_filter_with_index};
use super::PlanGenerationConfig;
use crate::filter::{CompareOp, Filter};
use crate::plan::{IntersectionVariant, QueryPlan, ScanRange};
use crate::schema::{Index, IndexKind, RecordTypeDef};
use tracing::trace;

/// Enumerate candidate plans for a rewritten filter
pub fn enumerate_plans(
    def: &RecordTypeDef,
    filter: Option<&Filter>,
    config: &PlanGenerationConfig,
) -> Vec<QueryPlan> {
    let budget = config.max_candidate_plans.max(1);

    // unique-index point lookups need no competition
    if config.enable_heuristic_pruning {
        if let Some(plan) = unique_short_circuit(def, filter) {
            trace!(plan = %plan.describe(), "unique-index short-circuit");
            return vec![plan];
        }
    }

    let mut plans = vec![QueryPlan::full_scan(&def.name, filter.cloned())];
    let Some(filter) = filter else {
        return plans;
    };

    if let Some(plan) = in_join_plan(def, filter, config) {
        push_within(&mut plans, plan, budget);
    }

    for index in scannable_indexes(def) {
        if plans.len() >= budget {
            return plans;
        }
        if let Some(matched) = match_filter_with_index(filter, index) {
            let plan = scan_plan_for(index, matched.range, matched.residual);
            push_within(&mut plans, plan, budget);
        }
    }

    if plans.len() < budget {
        if let Some(plan) = intersection_plan(def, filter) {
            push_within(&mut plans, plan, budget);
        }
    }
    if plans.len() < budget {
        if let Some(plan) = union_plan(def, filter) {
            push_within(&mut plans, plan, budget);
        }
    }
    plans
}

fn push_within(plans: &mut Vec<QueryPlan>, plan: QueryPlan, budget: usize) {
    if plans.len() < budget {
        plans.push(plan);
    }
}

fn scannable_indexes(def: &RecordTypeDef) -> impl Iterator<Item = &Index> {
    def.indexes.iter().filter(|i| i.is_scannable())
}

/// `f = v` against a unique single-field index returns at most one row;
/// emit just that scan
fn unique_short_circuit(def: &RecordTypeDef, filter: Option<&Filter>) -> Option<QueryPlan> {
    let Some(Filter::Compare { field, op: CompareOp::Eq, value }) = filter else {
        return None;
    };
    let index = scannable_indexes(def).find(|i| {
        i.unique && i.key_fields() == vec![field.as_str()]
    })?;
    Some(QueryPlan::IndexScan {
        index: index.clone(),
        range: ScanRange::equals(vec![value.clone()]),
        residual: None,
    })
}

fn in_join_plan(
    def: &RecordTypeDef,
    filter: &Filter,
    config: &PlanGenerationConfig,
) -> Option<QueryPlan> {
    let Filter::In { field, values } = filter else {
        return None;
    };
    if values.len() < 2 || values.len() > config.max_in_values {
        return None;
    }
    let index = scannable_indexes(def).find(|i| i.leading_field() == Some(field.as_str()))?;
    let mut values = values.clone();
    values.sort();
    values.dedup();
    Some(QueryPlan::InJoin { index: index.clone(), values, residual: None })
}

fn scan_plan_for(index: &Index, range: ScanRange, residual: Option<Filter>) -> QueryPlan {
    if matches!(index.kind, IndexKind::Covering { .. })
        && covering_residual_is_covered(index, residual.as_ref())
    {
        QueryPlan::CoveringIndexScan { index: index.clone(), range, residual }
    } else {
        QueryPlan::IndexScan { index: index.clone(), range, residual }
    }
}

/// AND of two or more field predicates on distinctly indexed fields:
/// intersect the per-field index scans by primary key
fn intersection_plan(def: &RecordTypeDef, filter: &Filter) -> Option<QueryPlan> {
    let Filter::And(conjuncts) = filter else {
        return None;
    };
    let mut children = Vec::new();
    let mut leftovers = Vec::new();
    let mut used_fields = std::collections::HashSet::new();
    for conjunct in conjuncts {
        let leg = match conjunct {
            Filter::Compare { field, op, .. }
                if (*op == CompareOp::Eq || op.is_range())
                    && !used_fields.contains(field.as_str()) =>
            {
                scannable_indexes(def)
                    .find(|i| i.leading_field() == Some(field.as_str()))
                    .and_then(|index| {
                        match_filter_with_index(conjunct, index)
                            .map(|m| (field.clone(), index, m))
                    })
            }
            _ => None,
        };
        match leg {
            Some((field, index, matched)) if matched.residual.is_none() => {
                used_fields.insert(field);
                children.push(scan_plan_for(index, matched.range, None));
            }
            _ => leftovers.push(conjunct.clone()),
        }
    }
    if children.len() < 2 {
        return None;
    }
    let variant = if children.iter().all(|c| c.is_pk_ordered()) {
        IntersectionVariant::SortedMerge
    } else {
        IntersectionVariant::Hash
    };
    let intersection = QueryPlan::Intersection { children, variant };
    if leftovers.is_empty() {
        Some(intersection)
    } else {
        let predicate = if leftovers.len() == 1 {
            leftovers.into_iter().next().expect("one leftover")
        } else {
            Filter::And(leftovers)
        };
        Some(QueryPlan::Filter { child: Box::new(intersection), predicate })
    }
}

/// OR whose every branch has an index-driven plan: union the branches
fn union_plan(def: &RecordTypeDef, filter: &Filter) -> Option<QueryPlan> {
    let Filter::Or(branches) = filter else {
        return None;
    };
    let mut children = Vec::with_capacity(branches.len());
    for branch in branches {
        let plan = scannable_indexes(def).find_map(|index| {
            match_filter_with_index(branch, index)
                .map(|m| scan_plan_for(index, m.range, m.residual))
        })?;
        children.push(plan);
    }
    let merge = children.iter().all(|c| c.is_pk_ordered());
    Some(QueryPlan::Union { children, merge })
}
