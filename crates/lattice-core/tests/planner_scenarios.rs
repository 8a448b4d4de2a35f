//! End-to-end planner and executor scenarios over a real LMDB store.

mod common;

use common::Fixture;
use lattice_core::plan::IntersectionVariant;
use lattice_core::{
    BreakerState, CompareOp, Filter, HnswGraph, Index, IndexKind, KeyExpression, MapRecord,
    QueryPlan, RecordQuery, Schema, VectorMetric, VectorOptions, VectorStrategy,
};
use std::sync::Arc;

fn user_schema() -> Schema {
    Schema::builder()
        .record_type(
            "User",
            KeyExpression::Field("id".into()),
            vec![Index::value("user_email", "User", ["email"]).unique()],
        )
        .build()
        .unwrap()
}

fn item_schema() -> Schema {
    Schema::builder()
        .record_type(
            "Item",
            KeyExpression::Field("id".into()),
            vec![Index::value("item_qty", "Item", ["qty"])],
        )
        .build()
        .unwrap()
}

fn person_schema() -> Schema {
    Schema::builder()
        .record_type(
            "Person",
            KeyExpression::Field("id".into()),
            vec![
                Index::value("person_city", "Person", ["city"]),
                Index::value("person_age", "Person", ["age"]),
            ],
        )
        .build()
        .unwrap()
}

/// Scenario A: a unique-index equality query plans to exactly one index
/// point scan and touches the store twice (entry + record).
#[test]
fn unique_index_short_circuit() {
    let fixture = Fixture::new(user_schema());
    for (id, email) in [(1i64, "a@x"), (2, "b@x"), (3, "c@x")] {
        fixture
            .store
            .save(
                &MapRecord::new("User")
                    .with_field("id", id)
                    .with_field("email", email),
            )
            .unwrap();
    }

    let query = RecordQuery::all("User").with_filter(Filter::eq("email", "b@x"));
    let plan = fixture.planner.plan(&query).unwrap();
    assert!(
        matches!(&*plan, QueryPlan::IndexScan { index, residual: None, .. } if index.name == "user_email"),
        "expected a bare unique-index scan, got {}",
        plan.describe()
    );

    let (records, reads) = fixture.run_counting(&plan).unwrap();
    assert_eq!(Fixture::ids(&records), vec![2]);
    assert_eq!(reads, 2, "one index entry read plus one record read");
}

/// Scenario B: `qty > i64::MAX` has no representable range boundary; the
/// matcher must refuse and the query must fall back to a full scan that
/// returns nothing, never an incorrect `>= MAX` range.
#[test]
fn range_boundary_rejection() {
    let fixture = Fixture::new(item_schema());
    for id in 0..10i64 {
        fixture
            .store
            .save(
                &MapRecord::new("Item")
                    .with_field("id", id)
                    .with_field("qty", i64::MAX - id),
            )
            .unwrap();
    }

    let query = RecordQuery::all("Item")
        .with_filter(Filter::compare("qty", CompareOp::Gt, i64::MAX));
    let plan = fixture.planner.plan(&query).unwrap();
    assert!(
        matches!(&*plan, QueryPlan::FullScan { .. }),
        "expected full-scan fallback, got {}",
        plan.describe()
    );
    assert!(fixture.run(&plan).unwrap().is_empty());

    // the record holding qty == MAX must still be reachable by >=
    let query = RecordQuery::all("Item")
        .with_filter(Filter::compare("qty", CompareOp::Ge, i64::MAX));
    let plan = fixture.planner.plan(&query).unwrap();
    assert_eq!(Fixture::ids(&fixture.run(&plan).unwrap()), vec![0]);
}

/// Scenario C: two selective predicates on distinctly indexed fields
/// produce a sorted-merge intersection candidate whose output matches
/// the brute-force result, with estimated rows near n * 0.1 * 0.4.
#[test]
fn two_index_intersection() {
    let fixture = Fixture::new(person_schema());
    // ages are non-decreasing in id, so the age-index scan emits in
    // primary-key order and the sorted-merge variant is applicable
    for id in 0..1000i64 {
        let city = if id % 10 == 0 { "NYC" } else { "Elsewhere" };
        let age = if id < 600 { 25i64 } else { 35 };
        fixture
            .store
            .save(
                &MapRecord::new("Person")
                    .with_field("id", id)
                    .with_field("city", city)
                    .with_field("age", age),
            )
            .unwrap();
    }
    fixture.stats.collect_table_stats("Person", 1.0).unwrap();
    for name in ["person_city", "person_age"] {
        let index = fixture
            .schema
            .record_type("Person")
            .unwrap()
            .index(name)
            .unwrap()
            .clone();
        fixture.stats.collect_index_stats(&index, 100, 10_000).unwrap();
    }

    let filter = Filter::and([
        Filter::eq("city", "NYC"),
        Filter::compare("age", CompareOp::Gt, 30i64),
    ]);
    let def = fixture.schema.record_type("Person").unwrap();
    let rewritten = lattice_core::rewrite(&filter, Default::default());
    let candidates = lattice_core::planner::enumerate_plans(
        def,
        Some(&rewritten),
        fixture.planner.config(),
    );
    let intersection = candidates
        .iter()
        .find(|p| matches!(p, QueryPlan::Intersection { .. }))
        .expect("intersection candidate emitted");
    if let QueryPlan::Intersection { children, variant } = intersection {
        assert_eq!(children.len(), 2);
        assert_eq!(
            *variant,
            IntersectionVariant::SortedMerge,
            "both children emit in PK order"
        );
    }

    let cost = fixture.planner.estimate_cost(intersection);
    assert!(
        (25.0..=60.0).contains(&cost.estimated_rows),
        "estimated rows {} should be near 40",
        cost.estimated_rows
    );

    let expected: Vec<i64> = (600..1000).filter(|id| id % 10 == 0).collect();
    let records = fixture.run(intersection).unwrap();
    assert_eq!(Fixture::ids(&records), expected);

    // sorted-merge emits in ascending PK order
    let emitted: Vec<i64> = records.iter().map(|r| Fixture::int_field(r, "id")).collect();
    let mut sorted = emitted.clone();
    sorted.sort_unstable();
    assert_eq!(emitted, sorted);

    // and the planner's chosen plan returns the same rows
    let query = RecordQuery::all("Person").with_filter(filter);
    let chosen = fixture.planner.plan(&query).unwrap();
    assert_eq!(Fixture::ids(&fixture.run(&chosen).unwrap()), expected);
}

/// Scenario D: a (10 x 10 x 10)-way distribution projects to 1000 DNF
/// terms; with a budget of 50 the rewriter must keep the conjunctive
/// shape and planning must still complete.
#[test]
fn dnf_explosion_guard() {
    let fixture = Fixture::new(person_schema());
    let or_block = |field: &str| {
        Filter::or((1..=10i64).map(|v| Filter::eq(field, v)))
    };
    let filter = Filter::and([or_block("a"), or_block("b"), or_block("c")]);

    let rewritten = lattice_core::rewrite(
        &filter,
        lattice_core::RewriteOptions { max_dnf_branches: 50 },
    );
    match &rewritten {
        Filter::And(children) => {
            assert_eq!(children.len(), 3, "conjunctive shape preserved");
            assert!(children.iter().all(|c| matches!(c, Filter::Or(b) if b.len() == 10)));
        }
        other => panic!("expected preserved AND, got {}", other),
    }

    let query = RecordQuery::all("Person").with_filter(filter);
    let plan = fixture.planner.plan(&query).unwrap();
    assert!(matches!(&*plan, QueryPlan::FullScan { .. }));
    assert!(fixture.run(&plan).unwrap().is_empty());
}

/// Scenario E: HNSW strategy with an unbuilt graph falls back to the
/// flat scan, still returns the k nearest, and trips the breaker so the
/// next query skips the graph entirely.
#[test]
fn vector_fallback_on_unbuilt_graph() {
    let options = VectorOptions {
        dimension: 4,
        metric: VectorMetric::Cosine,
        strategy: VectorStrategy::Hnsw { inline_indexing: true },
    };
    let schema = Schema::builder()
        .record_type(
            "Doc",
            KeyExpression::Field("id".into()),
            vec![Index {
                name: "doc_embedding".into(),
                record_type: "Doc".into(),
                key_expression: KeyExpression::Field("embedding".into()),
                kind: IndexKind::Vector(options.clone()),
                unique: false,
                state: lattice_core::IndexState::Readable,
            }],
        )
        .build()
        .unwrap();
    let fixture = Fixture::new(schema);

    for id in 0..200i64 {
        let angle = id as f32 / 200.0 * std::f32::consts::PI;
        fixture
            .store
            .save(
                &MapRecord::new("Doc")
                    .with_field("id", id)
                    .with_vector("embedding", vec![angle.cos(), angle.sin(), 0.0, 0.0]),
            )
            .unwrap();
    }
    // registered but never built: the first search throws graph-not-built
    fixture.vectors.register_graph(
        "doc_embedding",
        Arc::new(HnswGraph::new("doc_embedding", options)),
    );

    let plan = fixture
        .planner
        .plan_vector_search("doc_embedding", 5, vec![1.0, 0.0, 0.0, 0.0], None)
        .unwrap();
    let records = fixture.run(&plan).unwrap();
    // ids 0..5 have the smallest angles to the query vector
    assert_eq!(Fixture::ids(&records), vec![0, 1, 2, 3, 4]);
    assert_eq!(
        fixture.vectors.breaker_state("doc_embedding"),
        BreakerState::Failed,
        "unbuilt graph must open the breaker"
    );

    // second query: breaker open, flat scan serves directly
    let records = fixture.run(&plan).unwrap();
    assert_eq!(Fixture::ids(&records), vec![0, 1, 2, 3, 4]);
    assert_eq!(
        fixture.vectors.breaker_state("doc_embedding"),
        BreakerState::Failed
    );
}

/// A built graph serves k-NN through HNSW and closes the breaker loop.
#[test]
fn vector_search_uses_built_graph() {
    let options = VectorOptions {
        dimension: 3,
        metric: VectorMetric::Cosine,
        strategy: VectorStrategy::Hnsw { inline_indexing: false },
    };
    let schema = Schema::builder()
        .record_type(
            "Doc",
            KeyExpression::Field("id".into()),
            vec![Index {
                name: "doc_embedding".into(),
                record_type: "Doc".into(),
                key_expression: KeyExpression::Field("embedding".into()),
                kind: IndexKind::Vector(options.clone()),
                unique: false,
                state: lattice_core::IndexState::Readable,
            }],
        )
        .build()
        .unwrap();
    let fixture = Fixture::new(schema);

    for id in 0..50i64 {
        let v = if id < 25 {
            vec![1.0, id as f32 * 0.01, 0.0]
        } else {
            vec![0.0, 1.0, id as f32 * 0.01]
        };
        fixture
            .store
            .save(
                &MapRecord::new("Doc")
                    .with_field("id", id)
                    .with_vector("embedding", v),
            )
            .unwrap();
    }

    let index = fixture
        .schema
        .record_type("Doc")
        .unwrap()
        .index("doc_embedding")
        .unwrap()
        .clone();
    let graph = lattice_core::vector::build_hnsw_graph(&fixture.store, &index).unwrap();
    fixture.vectors.register_graph("doc_embedding", graph);

    let plan = fixture
        .planner
        .plan_vector_search("doc_embedding", 3, vec![1.0, 0.0, 0.0], None)
        .unwrap();
    let records = fixture.run(&plan).unwrap();
    assert_eq!(records.len(), 3);
    for record in &records {
        assert!(Fixture::int_field(record, "id") < 25, "x-aligned cluster expected");
    }
    assert_eq!(
        fixture.vectors.breaker_state("doc_embedding"),
        BreakerState::Healthy
    );
}

/// Scenario F: commuted conjunctions share one cache entry.
#[test]
fn cache_key_stability_under_commutation() {
    let fixture = Fixture::new(person_schema());
    fixture
        .store
        .save(
            &MapRecord::new("Person")
                .with_field("id", 1i64)
                .with_field("city", "NYC")
                .with_field("age", 40i64),
        )
        .unwrap();

    let first = RecordQuery::all("Person").with_filter(Filter::and([
        Filter::eq("city", "NYC"),
        Filter::eq("age", 40i64),
    ]));
    let second = RecordQuery::all("Person").with_filter(Filter::and([
        Filter::eq("age", 40i64),
        Filter::eq("city", "NYC"),
    ]));
    assert_eq!(first.cache_key(), second.cache_key());

    fixture.planner.plan(&first).unwrap();
    fixture.planner.plan(&second).unwrap();

    let stats = fixture.planner.cache().stats();
    assert_eq!(stats.size, 1, "one entry for both spellings");
    assert_eq!(
        fixture.planner.cache().hit_count(first.cache_key()),
        Some(1),
        "second query hit the first query's entry"
    );
}

/// Schema version changes invalidate cached plans lazily.
#[test]
fn cache_invalidated_by_schema_version() {
    let fixture = Fixture::new(person_schema());
    let query = RecordQuery::all("Person").with_filter(Filter::eq("city", "NYC"));
    let plan = fixture.planner.plan(&query).unwrap();

    let cache = fixture.planner.cache();
    let key = query.cache_key();
    assert!(cache.get(key, fixture.schema.version()).is_some());
    assert!(
        cache.get(key, fixture.schema.version() + 1).is_none(),
        "bumped version must miss"
    );
    assert_eq!(cache.stats().size, 0, "stale entry dropped");
    drop(plan);
}
