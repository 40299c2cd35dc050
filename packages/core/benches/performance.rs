//! Performance benchmarks for treecreeper write coordination
//!
//! Run with: `cargo bench -p treecreeper-core`
//!
//! These benchmarks measure critical path performance:
//! - Property diffing against a populated record
//! - Relationship reconciliation for large to-many relationships
//! - End-to-end writes through the coordinator (in-memory stores)

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::runtime::Runtime;
use treecreeper_core::db::{InMemoryDocumentStore, InMemoryGraphStore};
use treecreeper_core::models::{
    ChangeRequest, Direction, PropertyDefinition, Record, RecordMetadata, RelationshipAction,
    RelationshipChange, RequestMetadata, TypeDefinition,
};
use treecreeper_core::services::{diff, reconcile, SchemaRegistry, WriteCoordinator};

const PROPERTY_COUNT: usize = 50;

fn main_type() -> TypeDefinition {
    let mut definition = TypeDefinition::new("MainType")
        .with_property(PropertyDefinition::scalar("someDate", "Date"))
        .with_property(PropertyDefinition::document("someDocument"))
        .with_property(
            PropertyDefinition::relationship("children", "ChildType", "HAS_CHILD", Direction::Outgoing)
                .many(),
        );
    for i in 0..PROPERTY_COUNT {
        definition = definition.with_property(PropertyDefinition::scalar(format!("prop{i}"), "String"));
    }
    definition
}

fn child_type() -> TypeDefinition {
    TypeDefinition::new("ChildType").with_property(
        PropertyDefinition::relationship("parents", "MainType", "HAS_CHILD", Direction::Incoming).many(),
    )
}

/// A stored record with every scalar set
fn populated_record() -> Record {
    let mut properties = Map::new();
    for i in 0..PROPERTY_COUNT {
        properties.insert(format!("prop{i}"), json!(format!("value {i}")));
    }
    properties.insert("someDate".to_string(), json!("2019-01-09"));
    Record {
        record_type: "MainType".to_string(),
        code: "m1".to_string(),
        properties,
        documents: Map::new(),
        relationships: BTreeMap::new(),
        metadata: RecordMetadata::created_by(&RequestMetadata::new("bench").provenance(Utc::now())),
    }
}

fn codes(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{prefix}{i}")).collect()
}

/// Benchmark diffing a request that touches every property, half of them changed
fn bench_diff(c: &mut Criterion) {
    let definition = main_type();
    let record = populated_record();
    let mut request = ChangeRequest::patch("MainType", "m1")
        .with_property("someDate", json!("2019-01-09T00:00:00.000Z"));
    for i in 0..PROPERTY_COUNT {
        let value = if i % 2 == 0 {
            format!("value {i}")
        } else {
            format!("changed {i}")
        };
        request = request.with_property(format!("prop{i}"), Value::String(value));
    }

    c.bench_function("diff_50_properties", |b| {
        b.iter(|| diff(black_box(&definition), black_box(&request), Some(&record)).unwrap())
    });
}

/// Benchmark replace reconciliation with growing relationship sizes
fn bench_reconcile(c: &mut Criterion) {
    let definition = main_type();
    let mut group = c.benchmark_group("reconcile_replace");

    for size in [10usize, 100, 1000] {
        let existing: BTreeMap<String, BTreeSet<String>> =
            BTreeMap::from([("children".to_string(), codes("c", size).into_iter().collect())]);
        // Half overlap with the existing set
        let incoming = BTreeMap::from([(
            "children".to_string(),
            vec![RelationshipChange::Add(
                codes("c", size).into_iter().skip(size / 2).chain(codes("n", size / 2)).collect(),
            )],
        )]);

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                reconcile(
                    black_box(&definition),
                    black_box(&existing),
                    black_box(&incoming),
                    RelationshipAction::Replace,
                )
                .unwrap()
            })
        });
    }

    group.finish();
}

fn setup_coordinator() -> WriteCoordinator {
    let schema = SchemaRegistry::new(vec![main_type(), child_type()]).unwrap();
    WriteCoordinator::new(
        Arc::new(schema),
        Arc::new(InMemoryGraphStore::new()),
        Arc::new(InMemoryDocumentStore::new()),
    )
}

/// Benchmark creating records that link (and upsert) ten children each
fn bench_coordinated_create(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("create_with_10_children", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let coordinator = setup_coordinator();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    coordinator
                        .write(
                            ChangeRequest::create("MainType", format!("m{i}"))
                                .with_property("someDocument", json!("Some document text"))
                                .with_relationship(
                                    "children",
                                    RelationshipChange::Add(codes(&format!("m{i}-c"), 10)),
                                )
                                .with_upsert(true),
                        )
                        .await
                        .unwrap();
                }
                start.elapsed()
            })
        });
    });
}

/// Benchmark the no-op path: a patch identical to the stored record
fn bench_unchanged_patch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("unchanged_patch", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let coordinator = setup_coordinator();
                let request = ChangeRequest::patch("MainType", "m1")
                    .with_property("prop0", json!("value 0"))
                    .with_property("someDocument", json!("Some document text"));
                coordinator.write(request.clone()).await.unwrap();

                let start = std::time::Instant::now();
                for _ in 0..iters {
                    let outcome = coordinator.write(request.clone()).await.unwrap();
                    black_box(outcome);
                }
                start.elapsed()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_diff,
    bench_reconcile,
    bench_coordinated_create,
    bench_unchanged_patch
);
criterion_main!(benches);
