//! Criterion comparison of a cached read (gateway hit, no driver) against the same
//! read going through connection resolution and the document driver every time.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use std::sync::{Arc, LazyLock};
use straw_model::prelude::*;
use tokio::runtime::Runtime;

// Dedicated runtime for the async model path.
static TOKIO_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("create tokio runtime"));

/// Resolve how many documents the collection should hold.
fn row_count() -> usize {
    std::env::var("BENCH_ROWS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1000)
}

/// A context over a shared memory store seeded with `rows` documents.
fn seeded_context(rows: usize) -> Arc<StrawContext> {
    let config = StrawConfig::new().with_database(
        DEFAULT_DB_TAG,
        DatabaseConfig::builder(DriverKind::Memory, "m0,m1,m2")
            .database("bench")
            .write_master(true)
            .finish(),
    );
    let ctx = StrawContext::builder(config)
        .build()
        .expect("valid bench configuration");

    TOKIO_RUNTIME.block_on(async {
        let mut model = ctx.model("items").seed(1).build().expect("model");
        let batch: Vec<_> = (0..rows)
            .map(|i| json!({"id": i, "name": format!("item-{i}"), "score": i % 97}))
            .collect();
        model.insert(json!(batch)).await.expect("seed documents");
    });
    ctx
}

fn bench_get_one(c: &mut Criterion) {
    let rows = row_count();
    let ctx = seeded_context(rows);

    let mut ids: Vec<usize> = (0..rows).collect();
    ids.shuffle(&mut ChaCha8Rng::seed_from_u64(1_234_567_890));
    let ids: Vec<usize> = ids.into_iter().take(64).collect();

    let mut group = c.benchmark_group("model_get_one");
    group.throughput(Throughput::Elements(ids.len() as u64));

    group.bench_with_input(BenchmarkId::new("driver", rows), &ids, |b, ids| {
        b.to_async(&*TOKIO_RUNTIME).iter(|| async {
            let mut model = ctx.model("items").seed(2).build().expect("model");
            for id in ids {
                let row = model.query(json!({"id": id})).get_one().await.expect("read");
                black_box(row);
            }
        });
    });

    group.bench_with_input(BenchmarkId::new("cache_hit", rows), &ids, |b, ids| {
        b.to_async(&*TOKIO_RUNTIME).iter(|| async {
            let mut model = ctx.model("items").seed(3).build().expect("model");
            for id in ids {
                let row = model
                    .query(json!({"id": id}))
                    .cache(CacheMode::Auto, Some(600))
                    .get_one()
                    .await
                    .expect("read");
                black_box(row);
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_get_one);
criterion_main!(benches);
