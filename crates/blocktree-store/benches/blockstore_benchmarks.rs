//! Benchmarks for BlockStore operations

use blocktree_store::{BlockId, BlockOperation, BlockStore, CachedBlockStore, MemoryBlockStore};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

fn generate_block(entries: usize) -> Value {
    json!({
        "header": { "id": "bench", "type": "BEN" },
        "entries": (0..entries).collect::<Vec<_>>(),
    })
}

fn bench_get_value(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("blockstore_get");

    for size in [16, 64, 256].iter() {
        let store = MemoryBlockStore::new();
        let id = BlockId::new("bench");
        rt.block_on(async { store.insert_value(id.clone(), generate_block(*size)).await.unwrap() });

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    let result = store.get_value(&id).await.unwrap();
                    black_box(result)
                })
            });
        });
    }

    group.finish();
}

fn bench_apply_splice(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("blockstore_apply");

    for size in [16, 64, 256].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let store = MemoryBlockStore::new();
            let id = BlockId::new("bench");
            rt.block_on(async { store.insert_value(id.clone(), generate_block(size)).await.unwrap() });
            b.iter(|| {
                rt.block_on(async {
                    let insert = BlockOperation::splice("entries", size / 2, 0, vec![json!(1)]);
                    let remove = BlockOperation::splice("entries", size / 2, 1, vec![]);
                    store.apply(&id, &insert).await.unwrap();
                    store.apply(&id, &remove).await.unwrap();
                })
            });
        });
    }

    group.finish();
}

fn bench_cached_get(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let store = CachedBlockStore::new(MemoryBlockStore::new(), 16);
    let id = BlockId::new("bench");
    rt.block_on(async { store.insert_value(id.clone(), generate_block(64)).await.unwrap() });

    let mut group = c.benchmark_group("blockstore_cached");

    group.bench_function("hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = store.get_value(&id).await.unwrap();
                black_box(result)
            })
        });
    });

    let missing = BlockId::new("missing");
    group.bench_function("missing", |b| {
        b.iter(|| {
            rt.block_on(async {
                let result = store.has_block(&missing).await.unwrap();
                black_box(result)
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_get_value, bench_apply_splice, bench_cached_get);

criterion_main!(benches);
