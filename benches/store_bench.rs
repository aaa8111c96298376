//! Benchmarks for Rapto store operations

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rapto::object::Field;
use rapto::Store;

fn store_benchmarks(c: &mut Criterion) {
    c.bench_function("put_1k_integers", |b| {
        b.iter(|| {
            let mut store = Store::new(1 << 24);
            for i in 0..1000u32 {
                let key = format!("bench-key-{}", i);
                store.put(key.as_bytes(), Field::Int(i as i64)).unwrap();
            }
            black_box(store.len())
        })
    });

    c.bench_function("search_cold_key", |b| {
        let mut store = Store::new(1 << 24);
        for i in 0..1000u32 {
            let key = format!("bench-key-{}", i);
            store.put(key.as_bytes(), Field::Int(i as i64)).unwrap();
        }
        b.iter(|| black_box(store.search(b"bench-key-0")))
    });

    c.bench_function("search_hot_key", |b| {
        let mut store = Store::new(1 << 24);
        for i in 0..1000u32 {
            let key = format!("bench-key-{}", i);
            store.put(key.as_bytes(), Field::Int(i as i64)).unwrap();
        }
        b.iter(|| black_box(store.search(b"bench-key-999")))
    });

    c.bench_function("prefetch_1k", |b| {
        b.iter_batched(
            || {
                let mut store = Store::new(1 << 24);
                for i in 0..1000u32 {
                    let key = format!("bench-key-{}", i);
                    store.put(key.as_bytes(), Field::Int(i as i64)).unwrap();
                }
                store
            },
            |mut store| {
                store.prefetch();
                black_box(store.len())
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, store_benchmarks);
criterion_main!(benches);
