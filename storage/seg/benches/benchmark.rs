// Copyright 2021 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use seg::{Cache, TierConfig};

const SMALL_VALUE: &[u8] = b"a small cached value";
const LARGE_VALUE: &[u8] = &[0u8; 8192];

fn single_tier_cache() -> Cache {
    Cache::init(
        1 << 16,
        vec![TierConfig {
            segment_size: 1024 * 1024,
            segment_count: 64,
            cache_dir: None,
        }],
    )
    .unwrap()
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");

    for (name, value) in [("small", SMALL_VALUE), ("large", LARGE_VALUE)] {
        group.bench_with_input(BenchmarkId::from_parameter(name), value, |b, value| {
            b.iter_batched(
                single_tier_cache,
                |mut cache| {
                    cache.put(b"bench-key", 300, black_box(value)).unwrap();
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_get_hit(c: &mut Criterion) {
    c.bench_function("get_hit", |b| {
        b.iter_batched(
            || {
                let mut cache = single_tier_cache();
                cache.put(b"bench-key", 300, SMALL_VALUE).unwrap();
                cache
            },
            |mut cache| {
                black_box(cache.get(b"bench-key").unwrap());
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_get_miss(c: &mut Criterion) {
    c.bench_function("get_miss", |b| {
        b.iter_batched(
            single_tier_cache,
            |mut cache| {
                black_box(cache.get(b"absent-key").ok());
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_maintenance_pass_over_a_full_tier(c: &mut Criterion) {
    c.bench_function("maintenance_pass_full_tier", |b| {
        b.iter_batched(
            || {
                let mut cache = single_tier_cache();
                for i in 0..2000u32 {
                    let key = format!("k{i}");
                    cache.put(key.as_bytes(), 60, SMALL_VALUE).ok();
                }
                cache
            },
            |mut cache| {
                cache.run_maintenance();
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_put,
    bench_get_hit,
    bench_get_miss,
    bench_maintenance_pass_over_a_full_tier,
);
criterion_main!(benches);
