//! Benchmarks for the time-series codec and hierarchy assembly
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use historian_relay::codec::{decode_readings, encode_readings, Separators};
use historian_relay::hierarchy::{assemble, FlatHierarchy};
use historian_relay::model::{Batch, Reading, SubBatch, TagValue, UnitBatch, ValueKind};

fn create_readings(count: usize) -> Vec<Reading> {
    (0..count)
        .map(|i| {
            Reading::new(
                format!("2024-03-01T{:02}-{:02}-{:02}", i / 3600 % 24, i / 60 % 60, i % 60),
                TagValue::Decimal(i as f64 * 0.25),
            )
        })
        .collect()
}

fn create_flat(batches: usize) -> FlatHierarchy {
    let mut flat = FlatHierarchy::new();
    for b in 0..batches {
        // Every fourth unit batch has no batch record and gets a synthetic one
        if b % 4 != 0 {
            flat.insert_batch(Batch::new(format!("B{}", b), format!("LOT-{}", b)));
        }
        let unit = format!("U{}", b);
        flat.insert_unit_batch(
            UnitBatch::new(&unit, format!("LOT-{}", b))
                .batch(format!("B{}", b))
                .times("2024-03-01T08-00-00", None),
        );
        for s in 0..4 {
            let mut sub = SubBatch::new(format!("S{}-{}", b, s), &unit, format!("Phase{}", s));
            if s > 0 {
                sub = sub.parent(format!("S{}-{}", b, s - 1));
            }
            flat.insert_sub_batch(sub);
        }
    }
    flat
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let seps = Separators::default();

    for size in [100, 1000, 10000] {
        let readings = create_readings(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("encode_{}", size), |b| {
            b.iter(|| encode_readings(black_box(&readings), ValueKind::Decimal, &seps))
        });

        let encoded = encode_readings(&readings, ValueKind::Decimal, &seps);

        group.bench_function(format!("decode_{}", size), |b| {
            b.iter(|| {
                decode_readings(black_box(&encoded), ValueKind::Decimal, &seps)
                    .filter(|r| r.is_ok())
                    .count()
            })
        });
    }

    group.finish();
}

fn bench_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("hierarchy");

    for size in [10, 100, 1000] {
        let flat = create_flat(size);
        group.throughput(Throughput::Elements(flat.len() as u64));

        group.bench_function(format!("assemble_{}", size), |b| {
            b.iter_batched(
                || flat.clone(),
                |flat| assemble(black_box(flat)).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_codec, bench_assemble);
criterion_main!(benches);
