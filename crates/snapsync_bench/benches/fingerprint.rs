//! Fingerprint benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snapsync_bench::entry_projection;
use snapsync_codec::{fingerprint, from_json, to_canonical_bytes, to_json, Value};

/// Benchmark fingerprinting projections of growing size.
fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for lines in [1usize, 10, 100, 1000].iter() {
        let value = entry_projection(*lines);
        group.throughput(Throughput::Elements(*lines as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &value, |b, value| {
            b.iter(|| black_box(fingerprint(black_box(value))));
        });
    }

    group.finish();
}

/// Streaming digest against encode-then-hash.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let value = entry_projection(100);

    group.bench_function("canonical_bytes_100", |b| {
        b.iter(|| black_box(to_canonical_bytes(black_box(&value))));
    });

    group.bench_function("map_unsorted_50", |b| {
        let pairs: Vec<(Value, Value)> = (0..50)
            .rev()
            .map(|i| (Value::Text(format!("key_{i}")), Value::Integer(i)))
            .collect();
        let value = Value::Map(pairs);
        b.iter(|| black_box(fingerprint(black_box(&value))));
    });

    group.finish();
}

/// JSON bridge conversion.
fn bench_json(c: &mut Criterion) {
    let json = to_json(&entry_projection(100));
    c.bench_function("from_json_100", |b| {
        b.iter(|| black_box(from_json(black_box(&json)).unwrap()));
    });
}

criterion_group!(benches, bench_fingerprint, bench_encode, bench_json);
criterion_main!(benches);
