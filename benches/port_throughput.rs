//! Benchmarks for the pipeline data plane.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use vidflow::{Blob, InPort, OverflowPolicy};

fn bench_port_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("port_push_pop");
    group.throughput(Throughput::Elements(1));

    for capacity in [8, 64, 512].iter() {
        group.bench_with_input(
            BenchmarkId::new("blocking", capacity),
            capacity,
            |b, &capacity| {
                let port = InPort::new(capacity, OverflowPolicy::Blocking);
                let blob = Arc::new(Blob::with_identity(0, 1));
                b.iter(|| {
                    let _ = port.try_push(black_box(blob.clone()));
                    black_box(port.try_pop());
                });
            },
        );
    }

    group.finish();
}

fn bench_blob_emplace_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("blob_emplace_get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("emplace_vec", |b| {
        b.iter(|| {
            let mut blob = Blob::with_identity(0, 1);
            blob.emplace(black_box(vec![0u8; 64]), 64);
            black_box(blob)
        });
    });

    group.bench_function("get_downcast", |b| {
        let mut blob = Blob::with_identity(0, 1);
        blob.emplace(vec![0u8; 64], 64);
        b.iter(|| black_box(blob.get_unmeta::<Vec<u8>>(0).unwrap()));
    });

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    group.throughput(Throughput::Elements(1));

    for consumers in [2usize, 4].iter() {
        group.bench_with_input(
            BenchmarkId::new("ports", consumers),
            consumers,
            |b, &consumers| {
                let ports: Vec<_> = (0..consumers)
                    .map(|_| InPort::new(64, OverflowPolicy::Blocking))
                    .collect();
                let blob = Arc::new(Blob::with_identity(0, 1));
                b.iter(|| {
                    for port in &ports {
                        let _ = port.try_push(blob.clone());
                    }
                    for port in &ports {
                        black_box(port.try_pop());
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_port_push_pop,
    bench_blob_emplace_get,
    bench_fan_out
);
criterion_main!(benches);
