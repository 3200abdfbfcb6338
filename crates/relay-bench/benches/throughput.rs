//! Throughput benchmarks for Relay.
//!
//! These benchmarks measure the raw fan-out throughput of the broker.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relay_core::{Broker, BrokerConfig, OverflowPolicy, Subscriber};
use std::sync::Arc;

fn attach_many(broker: &Broker, topic: &str, count: usize) -> Vec<Arc<Subscriber>> {
    (0..count)
        .map(|_| {
            let sub = broker.attach().unwrap();
            broker.subscribe(&sub, [topic]);
            sub
        })
        .collect()
}

/// Benchmark broker registry operations.
fn bench_broker(c: &mut Criterion) {
    let mut group = c.benchmark_group("broker");

    group.bench_function("attach_detach", |b| {
        let broker = Broker::new();
        b.iter(|| {
            let sub = broker.attach().unwrap();
            broker.detach(black_box(&sub))
        });
    });

    group.bench_function("subscribe", |b| {
        let broker = Broker::new();
        let sub = broker.attach().unwrap();
        let mut i = 0u64;
        b.iter(|| {
            let topic = format!("live/{}", i);
            i += 1;
            broker.subscribe(&sub, [topic])
        });
    });

    for subscribers in [1, 100, 1000] {
        group.bench_function(format!("broadcast_{}_sub", subscribers), |b| {
            let broker = Broker::new();
            let _subs = attach_many(&broker, "live/cam", subscribers);
            let payload = Bytes::from(vec![0u8; 64]);

            b.iter(|| broker.broadcast(black_box(payload.clone()), ["live/cam"]));
        });
    }

    group.finish();
}

/// Benchmark chunk sizes through a single subscriber.
fn bench_chunk_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_size");

    for size in [188usize, 1316, 65536] {
        let broker = Broker::new();
        let subs = attach_many(&broker, "live/cam", 1);
        let payload = Bytes::from(vec![0u8; size]);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                broker.broadcast(black_box(payload.clone()), ["live/cam"]);
                subs[0].try_recv()
            });
        });
    }

    group.finish();
}

/// Benchmark fan-out scenarios under both overflow policies.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for policy in [OverflowPolicy::DropOldest, OverflowPolicy::DropNewest] {
        for size in [10usize, 100, 1000, 10000] {
            group.throughput(Throughput::Elements(size as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{:?}", policy), size),
                &size,
                |b, &size| {
                    let broker = Broker::with_config(BrokerConfig {
                        overflow: policy,
                        ..BrokerConfig::default()
                    });
                    let _subs = attach_many(&broker, "broadcast/all", size);
                    let payload = Bytes::from(vec![0u8; 64]);

                    b.iter(|| broker.broadcast(black_box(payload.clone()), ["broadcast/all"]));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_broker, bench_chunk_size, bench_fanout);
criterion_main!(benches);
