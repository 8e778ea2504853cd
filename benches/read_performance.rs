//! Read and write cost of dynamic flags.
//!
//! Flags sit on hot paths, so reads must stay in the low nanoseconds and keep
//! scaling while the updater publishes new values.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use hotswap_flags::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Backends {
    primary: String,
    replicas: Vec<String>,
    weight: u32,
}

fn backends() -> Backends {
    Backends {
        primary: "db-1".to_string(),
        replicas: vec!["db-2".to_string(), "db-3".to_string()],
        weight: 3,
    }
}

fn benchmark_read_latency(c: &mut Criterion) {
    let flags = FlagSet::new();
    let limit = flags.dyn_int64("limit", 100, "").unwrap();
    let pool = flags.dyn_json("backends", backends(), "").unwrap();

    let mut group = c.benchmark_group("read_latency");
    group.bench_function("int64_value", |b| {
        b.iter(|| black_box(limit.value()));
    });
    group.bench_function("json_load", |b| {
        b.iter(|| {
            let current = pool.load();
            black_box(current.weight);
        });
    });
    group.bench_function("json_get", |b| {
        b.iter(|| {
            let current = pool.get();
            black_box(current.weight);
        });
    });
    group.finish();
}

/// Registry lookup by name, for code that resolves flags dynamically.
fn benchmark_lookup(c: &mut Criterion) {
    let flags = FlagSet::new();
    for i in 0..64 {
        flags.dyn_int64(&format!("flag_{}", i), i, "").unwrap();
    }

    let mut group = c.benchmark_group("lookup");
    group.bench_function("lookup_value", |b| {
        b.iter(|| {
            let flag = flags.lookup(black_box("flag_42"));
            black_box(flag.map(|f| f.value()));
        });
    });
    group.finish();
}

fn benchmark_concurrent_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_reads");

    for num_threads in [1, 2, 4, 8, 16] {
        group.throughput(Throughput::Elements(num_threads as u64 * 1000));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_threads", num_threads)),
            &num_threads,
            |b, &num_threads| {
                let flag = DynJson::new("backends", Json(backends()));
                let barrier = Arc::new(Barrier::new(num_threads + 1));

                b.iter_custom(|iters| {
                    let mut handles = vec![];

                    for _ in 0..num_threads {
                        let flag = flag.clone();
                        let barrier = Arc::clone(&barrier);

                        handles.push(thread::spawn(move || {
                            barrier.wait();
                            let start = Instant::now();
                            for _ in 0..iters {
                                black_box(flag.load().weight);
                            }
                            start.elapsed()
                        }));
                    }

                    barrier.wait();
                    let total: Duration = handles.into_iter().map(|h| h.join().unwrap()).sum();
                    total / num_threads as u32
                });
            },
        );
    }

    group.finish();
}

/// Readers keep going while a writer publishes through the text path.
fn benchmark_reads_during_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("reads_during_updates");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("set_with_8_readers", |b| {
        b.iter_custom(|iters| {
            let flags = FlagSet::new();
            let ratio = flags.dyn_float64("ratio", 0.5, "").unwrap();
            let running = Arc::new(AtomicBool::new(true));
            let reads = Arc::new(AtomicUsize::new(0));

            let readers: Vec<_> = (0..8)
                .map(|_| {
                    let ratio = ratio.clone();
                    let running = Arc::clone(&running);
                    let reads = Arc::clone(&reads);
                    thread::spawn(move || {
                        while running.load(Ordering::Relaxed) {
                            black_box(ratio.value());
                            reads.fetch_add(1, Ordering::Relaxed);
                        }
                    })
                })
                .collect();

            let start = Instant::now();
            for i in 0..iters {
                let text = format!("0.{}", i % 1000);
                flags.set("ratio", &text).unwrap();
            }
            let elapsed = start.elapsed();

            running.store(false, Ordering::Relaxed);
            for reader in readers {
                reader.join().unwrap();
            }
            black_box(reads.load(Ordering::Relaxed));
            elapsed
        });
    });

    group.finish();
}

fn benchmark_mutex_comparison(c: &mut Criterion) {
    use std::sync::Mutex;

    let mut group = c.benchmark_group("mutex_comparison");

    let flag = DynInt64::new("limit", 100);
    group.bench_function("flag_read", |b| {
        b.iter(|| black_box(flag.value()));
    });

    let locked = Mutex::new(100i64);
    group.bench_function("mutex_read", |b| {
        b.iter(|| black_box(*locked.lock().unwrap()));
    });

    let rwlock = std::sync::RwLock::new(100i64);
    group.bench_function("rwlock_read", |b| {
        b.iter(|| black_box(*rwlock.read().unwrap()));
    });

    group.finish();
}

fn benchmark_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");

    let flags = FlagSet::new();
    flags
        .dyn_float64("ratio", 12.0, "")
        .unwrap()
        .with_validator(in_range(10.0, 14.0));
    group.bench_function("validated_float", |b| {
        b.iter(|| flags.set("ratio", black_box("13.41")).unwrap());
    });

    flags.dyn_json("backends", backends(), "").unwrap();
    let document = serde_json::to_string(&backends()).unwrap();
    group.bench_function("json_document", |b| {
        b.iter(|| flags.set("backends", black_box(&document)).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_read_latency,
    benchmark_lookup,
    benchmark_concurrent_reads,
    benchmark_reads_during_updates,
    benchmark_mutex_comparison,
    benchmark_set,
);

criterion_main!(benches);
