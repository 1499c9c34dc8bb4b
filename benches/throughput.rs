//! Throughput benchmarks for the keyspace engine and command layer.

use chrono::{Duration as ChronoDuration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pebblekv::protocol::{parse_message, RespValue};
use pebblekv::storage::{Snapshotter, StorageEngine};
use pebblekv::CommandHandler;
use std::sync::Arc;
use std::time::Duration;

fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            engine.set(format!("key:{}", i), "small_value", None);
            i += 1;
        });
    });

    group.bench_function("set_with_deadline", |b| {
        let mut i = 0u64;
        let deadline = Some(Utc::now() + ChronoDuration::hours(1));
        b.iter(|| {
            engine.set(format!("ttl:{}", i), "value", deadline);
            i += 1;
        });
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    for i in 0..100_000 {
        engine.set(format!("key:{}", i), format!("value:{}", i), None);
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(engine.get(&key).ok());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(engine.get(&key).ok());
            i += 1;
        });
    });

    group.finish();
}

fn bench_incr(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("incr");
    group.throughput(Throughput::Elements(1));

    group.bench_function("single_counter", |b| {
        b.iter(|| {
            black_box(engine.incr_by("counter", 1).ok());
        });
    });

    group.bench_function("multiple_counters", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("counter:{}", i % 1000);
            black_box(engine.incr_by(&key, 1).ok());
            i += 1;
        });
    });

    group.finish();
}

fn bench_push(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("push");
    group.throughput(Throughput::Elements(1));

    group.bench_function("rpush_one", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(engine.rpush("queue", vec![format!("job:{}", i)]).ok());
            i += 1;
        });
    });

    group.finish();
}

/// Many threads hammering one counter through the single keyspace lock.
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_incr", |b| {
        b.iter(|| {
            let engine = Arc::new(StorageEngine::new());
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || {
                        for _ in 0..10_000 {
                            let _ = engine.incr_by("shared", 1);
                        }
                    })
                })
                .collect();

            for handle in handles {
                let _ = handle.join();
            }

            black_box(engine.len());
        });
    });

    group.finish();
}

fn bench_cleanup(c: &mut Criterion) {
    let mut group = c.benchmark_group("expiry");

    group.bench_function("sweep_10k_half_expired", |b| {
        b.iter_batched(
            || {
                let engine = StorageEngine::new();
                let past = Some(Utc::now() - ChronoDuration::seconds(1));
                for i in 0..10_000 {
                    let deadline = if i % 2 == 0 { past } else { None };
                    engine.set(format!("key:{}", i), "value", deadline);
                }
                engine
            },
            |engine| black_box(engine.cleanup_expired()),
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_command_path(c: &mut Criterion) {
    let dir = std::env::temp_dir().join("pebblekv-bench.json");
    let handler = CommandHandler::new(
        Arc::new(StorageEngine::new()),
        Arc::new(Snapshotter::new(dir)),
    );

    let mut group = c.benchmark_group("command");
    group.throughput(Throughput::Elements(1));

    group.bench_function("parse_execute_encode_set", |b| {
        let line = b"SET user:1 Ariz EX 3600\r\n";
        b.iter(|| {
            if let Ok(Some((request, _))) = parse_message(line) {
                let reply: RespValue = handler.execute(request);
                black_box(reply.serialize());
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_incr,
    bench_push,
    bench_concurrent,
    bench_cleanup,
    bench_command_path,
);

criterion_main!(benches);
