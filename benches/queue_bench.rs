//! Benchmarks for the task queue.
//!
//! Benchmarks cover:
//! - Orderable queue operations (push/pop, moves against random anchors)
//! - Retention buffer churn with eviction callbacks
//! - Presentation ordering of a populated queue
//! - End-to-end submit and drain through worker threads

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use taskq_engine::config::TaskQueueConfig;
use taskq_engine::core::{
    AppResult, FixedCapacity, MetaStatus, Task, TaskBody, TaskContext, TaskIdSupplier, TaskQueue,
    TaskState, TaskStateBuilder,
};
use taskq_engine::infra::queue::OrderableWorkQueue;
use taskq_engine::infra::retention::FinishedRetentionBuffer;
use tokio::sync::watch;

// ============================================================================
// Bench Bodies
// ============================================================================

struct InstantBody;

#[async_trait]
impl TaskBody for InstantBody {
    async fn run(&self, _ctx: TaskContext) -> AppResult<()> {
        Ok(())
    }
}

/// Holds the single worker so everything else stays WAITING.
struct BlockingBody(watch::Receiver<bool>);

#[async_trait]
impl TaskBody for BlockingBody {
    async fn run(&self, _ctx: TaskContext) -> AppResult<()> {
        let mut open = self.0.clone();
        open.wait_for(|o| *o).await.map(|_| ())?;
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn build_state(ids: &TaskIdSupplier, record_id: i64) -> TaskState {
    TaskStateBuilder::new("appconvert")
        .with_new_id(ids)
        .with_record_id(record_id)
        .with_description(format!("Convert app {record_id}"))
        .build()
        .unwrap()
}

fn filled_queue(size: u64) -> OrderableWorkQueue<u64> {
    let mut q = OrderableWorkQueue::new(size as usize);
    for id in 0..size {
        q.push_back(id).unwrap();
    }
    q
}

fn shuffled_ids(size: u64) -> Vec<u64> {
    let mut ids: Vec<u64> = (0..size).collect();
    ids.shuffle(&mut StdRng::seed_from_u64(7));
    ids
}

fn bench_config(name: &str) -> TaskQueueConfig {
    TaskQueueConfig::new(name)
        .with_capacity_refresh_secs(0)
        .with_shutdown_grace_secs(1)
}

// ============================================================================
// Orderable Queue Benchmarks
// ============================================================================

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");

    for size in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut q = filled_queue(size);
                while let Some(id) = q.pop_front() {
                    black_box(id);
                }
            });
        });
    }
    group.finish();
}

fn bench_queue_moves(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_moves");

    for size in [100, 1_000, 5_000] {
        let targets = shuffled_ids(size);
        let anchors = shuffled_ids(size);
        group.throughput(Throughput::Elements(size));

        group.bench_with_input(BenchmarkId::new("to_head", size), &size, |b, &size| {
            let mut q = filled_queue(size);
            b.iter(|| {
                for id in &targets {
                    black_box(q.move_to_head(id));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("after_anchor", size), &size, |b, &size| {
            let mut q = filled_queue(size);
            b.iter(|| {
                for (id, anchor) in targets.iter().zip(anchors.iter().rev()) {
                    black_box(q.move_after(id, anchor));
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Retention Benchmarks
// ============================================================================

fn bench_retention_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("retention_churn");

    for capacity in [10_i64, 1_000] {
        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let evicted = Arc::new(AtomicUsize::new(0));
                    let counter = Arc::clone(&evicted);
                    let mut buffer = FinishedRetentionBuffer::new(capacity, move |_: &u64| {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                    for id in 0..10_000_u64 {
                        buffer.push(id);
                    }
                    black_box(evicted.load(Ordering::Relaxed));
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Task Queue Benchmarks
// ============================================================================

fn bench_get_all_tasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_all_tasks");

    for size in [100_i64, 1_000] {
        let ids = TaskIdSupplier::new();
        let queue = TaskQueue::new(bench_config("bench-order"), Arc::new(FixedCapacity(1))).unwrap();
        let (open, gate) = watch::channel(false);

        queue
            .add_task(Task::new(build_state(&ids, 1), BlockingBody(gate)))
            .unwrap();
        for record in 2..=size {
            queue
                .add_task(Task::new(build_state(&ids, record), InstantBody))
                .unwrap();
        }
        let waiting = queue.get_all_tasks();
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..size / 4 {
            if let Some(task) = waiting.choose(&mut rng) {
                queue.move_to_head(task.id());
            }
        }

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(queue.get_all_tasks()));
        });

        open.send_replace(true);
        queue.graceful_shutdown(true);
    }
    group.finish();
}

fn bench_submit_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_and_drain");
    group.sample_size(10);

    for workers in [1_i64, 4] {
        group.throughput(Throughput::Elements(500));
        group.bench_with_input(
            BenchmarkId::from_parameter(workers),
            &workers,
            |b, &workers| {
                b.iter(|| {
                    let ids = TaskIdSupplier::new();
                    let queue = TaskQueue::new(
                        bench_config("bench-drain").with_max_finished(100),
                        Arc::new(FixedCapacity(workers)),
                    )
                    .unwrap();
                    queue.resize(workers);
                    let mut last = 0;
                    for record in 1..=500 {
                        last = queue
                            .add_task(Task::new(build_state(&ids, record), InstantBody))
                            .unwrap()
                            .id();
                    }
                    let deadline = Instant::now() + Duration::from_secs(30);
                    while queue
                        .find_task_by_id(last)
                        .is_some_and(|t| t.meta_status() != MetaStatus::Finished)
                        && Instant::now() < deadline
                    {
                        std::thread::yield_now();
                    }
                    black_box(queue.graceful_shutdown(false));
                });
            },
        );
    }
    group.finish();
}

// ============================================================================
// Benchmark Groups
// ============================================================================

criterion_group!(
    queue_benches,
    bench_queue_push_pop,
    bench_queue_moves,
    bench_retention_churn
);

criterion_group!(task_queue_benches, bench_get_all_tasks, bench_submit_and_drain);

criterion_main!(queue_benches, task_queue_benches);
