//! Work-stealing stress benchmark using criterion.
//!
//! Tests work-stealing under high contention with imbalanced workloads: every
//! job is queued on one worker and the rest of the pool has to steal it.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use stealjobs::JobSystem;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn fibonacci(n: u64) -> u64 {
    if n <= 1 {
        return n;
    }
    let mut a = 0u64;
    let mut b = 1u64;
    for _ in 2..=n {
        let temp = a.wrapping_add(b);
        a = b;
        b = temp;
    }
    b
}

fn bench_work_stealing_stress(c: &mut Criterion) {
    let system = JobSystem::with_default_threads();
    let worker = system.register_worker();

    // Warmup
    worker.parallel_for(0..(system.num_workers() + 1) * 100, 1, |_| {
        std::hint::black_box(());
    });

    let mut group = c.benchmark_group("work_stealing");
    group.sample_size(10);

    // Imbalanced workload: some jobs are heavy, some are light.
    // Batches stay under the ring capacity.
    for total_jobs in [1_000, 4_000] {
        group.throughput(Throughput::Elements(total_jobs as u64));

        group.bench_function(BenchmarkId::new("imbalanced", total_jobs), |b| {
            b.iter(|| {
                let completed = Arc::new(AtomicUsize::new(0));
                let root = worker.create_job_with(|_, _| {});

                for i in 0..total_jobs {
                    let c = completed.clone();
                    worker.spawn_child(root, move |_, _| {
                        // Imbalanced: every 10th job is heavy
                        let work = if i % 10 == 0 { 1000 } else { 10 };
                        std::hint::black_box(fibonacci(work));
                        c.fetch_add(1, Ordering::Relaxed);
                    });
                }

                worker.run(root);
                worker.wait(root);
                std::hint::black_box(completed.load(Ordering::Relaxed));
            })
        });
    }

    group.finish();
}

fn bench_recursive_split(c: &mut Criterion) {
    let system = JobSystem::with_default_threads();
    let worker = system.register_worker();

    let mut group = c.benchmark_group("work_stealing_recursive");
    group.sample_size(10);
    group.throughput(Throughput::Elements(100_000));

    group.bench_function("imbalanced_split_100k", |b| {
        b.iter(|| {
            worker.parallel_for(0..100_000, 64, |i| {
                let work = if i % 10 == 0 { 1000 } else { 10 };
                std::hint::black_box(fibonacci(work));
            });
        })
    });

    group.finish();
}

criterion_group!(benches, bench_work_stealing_stress, bench_recursive_split);
criterion_main!(benches);
