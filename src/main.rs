use stealjobs::{JobId, JobSystem, JobSystemConfig, Worker};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn load_config() -> Result<JobSystemConfig, Box<dyn std::error::Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)?;
            Ok(JobSystemConfig::from_json(&json)?)
        }
        None => Ok(JobSystemConfig::default()),
    }
}

/// Raw job: reads `n` from the payload and writes `n * (n + 1) / 2` after it.
fn triangle(_: &Worker, _: JobId, payload: &mut [u8]) {
    let mut n = [0u8; 8];
    n.copy_from_slice(&payload[..8]);
    let n = u64::from_le_bytes(n);
    payload[8..16].copy_from_slice(&(n * (n + 1) / 2).to_le_bytes());
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("stealjobs - Work-Stealing Fork/Join Job Scheduler\n");

    let config = load_config()?;
    let job_system = JobSystem::with_config(config)?;
    let worker = job_system.register_worker();
    println!(
        "Initialized job system with {} worker threads (+ main thread)\n",
        job_system.num_workers()
    );

    // Example 1: Simple job execution
    println!("Example 1: Simple job execution");
    let job = worker.spawn(|w, _| {
        println!("  Hello from a job on worker {}!", w.index());
    });
    worker.wait(job);
    println!("  Job completed\n");

    // Example 2: Raw job with a byte payload
    println!("Example 2: Raw job with payload");
    let job = worker.create_job(triangle, &1000u64.to_le_bytes());
    worker.run(job);
    worker.wait(job);
    if let Some(payload) = worker.read_payload(job) {
        let mut result = [0u8; 8];
        result.copy_from_slice(&payload[8..16]);
        println!("  1 + 2 + ... + 1000 = {}\n", u64::from_le_bytes(result));
    }

    // Example 3: Fork/join with a parent and children
    println!("Example 3: Fork/join");
    let sum = Arc::new(AtomicUsize::new(0));
    let num_jobs = 100;

    let start = Instant::now();
    let parent = worker.create_job_with(|_, _| {});
    for i in 0..num_jobs {
        let sum_clone = sum.clone();
        worker.spawn_child(parent, move |_, _| {
            // Simulate some work
            let mut local_sum = 0usize;
            for j in 0..1000 {
                local_sum = std::hint::black_box(local_sum + j);
            }
            sum_clone.fetch_add(i, Ordering::SeqCst);
        });
    }
    worker.run(parent);
    worker.wait(parent);

    let duration = start.elapsed();
    let expected_sum: usize = (0..num_jobs).sum();
    println!("  Executed {} jobs in {:?}", num_jobs, duration);
    println!(
        "  Sum result: {} (expected: {})\n",
        sum.load(Ordering::SeqCst),
        expected_sum
    );

    // Example 4: High-throughput test
    println!("Example 4: High-throughput benchmark");
    let num_jobs = 1_000_000;
    let start = Instant::now();
    worker.parallel_for(0..num_jobs, 1, |i| {
        std::hint::black_box(i);
    });

    let duration = start.elapsed();
    let jobs_per_second = num_jobs as f64 / duration.as_secs_f64();
    println!("  Executed {} jobs in {:?}", num_jobs, duration);
    println!("  Throughput: {:.2} jobs/second\n", jobs_per_second);

    // Shutdown the system
    println!("Shutting down job system...");
    drop(worker);
    match job_system.shutdown() {
        Ok(()) => println!("Done!"),
        Err(e) => eprintln!("Shutdown error: {}", e),
    }
    Ok(())
}
