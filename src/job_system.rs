//! High-level job system interface.
//!
//! The JobSystem owns the worker threads and the state they share: the
//! registry of every worker's ring and deque, the count of outstanding jobs,
//! and the park/wake protocol idle workers sleep on. Jobs themselves are
//! created, submitted and awaited through a [`Worker`], the per-thread
//! context obtained from [`JobSystem::register_worker`].

use crate::PinningStrategy;
use crate::allocator::JobRing;
use crate::allocator::ring::MAX_RING_CAPACITY;
use crate::deque::JobQueue;
use crate::error::{JobSystemError, Result};
use crate::job::{Job, JobId, MAX_WORKERS};
use crate::registry::{RegisteredWorker, Registry};
use crate::worker::Worker;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

const DEFAULT_MAX_WORKERS: usize = 64;

static NEXT_SYSTEM_TAG: AtomicU32 = AtomicU32::new(1);

/// Hands out the non-zero tag stamped into every job id of one job system.
fn next_system_tag() -> u16 {
    loop {
        let tag = NEXT_SYSTEM_TAG.fetch_add(1, Ordering::Relaxed) as u16;
        if tag != 0 {
            return tag;
        }
    }
}

/// Configuration for the job system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSystemConfig {
    /// OS threads to spawn. The calling thread registers separately.
    /// Default: logical CPUs minus one, capped to fit `max_workers`.
    pub worker_threads: usize,
    /// Jobs per worker ring, also the deque capacity. Power of two. Default: 4096.
    pub ring_capacity: usize,
    /// Upper bound on registered workers, spawned or not. Default: 64.
    pub max_workers: usize,
    /// Core pinning for spawned threads. Default: none.
    pub pinning: PinningStrategy,
    /// Name prefix for spawned threads.
    pub thread_name: String,
    /// Stack size for spawned threads; the platform default when unset.
    pub stack_size: Option<usize>,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get()
                .saturating_sub(1)
                .min(DEFAULT_MAX_WORKERS - 1),
            ring_capacity: 4096,
            max_workers: DEFAULT_MAX_WORKERS,
            pinning: PinningStrategy::None,
            thread_name: "stealjobs-worker".to_string(),
            stack_size: None,
        }
    }
}

impl JobSystemConfig {
    /// Default configuration with `worker_threads` spawned threads.
    pub fn with_threads(worker_threads: usize) -> Self {
        Self {
            worker_threads,
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the scheduler cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !self.ring_capacity.is_power_of_two()
            || !(2..=MAX_RING_CAPACITY).contains(&self.ring_capacity)
        {
            return Err(JobSystemError::InvalidConfig(format!(
                "ring_capacity must be a power of two in 2..={MAX_RING_CAPACITY}, got {}",
                self.ring_capacity
            )));
        }
        if !(1..=MAX_WORKERS).contains(&self.max_workers) {
            return Err(JobSystemError::InvalidConfig(format!(
                "max_workers must be in 1..={MAX_WORKERS}, got {}",
                self.max_workers
            )));
        }
        if self.worker_threads >= self.max_workers {
            return Err(JobSystemError::InvalidConfig(format!(
                "worker_threads ({}) must leave a registry slot for the calling thread \
                 (max_workers = {})",
                self.worker_threads, self.max_workers
            )));
        }
        if self.stack_size == Some(0) {
            return Err(JobSystemError::InvalidConfig(
                "stack_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// State shared by every worker of one job system.
pub(crate) struct Shared {
    /// Stamped into every job id this system hands out.
    pub(crate) tag: u16,
    pub(crate) registry: Registry,
    pub(crate) config: JobSystemConfig,
    /// Jobs submitted with `run` that have not reached zero pending yet.
    outstanding: AtomicUsize,
    parked: AtomicUsize,
    shutdown: AtomicBool,
    idle_lock: Mutex<()>,
    idle: Condvar,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: crate::metrics::Metrics,
}

impl Shared {
    fn new(config: JobSystemConfig) -> Self {
        Shared {
            tag: next_system_tag(),
            registry: Registry::new(config.max_workers),
            config,
            outstanding: AtomicUsize::new(0),
            parked: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            #[cfg(feature = "metrics")]
            metrics: crate::metrics::Metrics::new(),
        }
    }

    /// Creates the calling thread's worker context and registers its deque.
    pub(crate) fn register_worker(self: &Arc<Self>) -> Worker {
        let capacity = self.config.ring_capacity;
        let queue = JobQueue::with_capacity(capacity);
        let local = Arc::new(RegisteredWorker {
            ring: JobRing::with_capacity(capacity),
            stealer: queue.stealer(),
        });
        let index = self.registry.register(Arc::clone(&local));
        tracing::debug!(worker = index, "registered worker");
        Worker::new(index, queue, local, Arc::clone(self))
    }

    fn worker(&self, index: usize) -> &RegisteredWorker {
        match self.registry.get(index) {
            Some(worker) => worker,
            None => panic!("job id refers to unregistered worker {index}"),
        }
    }

    /// Returns the ring holding `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was handed out by another job system.
    pub(crate) fn ring(&self, id: JobId) -> &JobRing {
        assert_eq!(
            id.system(),
            self.tag,
            "{id:?} belongs to a different job system"
        );
        &self.worker(id.worker()).ring
    }

    /// Resolves a live job id to its record.
    pub(crate) fn resolve(&self, id: JobId) -> &Job {
        self.ring(id).get(id)
    }

    /// A job is done once its count hits zero. A recycled slot implies that too.
    pub(crate) fn is_done(&self, id: JobId) -> bool {
        let job = self.ring(id).slot(id.serial());
        job.serial() != id.serial() || job.pending().is_done()
    }

    pub(crate) fn pending(&self, id: JobId) -> i32 {
        let job = self.ring(id).slot(id.serial());
        if job.serial() != id.serial() {
            return 0;
        }
        job.pending().value()
    }

    /// Retires one unit of work on `id`, propagating completion up the parent chain.
    pub(crate) fn finish(&self, id: JobId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let job = self.resolve(id);
            // Read before the decrement: once the count is zero the owner may
            // recycle the slot.
            let parent = job.parent();
            if !job.pending().decrement() {
                break;
            }
            self.job_completed();
            current = parent;
        }
    }

    pub(crate) fn job_submitted(&self) {
        if self.outstanding.fetch_add(1, Ordering::AcqRel) == 0 {
            tracing::trace!("work available, waking parked workers");
            self.wake_all();
        }
    }

    fn job_completed(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "more jobs completed than were submitted");
    }

    pub(crate) fn has_outstanding_work(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) > 0
    }

    pub(crate) fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Blocks the calling worker until work is submitted or shutdown is requested.
    ///
    /// Both conditions are re-checked under the lock `wake_all` takes, so a
    /// submission cannot slip in between the check and the wait.
    pub(crate) fn park(&self, worker: usize) {
        let mut guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.has_outstanding_work() || self.is_shutdown_requested() {
            return;
        }

        metric!(self, parks);
        self.parked.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(worker, "parking");
        while !self.has_outstanding_work() && !self.is_shutdown_requested() {
            guard = self
                .idle
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.parked.fetch_sub(1, Ordering::AcqRel);
        tracing::trace!(worker, "unparked");
    }

    fn wake_all(&self) {
        let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.idle.notify_all();
    }

    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake_all();
    }
}

/// The main job system managing worker threads and job execution.
pub struct JobSystem {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Creates a new job system with the specified number of worker threads.
    ///
    /// The calling thread is not a worker until it calls
    /// [`register_worker`](Self::register_worker).
    ///
    /// # Panics
    ///
    /// Panics if the thread count does not fit the default registry or a
    /// thread cannot be spawned.
    ///
    /// # Example
    ///
    /// ```
    /// use stealjobs::JobSystem;
    ///
    /// let job_system = JobSystem::new(4);
    /// assert_eq!(job_system.num_workers(), 4);
    /// ```
    pub fn new(num_threads: usize) -> Self {
        match Self::with_config(JobSystemConfig::with_threads(num_threads)) {
            Ok(system) => system,
            Err(err) => panic!("failed to start job system: {err}"),
        }
    }

    /// Creates a job system with one worker thread per CPU core beyond the caller's.
    pub fn with_default_threads() -> Self {
        Self::new(JobSystemConfig::default().worker_threads)
    }

    /// Creates a new job system with custom configuration.
    pub fn with_config(config: JobSystemConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            worker_threads = config.worker_threads,
            ring_capacity = config.ring_capacity,
            max_workers = config.max_workers,
            "starting job system"
        );

        let mut system = JobSystem {
            shared: Arc::new(Shared::new(config)),
            threads: Vec::new(),
        };
        let config = &system.shared.config;
        for n in 0..config.worker_threads {
            let worker = system.shared.register_worker();
            let pinning = config.pinning;

            let mut builder =
                thread::Builder::new().name(format!("{}-{}", config.thread_name, worker.index()));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            // On error `system` drops here, which stops the threads already running.
            let handle = builder.spawn(move || {
                pin_current_thread(pinning, n);
                worker.run_worker();
            })?;
            system.threads.push(handle);
        }

        Ok(system)
    }

    /// Registers the calling thread as a worker and returns its context.
    ///
    /// Call once per participating thread. The worker's deque stays stealable
    /// for as long as the job system lives.
    ///
    /// # Panics
    ///
    /// Panics if `max_workers` workers are already registered.
    pub fn register_worker(&self) -> Worker {
        self.shared.register_worker()
    }

    /// Returns the number of spawned worker threads.
    pub fn num_workers(&self) -> usize {
        self.threads.len()
    }

    /// Returns the number of registered workers, spawned threads included.
    pub fn registered_workers(&self) -> usize {
        self.shared.registry.len()
    }

    /// Returns the number of submitted jobs that are not done yet.
    pub fn outstanding_jobs(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Returns the number of workers currently parked for lack of work.
    pub fn parked_workers(&self) -> usize {
        self.shared.parked.load(Ordering::Acquire)
    }

    /// Returns the configuration the system was started with.
    pub fn config(&self) -> &JobSystemConfig {
        &self.shared.config
    }

    /// Returns a snapshot of the scheduler counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Raises the shutdown flag and wakes every parked worker.
    ///
    /// Worker loops keep executing until no deque holds a job, then exit.
    /// Jobs submitted before the request are therefore all executed, as long
    /// as at least one worker loop is running.
    pub fn request_shutdown(&self) {
        tracing::debug!("shutdown requested");
        self.shared.request_shutdown();
    }

    /// Returns true once shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.is_shutdown_requested()
    }

    /// Shuts down the job system, waiting for all submitted jobs to complete.
    ///
    /// The worker threads drain every deque before they exit, so joining them
    /// is the wait.
    ///
    /// Returns Ok if shutdown was successful, or Err if any worker threads panicked.
    pub fn shutdown(mut self) -> Result<()> {
        self.request_shutdown();
        let failed = self.join_threads();
        if self.shared.has_outstanding_work() {
            tracing::warn!(
                outstanding = self.outstanding_jobs(),
                "job system shut down with jobs still outstanding"
            );
        }
        tracing::debug!("job system shut down");

        if failed > 0 {
            Err(JobSystemError::WorkerPanicked(failed))
        } else {
            Ok(())
        }
    }

    fn join_threads(&mut self) -> usize {
        let mut failed_count = 0;
        for handle in self.threads.drain(..) {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                failed_count += 1;
                tracing::error!(thread = %name, "worker thread panicked");
            }
        }
        failed_count
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        JobSystem::with_default_threads()
    }
}

impl Drop for JobSystem {
    /// Same as [`JobSystem::shutdown`] minus the error report.
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.shared.request_shutdown();
            self.join_threads();
        }
    }
}

fn pin_current_thread(strategy: PinningStrategy, n: usize) {
    if strategy == PinningStrategy::None {
        return;
    }
    if let Some(core_ids) = core_affinity::get_core_ids() {
        if let Some(core) = strategy.core_index(n, core_ids.len()) {
            if !core_affinity::set_for_current(core_ids[core]) {
                tracing::warn!(core, "failed to pin worker thread");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_job_system_creation() {
        let job_system = JobSystem::new(4);
        assert_eq!(job_system.num_workers(), 4);
        assert_eq!(job_system.registered_workers(), 4);
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_calling_thread_registers_separately() {
        let job_system = JobSystem::new(2);
        let worker = job_system.register_worker();
        assert_eq!(worker.index(), 2);
        assert_eq!(job_system.registered_workers(), 3);
        assert_eq!(job_system.num_workers(), 2);
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_job_system_run() {
        let job_system = JobSystem::new(2);
        let worker = job_system.register_worker();
        let executed = Arc::new(AtomicUsize::new(0));
        let executed_clone = executed.clone();

        let job = worker.spawn(move |_, _| {
            executed_clone.fetch_add(1, Ordering::SeqCst);
        });

        worker.wait(job);
        assert_eq!(executed.load(Ordering::SeqCst), 1);
        job_system.shutdown().expect("Shutdown failed");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = JobSystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_capacity, 4096);
        assert_eq!(config.max_workers, 64);
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let odd_ring = JobSystemConfig {
            ring_capacity: 1000,
            ..JobSystemConfig::with_threads(1)
        };
        assert!(matches!(
            odd_ring.validate(),
            Err(JobSystemError::InvalidConfig(_))
        ));

        let no_room_for_caller = JobSystemConfig {
            max_workers: 4,
            ..JobSystemConfig::with_threads(4)
        };
        assert!(matches!(
            JobSystem::with_config(no_room_for_caller),
            Err(JobSystemError::InvalidConfig(_))
        ));

        let unaddressable = JobSystemConfig {
            max_workers: MAX_WORKERS + 1,
            ..JobSystemConfig::with_threads(1)
        };
        assert!(matches!(
            unaddressable.validate(),
            Err(JobSystemError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_systems_get_distinct_tags() {
        let first = JobSystem::new(0);
        let second = JobSystem::new(0);
        assert_ne!(first.shared.tag, second.shared.tag);
        assert_ne!(first.shared.tag, 0);
    }

    #[test]
    fn test_drop_stops_workers() {
        let job_system = JobSystem::new(3);
        let shared = Arc::clone(&job_system.shared);
        drop(job_system);
        assert!(shared.is_shutdown_requested());
        // only this handle remains once the threads have exited
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
