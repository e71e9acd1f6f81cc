//! Per-thread worker context and the worker loop.
//!
//! A [`Worker`] is created once per participating OS thread and carries
//! everything that thread needs to take part in scheduling: its own deque, its
//! own job ring and write index, and a handle on the shared job system state.
//! Every job-level operation goes through it, and job bodies receive the
//! executing thread's worker so they can fork and join further work.

use crate::deque::JobQueue;
use crate::job::{Job, JobFunction, JobId, PAYLOAD_SIZE};
use crate::job_system::Shared;
use crate::registry::RegisteredWorker;
use crossbeam::utils::Backoff;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// The scheduling context of one registered thread.
///
/// `Worker` is `Send` so it can be handed to the thread it belongs to, but not
/// `Sync`: only that thread may push to its deque or allocate from its ring.
pub struct Worker {
    index: usize,
    queue: JobQueue,
    local: Arc<RegisteredWorker>,
    shared: Arc<Shared>,
    next_serial: Cell<u32>,
    rng: RefCell<SmallRng>,
}

impl Worker {
    pub(crate) fn new(
        index: usize,
        queue: JobQueue,
        local: Arc<RegisteredWorker>,
        shared: Arc<Shared>,
    ) -> Self {
        Worker {
            index,
            queue,
            local,
            shared,
            next_serial: Cell::new(0),
            rng: RefCell::new(SmallRng::seed_from_u64(
                0x9E37_79B9_7F4A_7C15 ^ index as u64,
            )),
        }
    }

    /// Returns the worker's registry index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns true once the owning job system has been asked to shut down.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.is_shutdown_requested()
    }

    /// Creates a job that calls `function` with a copy of `payload`.
    ///
    /// The job is not submitted; pass it to [`run`](Self::run).
    ///
    /// # Panics
    ///
    /// Panics if `payload` is longer than [`PAYLOAD_SIZE`], or if every slot of
    /// this worker's ring holds an unfinished job.
    pub fn create_job(&self, function: JobFunction, payload: &[u8]) -> JobId {
        self.create_raw(None, function, payload)
    }

    /// Creates a job whose completion gates `parent`.
    ///
    /// The parent's pending count is raised before the child exists, so the
    /// child can never finish ahead of its own registration.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is already done.
    pub fn create_child_job(&self, parent: JobId, function: JobFunction, payload: &[u8]) -> JobId {
        self.shared.resolve(parent).pending().increment();
        self.create_raw(Some(parent), function, payload)
    }

    /// Creates a job running `work`, stored inline in the job record.
    ///
    /// The captured state must fit in [`PAYLOAD_SIZE`] bytes with at most
    /// 8-byte alignment; this is checked at compile time. A job that is never
    /// run never drops its captured state.
    pub fn create_job_with<F>(&self, work: F) -> JobId
    where
        F: FnOnce(&Worker, JobId) + Send + 'static,
    {
        self.create_inline(None, work)
    }

    /// Creates a child of `parent` running `work`. See [`create_job_with`](Self::create_job_with).
    pub fn create_child_job_with<F>(&self, parent: JobId, work: F) -> JobId
    where
        F: FnOnce(&Worker, JobId) + Send + 'static,
    {
        self.shared.resolve(parent).pending().increment();
        self.create_inline(Some(parent), work)
    }

    /// Creates and immediately runs a job.
    pub fn spawn<F>(&self, work: F) -> JobId
    where
        F: FnOnce(&Worker, JobId) + Send + 'static,
    {
        let id = self.create_job_with(work);
        self.run(id);
        id
    }

    /// Creates and immediately runs a child of `parent`.
    pub fn spawn_child<F>(&self, parent: JobId, work: F) -> JobId
    where
        F: FnOnce(&Worker, JobId) + Send + 'static,
    {
        let id = self.create_child_job_with(parent, work);
        self.run(id);
        id
    }

    fn create_raw(&self, parent: Option<JobId>, function: JobFunction, payload: &[u8]) -> JobId {
        assert!(
            payload.len() <= PAYLOAD_SIZE,
            "job payload of {} bytes exceeds the {PAYLOAD_SIZE}-byte inline buffer",
            payload.len()
        );
        let (serial, job) = self.claim();
        // SAFETY: this thread owns the ring, and `claim` checked the slot is done.
        unsafe { job.init_raw(serial, parent, function, payload) };
        metric!(self.shared, jobs_created);
        JobId::new(self.shared.tag, self.index, serial)
    }

    fn create_inline<F>(&self, parent: Option<JobId>, work: F) -> JobId
    where
        F: FnOnce(&Worker, JobId) + Send + 'static,
    {
        let (serial, job) = self.claim();
        // SAFETY: as in `create_raw`.
        unsafe { job.init_inline(serial, parent, work) };
        metric!(self.shared, jobs_created);
        JobId::new(self.shared.tag, self.index, serial)
    }

    fn claim(&self) -> (u32, &Job) {
        let (serial, job) = self.local.ring.claim(self.next_serial.get());
        self.next_serial.set(serial.wrapping_add(1));
        (serial, job)
    }

    /// Submits a job to this worker's deque, waking parked workers if the
    /// system was idle.
    ///
    /// # Panics
    ///
    /// Panics if the job was already submitted, if its slot has been recycled,
    /// or if it belongs to another job system.
    pub fn run(&self, id: JobId) {
        assert!(
            self.shared.resolve(id).submit(),
            "{id:?} was already submitted"
        );
        // Counted before it becomes stealable, so a thief finishing it first
        // cannot drive the outstanding count below zero.
        self.shared.job_submitted();
        self.queue.push(id);
    }

    /// Blocks until `id` and all of its descendants are done.
    ///
    /// The thread never sleeps while waiting: it keeps executing other ready
    /// jobs, including ones the awaited job depends on.
    pub fn wait(&self, id: JobId) {
        let backoff = Backoff::new();
        while !self.is_done(id) {
            if self.try_run_one() {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
    }

    /// Returns true if `id` and all of its descendants are done.
    pub fn is_done(&self, id: JobId) -> bool {
        self.shared.is_done(id)
    }

    /// Returns the pending count of `id`: 1 for its own body plus one per
    /// unfinished child, 0 once done.
    pub fn pending(&self, id: JobId) -> i32 {
        self.shared.pending(id)
    }

    /// Copies out the payload of a finished raw job, e.g. to collect a result
    /// or an error code the job wrote.
    ///
    /// `None` for closure jobs and for ids whose slot has since been reused.
    ///
    /// # Panics
    ///
    /// Panics if the job is not done, or was created by another worker: only
    /// the creator can rule out its slot being recycled during the copy.
    pub fn read_payload(&self, id: JobId) -> Option<[u8; PAYLOAD_SIZE]> {
        let ring = self.shared.ring(id);
        assert_eq!(
            id.worker(),
            self.index,
            "{id:?} payload read from worker {}",
            self.index
        );
        let job = ring.slot(id.serial());
        if job.serial() != id.serial() {
            return None;
        }
        assert!(job.pending().is_done(), "{id:?} read while still running");
        job.payload_bytes()
    }

    /// Retires one unit of work on `id` and propagates completion to its parents.
    pub(crate) fn finish(&self, id: JobId) {
        self.shared.finish(id);
    }

    /// Executes one job from the own deque or, failing that, one stolen from a peer.
    ///
    /// Returns false if no job was found.
    pub fn try_run_one(&self) -> bool {
        let id = match self.queue.pop() {
            Some(id) => {
                metric!(self.shared, local_pops);
                id
            }
            None => match self.steal() {
                Some(id) => id,
                None => return false,
            },
        };
        self.execute(id);
        true
    }

    /// Runs the worker loop on the calling thread until shutdown is requested
    /// and every deque is empty.
    ///
    /// Pops own jobs, otherwise steals, otherwise parks while the whole system
    /// is idle. Once shutdown is requested the loop stops parking and sweeps
    /// all peers instead, exiting only after a sweep finds nothing queued.
    pub fn run_worker(&self) {
        tracing::debug!(worker = self.index, "worker loop started");
        let backoff = Backoff::new();
        loop {
            if self.try_run_one() {
                backoff.reset();
            } else if self.shared.is_shutdown_requested() {
                match self.steal_any() {
                    Some(id) => self.execute(id),
                    None => break,
                }
            } else if self.shared.has_outstanding_work() {
                backoff.snooze();
            } else {
                self.shared.park(self.index);
                backoff.reset();
            }
        }
        tracing::debug!(worker = self.index, "worker loop stopped");
    }

    /// Steals from the first peer holding a job, visiting every peer once.
    ///
    /// A lost race is retried while the victim still looks non-empty, so
    /// `None` means every peer deque was seen empty.
    fn steal_any(&self) -> Option<JobId> {
        for victim in (0..self.shared.registry.len()).filter(|&v| v != self.index) {
            let Some(peer) = self.shared.registry.get(victim) else {
                continue;
            };
            loop {
                if let Some(id) = peer.stealer.steal() {
                    metric!(self.shared, steals_success);
                    return Some(id);
                }
                if peer.stealer.is_empty() {
                    break;
                }
            }
        }
        None
    }

    fn steal(&self) -> Option<JobId> {
        let registered = self.shared.registry.len();
        if registered < 2 {
            return None;
        }

        // Uniform over every peer except ourselves.
        let mut victim = self.rng.borrow_mut().random_range(0..registered - 1);
        if victim >= self.index {
            victim += 1;
        }

        let stolen = self.shared.registry.get(victim)?.stealer.steal();
        if stolen.is_some() {
            metric!(self.shared, steals_success);
        } else {
            metric!(self.shared, steals_failed);
        }
        stolen
    }

    fn execute(&self, id: JobId) {
        let job = self.shared.resolve(id);
        assert!(job.start(), "{id:?} was dequeued without being queued");
        // SAFETY: `start` succeeded, so this is the only execution.
        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { job.execute(self, id) }));
        if let Err(panic_payload) = result {
            metric!(self.shared, job_panics);
            tracing::error!(
                job = ?id,
                worker = self.index,
                "job panicked: {}",
                panic_message(panic_payload.as_ref())
            );
        }
        metric!(self.shared, jobs_executed);
        self.finish(id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("index", &self.index)
            .field("queued", &self.queue.len())
            .field("next_serial", &self.next_serial.get())
            .finish()
    }
}
