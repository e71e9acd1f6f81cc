//! # stealjobs - Work-Stealing Fork/Join Job Scheduler
//!
//! A job scheduler for real-time engines: many CPU worker threads cooperatively
//! execute a dynamically created graph of small jobs with parent/child completion
//! dependencies, balancing load by stealing from each other's queues.
//!
//! ## Architecture
//!
//! - **Jobs**: 64-byte records holding an entry point, an optional parent, a
//!   pending counter and a small inline payload. Creating a job never allocates.
//! - **Job rings**: each worker recycles job records from its own fixed ring.
//! - **Deques**: each worker owns a lock-free Chase-Lev deque. The owner pushes
//!   and pops one end, idle workers steal from the other.
//! - **Job system**: owns the worker threads, the registry of all deques, the
//!   outstanding-work counter and the idle park/wake protocol.
//! - **Workers**: the per-thread context through which every job is created,
//!   submitted and waited on. There is no hidden thread-local state.
//!
//! ## Example
//!
//! ```no_run
//! use stealjobs::JobSystem;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let job_system = JobSystem::new(3);
//! let worker = job_system.register_worker();
//!
//! let hits = Arc::new(AtomicUsize::new(0));
//! let root = worker.create_job_with(|_, _| {});
//! for _ in 0..8 {
//!     let hits = hits.clone();
//!     worker.spawn_child(root, move |_, _| {
//!         hits.fetch_add(1, Ordering::Relaxed);
//!     });
//! }
//! worker.run(root);
//! worker.wait(root);
//!
//! assert_eq!(hits.load(Ordering::Relaxed), 8);
//! job_system.shutdown().unwrap();
//! ```

/// Bumps a metrics counter when the `metrics` feature is enabled.
macro_rules! metric {
    ($shared:expr, $field:ident) => {
        #[cfg(feature = "metrics")]
        {
            $shared
                .metrics
                .$field
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    };
}

pub mod allocator;
pub mod counter;
pub mod deque;
pub mod error;
pub mod job;
pub mod job_system;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod parallel;
mod registry;
pub mod worker;

use serde::{Deserialize, Serialize};

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
}

impl PinningStrategy {
    /// Picks the logical processor for the `worker`-th spawned thread, if any.
    ///
    /// Indices wrap around when there are more workers than processors.
    pub fn core_index(self, worker: usize, available: usize) -> Option<usize> {
        if available == 0 {
            return None;
        }
        match self {
            PinningStrategy::None => None,
            PinningStrategy::Linear => Some(worker % available),
            PinningStrategy::AvoidSMT => {
                let physical = available.div_ceil(2);
                Some((worker % physical) * 2)
            }
        }
    }
}

pub use counter::PendingCounter;
pub use error::JobSystemError;
pub use job::{CACHE_LINE_SIZE, Job, JobFunction, JobId, MAX_WORKERS, PAYLOAD_SIZE};
pub use job_system::{JobSystem, JobSystemConfig};
pub use worker::Worker;
