//! Registry of every worker participating in a job system.
//!
//! Append-only and bounded. Registration is serialised by a mutex; lookups
//! and iteration are lock-free, since a filled entry never changes again.

use crate::allocator::JobRing;
use crate::deque::JobStealer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// What other threads need to know about a worker: where its jobs live and
/// how to steal from it.
pub(crate) struct RegisteredWorker {
    pub(crate) ring: JobRing,
    pub(crate) stealer: JobStealer,
}

pub(crate) struct Registry {
    entries: Box<[OnceLock<Arc<RegisteredWorker>>]>,
    len: AtomicUsize,
    lock: Mutex<()>,
}

impl Registry {
    pub(crate) fn new(max_workers: usize) -> Self {
        Registry {
            entries: (0..max_workers).map(|_| OnceLock::new()).collect(),
            len: AtomicUsize::new(0),
            lock: Mutex::new(()),
        }
    }

    /// Appends a worker and returns its index.
    ///
    /// # Panics
    ///
    /// Panics if the registry is full. A worker that silently failed to
    /// register would never run jobs, so startup must not continue.
    pub(crate) fn register(&self, worker: Arc<RegisteredWorker>) -> usize {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let index = self.len.load(Ordering::Relaxed);
        assert!(
            index < self.capacity(),
            "worker registry is full: at most {} workers can register",
            self.capacity()
        );
        // Cannot fail: indices are handed out once, under the lock.
        let _ = self.entries[index].set(worker);
        self.len.store(index + 1, Ordering::Release);
        index
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Arc<RegisteredWorker>> {
        self.entries.get(index)?.get()
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.entries.len()
    }
}
