//! Lock-free work-stealing deque of job ids.
//!
//! One owner, many thieves, after Chase and Lev. The owner pushes and pops at
//! `top`; thieves take from `bottom`. `bottom` is the single contended index
//! and only ever moves by compare-and-swap, which is also what settles the race
//! for the last remaining job between the owner and the thieves.
//!
//! Capacity is fixed. Slots hold [`JobId`] bits rather than pointers, so a
//! thief that loses a race has merely read a stale number.

use crate::job::JobId;
use crossbeam::utils::CachePadded;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicU64, Ordering, fence};

struct Inner {
    /// Thief end. Advanced by CAS from thieves and from the owner's last pop.
    bottom: CachePadded<AtomicIsize>,
    /// Owner end. Stored only by the owning thread.
    top: CachePadded<AtomicIsize>,
    slots: Box<[AtomicU64]>,
    mask: usize,
}

impl Inner {
    fn slot(&self, index: isize) -> &AtomicU64 {
        &self.slots[index as usize & self.mask]
    }

    fn len(&self) -> usize {
        let top = self.top.load(Ordering::Acquire);
        let bottom = self.bottom.load(Ordering::Acquire);
        (top - bottom).max(0) as usize
    }
}

/// Owner half of a work-stealing deque.
///
/// `push` and `pop` are only available here, and a `JobQueue` is `Send` but not
/// `Sync`, so exactly one thread at a time can act as the owner.
pub struct JobQueue {
    inner: Arc<Inner>,
    _not_sync: PhantomData<Cell<()>>,
}

/// Thief half of a work-stealing deque. Cheap to clone and share.
#[derive(Clone)]
pub struct JobStealer {
    inner: Arc<Inner>,
}

impl JobQueue {
    /// Creates an empty deque holding up to `capacity` jobs.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "job deque capacity must be a power of two, got {capacity}"
        );
        let slots: Box<[AtomicU64]> = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        JobQueue {
            inner: Arc::new(Inner {
                bottom: CachePadded::new(AtomicIsize::new(0)),
                top: CachePadded::new(AtomicIsize::new(0)),
                slots,
                mask: capacity - 1,
            }),
            _not_sync: PhantomData,
        }
    }

    /// Creates a stealer handle for other threads.
    pub fn stealer(&self) -> JobStealer {
        JobStealer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Returns the maximum number of queued jobs.
    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    /// Returns the number of queued jobs.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no jobs are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes a job at the owner end.
    ///
    /// # Panics
    ///
    /// Panics if the deque is full.
    pub fn push(&self, id: JobId) {
        let inner = &*self.inner;
        let top = inner.top.load(Ordering::Relaxed);
        let bottom = inner.bottom.load(Ordering::Acquire);
        assert!(
            top - bottom < inner.slots.len() as isize,
            "job deque overflow: {} jobs already queued",
            top - bottom
        );

        inner.slot(top).store(id.to_bits(), Ordering::Relaxed);
        // The slot must be visible before the new top is.
        inner.top.store(top + 1, Ordering::Release);
    }

    /// Pops the most recently pushed job, racing thieves for the last one.
    pub fn pop(&self) -> Option<JobId> {
        let inner = &*self.inner;
        let top = inner.top.load(Ordering::Relaxed) - 1;
        inner.top.store(top, Ordering::Relaxed);

        // The speculative top must be globally visible before bottom is read.
        fence(Ordering::SeqCst);

        let bottom = inner.bottom.load(Ordering::Relaxed);
        if bottom > top {
            // Empty.
            inner.top.store(bottom, Ordering::Relaxed);
            return None;
        }

        let bits = inner.slot(top).load(Ordering::Relaxed);
        if bottom != top {
            // More than one left; thieves cannot reach this one.
            return JobId::from_bits(bits);
        }

        // Last job: whoever moves bottom first owns it.
        let won = inner
            .bottom
            .compare_exchange(bottom, bottom + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        inner.top.store(bottom + 1, Ordering::Relaxed);

        if won { JobId::from_bits(bits) } else { None }
    }
}

impl JobStealer {
    /// Tries to take the oldest job.
    ///
    /// `None` means the deque was empty or another thread won the race; either
    /// way the caller should look elsewhere.
    pub fn steal(&self) -> Option<JobId> {
        let inner = &*self.inner;
        let bottom = inner.bottom.load(Ordering::Acquire);

        fence(Ordering::SeqCst);

        let top = inner.top.load(Ordering::Acquire);
        if bottom >= top {
            return None;
        }

        let bits = inner.slot(bottom).load(Ordering::Relaxed);
        inner
            .bottom
            .compare_exchange(bottom, bottom + 1, Ordering::SeqCst, Ordering::Relaxed)
            .ok()
            .and_then(|_| JobId::from_bits(bits))
    }

    /// Returns the number of queued jobs (may be stale).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the deque looks empty (may be stale).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl fmt::Debug for JobStealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStealer").field("len", &self.len()).finish()
    }
}
