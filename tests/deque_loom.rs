//! Loom models of the deque's race points and the idle park/wake protocol.
//!
//! Run with: cargo test --test deque_loom --features loom-tests --release
//!
//! Without the `loom-tests` feature this file compiles to an empty module.

#![cfg(feature = "loom-tests")]

use loom::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, AtomicUsize, Ordering, fence};
use loom::sync::{Arc, Condvar, Mutex};
use loom::thread;

// ============================================================================
// Deque model
// ============================================================================
//
// Same protocol as `stealjobs::deque`: the owner pushes and pops at `top`,
// thieves CAS `bottom` forward, and the owner only CASes for the last job.

struct LoomDeque {
    top: AtomicIsize,
    bottom: AtomicIsize,
    slots: [AtomicU64; 4],
}

impl LoomDeque {
    fn new() -> Self {
        Self {
            top: AtomicIsize::new(0),
            bottom: AtomicIsize::new(0),
            slots: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
        }
    }

    fn slot(&self, index: isize) -> &AtomicU64 {
        &self.slots[(index & 3) as usize]
    }

    fn push(&self, value: u64) {
        let top = self.top.load(Ordering::Relaxed);
        self.slot(top).store(value, Ordering::Relaxed);
        self.top.store(top + 1, Ordering::Release);
    }

    fn pop(&self) -> Option<u64> {
        let top = self.top.load(Ordering::Relaxed) - 1;
        self.top.store(top, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        let bottom = self.bottom.load(Ordering::Relaxed);
        if bottom > top {
            self.top.store(bottom, Ordering::Relaxed);
            return None;
        }

        let value = self.slot(top).load(Ordering::Relaxed);
        if bottom != top {
            return Some(value);
        }

        let won = self
            .bottom
            .compare_exchange(bottom, bottom + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok();
        self.top.store(bottom + 1, Ordering::Relaxed);
        won.then_some(value)
    }

    fn steal(&self) -> Option<u64> {
        let bottom = self.bottom.load(Ordering::Acquire);
        fence(Ordering::SeqCst);

        let top = self.top.load(Ordering::Acquire);
        if bottom >= top {
            return None;
        }

        let value = self.slot(bottom).load(Ordering::Relaxed);
        self.bottom
            .compare_exchange(bottom, bottom + 1, Ordering::SeqCst, Ordering::Relaxed)
            .ok()
            .map(|_| value)
    }
}

// ============================================================================
// Test: one job, owner pop against one thief
// ============================================================================

#[test]
fn loom_last_job_has_exactly_one_taker() {
    loom::model(|| {
        let deque = Arc::new(LoomDeque::new());
        deque.push(7);

        let thief = deque.clone();
        let h = thread::spawn(move || thief.steal());

        let popped = deque.pop();
        let stolen = h.join().unwrap();

        assert!(
            popped.is_some() ^ stolen.is_some(),
            "popped {popped:?}, stolen {stolen:?}"
        );
        assert_eq!(popped.or(stolen), Some(7));
    });
}

// ============================================================================
// Test: two jobs, owner drains while a thief steals
// ============================================================================

#[test]
fn loom_two_jobs_are_each_taken_once() {
    loom::model(|| {
        let deque = Arc::new(LoomDeque::new());
        deque.push(1);
        deque.push(2);

        let thief = deque.clone();
        let h = thread::spawn(move || thief.steal());

        let mut taken = Vec::new();
        while let Some(value) = deque.pop() {
            taken.push(value);
        }
        if let Some(value) = h.join().unwrap() {
            taken.push(value);
        }

        taken.sort_unstable();
        assert_eq!(taken, vec![1, 2]);
    });
}

// ============================================================================
// Park/wake model
// ============================================================================
//
// A worker parks only if no work is outstanding when re-checked under the
// idle lock; a submitter that moves the count off zero notifies under the
// same lock.

struct LoomIdle {
    outstanding: AtomicUsize,
    shutdown: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl LoomIdle {
    fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            lock: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }

    fn ready(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) > 0 || self.shutdown.load(Ordering::Acquire)
    }

    fn park(&self) {
        let mut guard = self.lock.lock().unwrap();
        while !self.ready() {
            guard = self.cvar.wait(guard).unwrap();
        }
    }

    fn submit(&self) {
        if self.outstanding.fetch_add(1, Ordering::AcqRel) == 0 {
            let _guard = self.lock.lock().unwrap();
            self.cvar.notify_all();
        }
    }

    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.cvar.notify_all();
    }
}

#[test]
fn loom_submit_wakes_parked_worker() {
    loom::model(|| {
        let idle = Arc::new(LoomIdle::new());

        let worker = idle.clone();
        let h = thread::spawn(move || {
            worker.park();
            worker.outstanding.load(Ordering::Acquire)
        });

        idle.submit();
        assert_eq!(h.join().unwrap(), 1, "lost wakeup!");
    });
}

#[test]
fn loom_shutdown_wakes_every_parked_worker() {
    loom::model(|| {
        let idle = Arc::new(LoomIdle::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let worker = idle.clone();
                thread::spawn(move || worker.park())
            })
            .collect();

        idle.request_shutdown();
        for h in handles {
            h.join().unwrap();
        }
    });
}
