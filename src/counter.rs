//! Pending-count protocol for the job dependency graph.
//!
//! Every job starts with a count of 1, standing for its own body. Creating a
//! child adds one to the parent before the child becomes visible to any
//! worker; finishing a body or a whole child subtree subtracts one. A count of
//! 0 means the job and all of its descendants are done, and it never goes
//! below 0.

use std::sync::atomic::{AtomicI32, Ordering};

/// Atomic counter tracking the unfinished work a job is gated on.
#[derive(Debug)]
pub struct PendingCounter {
    value: AtomicI32,
}

impl PendingCounter {
    /// Creates a counter with the specified initial value.
    pub const fn new(initial: i32) -> Self {
        PendingCounter {
            value: AtomicI32::new(initial),
        }
    }

    /// Creates a counter that is already done, as for a never-used slot.
    pub const fn done() -> Self {
        Self::new(0)
    }

    /// Arms the counter for a freshly created job.
    ///
    /// Only the thread creating the job may call this, before publishing it.
    pub fn reset(&self) {
        self.value.store(1, Ordering::Relaxed);
    }

    /// Registers one more unfinished child.
    ///
    /// # Panics
    ///
    /// Panics if the counter is already zero: a finished job's slot may be
    /// recycled at any time, so it cannot gain children.
    pub fn increment(&self) {
        let attached = self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                (value > 0).then_some(value + 1)
            });
        assert!(
            attached.is_ok(),
            "child attached to a job that already finished"
        );
    }

    /// Retires one unit of work.
    ///
    /// Returns true if the counter reached zero. Release ordering on the way
    /// down makes all work of the finished subtree visible to whoever observes
    /// the zero.
    pub fn decrement(&self) -> bool {
        let previous = self.value.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "pending count went negative");
        previous == 1
    }

    /// Returns the current value of the counter.
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    /// Checks if the counter has reached zero.
    pub fn is_done(&self) -> bool {
        self.value() == 0
    }
}

impl Default for PendingCounter {
    fn default() -> Self {
        Self::done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = PendingCounter::new(5);
        assert_eq!(counter.value(), 5);
        assert!(!counter.is_done());

        assert!(!counter.decrement());
        assert_eq!(counter.value(), 4);

        counter.increment();
        assert_eq!(counter.value(), 5);
    }

    #[test]
    fn test_counter_completion() {
        let counter = PendingCounter::done();
        assert!(counter.is_done());

        counter.reset();
        assert!(!counter.is_done());
        assert!(counter.decrement());
        assert!(counter.is_done());
    }

    #[test]
    fn test_children_gate_completion() {
        let counter = PendingCounter::done();
        counter.reset();
        counter.increment();
        counter.increment();

        // own body
        assert!(!counter.decrement());
        // first child
        assert!(!counter.decrement());
        // last child closes the job
        assert!(counter.decrement());
    }

    #[test]
    #[should_panic(expected = "child attached to a job that already finished")]
    fn test_increment_on_finished_counter_panics() {
        let counter = PendingCounter::done();
        counter.increment();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "pending count went negative")]
    fn test_decrement_below_zero_is_caught() {
        let counter = PendingCounter::done();
        counter.decrement();
    }
}
