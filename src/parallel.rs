//! Fork/join over index ranges.
//!
//! The common engine pattern is "fork a batch of independent updates, then
//! wait for all of them". `parallel_for` does that by recursively halving the
//! range into child jobs, so idle workers can steal large halves early and the
//! creating worker keeps the small pieces.

use crate::job::JobId;
use crate::worker::Worker;
use std::ops::Range;

impl Worker {
    /// Calls `body(i)` for every `i` in `range` across the pool, returning once
    /// all calls are done.
    ///
    /// Ranges are split until a piece holds at most `grain` indices (a `grain`
    /// of 0 is treated as 1). `body` is cloned into every piece and must fit
    /// alongside the range in a job payload, which leaves room for one pointer:
    /// capture an `Arc` or a `&'static`, not the data itself.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use stealjobs::JobSystem;
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    ///
    /// let job_system = JobSystem::new(3);
    /// let worker = job_system.register_worker();
    /// let sum = Arc::new(AtomicUsize::new(0));
    ///
    /// let total = sum.clone();
    /// worker.parallel_for(0..1000, 64, move |i| {
    ///     total.fetch_add(i, Ordering::Relaxed);
    /// });
    /// assert_eq!(sum.load(Ordering::Relaxed), 499_500);
    /// ```
    pub fn parallel_for<F>(&self, range: Range<usize>, grain: usize, body: F)
    where
        F: Fn(usize) + Clone + Send + 'static,
    {
        if range.is_empty() {
            return;
        }
        let grain = grain.max(1);
        let root = self.spawn(move |worker, id| split(worker, id, range, grain, body));
        self.wait(root);
    }
}

fn split<F>(worker: &Worker, job: JobId, mut range: Range<usize>, grain: usize, body: F)
where
    F: Fn(usize) + Clone + Send + 'static,
{
    while range.len() > grain {
        let mid = range.start + range.len() / 2;
        let upper = mid..range.end;
        let body = body.clone();
        worker.spawn_child(job, move |worker, id| split(worker, id, upper, grain, body));
        range.end = mid;
    }
    for i in range {
        body(i);
    }
}
