use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Optional performance metrics for the job system.
#[derive(Debug)]
pub struct Metrics {
    /// Total number of jobs created.
    pub jobs_created: AtomicU64,
    /// Total number of job bodies executed.
    pub jobs_executed: AtomicU64,
    /// Jobs taken from a worker's own deque.
    pub local_pops: AtomicU64,
    /// Successful steals from other workers.
    pub steals_success: AtomicU64,
    /// Steal attempts that found nothing or lost the race.
    pub steals_failed: AtomicU64,
    /// Times a worker parked because no work was outstanding.
    pub parks: AtomicU64,
    /// Job bodies that panicked.
    pub job_panics: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

impl Metrics {
    /// Creates a new metrics instance.
    pub fn new() -> Self {
        Self {
            jobs_created: AtomicU64::new(0),
            jobs_executed: AtomicU64::new(0),
            local_pops: AtomicU64::new(0),
            steals_success: AtomicU64::new(0),
            steals_failed: AtomicU64::new(0),
            parks: AtomicU64::new(0),
            job_panics: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_created: self.jobs_created.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            local_pops: self.local_pops.load(Ordering::Relaxed),
            steals_success: self.steals_success.load(Ordering::Relaxed),
            steals_failed: self.steals_failed.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            job_panics: self.job_panics.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_created: u64,
    pub jobs_executed: u64,
    pub local_pops: u64,
    pub steals_success: u64,
    pub steals_failed: u64,
    pub parks: u64,
    pub job_panics: u64,
    pub elapsed_seconds: f64,
}

impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Fraction of steal attempts that produced a job.
    pub fn steal_success_rate(&self) -> f64 {
        let attempts = self.steals_success + self.steals_failed;
        if attempts > 0 {
            self.steals_success as f64 / attempts as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_created, 0);
        assert_eq!(snapshot.jobs_executed, 0);
        assert_eq!(snapshot.steals_success, 0);
        assert_eq!(snapshot.steals_failed, 0);
        assert_eq!(snapshot.parks, 0);
        assert!(snapshot.elapsed_seconds >= 0.0);
    }

    #[test]
    fn test_steal_success_rate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.snapshot().steal_success_rate(), 0.0);

        metrics.steals_success.fetch_add(1, Ordering::Relaxed);
        metrics.steals_failed.fetch_add(3, Ordering::Relaxed);
        assert_eq!(metrics.snapshot().steal_success_rate(), 0.25);
    }

    #[test]
    fn test_throughput_calculation() {
        let metrics = Metrics::new();
        metrics.jobs_executed.fetch_add(100, Ordering::Relaxed);

        thread::sleep(Duration::from_millis(10));
        let snapshot = metrics.snapshot();

        assert!(snapshot.jobs_per_second() > 0.0);
    }
}
