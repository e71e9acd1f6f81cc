//! Fixed-capacity job slot ring.
//!
//! Each worker owns one ring and is the only thread that ever writes into it.
//! A monotonically increasing serial picks the slot (`serial & (capacity - 1)`),
//! so slots are recycled implicitly once the serial wraps around the ring. A
//! slot whose job is still in flight is passed over rather than reused. Other
//! threads only ever read jobs through the ids handed out by the deques.

use crate::job::{Job, JobId};

/// Largest supported ring capacity.
pub const MAX_RING_CAPACITY: usize = 1 << 30;

/// A worker's ring of reusable job records.
pub struct JobRing {
    slots: Box<[Job]>,
    mask: u32,
}

impl JobRing {
    /// Creates a ring with `capacity` slots, all initially done.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two in `2..=MAX_RING_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two() && (2..=MAX_RING_CAPACITY).contains(&capacity),
            "job ring capacity must be a power of two in 2..={MAX_RING_CAPACITY}, got {capacity}"
        );
        let slots: Box<[Job]> = (0..capacity).map(|_| Job::empty()).collect();
        JobRing {
            slots,
            mask: (capacity - 1) as u32,
        }
    }

    /// Returns the number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the slot a serial maps to, whoever occupies it now.
    pub fn slot(&self, serial: u32) -> &Job {
        &self.slots[(serial & self.mask) as usize]
    }

    /// Resolves a live job id.
    ///
    /// # Panics
    ///
    /// Panics if the slot has been recycled since the id was handed out.
    pub fn get(&self, id: JobId) -> &Job {
        let job = self.slot(id.serial());
        assert_eq!(
            job.serial(),
            id.serial(),
            "{id:?} was used after its ring slot was recycled"
        );
        job
    }

    /// Claims a slot for a new job, probing forward from serial `next`.
    /// Owner-only.
    ///
    /// Returns the serial the job was given. Serials whose slot still holds a
    /// live job are skipped, so one long-running parent does not pin the ring.
    ///
    /// # Panics
    ///
    /// Panics if every slot holds an unfinished job: handing one out again
    /// would alias two live jobs.
    pub(crate) fn claim(&self, next: u32) -> (u32, &Job) {
        for offset in 0..=self.mask {
            let serial = next.wrapping_add(offset);
            let job = self.slot(serial);
            if job.pending().is_done() {
                return (serial, job);
            }
        }
        panic!(
            "job ring overflow: all {} slots hold unfinished jobs",
            self.capacity()
        );
    }
}
