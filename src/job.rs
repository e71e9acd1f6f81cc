//! Job records and identifiers.
//!
//! A job is one cache line: an entry point, an optional parent, a pending
//! counter, the serial it was created with, a submission state, and a small
//! inline payload. Jobs live in their creating worker's ring and are referred
//! to everywhere else by [`JobId`], never by pointer.

use crate::counter::PendingCounter;
use crate::worker::Worker;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::num::NonZeroU64;
use std::ptr;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Size of a cache line on the targets the scheduler is tuned for.
pub const CACHE_LINE_SIZE: usize = 64;

const HEADER_SIZE: usize = 32;

/// Number of payload bytes carried inline by every job.
pub const PAYLOAD_SIZE: usize = CACHE_LINE_SIZE - HEADER_SIZE;

/// Largest alignment an inline closure may require.
pub const PAYLOAD_ALIGN: usize = 8;

/// Upper bound on workers a job id can address.
pub const MAX_WORKERS: usize = 1 << 16;

/// Entry point of a raw job.
///
/// Receives the worker executing the job, the job's own id and its payload
/// bytes. The function may write results back into the payload; they can be
/// read with [`Worker::read_payload`] once the job is done.
pub type JobFunction = fn(&Worker, JobId, &mut [u8]);

type InlineFn = unsafe fn(&Worker, JobId, *mut u8);

/// Entry point, discriminated by `Job::kind`.
#[derive(Clone, Copy)]
union Entry {
    raw: JobFunction,
    inline: InlineFn,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Kind {
    Raw,
    Inline,
}

// Submission states. A slot only moves forward through them between two
// initialisations, so a job is queued at most once and executed at most once.
const CREATED: u8 = 0;
const QUEUED: u8 = 1;
const EXECUTED: u8 = 2;

fn noop(_: &Worker, _: JobId, _: &mut [u8]) {}

/// Identifies a job: the job system and worker whose ring holds it, plus its
/// creation serial.
///
/// The ring slot is derived from the serial, so an id stays meaningful only
/// until its slot is recycled, `ring_capacity` creations later on the same
/// worker.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(NonZeroU64);

impl JobId {
    pub(crate) fn new(system: u16, worker: usize, serial: u32) -> Self {
        debug_assert!(worker < MAX_WORKERS);
        let bits = ((system as u64) << 48) | ((worker as u64) << 32) | serial as u64;
        match NonZeroU64::new(bits) {
            Some(bits) => JobId(bits),
            None => panic!("job system tag must be non-zero"),
        }
    }

    /// Index of the worker whose ring holds the job.
    pub fn worker(self) -> usize {
        ((self.0.get() >> 32) & 0xFFFF) as usize
    }

    /// Creation serial of the job on its worker.
    pub fn serial(self) -> u32 {
        self.0.get() as u32
    }

    /// Tag of the job system that created the job.
    pub(crate) fn system(self) -> u16 {
        (self.0.get() >> 48) as u16
    }

    pub(crate) fn to_bits(self) -> u64 {
        self.0.get()
    }

    pub(crate) fn from_bits(bits: u64) -> Option<Self> {
        NonZeroU64::new(bits).map(JobId)
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JobId({}#{}@{})",
            self.worker(),
            self.serial(),
            self.system()
        )
    }
}

/// Inline payload bytes, aligned for closure state.
#[repr(C, align(8))]
struct Payload(UnsafeCell<[MaybeUninit<u8>; PAYLOAD_SIZE]>);

impl Payload {
    fn as_ptr(&self) -> *mut u8 {
        self.0.get().cast::<u8>()
    }
}

/// A fixed-size task descriptor.
///
/// `pending` and `state` are mutated concurrently. Everything else is written
/// by the owning worker while the slot is being (re)initialised, before the
/// job is published, and is read-only afterwards.
#[repr(C, align(64))]
pub struct Job {
    entry: UnsafeCell<Entry>,
    parent: UnsafeCell<Option<JobId>>,
    pending: PendingCounter,
    serial: AtomicU32,
    state: AtomicU8,
    kind: UnsafeCell<Kind>,
    payload: Payload,
}

const _: () = {
    assert!(mem::size_of::<Job>() == CACHE_LINE_SIZE);
    assert!(mem::offset_of!(Job, payload) == HEADER_SIZE);
    assert!(mem::align_of::<Payload>() == PAYLOAD_ALIGN);
};

// SAFETY: the non-atomic fields are only written by the owning worker while no
// other thread can reach the slot (its pending count is 0 and it is not queued).
unsafe impl Sync for Job {}

impl Job {
    pub(crate) fn empty() -> Self {
        Job {
            entry: UnsafeCell::new(Entry { raw: noop }),
            parent: UnsafeCell::new(None),
            pending: PendingCounter::done(),
            serial: AtomicU32::new(u32::MAX),
            state: AtomicU8::new(EXECUTED),
            kind: UnsafeCell::new(Kind::Raw),
            payload: Payload(UnsafeCell::new([MaybeUninit::new(0); PAYLOAD_SIZE])),
        }
    }

    /// Initialises the slot as a raw job with a copy of `payload`.
    ///
    /// # Safety
    ///
    /// Only the worker owning the ring may call this, on a slot whose pending
    /// count is 0 and which is not referenced by any deque.
    pub(crate) unsafe fn init_raw(
        &self,
        serial: u32,
        parent: Option<JobId>,
        function: JobFunction,
        payload: &[u8],
    ) {
        debug_assert!(payload.len() <= PAYLOAD_SIZE);
        unsafe {
            self.prepare(parent, Kind::Raw, Entry { raw: function });
            ptr::copy_nonoverlapping(payload.as_ptr(), self.payload.as_ptr(), payload.len());
        }
        self.publish(serial);
    }

    /// Initialises the slot as a job running `work` from its inline payload.
    ///
    /// # Safety
    ///
    /// Same contract as [`Job::init_raw`].
    pub(crate) unsafe fn init_inline<F>(&self, serial: u32, parent: Option<JobId>, work: F)
    where
        F: FnOnce(&Worker, JobId) + Send + 'static,
    {
        const {
            assert!(
                mem::size_of::<F>() <= PAYLOAD_SIZE,
                "closure captures too much state for an inline job payload"
            );
            assert!(
                mem::align_of::<F>() <= PAYLOAD_ALIGN,
                "closure state is over-aligned for an inline job payload"
            );
        }
        unsafe {
            self.prepare(
                parent,
                Kind::Inline,
                Entry {
                    inline: call_inline::<F>,
                },
            );
            ptr::write(self.payload.as_ptr().cast::<F>(), work);
        }
        self.publish(serial);
    }

    unsafe fn prepare(&self, parent: Option<JobId>, kind: Kind, entry: Entry) {
        self.pending.reset();
        unsafe {
            *self.entry.get() = entry;
            *self.kind.get() = kind;
            *self.parent.get() = parent;
            (*self.payload.0.get()).fill(MaybeUninit::new(0));
        }
    }

    fn publish(&self, serial: u32) {
        // Release: whoever wins `submit` sees the fields written above.
        self.state.store(CREATED, Ordering::Release);
        self.serial.store(serial, Ordering::Release);
    }

    /// Moves a created job to the queued state.
    ///
    /// Returns false if the job was submitted before, so each creation is
    /// pushed onto a deque at most once.
    pub(crate) fn submit(&self) -> bool {
        self.state
            .compare_exchange(CREATED, QUEUED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Claims a queued job for execution. Returns false if it is not queued.
    pub(crate) fn start(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, EXECUTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Runs the job's entry point.
    ///
    /// # Safety
    ///
    /// The caller must have won [`Job::start`] for this creation of the job.
    pub(crate) unsafe fn execute(&self, worker: &Worker, id: JobId) {
        let payload = self.payload.as_ptr();
        // SAFETY: `kind` and `entry` are written together before publication.
        unsafe {
            match *self.kind.get() {
                Kind::Raw => {
                    let function = (*self.entry.get()).raw;
                    // Raw payloads are fully initialised bytes, and the
                    // executing thread is the only one touching them.
                    let bytes = std::slice::from_raw_parts_mut(payload, PAYLOAD_SIZE);
                    function(worker, id, bytes);
                }
                Kind::Inline => ((*self.entry.get()).inline)(worker, id, payload),
            }
        }
    }

    /// The job that spawned this one, if any.
    pub fn parent(&self) -> Option<JobId> {
        // SAFETY: written before the job is published and never while it is live.
        unsafe { *self.parent.get() }
    }

    /// The job's pending counter.
    pub fn pending(&self) -> &PendingCounter {
        &self.pending
    }

    /// Serial of the job currently occupying this slot.
    pub fn serial(&self) -> u32 {
        self.serial.load(Ordering::Acquire)
    }

    /// Copies the payload out of a raw job. Inline closure jobs have no byte view.
    ///
    /// The caller must ensure no thread is executing the job.
    pub(crate) fn payload_bytes(&self) -> Option<[u8; PAYLOAD_SIZE]> {
        // SAFETY: see `parent`.
        if unsafe { *self.kind.get() } == Kind::Inline {
            return None;
        }
        let mut out = [0u8; PAYLOAD_SIZE];
        unsafe {
            ptr::copy_nonoverlapping(self.payload.as_ptr(), out.as_mut_ptr(), PAYLOAD_SIZE);
        }
        Some(out)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("serial", &self.serial())
            .field("parent", &self.parent())
            .field("pending", &self.pending.value())
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

unsafe fn call_inline<F>(worker: &Worker, id: JobId, payload: *mut u8)
where
    F: FnOnce(&Worker, JobId) + Send + 'static,
{
    // SAFETY: `init_inline::<F>` wrote an `F` here, and `start` lets only one
    // caller through per creation.
    let work = unsafe { ptr::read(payload.cast::<F>()) };
    work(worker, id);
}
