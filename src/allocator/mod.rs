//! Allocation-free storage for job records.

pub mod ring;

pub use ring::JobRing;
