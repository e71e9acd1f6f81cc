use thiserror::Error;

/// Recoverable failures of the job system.
///
/// Contract violations (registry overflow, ring or deque overflow, oversized
/// payloads) are not represented here: they panic where they happen.
#[derive(Error, Debug)]
pub enum JobSystemError {
    #[error("Invalid job system configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse job system configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{0} worker thread(s) panicked")]
    WorkerPanicked(usize),
}

pub type Result<T> = std::result::Result<T, JobSystemError>;
