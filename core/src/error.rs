//! Error taxonomy owned by this crate: admission-time rejections and host
//! metrics sampling failures. Composes the fileops and inference crates'
//! own error kinds via `#[from]`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentErr>;

#[derive(Debug, Error)]
pub enum AgentErr {
    /// Task rejected at submission: invalid priority, missing required
    /// fields. Non-retryable by definition — the task was never queued.
    #[error("task rejected at submission: {0}")]
    Admission(String),

    /// Reserved for future backpressure; the queue is unbounded by design
    /// today, so this is never produced by `submit`.
    #[error("no slot capacity available")]
    ResourceUnavailable,

    /// Host metrics sampling failed. Non-fatal: the monitor retains its
    /// last good snapshot and keeps running.
    #[error("host metrics sampling failed: {0}")]
    Monitoring(String),

    #[error(transparent)]
    FileOps(#[from] curator_fileops::FileOpsErr),

    #[error(transparent)]
    Inference(#[from] curator_inference::InferenceErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
