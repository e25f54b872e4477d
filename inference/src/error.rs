use thiserror::Error;

pub type Result<T> = std::result::Result<T, InferenceErr>;

#[derive(Debug, Error)]
pub enum InferenceErr {
    #[error("inference daemon unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out")]
    Timeout,

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("transient inference error: {0}")]
    Transient(String),

    #[error("permanent inference error: {0}")]
    Permanent(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl InferenceErr {
    /// Whether this error should be retried by the backoff loop in
    /// `client::run_inference`: only transient errors are retryable,
    /// everything else (timeout, not-found, permanent) is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceErr::Transient(_))
    }
}
