use thiserror::Error;

pub type Result<T> = std::result::Result<T, FileOpsErr>;

#[derive(Debug, Error)]
pub enum FileOpsErr {
    #[error("operation failed validation: {0}")]
    Validation(String),

    #[error("filesystem operation failed: {0}")]
    Execution(String),

    #[error("rollback failed: {0}")]
    Compensation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
