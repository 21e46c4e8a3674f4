// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Not a task record file name: {0}")]
    InvalidTaskFileName(String),

    #[error("Invalid run id: {0}")]
    InvalidRunId(String),

    #[error("Malformed usage series at line {line}: {reason}")]
    MalformedUsage { line: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;
