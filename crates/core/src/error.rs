// Central Error Type for the Engine

use thiserror::Error;

/// Engine-level error type
///
/// Only fatal conditions surface here. A tool exiting nonzero is recorded in
/// the summary record, and transfer conflicts / vanished processes are
/// recovered where they happen.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// Task set could not be consolidated (ambiguous BIDS fields, bad JSON, ...)
    #[error("Consolidation error: {0}")]
    Consolidation(String),

    /// Caller error, rejected before touching the filesystem
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::port::TransportError),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::ExecutionError),

    #[error("Submission error: {0}")]
    Submission(#[from] crate::port::SubmissionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
