// Remote Submission Port
// Cluster schedulers and cloud batch services

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SubmissionError {
    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Backend setup failed: {0}")]
    Setup(String),

    #[error("IO error: {0}")]
    Io(String),
}

/// Remote submission backend
///
/// `setup` is called once before any submission and must be idempotent;
/// provisioning details belong entirely to the backend.
#[async_trait]
pub trait SubmissionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn setup(&self) -> Result<(), SubmissionError>;

    /// Submit one group of Task Record URIs as a single job, returning its id
    async fn submit(&self, group: &[String]) -> Result<String, SubmissionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Rejects the first `failures` submissions, then accepts
    pub struct MockSubmissionBackend {
        remaining_failures: Mutex<usize>,
        pub submitted: Mutex<Vec<Vec<String>>>,
        pub setups: Mutex<usize>,
        reject_containing: Option<String>,
    }

    impl MockSubmissionBackend {
        pub fn new(failures: usize) -> Self {
            Self {
                remaining_failures: Mutex::new(failures),
                submitted: Mutex::new(Vec::new()),
                setups: Mutex::new(0),
                reject_containing: None,
            }
        }

        /// Always reject groups containing a record whose URI contains `needle`
        pub fn rejecting(needle: impl Into<String>) -> Self {
            Self {
                reject_containing: Some(needle.into()),
                ..Self::new(0)
            }
        }
    }

    #[async_trait]
    impl SubmissionBackend for MockSubmissionBackend {
        fn name(&self) -> &str {
            "mock"
        }

        async fn setup(&self) -> Result<(), SubmissionError> {
            *self.setups.lock().unwrap() += 1;
            Ok(())
        }

        async fn submit(&self, group: &[String]) -> Result<String, SubmissionError> {
            if let Some(needle) = &self.reject_containing {
                if group.iter().any(|r| r.contains(needle.as_str())) {
                    return Err(SubmissionError::Rejected(format!("queue refused {needle}")));
                }
            }
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SubmissionError::Rejected("scheduler busy".into()));
            }
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(group.to_vec());
            Ok(format!("job-{}", submitted.len()))
        }
    }
}
