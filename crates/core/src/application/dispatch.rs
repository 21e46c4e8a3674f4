// Dispatchers: local worker pool and remote submission in groups
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::application::backoff::{BackoffOutcome, RetryScheduler};
use crate::application::constants::DEFAULT_GROUP_SIZE;
use crate::application::task_executor::TaskExecutor;
use crate::domain::{ExecutionContext, SummaryRecord};
use crate::error::{AppError, Result};
use crate::port::SubmissionBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Task Records executing at once (local)
    pub parallelism: usize,
    /// Task Records per submitted job (remote)
    pub group_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            group_size: DEFAULT_GROUP_SIZE,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(AppError::Usage("parallelism must be at least 1".into()));
        }
        if self.group_size == 0 {
            return Err(AppError::Usage("group size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Result of one locally dispatched Task Record
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: String,
    pub result: Result<SummaryRecord>,
}

impl TaskOutcome {
    /// Ran to completion and the tool exited zero
    pub fn succeeded(&self) -> bool {
        matches!(&self.result, Ok(summary) if summary.succeeded())
    }
}

/// Runs Task Records on this host with bounded concurrency
pub struct LocalDispatcher {
    executor: Arc<TaskExecutor>,
    parallelism: usize,
}

impl LocalDispatcher {
    pub fn new(executor: Arc<TaskExecutor>, parallelism: usize) -> Self {
        Self {
            executor,
            parallelism: parallelism.max(1),
        }
    }

    /// Execute every record; one failure never stops the others.
    /// Outcomes come back in input order.
    pub async fn run_all(&self, tasks: &[String], ctx: &ExecutionContext) -> Vec<TaskOutcome> {
        info!(tasks = tasks.len(), parallelism = self.parallelism, "Dispatching locally");

        let mut outcomes: Vec<(usize, TaskOutcome)> = stream::iter(tasks.iter().enumerate())
            .map(|(idx, task)| async move {
                let result = self.executor.run(task, ctx).await;
                if let Err(e) = &result {
                    error!(task = %task, error = %e, "Task failed to execute");
                }
                (
                    idx,
                    TaskOutcome {
                        task: task.clone(),
                        result,
                    },
                )
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        outcomes.sort_by_key(|(idx, _)| *idx);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

/// Groups accepted and given up on by a submission backend
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubmissionReport {
    /// (group, job id)
    pub submitted: Vec<(Vec<String>, String)>,
    /// (group, last error)
    pub skipped: Vec<(Vec<String>, String)>,
}

/// Submits Task Records in fixed-size groups with retry
pub struct SubmissionDispatcher {
    backend: Arc<dyn SubmissionBackend>,
    scheduler: RetryScheduler,
    group_size: usize,
}

impl SubmissionDispatcher {
    pub fn new(backend: Arc<dyn SubmissionBackend>, scheduler: RetryScheduler, group_size: usize) -> Self {
        Self {
            backend,
            scheduler,
            group_size: group_size.max(1),
        }
    }

    /// Set the backend up once, then submit every group.
    ///
    /// # Errors
    /// - AppError::Submission if backend setup fails (nothing is submitted)
    pub async fn submit_all(&self, tasks: &[String]) -> Result<SubmissionReport> {
        self.backend.setup().await?;

        let mut report = SubmissionReport::default();
        for (n, group) in tasks.chunks(self.group_size).enumerate() {
            let outcome = self
                .scheduler
                .attempt(|| self.backend.submit(group))
                .await;

            match outcome {
                BackoffOutcome::Success(job_id) => {
                    info!(backend = self.backend.name(), group = n, job_id = %job_id, size = group.len(), "Group submitted");
                    report.submitted.push((group.to_vec(), job_id));
                }
                BackoffOutcome::Exhausted(message) => {
                    warn!(backend = self.backend.name(), group = n, error = %message, "Group skipped after retries");
                    report.skipped.push((group.to_vec(), message));
                }
            }
        }

        info!(
            backend = self.backend.name(),
            submitted = report.submitted.len(),
            skipped = report.skipped.len(),
            "Submission finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::backoff::BackoffConfig;
    use crate::port::submission::mocks::MockSubmissionBackend;
    use std::time::Duration;

    fn tasks(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("/runs/r/task-{i}.json")).collect()
    }

    fn scheduler() -> RetryScheduler {
        RetryScheduler::new(BackoffConfig {
            budget: Duration::from_millis(5),
            unit: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn test_groups_and_transient_failures() {
        let backend = Arc::new(MockSubmissionBackend::new(2));
        let dispatcher = SubmissionDispatcher::new(backend.clone(), scheduler(), 2);

        let report = dispatcher.submit_all(&tasks(5)).await.unwrap();

        assert_eq!(*backend.setups.lock().unwrap(), 1);
        assert_eq!(report.submitted.len(), 3);
        assert!(report.skipped.is_empty());
        assert_eq!(report.submitted[2].0, vec!["/runs/r/task-4.json".to_string()]);
    }

    #[tokio::test]
    async fn test_exhausted_group_does_not_block_others() {
        let backend = Arc::new(MockSubmissionBackend::rejecting("task-1.json"));
        let dispatcher = SubmissionDispatcher::new(backend, scheduler(), 1);

        let report = dispatcher.submit_all(&tasks(3)).await.unwrap();

        assert_eq!(report.submitted.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, vec!["/runs/r/task-1.json".to_string()]);
        assert!(report.skipped[0].1.contains("task-1.json"));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let config = DispatchConfig {
            group_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Usage(_))));
    }
}
