// Application Layer - Task lifecycle services

pub mod backoff;
pub mod constants;
pub mod dispatch;
pub mod lock;
pub mod monitor;
pub mod report;
pub mod rerun;
pub mod task_executor;
pub mod task_set;

// Re-exports
pub use backoff::{BackoffConfig, BackoffOutcome, RetryScheduler};
pub use dispatch::{DispatchConfig, LocalDispatcher, SubmissionDispatcher, SubmissionReport, TaskOutcome};
pub use monitor::{MonitorConfig, ResourceMonitor};
pub use report::{RunReport, TaskReport};
pub use rerun::{RerunReconciler, RunState};
pub use task_executor::TaskExecutor;
pub use task_set::{BuiltTaskSet, TaskSetBuilder};
