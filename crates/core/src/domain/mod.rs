// Domain Layer - Records, samples and run naming

pub mod error;
pub mod options;
pub mod run;
pub mod summary;
pub mod task;
pub mod usage;

// Re-exports
pub use error::DomainError;
pub use options::{BuildOptions, ExecutionContext, RerunMode};
pub use run::RunId;
pub use summary::SummaryRecord;
pub use task::{TaskId, TaskRecord};
pub use usage::{ResourceSample, UsageSeries};
