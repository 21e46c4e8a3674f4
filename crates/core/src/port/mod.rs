// Port Layer - Interfaces for external collaborators

pub mod executor;
pub mod id_provider; // For deterministic run ids in tests
pub mod object_store;
pub mod process_probe;
pub mod submission;
pub mod time_provider;

// Re-exports
pub use executor::{ExecutionError, LaunchCommand, LaunchRequest, ToolExecutor};
pub use id_provider::IdProvider;
pub use object_store::{ObjectStore, TransportError};
pub use process_probe::{ChildResourceProbe, ProbeError, ProbeUsage, ProcessStat, ProcessTreeProbe};
pub use submission::{SubmissionBackend, SubmissionError};
pub use time_provider::TimeProvider;
