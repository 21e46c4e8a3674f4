// Stratus Infrastructure - System Adapters
// Implements: ProcessTreeProbe, ChildResourceProbe, ToolExecutor, SubmissionBackend

pub mod bosh_executor;
pub mod container_probe;
pub mod slurm_backend;
pub mod sysinfo_probe;

pub use bosh_executor::BoshExecutor;
pub use container_probe::ContainerStatsProbe;
pub use slurm_backend::SlurmBackend;
pub use sysinfo_probe::SysinfoProcessProbe;
