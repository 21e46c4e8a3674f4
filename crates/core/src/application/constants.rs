// Engine constants (No magic values)
use std::time::Duration;

/// Resource monitor polling interval (100ms)
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

/// Task Records per remote submission
pub const DEFAULT_GROUP_SIZE: usize = 1;

/// Cumulative wait before a failing submission is given up (60s)
pub const DEFAULT_BACKOFF_BUDGET: Duration = Duration::from_secs(60);

/// One Fibonacci step of backoff (1, 1, 2, 3, 5, ... units)
pub const BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Root of per-task scratch directories and lock files
pub const DEFAULT_SCRATCH_ROOT: &str = "/tmp/stratus";

/// Length of the random suffix in run ids
pub const RUN_SUFFIX_LEN: usize = 8;

/// Container runtime whose clients get their usage from the runtime itself
pub const CONTAINER_RUNTIME: &str = "docker";

/// Sub-directory of run and scratch dirs holding invocation files
pub const INVOCATION_DIR: &str = "invocations";

/// Sub-directory of the scratch dir holding fetched input data
pub const SCRATCH_DATA_DIR: &str = "data";

/// Run report file written into a run directory
pub const REPORT_FILE_NAME: &str = "stratus-summary.json";

/// Bytes per megabyte used when converting memory counters
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
