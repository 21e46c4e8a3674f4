// Task Record Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::DomainError;

/// Sequence index of a task inside one run (0..N-1)
pub type TaskId = u32;

const TASK_PREFIX: &str = "task-";
const JSON_EXT: &str = ".json";

/// `task-<id>.json`
pub fn task_file_name(id: TaskId) -> String {
    format!("{TASK_PREFIX}{id}{JSON_EXT}")
}

/// `task-<id>-summary.json`
pub fn summary_file_name(id: TaskId) -> String {
    format!("{TASK_PREFIX}{id}-summary{JSON_EXT}")
}

pub fn stdout_file_name(id: TaskId) -> String {
    format!("{TASK_PREFIX}{id}-stdout.txt")
}

pub fn stderr_file_name(id: TaskId) -> String {
    format!("{TASK_PREFIX}{id}-stderr.txt")
}

pub fn usage_file_name(id: TaskId) -> String {
    format!("{TASK_PREFIX}{id}-usage.csv")
}

pub fn lock_file_name(id: TaskId) -> String {
    format!("{TASK_PREFIX}{id}.lock")
}

/// Extract the id from a Task Record file name. Summary files do not match.
pub fn parse_task_file_name(name: &str) -> Option<TaskId> {
    name.strip_prefix(TASK_PREFIX)?
        .strip_suffix(JSON_EXT)?
        .parse()
        .ok()
}

/// Extract the id from a Summary Record file name.
pub fn parse_summary_file_name(name: &str) -> Option<TaskId> {
    name.strip_prefix(TASK_PREFIX)?
        .strip_suffix(JSON_EXT)?
        .strip_suffix("-summary")?
        .parse()
        .ok()
}

/// One concrete, executable unit of work.
///
/// Immutable once written. The id is not part of the JSON document; it is
/// carried by the file name (`task-<id>.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(skip)]
    pub id: TaskId,

    /// Where produced outputs must land
    #[serde(rename = "taskloc")]
    pub output_location: String,

    /// Input data URIs, already scoped by any fan-out rule
    #[serde(rename = "dataloc")]
    pub data_locations: Vec<String>,

    pub invocation: String,
    pub tool: String,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        tool: impl Into<String>,
        invocation: impl Into<String>,
        data_locations: Vec<String>,
        output_location: impl Into<String>,
    ) -> Self {
        Self {
            id,
            output_location: output_location.into(),
            data_locations,
            invocation: invocation.into(),
            tool: tool.into(),
        }
    }

    /// Parse a record from its file name and JSON contents
    pub fn parse(file_name: &str, bytes: &[u8]) -> crate::error::Result<Self> {
        let id = parse_task_file_name(file_name)
            .ok_or_else(|| DomainError::InvalidTaskFileName(file_name.to_string()))?;
        let mut record: TaskRecord = serde_json::from_slice(bytes)?;
        record.id = id;
        Ok(record)
    }

    pub fn to_json(&self) -> crate::error::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn file_name(&self) -> String {
        task_file_name(self.id)
    }
}
