// Summary Record Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::task::{parse_summary_file_name, TaskId};
use crate::domain::DomainError;

/// Outcome of one execution attempt, 1:1 with a Task Record by id.
///
/// Its presence is the only signal that an attempt completed; the tool's
/// own success or failure lives in `exit_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    #[serde(skip)]
    pub id: TaskId,

    /// Wall-clock seconds between launch and process exit
    #[serde(rename = "duration")]
    pub duration_secs: f64,

    #[serde(rename = "launchtime")]
    pub launch_time: String,

    #[serde(rename = "exitcode")]
    pub exit_code: i32,

    /// Produced artifacts that exist (local paths, or remote URIs after upload)
    pub outputs: Vec<String>,

    /// CPU/RAM time series (CSV)
    pub usage: String,
    pub stdout: String,
    pub stderr: String,
}

impl SummaryRecord {
    pub fn parse(file_name: &str, bytes: &[u8]) -> crate::error::Result<Self> {
        let id = parse_summary_file_name(file_name)
            .ok_or_else(|| DomainError::InvalidTaskFileName(file_name.to_string()))?;
        let mut summary: SummaryRecord = serde_json::from_slice(bytes)?;
        summary.id = id;
        Ok(summary)
    }

    pub fn to_json(&self) -> crate::error::Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wire_names() {
        let json = br#"{
            "duration": 1.5,
            "launchtime": "2024-03-01 10:00:00",
            "exitcode": 2,
            "outputs": ["/out/a.txt"],
            "usage": "/run/task-7-usage.csv",
            "stdout": "/run/task-7-stdout.txt",
            "stderr": "/run/task-7-stderr.txt"
        }"#;

        let summary = SummaryRecord::parse("task-7-summary.json", json).unwrap();
        assert_eq!(summary.id, 7);
        assert_eq!(summary.exit_code, 2);
        assert!(!summary.succeeded());
        assert_eq!(summary.outputs, vec!["/out/a.txt".to_string()]);
    }

    #[test]
    fn test_missing_exitcode_is_rejected() {
        let json = br#"{"duration": 1.0, "launchtime": "x", "outputs": [],
                        "usage": "u", "stdout": "o", "stderr": "e"}"#;
        assert!(SummaryRecord::parse("task-1-summary.json", json).is_err());
    }
}
