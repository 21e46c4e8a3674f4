// Run report: read-only consolidation of a run directory
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::task::{parse_task_file_name, summary_file_name, usage_file_name};
use crate::domain::{SummaryRecord, TaskId, TaskRecord, UsageSeries};
use crate::error::Result;

/// One Task Record and, if it completed, its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub tool: String,
    pub invocation: String,
    pub launch_time: Option<String>,
    /// `None` while the task is incomplete
    pub exit_code: Option<i32>,
    pub duration_secs: Option<f64>,
    pub max_cpu: Option<f64>,
    pub max_ram: Option<f64>,
    pub time_series: Vec<f64>,
    pub cpu_series: Vec<f64>,
    pub ram_series: Vec<f64>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl TaskReport {
    pub fn is_complete(&self) -> bool {
        self.exit_code.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    /// Build the report from a local run directory without modifying it
    pub fn collect(run_dir: &Path) -> Result<Self> {
        let mut ids: Vec<(TaskId, PathBuf)> = std::fs::read_dir(run_dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                parse_task_file_name(&name).map(|id| (id, entry.path()))
            })
            .collect();
        ids.sort_by_key(|(id, _)| *id);

        let mut tool_names: HashMap<String, String> = HashMap::new();
        let mut tasks = Vec::with_capacity(ids.len());

        for (id, path) in ids {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let record = TaskRecord::parse(&name, &std::fs::read(&path)?)?;
            let tool = tool_names
                .entry(record.tool.clone())
                .or_insert_with(|| tool_name(&record.tool))
                .clone();

            let summary_path = run_dir.join(summary_file_name(id));
            let summary = if summary_path.is_file() {
                Some(SummaryRecord::parse(
                    &summary_file_name(id),
                    &std::fs::read(&summary_path)?,
                )?)
            } else {
                None
            };

            let usage = read_usage(run_dir, id, summary.as_ref());
            let samples = usage.samples();

            tasks.push(TaskReport {
                id,
                tool,
                invocation: record.invocation.clone(),
                launch_time: summary.as_ref().map(|s| s.launch_time.clone()),
                exit_code: summary.as_ref().map(|s| s.exit_code),
                duration_secs: summary.as_ref().map(|s| s.duration_secs),
                max_cpu: usage.max_cpu(),
                max_ram: usage.max_ram(),
                time_series: samples.iter().map(|s| s.time_secs).collect(),
                cpu_series: samples.iter().map(|s| s.cpu_percent).collect(),
                ram_series: samples.iter().map(|s| s.ram_mb).collect(),
                stdout: summary.as_ref().and_then(|s| read_text(&s.stdout)),
                stderr: summary.as_ref().and_then(|s| read_text(&s.stderr)),
            });
        }

        let report = Self {
            run_dir: run_dir.to_path_buf(),
            tasks,
        };
        info!(
            run_dir = %run_dir.display(),
            tasks = report.tasks.len(),
            complete = report.tasks.iter().filter(|t| t.is_complete()).count(),
            "Run report collected"
        );
        Ok(report)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Descriptor `name`, falling back to the descriptor file stem
fn tool_name(tool: &str) -> String {
    let from_descriptor = std::fs::read(tool)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok())
        .and_then(|doc| doc.get("name").and_then(|n| n.as_str()).map(str::to_string));

    from_descriptor.unwrap_or_else(|| {
        Path::new(tool)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| tool.to_string())
    })
}

fn read_usage(run_dir: &Path, id: TaskId, summary: Option<&SummaryRecord>) -> UsageSeries {
    let candidates = summary
        .map(|s| PathBuf::from(&s.usage))
        .into_iter()
        .chain(std::iter::once(run_dir.join(usage_file_name(id))));

    for path in candidates {
        if let Some(text) = read_text(&path.display().to_string()) {
            match UsageSeries::parse_csv(&text) {
                Ok(series) => return series,
                Err(e) => debug!(task_id = id, error = %e, "Unreadable usage series"),
            }
        }
    }
    UsageSeries::new()
}

fn read_text(path: &str) -> Option<String> {
    std::fs::read_to_string(path).ok()
}
