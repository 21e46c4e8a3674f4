// Rerun reconciliation over a prior run's records
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::domain::task::{parse_summary_file_name, parse_task_file_name, task_file_name};
use crate::domain::{RerunMode, RunId, SummaryRecord, TaskId};
use crate::error::{AppError, Result};

/// Completion state of every Task Record in a run directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    pub all: BTreeSet<TaskId>,
    /// Ids with a Summary Record
    pub complete: BTreeSet<TaskId>,
    /// Complete ids whose tool exited nonzero
    pub failed: BTreeSet<TaskId>,
}

impl RunState {
    pub fn incomplete(&self) -> BTreeSet<TaskId> {
        self.all.difference(&self.complete).copied().collect()
    }

    pub fn resolve(&self, mode: &RerunMode) -> BTreeSet<TaskId> {
        match mode {
            RerunMode::All => self.all.clone(),
            RerunMode::Incomplete => self.incomplete(),
            RerunMode::Failed => self.failed.clone(),
            RerunMode::Select(ids) => ids.iter().filter(|id| self.all.contains(*id)).copied().collect(),
        }
    }
}

/// Selects Task Records of a prior run for re-execution
pub struct RerunReconciler;

impl RerunReconciler {
    /// Scan `run_dir` for Task and Summary Records
    pub fn reconcile(run_dir: &Path) -> Result<RunState> {
        let mut state = RunState::default();
        let mut summaries = Vec::new();

        for entry in std::fs::read_dir(run_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = parse_task_file_name(&name) {
                state.all.insert(id);
            } else if let Some(id) = parse_summary_file_name(&name) {
                summaries.push((id, name, entry.path()));
            }
        }

        for (id, name, path) in summaries {
            if !state.all.contains(&id) {
                warn!(task_id = id, run_dir = %run_dir.display(), "Summary without task record ignored");
                continue;
            }
            state.complete.insert(id);

            let parsed = std::fs::read(&path)
                .map_err(AppError::from)
                .and_then(|bytes| SummaryRecord::parse(&name, &bytes));
            match parsed {
                Ok(summary) if summary.succeeded() => {}
                Ok(_) => {
                    state.failed.insert(id);
                }
                Err(e) => {
                    warn!(task_id = id, error = %e, "Unreadable summary record, counting as failed");
                    state.failed.insert(id);
                }
            }
        }

        Ok(state)
    }

    /// Task Record paths of `prov_root/run_id` chosen by `mode`, sorted by id.
    ///
    /// # Errors
    /// - AppError::Usage for `select` without ids (checked before any scan)
    /// - AppError::NotFound if the run directory does not exist
    pub fn select(prov_root: &Path, run_id: &str, mode: &RerunMode) -> Result<Vec<PathBuf>> {
        mode.validate()?;
        let run_id = RunId::parse(run_id).map_err(|e| AppError::Usage(e.to_string()))?;

        let run_dir = prov_root.join(run_id.as_str());
        if !run_dir.is_dir() {
            return Err(AppError::NotFound(format!(
                "run directory {}",
                run_dir.display()
            )));
        }

        let state = Self::reconcile(&run_dir)?;
        let selected: Vec<PathBuf> = state
            .resolve(mode)
            .into_iter()
            .map(|id| run_dir.join(task_file_name(id)))
            .collect();

        info!(
            run_id = %run_id,
            mode = %mode,
            total = state.all.len(),
            complete = state.complete.len(),
            failed = state.failed.len(),
            selected = selected.len(),
            "Run reconciled"
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_summary(dir: &Path, id: TaskId, exit: i32) {
        let json = format!(
            r#"{{"duration": 1.0, "launchtime": "t", "exitcode": {exit}, "outputs": [],
                "usage": "u", "stdout": "o", "stderr": "e"}}"#
        );
        std::fs::write(dir.join(format!("task-{id}-summary.json")), json).unwrap();
    }

    fn run_with(ids: &[TaskId]) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        let run = tmp.path().join("run-1");
        std::fs::create_dir_all(&run).unwrap();
        for id in ids {
            std::fs::write(run.join(task_file_name(*id)), "{}").unwrap();
        }
        tmp
    }

    #[test]
    fn test_partition_invariants() {
        let tmp = run_with(&[0, 1, 2, 3]);
        let run = tmp.path().join("run-1");
        write_summary(&run, 1, 2);
        write_summary(&run, 3, 0);
        std::fs::write(run.join("task-0-stdout.txt"), "noise").unwrap();

        let state = RerunReconciler::reconcile(&run).unwrap();
        let incomplete = state.incomplete();

        assert!(incomplete.is_disjoint(&state.complete));
        let union: BTreeSet<_> = incomplete.union(&state.complete).copied().collect();
        assert_eq!(union, state.all);
        assert!(state.failed.is_subset(&state.complete));
        assert_eq!(state.failed, BTreeSet::from([1]));
    }

    #[test]
    fn test_select_filters_unknown_ids() {
        let tmp = run_with(&[0, 1, 2]);
        let paths =
            RerunReconciler::select(tmp.path(), "run-1", &RerunMode::Select(vec![2, 9])).unwrap();
        assert_eq!(paths, vec![tmp.path().join("run-1/task-2.json")]);
    }

    #[test]
    fn test_select_without_ids_rejected_before_scan() {
        // The run does not exist; the usage error must win
        let tmp = tempfile::tempdir().unwrap();
        let err = RerunReconciler::select(tmp.path(), "missing", &RerunMode::Select(vec![]))
            .unwrap_err();
        assert!(matches!(err, AppError::Usage(_)));
    }

    #[test]
    fn test_missing_run_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = RerunReconciler::select(tmp.path(), "missing", &RerunMode::All).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_corrupt_summary_counts_as_failed() {
        let tmp = run_with(&[0]);
        let run = tmp.path().join("run-1");
        std::fs::write(run.join("task-0-summary.json"), "{").unwrap();

        let state = RerunReconciler::reconcile(&run).unwrap();
        assert_eq!(state.failed, BTreeSet::from([0]));
        assert!(state.incomplete().is_empty());
    }
}
