// Per-task lock: one in-flight attempt per (run, task id) on this host
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::task::lock_file_name;
use crate::domain::TaskId;
use crate::error::{AppError, Result};
use crate::port::{ProbeError, ProcessTreeProbe};

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    acquired_at: String,
}

/// Held for the duration of one execution attempt; removed on drop
#[derive(Debug)]
pub struct TaskLock {
    path: PathBuf,
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

impl TaskLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take `<run_scratch>/task-<id>.lock`.
    ///
    /// A lock left by a process that no longer exists is replaced.
    ///
    /// # Errors
    /// - AppError::Conflict if a live process holds the lock
    pub async fn acquire(
        run_scratch: &Path,
        id: TaskId,
        liveness: &dyn ProcessTreeProbe,
    ) -> Result<Self> {
        std::fs::create_dir_all(run_scratch)?;
        let path = run_scratch.join(lock_file_name(id));

        if let Some(lock) = try_create(&path)? {
            return Ok(lock);
        }

        let holder = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockPayload>(&bytes).ok());

        let stale = match &holder {
            Some(payload) => matches!(
                liveness.tree(payload.pid).await,
                Err(ProbeError::Vanished(_))
            ),
            // Unreadable payload: the holder died while writing it
            None => true,
        };

        if !stale {
            let pid = holder.map(|p| p.pid).unwrap_or_default();
            return Err(AppError::Conflict(format!(
                "task {id} is already running (pid {pid}, lock {})",
                path.display()
            )));
        }

        warn!(task_id = id, lock = %path.display(), "Replacing stale task lock");
        let _ = std::fs::remove_file(&path);
        try_create(&path)?.ok_or_else(|| {
            AppError::Conflict(format!("task {id} lock taken concurrently ({})", path.display()))
        })
    }
}

fn try_create(path: &Path) -> Result<Option<TaskLock>> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(mut file) => {
            let written =
                write_payload(&mut file).and_then(|()| file.sync_all().map_err(AppError::from));
            if let Err(e) = written {
                // A lock without its holder's pid would be taken for stale
                let _ = std::fs::remove_file(path);
                return Err(e);
            }
            debug!(lock = %path.display(), "Task lock acquired");
            Ok(Some(TaskLock {
                path: path.to_path_buf(),
            }))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_payload(out: &mut impl Write) -> Result<()> {
    let payload = LockPayload {
        pid: std::process::id(),
        acquired_at: chrono::Utc::now().to_rfc3339(),
    };
    out.write_all(&serde_json::to_vec(&payload)?)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::process_probe::mocks::{stat, ScriptedTreeProbe};

    #[tokio::test]
    async fn test_second_attempt_conflicts_while_holder_alive() {
        let tmp = tempfile::tempdir().unwrap();
        let alive = ScriptedTreeProbe::new(vec![Ok(vec![stat(1, None, "stratus", 0.0, 0.0)])]);

        let held = TaskLock::acquire(tmp.path(), 3, &alive).await.unwrap();
        let err = TaskLock::acquire(tmp.path(), 3, &alive).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Different id is independent
        TaskLock::acquire(tmp.path(), 4, &alive).await.unwrap();

        drop(held);
        assert!(!tmp.path().join("task-3.lock").exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("task-0.lock"),
            br#"{"pid": 999999, "acquired_at": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        // Drained probe reports every pid as vanished
        let dead = ScriptedTreeProbe::new(vec![]);
        let lock = TaskLock::acquire(tmp.path(), 0, &dead).await.unwrap();

        let payload: LockPayload =
            serde_json::from_slice(&std::fs::read(lock.path()).unwrap()).unwrap();
        assert_eq!(payload.pid, std::process::id());
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left on device"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_payload_write_failure_is_reported() {
        let err = write_payload(&mut FullDisk).unwrap_err();
        assert!(matches!(err, AppError::Io(_)));

        let mut buf = Vec::new();
        write_payload(&mut buf).unwrap();
        let payload: LockPayload = serde_json::from_slice(&buf).unwrap();
        assert_eq!(payload.pid, std::process::id());
    }
}
