// Task set construction: one invocation expanded into N Task Records
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::application::constants::INVOCATION_DIR;
use crate::domain::task::{parse_summary_file_name, parse_task_file_name, task_file_name};
use crate::domain::{BuildOptions, RunId, TaskId, TaskRecord};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, TimeProvider};
use crate::transport::{Location, Transport};

const ANALYSIS_LEVEL: &str = "analysis_level";
const PARTICIPANT_LABEL: &str = "participant_label";
const SESSION_LABEL: &str = "session_label";
const DERIVED_PREFIX: &str = "invocation";
/// Transient download/rewrite area inside the run directory
const STAGING_DIR: &str = ".staging";

/// Characters allowed verbatim in derived file names
static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._+-]+").unwrap());

/// A persisted task set
#[derive(Debug, Clone)]
pub struct BuiltTaskSet {
    pub run_id: RunId,
    pub run_dir: PathBuf,
    /// `task-<id>.json` paths, index-aligned with `invocation_paths`
    pub task_paths: Vec<PathBuf>,
    /// Files under `<run_dir>/invocations/`
    pub invocation_paths: Vec<PathBuf>,
}

impl BuiltTaskSet {
    pub fn len(&self) -> usize {
        self.task_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_paths.is_empty()
    }
}

/// One pending Task Record before ids are assigned
#[derive(Debug, Clone)]
struct Draft {
    /// File name of the invocation inside `invocations/`
    invocation_name: String,
    doc: Value,
    /// Copy already on disk; `None` for derived invocations still to be written
    staged: Option<PathBuf>,
    data_locations: Vec<String>,
}

/// Expands descriptor + invocation + data location into Task Records
pub struct TaskSetBuilder {
    transport: Transport,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
}

impl TaskSetBuilder {
    pub fn new(
        transport: Transport,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            transport,
            time_provider,
            id_provider,
        }
    }

    /// Create a fresh run directory under `prov_root` and persist the task set.
    ///
    /// Nothing is left behind on failure.
    ///
    /// # Errors
    /// - AppError::Usage for invalid options
    /// - AppError::Consolidation for malformed JSON or an ambiguous BIDS combination
    /// - AppError::Transport if the descriptor or invocation cannot be read
    pub async fn build(
        &self,
        tool: &str,
        invocation: &str,
        prov_root: &Path,
        data_loc: &str,
        options: &BuildOptions,
    ) -> Result<BuiltTaskSet> {
        options.validate()?;

        let run_id = RunId::generate(
            self.time_provider.now_millis(),
            &self.id_provider.generate_id(),
        )?;
        let run_dir = prov_root.join(run_id.as_str());
        if run_dir.exists() {
            return Err(AppError::Conflict(format!(
                "run directory {} already exists",
                run_dir.display()
            )));
        }
        std::fs::create_dir_all(&run_dir)?;
        let run_dir = std::fs::canonicalize(&run_dir)?;

        match self
            .populate(&run_id, &run_dir, tool, invocation, data_loc, options)
            .await
        {
            Ok(built) => {
                info!(
                    run_id = %run_id,
                    run_dir = %run_dir.display(),
                    tasks = built.len(),
                    "Task set created"
                );
                Ok(built)
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Task set construction failed, removing run");
                if let Err(cleanup) = self.transport.remove(&run_dir).await {
                    warn!(run_dir = %run_dir.display(), error = %cleanup, "Cleanup failed");
                }
                Err(e)
            }
        }
    }

    async fn populate(
        &self,
        run_id: &RunId,
        run_dir: &Path,
        tool: &str,
        invocation: &str,
        data_loc: &str,
        options: &BuildOptions,
    ) -> Result<BuiltTaskSet> {
        let descriptor = self.stage_descriptor(tool, run_dir).await?;
        let invocation_loc = Location::parse(invocation)?;
        let invocation_dir = run_dir.join(INVOCATION_DIR);

        let drafts = if self.transport.is_directory(&invocation_loc).await? {
            let staged = self
                .stage_invocation_dir(&invocation_loc, run_dir, &invocation_dir)
                .await?;
            if options.bids || !options.sweep.is_empty() {
                debug!(run_id = %run_id, "Invocation directory given, fan-out options ignored");
            }
            staged
                .into_iter()
                .map(|(path, doc)| {
                    Ok(Draft {
                        invocation_name: file_name(&path)?,
                        doc,
                        staged: Some(path),
                        data_locations: vec![data_loc.to_string()],
                    })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            let (path, doc) = self
                .stage_invocation_file(&invocation_loc, &invocation_dir)
                .await?;
            let base = Draft {
                invocation_name: file_name(&path)?,
                doc,
                staged: Some(path),
                data_locations: vec![data_loc.to_string()],
            };
            let mut drafts = if options.bids {
                expand_bids(base, data_loc)?
            } else {
                vec![base]
            };
            for param in &options.sweep {
                drafts = expand_sweep(drafts, param)?;
            }
            drafts
        };
        ensure_distinct_names(&drafts)?;

        let output_location = options
            .output_location
            .clone()
            .unwrap_or_else(|| run_dir.display().to_string());

        let mut task_paths = Vec::with_capacity(drafts.len());
        let mut invocation_paths = Vec::with_capacity(drafts.len());

        for (idx, draft) in drafts.into_iter().enumerate() {
            let id = TaskId::try_from(idx)
                .map_err(|_| AppError::Consolidation("task set too large".into()))?;

            // Derived invocation first, so no record points at a missing file
            let invocation_path = match draft.staged {
                Some(path) => path,
                None => {
                    let path = invocation_dir.join(&draft.invocation_name);
                    let mut bytes = serde_json::to_vec_pretty(&draft.doc)?;
                    bytes.push(b'\n');
                    std::fs::write(&path, bytes)?;
                    path
                }
            };

            let record = TaskRecord::new(
                id,
                descriptor.display().to_string(),
                invocation_path.display().to_string(),
                draft.data_locations,
                output_location.clone(),
            );
            let task_path = run_dir.join(task_file_name(id));
            std::fs::write(&task_path, record.to_json()?)?;
            debug!(run_id = %run_id, task_id = id, invocation = %draft.invocation_name, "Task record written");

            task_paths.push(task_path);
            invocation_paths.push(invocation_path);
        }

        Ok(BuiltTaskSet {
            run_id: run_id.clone(),
            run_dir: run_dir.to_path_buf(),
            task_paths,
            invocation_paths,
        })
    }

    /// Descriptor copied to the top of the run directory
    async fn stage_descriptor(&self, tool: &str, run_dir: &Path) -> Result<PathBuf> {
        let tool_loc = Location::parse(tool)?;
        let name = tool_loc
            .file_name()
            .ok_or_else(|| AppError::Usage(format!("descriptor {tool} has no file name")))?;
        if parse_task_file_name(&name).is_some()
            || parse_summary_file_name(&name).is_some()
            || name == INVOCATION_DIR
            || name == STAGING_DIR
        {
            return Err(AppError::Consolidation(format!(
                "descriptor name '{name}' is reserved inside a run directory"
            )));
        }

        let staged = first_staged(self.transport.get(&tool_loc, run_dir).await?, &tool_loc)?;
        parse_json(&staged)?;
        Ok(staged)
    }

    async fn stage_invocation_file(
        &self,
        src: &Location,
        invocation_dir: &Path,
    ) -> Result<(PathBuf, Value)> {
        let staged = first_staged(self.transport.get(src, invocation_dir).await?, src)?;
        let doc = parse_json(&staged)?;
        Ok((staged, doc))
    }

    /// Every file of the directory, sorted by name, staged flat into `invocation_dir`
    async fn stage_invocation_dir(
        &self,
        src: &Location,
        run_dir: &Path,
        invocation_dir: &Path,
    ) -> Result<Vec<(PathBuf, Value)>> {
        let mut files: Vec<PathBuf> = match src {
            Location::Local(dir) => std::fs::read_dir(dir)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect(),
            Location::ObjectStore { .. } => {
                let fetched = self.transport.get(src, &run_dir.join(STAGING_DIR)).await?;
                fetched.into_iter().filter(|p| p.is_file()).collect()
            }
        };
        files.sort();
        if files.is_empty() {
            return Err(AppError::Consolidation(format!(
                "invocation directory {src} contains no files"
            )));
        }

        let target = Location::local(invocation_dir);
        let mut staged = Vec::with_capacity(files.len());
        for file in &files {
            let doc = parse_json(file)?;
            let copied = first_staged(
                self.transport
                    .put(file, &target)
                    .await?
                    .into_iter()
                    .filter_map(|loc| loc.as_local().map(Path::to_path_buf))
                    .collect(),
                &target,
            )?;
            staged.push((copied, doc));
        }

        if src.is_remote() {
            self.transport.remove(&run_dir.join(STAGING_DIR)).await?;
        }
        Ok(staged)
    }

    /// Upload a built run to `<remote_root>/<run_id>/`, pointing each Task
    /// Record's `tool`, `invocation` (and a default `taskloc`) at the
    /// uploaded copies. Returns the remote Task Record locations in id order.
    pub async fn stage_remote(
        &self,
        built: &BuiltTaskSet,
        remote_root: &Location,
    ) -> Result<Vec<Location>> {
        let remote_run = remote_root.join(built.run_id.as_str());
        let rewrite_dir = built.run_dir.join(STAGING_DIR);

        let uploaded = self.upload_run(built, &remote_run, &rewrite_dir).await;
        if let Err(e) = self.transport.remove(&rewrite_dir).await {
            warn!(dir = %rewrite_dir.display(), error = %e, "Staging cleanup failed");
        }
        let remote_records = uploaded?;

        info!(
            run_id = %built.run_id,
            remote = %remote_run,
            tasks = remote_records.len(),
            "Run staged to remote storage"
        );
        Ok(remote_records)
    }

    async fn upload_run(
        &self,
        built: &BuiltTaskSet,
        remote_run: &Location,
        rewrite_dir: &Path,
    ) -> Result<Vec<Location>> {
        let local_run = built.run_dir.display().to_string();

        // Descriptor, invocations and anything else except the records
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&built.run_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| !built.task_paths.contains(p) && !p.ends_with(STAGING_DIR))
            .collect();
        entries.sort();
        for entry in &entries {
            self.transport.put(entry, remote_run).await?;
        }

        std::fs::create_dir_all(rewrite_dir)?;
        let mut remote_records = Vec::with_capacity(built.task_paths.len());
        for task_path in &built.task_paths {
            let name = file_name(task_path)?;
            let mut record = TaskRecord::parse(&name, &std::fs::read(task_path)?)?;

            record.tool = remote_counterpart(remote_run, &built.run_dir, &record.tool)?;
            record.invocation = remote_counterpart(remote_run, &built.run_dir, &record.invocation)?;
            if record.output_location == local_run {
                record.output_location = remote_run.to_string();
            }

            let rewritten = rewrite_dir.join(&name);
            std::fs::write(&rewritten, record.to_json()?)?;
            remote_records.extend(self.transport.put(&rewritten, remote_run).await?);
        }
        Ok(remote_records)
    }
}

/// Two drafts sharing an invocation file would run with the same parameters
fn ensure_distinct_names(drafts: &[Draft]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for draft in drafts {
        if !seen.insert(draft.invocation_name.as_str()) {
            return Err(AppError::Consolidation(format!(
                "two tasks would share the invocation file '{}'",
                draft.invocation_name
            )));
        }
    }
    Ok(())
}

fn first_staged(items: Vec<PathBuf>, src: &Location) -> Result<PathBuf> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| AppError::NotFound(src.to_string()))
}

/// Same path relative to the run directory, under `remote_run`
fn remote_counterpart(remote_run: &Location, run_dir: &Path, local: &str) -> Result<String> {
    let rel = Path::new(local)
        .strip_prefix(run_dir)
        .map_err(|_| AppError::Internal(format!("{local} is outside {}", run_dir.display())))?;
    Ok(remote_run.join(&rel.to_string_lossy()).to_string())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::Internal(format!("path without file name: {}", path.display())))
}

fn parse_json(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::Consolidation(format!("{} is not valid JSON: {e}", path.display())))
}

/// Label field as a list; absent, null and empty lists all mean "unspecified"
fn labels(doc: &Value, field: &str) -> Result<Vec<String>> {
    let one = |v: &Value| match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(AppError::Consolidation(format!(
            "{field} entries must be strings, found {other}"
        ))),
    };
    match doc.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(one).collect(),
        Some(v) => Ok(vec![one(v)?]),
    }
}

fn expand_bids(base: Draft, data_loc: &str) -> Result<Vec<Draft>> {
    if base.doc.get(ANALYSIS_LEVEL).and_then(Value::as_str) == Some("group") {
        return Ok(vec![base]);
    }

    let participants = labels(&base.doc, PARTICIPANT_LABEL)?;
    let sessions = labels(&base.doc, SESSION_LABEL)?;

    if participants.is_empty() && !sessions.is_empty() {
        return Err(AppError::Consolidation(format!(
            "{} sets {SESSION_LABEL} without {PARTICIPANT_LABEL}; sessions cannot be scoped",
            base.invocation_name
        )));
    }
    if participants.is_empty() {
        return Ok(vec![base]);
    }

    let root = data_loc.trim_end_matches('/');
    let mut drafts = Vec::new();
    for participant in &participants {
        let mut doc = base.doc.clone();
        doc[PARTICIPANT_LABEL] = Value::from(vec![participant.clone()]);

        if sessions.is_empty() {
            drafts.push(Draft {
                invocation_name: format!("{DERIVED_PREFIX}_sub-{}.json", safe(participant)),
                doc,
                staged: None,
                data_locations: vec![format!("{root}/sub-{participant}")],
            });
            continue;
        }

        for session in &sessions {
            let mut doc = doc.clone();
            doc[SESSION_LABEL] = Value::from(vec![session.clone()]);
            drafts.push(Draft {
                invocation_name: format!(
                    "{DERIVED_PREFIX}_sub-{}_ses-{}.json",
                    safe(participant),
                    safe(session)
                ),
                doc,
                staged: None,
                data_locations: vec![format!("{root}/sub-{participant}/ses-{session}")],
            });
        }
    }
    Ok(drafts)
}

fn expand_sweep(drafts: Vec<Draft>, param: &str) -> Result<Vec<Draft>> {
    let mut expanded = Vec::new();
    for draft in drafts {
        let values = match draft.doc.get(param) {
            Some(Value::Array(values)) if !values.is_empty() => values.clone(),
            Some(Value::Array(_)) => {
                return Err(AppError::Consolidation(format!(
                    "sweep parameter '{param}' is an empty list in {}",
                    draft.invocation_name
                )))
            }
            Some(_) => {
                return Err(AppError::Consolidation(format!(
                    "sweep parameter '{param}' must be a list in {}",
                    draft.invocation_name
                )))
            }
            None => {
                return Err(AppError::Consolidation(format!(
                    "sweep parameter '{param}' not found in {}",
                    draft.invocation_name
                )))
            }
        };

        let stem = draft
            .invocation_name
            .strip_suffix(".json")
            .unwrap_or(&draft.invocation_name);
        let mut value_labels: Vec<String> = values
            .iter()
            .map(|value| match value {
                Value::String(s) => safe(s),
                other => safe(&other.to_string()),
            })
            .collect();
        // Values that read the same once sanitised fall back to their position
        if value_labels.iter().collect::<BTreeSet<_>>().len() != value_labels.len() {
            value_labels = (0..values.len()).map(|i| i.to_string()).collect();
        }
        for (value, label) in values.into_iter().zip(value_labels) {
            let mut doc = draft.doc.clone();
            doc[param] = value;
            expanded.push(Draft {
                invocation_name: format!("{stem}_sweep-{}-{label}.json", safe(param)),
                doc,
                staged: None,
                data_locations: draft.data_locations.clone(),
            });
        }
    }
    Ok(expanded)
}

fn safe(raw: &str) -> String {
    UNSAFE_NAME_CHARS.replace_all(raw, "_").into_owned()
}
