//! Logging setup
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default: all stratus crates at info)
//! - `STRATUS_LOG_FORMAT`: `json` for structured output, anything else for pretty
//! - `STRATUS_LOG_DIR`: also write a daily-rolling `stratus.log` there

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str =
    "stratus=info,stratus_cli=info,stratus_core=info,stratus_infra_system=info,stratus_infra_storage=info";
const LOG_FILE_PREFIX: &str = "stratus.log";

/// Install the global subscriber writing to stderr.
/// Keep the returned guard alive until exit.
pub fn init(format: &str, log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let (file_writer, guard) = match log_dir {
        Some(dir) => {
            let dir = shellexpand::tilde(dir).into_owned();
            std::fs::create_dir_all(&dir).with_context(|| format!("creating log dir {dir}"))?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        "json" => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w)))
            .try_init(),
        _ => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .with(file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w)))
            .try_init(),
    }
    .context("installing tracing subscriber")?;

    Ok(guard)
}
