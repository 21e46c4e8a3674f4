// Run identity

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Identifier of one run directory: `<date>_<time>-<suffix>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Build a run id from a creation timestamp (epoch ms) and a random suffix
    pub fn generate(now_millis: i64, suffix: &str) -> Result<Self> {
        let stamp = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(now_millis)
            .ok_or_else(|| DomainError::InvalidRunId(format!("bad timestamp {now_millis}")))?;
        Self::parse(format!("{}-{}", stamp.format("%Y-%m-%d_%H-%M-%S"), suffix))
    }

    /// Accept an existing id (e.g. from `--run-id`); it must be a single path segment
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty()
            || trimmed.contains('/')
            || trimmed.contains('\\')
            || trimmed == "."
            || trimmed == ".."
        {
            return Err(DomainError::InvalidRunId(raw));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
