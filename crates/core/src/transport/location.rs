// Location - a URI resolved once into local path or object-store address

use std::fmt;
use std::path::{Path, PathBuf};

use crate::port::TransportError;

const OBJECT_STORE_SCHEME: &str = "s3://";

/// Where a file or tree lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Local(PathBuf),
    ObjectStore { bucket: String, key: String },
}

impl Location {
    /// Parse a URI. `s3://bucket/key` addresses the object store; anything
    /// else is a local path (with `~` expanded).
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(TransportError::InvalidUri(uri.to_string()));
        }

        match uri.strip_prefix(OBJECT_STORE_SCHEME) {
            Some(rest) => {
                let rest = rest.trim_matches('/');
                let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
                if bucket.is_empty() {
                    return Err(TransportError::InvalidUri(uri.to_string()));
                }
                Ok(Location::ObjectStore {
                    bucket: bucket.to_string(),
                    key: key.trim_matches('/').to_string(),
                })
            }
            None => Ok(Location::Local(PathBuf::from(
                shellexpand::tilde(uri).into_owned(),
            ))),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Location::Local(path.into())
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::ObjectStore { .. })
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Location::Local(path) => Some(path),
            Location::ObjectStore { .. } => None,
        }
    }

    pub fn join(&self, segment: &str) -> Self {
        let segment = segment.trim_matches('/');
        match self {
            Location::Local(path) => Location::Local(path.join(segment)),
            Location::ObjectStore { bucket, key } => Location::ObjectStore {
                bucket: bucket.clone(),
                key: if key.is_empty() {
                    segment.to_string()
                } else {
                    format!("{key}/{segment}")
                },
            },
        }
    }

    /// Parent location; `None` at a filesystem root or a bucket root
    pub fn parent(&self) -> Option<Self> {
        match self {
            Location::Local(path) => path.parent().map(|p| Location::Local(p.to_path_buf())),
            Location::ObjectStore { bucket, key } => {
                if key.is_empty() {
                    return None;
                }
                let parent = key.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                Some(Location::ObjectStore {
                    bucket: bucket.clone(),
                    key: parent.to_string(),
                })
            }
        }
    }

    pub fn file_name(&self) -> Option<String> {
        match self {
            Location::Local(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            Location::ObjectStore { key, .. } => key
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::ObjectStore { bucket, key } if key.is_empty() => {
                write!(f, "{OBJECT_STORE_SCHEME}{bucket}")
            }
            Location::ObjectStore { bucket, key } => {
                write!(f, "{OBJECT_STORE_SCHEME}{bucket}/{key}")
            }
        }
    }
}
