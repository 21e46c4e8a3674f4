// Transport - get/put of files and trees across local disk and object store

mod location;

pub use location::Location;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::port::{ObjectStore, TransportError};

/// Uniform file transfer, dispatching on the resolved `Location`.
///
/// Destination conflicts (same file, existing directory) are recovered:
/// a warning is logged and the existing path returned.
#[derive(Clone)]
pub struct Transport {
    store: Option<Arc<dyn ObjectStore>>,
}

impl Transport {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store: Some(store) }
    }

    /// Transport without object-store access; remote locations are rejected
    pub fn local_only() -> Self {
        Self { store: None }
    }

    fn store(&self, loc: &Location) -> Result<&dyn ObjectStore, TransportError> {
        self.store
            .as_deref()
            .ok_or_else(|| TransportError::NoObjectStore(loc.to_string()))
    }

    /// Fetch `src` (file or tree) into `local_dir`, keeping its basename
    pub async fn get(
        &self,
        src: &Location,
        local_dir: &Path,
    ) -> Result<Vec<PathBuf>, TransportError> {
        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|e| TransportError::io(local_dir, e))?;

        match src {
            Location::Local(path) => Ok(vec![copy_local(path, local_dir).await?]),
            Location::ObjectStore { bucket, key } => {
                let store = self.store(src)?;
                let keys: Vec<String> = store
                    .list(bucket, key)
                    .await?
                    .into_iter()
                    .filter(|k| key.is_empty() || k == key || k.starts_with(&format!("{key}/")))
                    .collect();
                if keys.is_empty() {
                    return Err(TransportError::NotFound(src.to_string()));
                }

                // Paths are kept relative to the prefix's parent so the
                // fetched tree keeps its own top-level name.
                let base = key.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                let mut fetched = Vec::with_capacity(keys.len());
                for k in keys {
                    let rel = if base.is_empty() {
                        k.as_str()
                    } else {
                        k.strip_prefix(base).unwrap_or(k.as_str()).trim_start_matches('/')
                    };
                    let dest = local_dir.join(rel);
                    store.download(bucket, &k, &dest).await?;
                    debug!(bucket = %bucket, key = %k, dest = %dest.display(), "Downloaded object");
                    fetched.push(dest);
                }
                fetched.sort();
                info!(src = %src, files = fetched.len(), "Fetched from object store");
                Ok(fetched)
            }
        }
    }

    /// Whether `loc` names a directory (local) or a key prefix (object store).
    ///
    /// An object key that exists exactly is a file, whatever its name looks like.
    pub async fn is_directory(&self, loc: &Location) -> Result<bool, TransportError> {
        match loc {
            Location::Local(path) => Ok(path.is_dir()),
            Location::ObjectStore { bucket, key } => {
                let key = key.trim_end_matches('/');
                if key.is_empty() {
                    return Ok(true);
                }
                let keys = self.store(loc)?.list(bucket, key).await?;
                let nested = format!("{key}/");
                if keys.iter().any(|k| k == key) {
                    Ok(false)
                } else if keys.iter().any(|k| k.starts_with(&nested)) {
                    Ok(true)
                } else {
                    Err(TransportError::NotFound(loc.to_string()))
                }
            }
        }
    }

    /// Store `local` (file or tree) under the directory `dest`
    pub async fn put(
        &self,
        local: &Path,
        dest: &Location,
    ) -> Result<Vec<Location>, TransportError> {
        if !local.exists() {
            return Err(TransportError::NotFound(local.display().to_string()));
        }
        let name = basename(local)?;

        match dest {
            Location::Local(dir) => {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| TransportError::io(dir, e))?;
                Ok(vec![Location::Local(copy_local(local, dir).await?)])
            }
            Location::ObjectStore { bucket, .. } => {
                let store = self.store(dest)?;
                let target = dest.join(&name);

                if local.is_file() {
                    upload_one(store, local, bucket, &target).await?;
                    return Ok(vec![target]);
                }

                let mut uploaded = Vec::new();
                for entry in WalkDir::new(local).sort_by_file_name() {
                    let entry = entry.map_err(|e| walk_error(local, e))?;
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    let rel = entry
                        .path()
                        .strip_prefix(local)
                        .map_err(|e| TransportError::InvalidUri(e.to_string()))?;
                    let object = target.join(&rel.to_string_lossy());
                    upload_one(store, entry.path(), bucket, &object).await?;
                    uploaded.push(object);
                }
                info!(src = %local.display(), dest = %target, files = uploaded.len(), "Uploaded tree");
                Ok(uploaded)
            }
        }
    }

    /// Delete a local file or tree; missing paths are ignored
    pub async fn remove(&self, path: &Path) -> Result<(), TransportError> {
        let result = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "Removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TransportError::io(path, e)),
        }
    }
}

async fn upload_one(
    store: &dyn ObjectStore,
    src: &Path,
    bucket: &str,
    target: &Location,
) -> Result<(), TransportError> {
    let Location::ObjectStore { key, .. } = target else {
        return Err(TransportError::InvalidUri(target.to_string()));
    };
    store.upload(src, bucket, key).await?;
    debug!(src = %src.display(), dest = %target, "Uploaded object");
    Ok(())
}

fn walk_error(root: &Path, e: walkdir::Error) -> TransportError {
    let source = e
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
    TransportError::io(root, source)
}

fn basename(path: &Path) -> Result<String, TransportError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransportError::InvalidUri(path.display().to_string()))
}

/// Copy a local file or tree into `dir`, returning the destination path
async fn copy_local(src: &Path, dir: &Path) -> Result<PathBuf, TransportError> {
    let meta = tokio::fs::metadata(src)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TransportError::NotFound(src.display().to_string()),
            _ => TransportError::io(src, e),
        })?;
    let dest = dir.join(basename(src)?);

    if meta.is_file() {
        if is_same_file(src, &dest).await {
            warn!(path = %dest.display(), "Source and destination are the same file");
            return Ok(dest);
        }
        tokio::fs::copy(src, &dest)
            .await
            .map_err(|e| TransportError::io(&dest, e))?;
        return Ok(dest);
    }

    if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        warn!(path = %dest.display(), "Destination directory already exists");
        return Ok(dest);
    }

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| TransportError::InvalidUri(e.to_string()))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target)
                .await
                .map_err(|e| TransportError::io(&target, e))?;
        } else {
            tokio::fs::copy(entry.path(), &target)
                .await
                .map_err(|e| TransportError::io(&target, e))?;
        }
    }
    Ok(dest)
}

async fn is_same_file(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
