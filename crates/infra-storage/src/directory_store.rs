// Directory-backed object store
// Bucket = directory under the root, key = relative path inside it
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use stratus_core::port::{ObjectStore, TransportError};

/// Object store laid out on a (possibly shared or mounted) filesystem
pub struct DirectoryObjectStore {
    root: PathBuf,
}

impl DirectoryObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve bucket/key, refusing anything that escapes the root
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, TransportError> {
        let relative = Path::new(bucket).join(key);
        if bucket.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(TransportError::InvalidUri(format!("s3://{bucket}/{key}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for DirectoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, TransportError> {
        let bucket_dir = self.object_path(bucket, "")?;
        if !bucket_dir.is_dir() {
            return Err(TransportError::NotFound(format!("bucket {bucket}")));
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&bucket_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| TransportError::ObjectStore(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let key = entry
                .path()
                .strip_prefix(&bucket_dir)
                .map_err(|e| TransportError::ObjectStore(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        debug!(bucket, prefix, keys = keys.len(), "Listed objects");
        Ok(keys)
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<(), TransportError> {
        let src = self.object_path(bucket, key)?;
        if !src.is_file() {
            return Err(TransportError::NotFound(format!("s3://{bucket}/{key}")));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::io(parent, e))?;
        }
        tokio::fs::copy(&src, dest)
            .await
            .map_err(|e| TransportError::io(dest, e))?;
        Ok(())
    }

    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<(), TransportError> {
        let dest = self.object_path(bucket, key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::io(parent, e))?;
        }
        tokio::fs::copy(src, &dest)
            .await
            .map_err(|e| TransportError::io(src, e))?;
        Ok(())
    }
}
