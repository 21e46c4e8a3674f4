// Object Store Port
// Key/value blob storage addressed as bucket + key

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("No object store configured for {0}")]
    NoObjectStore(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        TransportError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Object store trait
///
/// Implementations:
/// - DirectoryObjectStore: buckets are directories under a root
/// - MockObjectStore: in-process map (tests)
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All keys in `bucket` starting with `prefix`
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, TransportError>;

    /// Download one object to `dest`, creating parent directories
    async fn download(&self, bucket: &str, key: &str, dest: &Path)
        -> Result<(), TransportError>;

    /// Upload one local file as `key`, replacing any existing object
    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<(), TransportError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Keeps objects in memory, keyed by (bucket, key)
    #[derive(Default)]
    pub struct MockObjectStore {
        objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    }

    impl MockObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.to_string(), key.to_string()), data.into());
        }

        pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
        }

        pub fn keys(&self, bucket: &str) -> Vec<String> {
            self.objects
                .lock()
                .unwrap()
                .keys()
                .filter(|(b, _)| b == bucket)
                .map(|(_, k)| k.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ObjectStore for MockObjectStore {
        async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, TransportError> {
            Ok(self
                .keys(bucket)
                .into_iter()
                .filter(|k| k.starts_with(prefix))
                .collect())
        }

        async fn download(
            &self,
            bucket: &str,
            key: &str,
            dest: &Path,
        ) -> Result<(), TransportError> {
            let data = self
                .get(bucket, key)
                .ok_or_else(|| TransportError::NotFound(format!("s3://{bucket}/{key}")))?;
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| TransportError::io(parent, e))?;
            }
            tokio::fs::write(dest, data)
                .await
                .map_err(|e| TransportError::io(dest, e))
        }

        async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<(), TransportError> {
            let data = tokio::fs::read(src)
                .await
                .map_err(|e| TransportError::io(src, e))?;
            self.insert(bucket, key, data);
            Ok(())
        }
    }
}
