// Amazon S3 object store
// `s3://bucket/key` locations map one-to-one onto S3 objects
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tracing::debug;

use stratus_core::port::{ObjectStore, TransportError};

/// Object store backed by S3 (or any S3-compatible endpoint)
///
/// Credentials and region come from the standard AWS config chain when built
/// with [`S3ObjectStore::from_env`].
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client from environment variables, AWS profiles or instance metadata
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

fn uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

fn map_sdk_error(err: impl std::error::Error, target: &str) -> TransportError {
    TransportError::ObjectStore(format!("S3 error for {target}: {err}"))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, TransportError> {
        let mut keys = Vec::new();
        let mut continuation = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }
            let output = request
                .send()
                .await
                .map_err(|e| map_sdk_error(e, &uri(bucket, prefix)))?;

            keys.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match output.next_continuation_token() {
                Some(token) if output.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        debug!(bucket = %bucket, prefix = %prefix, keys = keys.len(), "Listed S3 prefix");
        Ok(keys)
    }

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<(), TransportError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                    TransportError::NotFound(uri(bucket, key))
                } else {
                    map_sdk_error(e, &uri(bucket, key))
                }
            })?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| map_sdk_error(e, &uri(bucket, key)))?
            .into_bytes();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::io(parent, e))?;
        }
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| TransportError::io(dest, e))
    }

    async fn upload(&self, src: &Path, bucket: &str, key: &str) -> Result<(), TransportError> {
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| map_sdk_error(e, &src.display().to_string()))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &uri(bucket, key)))?;
        Ok(())
    }
}
