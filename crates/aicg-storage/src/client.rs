//! S3-compatible blob store client.

use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Metadata key under which the content hash is stored.
const HASH_METADATA_KEY: &str = "content-sha256";

/// Default presigned URL lifetime.
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(3600);

/// Configuration for the blob store client.
#[derive(Debug, Clone)]
pub struct BlobConfig {
    /// S3 API endpoint URL.
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Region; "auto" works for most S3-compatible stores.
    pub region: String,
    /// Whether to require TLS on the endpoint.
    pub secure: bool,
}

impl BlobConfig {
    /// Create config from `BLOB_*` environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint: std::env::var("BLOB_ENDPOINT")
                .map_err(|_| StorageError::config("BLOB_ENDPOINT not set"))?,
            access_key: std::env::var("BLOB_ACCESS_KEY")
                .map_err(|_| StorageError::config("BLOB_ACCESS_KEY not set"))?,
            secret_key: std::env::var("BLOB_SECRET_KEY")
                .map_err(|_| StorageError::config("BLOB_SECRET_KEY not set"))?,
            bucket: std::env::var("BLOB_BUCKET")
                .map_err(|_| StorageError::config("BLOB_BUCKET not set"))?,
            region: std::env::var("BLOB_REGION").unwrap_or_else(|_| "auto".to_string()),
            secure: std::env::var("BLOB_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        })
    }
}

/// Result of a put: where the bytes live and what they hash to.
#[derive(Debug, Clone)]
pub struct PutOutcome {
    pub key: String,
    pub hash: String,
    /// False when an identical object already existed under the key.
    pub uploaded: bool,
}

/// Blob store gateway.
///
/// Treated as lock-free: content hashes stored as side-metadata give every
/// object an identity, and two puts of identical content to the same key
/// are idempotent.
#[derive(Clone, Debug)]
pub struct BlobStore {
    client: Client,
    bucket: String,
}

impl BlobStore {
    /// Create a new client from configuration.
    pub async fn new(config: BlobConfig) -> StorageResult<Self> {
        if config.secure && !config.endpoint.starts_with("https://") {
            return Err(StorageError::config(format!(
                "BLOB_SECURE is set but endpoint is not https: {}",
                config.endpoint
            )));
        }

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "aicg-blob",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket,
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        Self::new(BlobConfig::from_env()?).await
    }

    /// Store bytes under a key.
    ///
    /// If an object with the same key and content hash already exists the
    /// upload is skipped.
    pub async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<PutOutcome> {
        let hash = content_sha256(&bytes);

        if let Some(existing) = self.stored_hash(key).await? {
            if existing == hash {
                debug!(key, "identical object already stored, skipping upload");
                return Ok(PutOutcome {
                    key: key.to_string(),
                    hash,
                    uploaded: false,
                });
            }
        }

        debug!(key, bytes = bytes.len(), "uploading blob");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .metadata(HASH_METADATA_KEY, &hash)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!(key, "uploaded blob");
        Ok(PutOutcome {
            key: key.to_string(),
            hash,
            uploaded: true,
        })
    }

    /// Fetch an object's bytes.
    pub async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        debug!(key, "downloading blob");

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(key)
                } else {
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    /// Download an object straight to a file.
    pub async fn get_to_file(&self, key: &str, path: impl AsRef<std::path::Path>) -> StorageResult<()> {
        let path = path.as_ref();
        let bytes = self.get(key).await?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::DownloadFailed(format!("create dir: {e}")))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("write file: {e}")))?;

        debug!(key, path = %path.display(), "downloaded blob to file");
        Ok(())
    }

    /// Upload a local file.
    pub async fn put_file(
        &self,
        key: &str,
        path: impl AsRef<std::path::Path>,
        content_type: &str,
    ) -> StorageResult<PutOutcome> {
        let bytes = tokio::fs::read(path.as_ref())
            .await
            .map_err(|e| StorageError::upload_failed(format!("read file: {e}")))?;
        self.put(key, bytes, content_type).await
    }

    /// Issue a presigned GET URL.
    pub async fn presign(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    /// Check whether an object exists.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("NotFound") || msg.contains("NoSuchKey") {
                    Ok(false)
                } else {
                    Err(StorageError::Sdk(msg))
                }
            }
        }
    }

    /// Delete an object. Missing objects are not an error.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Sdk(e.to_string()))?;
        debug!(key, "deleted blob");
        Ok(())
    }

    /// Verify the bucket is reachable; used by startup dependency checks.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::Sdk(format!("blob store connectivity check failed: {e}")))?;
        Ok(())
    }

    /// Read the stored content hash for a key, if the object exists.
    async fn stored_hash(&self, key: &str) -> StorageResult<Option<String>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => Ok(head
                .metadata()
                .and_then(|m| m.get(HASH_METADATA_KEY))
                .cloned()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("NotFound") || msg.contains("NoSuchKey") {
                    Ok(None)
                } else {
                    Err(StorageError::Sdk(msg))
                }
            }
        }
    }
}

/// Content hash used for blob identity.
pub fn content_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            content_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn identical_content_hashes_identically() {
        assert_eq!(content_sha256(b"clip"), content_sha256(b"clip"));
        assert_ne!(content_sha256(b"clip"), content_sha256(b"clip2"));
    }

    #[test]
    fn secure_flag_requires_https() {
        let config = BlobConfig {
            endpoint: "http://minio.local:9000".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            bucket: "aicg".into(),
            region: "auto".into(),
            secure: true,
        };
        let err = tokio_test::block_on(BlobStore::new(config)).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
