//! Error types for blob store operations.

use thiserror::Error;

use aicg_models::TaskError;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Presign failed: {0}")]
    PresignFailed(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("AWS SDK error: {0}")]
    Sdk(String),
}

impl StorageError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn upload_failed(message: impl Into<String>) -> Self {
        Self::UploadFailed(message.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }
}

impl From<StorageError> for TaskError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => TaskError::not_found(format!("blob {key}")),
            StorageError::Config(msg) | StorageError::InvalidKey(msg) => {
                TaskError::validation(msg)
            }
            other => TaskError::provider(other.to_string()),
        }
    }
}
