//! Error types for media operations.

use std::path::PathBuf;

use thiserror::Error;

use aicg_models::{truncate_message, TaskError};

pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found")]
    FfmpegNotFound,

    #[error("FFprobe not found")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        /// Captured stderr, truncated to 4 KiB.
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {0}")]
    FfprobeFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid assembly input: {0}")]
    InvalidInput(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an FFmpeg failure, truncating stderr to the 4 KiB cap.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr: stderr.map(truncate_message),
            exit_code,
        }
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}

impl From<MediaError> for TaskError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Cancelled => TaskError::Cancelled,
            MediaError::Timeout(secs) => {
                TaskError::timeout(format!("media operation timed out after {secs}s"))
            }
            MediaError::InvalidInput(msg) => TaskError::validation(msg),
            MediaError::FileNotFound(path) => {
                TaskError::not_found(format!("file {}", path.display()))
            }
            MediaError::FfmpegFailed {
                message,
                stderr,
                exit_code,
            } => {
                let mut full = message;
                if let Some(code) = exit_code {
                    full.push_str(&format!(" (exit code {code})"));
                }
                if let Some(stderr) = stderr {
                    full.push_str(": ");
                    full.push_str(&stderr);
                }
                TaskError::provider(full)
            }
            other => TaskError::provider(other.to_string()),
        }
    }
}
