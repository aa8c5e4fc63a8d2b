//! Error taxonomy for pipeline work.
//!
//! Every fallible boundary (provider adapters, blob store, repository,
//! FFmpeg) wraps its failures into [`TaskError`] before the Task Runtime
//! sees them; the runtime decides retry behavior from the variant alone.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of an operator-visible error message.
pub const MAX_ERROR_MESSAGE_BYTES: usize = 4096;

/// Classified failure of a task or provider call.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    /// Bad input from the caller. Never retried.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A referenced artifact does not exist. Never retried.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Unique-constraint violation or concurrent-modification conflict.
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Generic external-API failure. Retried on the base schedule.
    #[error("provider error: {message}")]
    Provider { message: String },

    /// Rate limit or quota exhaustion. Retried on the slow schedule.
    #[error("quota exhausted: {message}")]
    Quota { message: String },

    /// Provider refused the content. Permanent, never retried.
    #[error("content policy refusal: {message}")]
    ContentPolicy { message: String },

    /// Deadline exceeded. Retried on the base schedule.
    #[error("timed out: {message}")]
    Timeout { message: String },

    /// Video assembly found upstream artifacts missing.
    #[error("incomplete materials: {}", missing.join(", "))]
    IncompleteMaterials { missing: Vec<String> },

    /// Adapter could not parse provider output. Retried once.
    #[error("malformed provider response: {message}")]
    Malformed { message: String },

    /// Cooperative cancellation. Never retried.
    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: truncate_message(message.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: truncate_message(message.into()),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: truncate_message(message.into()),
        }
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: truncate_message(message.into()),
        }
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::Quota {
            message: truncate_message(message.into()),
        }
    }

    pub fn content_policy(message: impl Into<String>) -> Self {
        Self::ContentPolicy {
            message: truncate_message(message.into()),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: truncate_message(message.into()),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: truncate_message(message.into()),
        }
    }

    /// Stable machine-readable code for the user-visible failure surface.
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::Validation { .. } => "validation",
            TaskError::NotFound { .. } => "not_found",
            TaskError::Conflict { .. } => "conflict",
            TaskError::Provider { .. } => "provider",
            TaskError::Quota { .. } => "quota",
            TaskError::ContentPolicy { .. } => "content_policy",
            TaskError::Timeout { .. } => "timeout",
            TaskError::IncompleteMaterials { .. } => "incomplete_materials",
            TaskError::Malformed { .. } => "malformed_response",
            TaskError::Cancelled => "cancelled",
        }
    }

    /// Whether the Task Runtime may schedule another attempt at all.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskError::Provider { .. }
                | TaskError::Quota { .. }
                | TaskError::Timeout { .. }
                | TaskError::Malformed { .. }
        )
    }
}

/// Truncate an error message to the operator-visible cap.
///
/// Truncation happens on a char boundary at or below
/// [`MAX_ERROR_MESSAGE_BYTES`].
pub fn truncate_message(mut message: String) -> String {
    if message.len() <= MAX_ERROR_MESSAGE_BYTES {
        return message;
    }
    let mut cut = MAX_ERROR_MESSAGE_BYTES;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message.truncate(cut);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(TaskError::provider("boom").is_retryable());
        assert!(TaskError::quota("429").is_retryable());
        assert!(TaskError::timeout("slow").is_retryable());
        assert!(TaskError::malformed("not json").is_retryable());

        assert!(!TaskError::validation("bad").is_retryable());
        assert!(!TaskError::content_policy("refused").is_retryable());
        assert!(!TaskError::Cancelled.is_retryable());
        assert!(!TaskError::IncompleteMaterials {
            missing: vec!["shot_2.keyframe".into()]
        }
        .is_retryable());
    }

    #[test]
    fn messages_are_truncated_to_cap() {
        let long = "x".repeat(MAX_ERROR_MESSAGE_BYTES * 2);
        let err = TaskError::provider(long);
        match err {
            TaskError::Provider { message } => {
                assert_eq!(message.len(), MAX_ERROR_MESSAGE_BYTES)
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        // 4095 ASCII bytes followed by a 3-byte char straddling the cap.
        let mut s = "a".repeat(MAX_ERROR_MESSAGE_BYTES - 1);
        s.push('€');
        let out = truncate_message(s);
        assert!(out.len() <= MAX_ERROR_MESSAGE_BYTES);
        assert!(out.is_char_boundary(out.len()));
    }

    #[test]
    fn serde_roundtrip_keeps_kind() {
        let err = TaskError::IncompleteMaterials {
            missing: vec!["transition_3.video".into()],
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("incomplete_materials"));
        let back: TaskError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.code(), "incomplete_materials");
    }
}
