//! Terminal video-assembly records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::ids::{ChapterId, JobId, VideoTaskId};

/// Hard cap on BGM mix volume.
pub const MAX_BGM_VOLUME: f32 = 0.5;

/// Where an assembly run currently is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum VideoTaskStatus {
    #[default]
    Validating,
    Downloading,
    Synthesizing,
    Concatenating,
    Uploading,
    Completed,
    Failed,
}

impl VideoTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoTaskStatus::Validating => "validating",
            VideoTaskStatus::Downloading => "downloading",
            VideoTaskStatus::Synthesizing => "synthesizing",
            VideoTaskStatus::Concatenating => "concatenating",
            VideoTaskStatus::Uploading => "uploading",
            VideoTaskStatus::Completed => "completed",
            VideoTaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoTaskStatus::Completed | VideoTaskStatus::Failed)
    }
}

impl std::fmt::Display for VideoTaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The per-chapter assembly record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoTask {
    pub id: VideoTaskId,
    pub chapter_id: ChapterId,
    pub job_id: Option<JobId>,
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    /// Blob key of the background music track, if any.
    pub bgm_ref: Option<String>,
    pub bgm_volume: f32,
    pub status: VideoTaskStatus,
    pub progress: f32,
    /// Index of the clip (movie) or sentence (narrative) being processed.
    pub current_index: i32,
    pub total_count: i32,
    pub video_url: Option<String>,
    pub error: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoTask {
    /// Create a new assembly record, validating the settings.
    pub fn new(
        chapter_id: ChapterId,
        width: i32,
        height: i32,
        fps: i32,
        bgm_ref: Option<String>,
        bgm_volume: f32,
    ) -> Result<Self, TaskError> {
        if width <= 0 || height <= 0 {
            return Err(TaskError::validation(format!(
                "resolution must be positive, got {width}x{height}"
            )));
        }
        if fps <= 0 || fps > 120 {
            return Err(TaskError::validation(format!("fps out of range: {fps}")));
        }
        if !(0.0..=MAX_BGM_VOLUME).contains(&bgm_volume) {
            return Err(TaskError::validation(format!(
                "bgm_volume must be in [0, {MAX_BGM_VOLUME}], got {bgm_volume}"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: VideoTaskId::new(),
            chapter_id,
            job_id: None,
            width,
            height,
            fps,
            bgm_ref,
            bgm_volume,
            status: VideoTaskStatus::Validating,
            progress: 0.0,
            current_index: 0,
            total_count: 0,
            video_url: None,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_settings() {
        let chapter = ChapterId::new();
        assert!(VideoTask::new(chapter, 1920, 1080, 24, None, 0.15).is_ok());
        assert!(VideoTask::new(chapter, 1920, 1080, 24, None, 0.0).is_ok());
        assert!(VideoTask::new(chapter, 1920, 1080, 24, None, 0.6).is_err());
        assert!(VideoTask::new(chapter, 1920, 1080, 24, None, -0.1).is_err());
        assert!(VideoTask::new(chapter, 0, 1080, 24, None, 0.1).is_err());
        assert!(VideoTask::new(chapter, 1920, 1080, 0, None, 0.1).is_err());
    }

    #[test]
    fn status_terminality() {
        assert!(!VideoTaskStatus::Downloading.is_terminal());
        assert!(VideoTaskStatus::Completed.is_terminal());
        assert!(VideoTaskStatus::Failed.is_terminal());
    }
}
