//! Pipeline jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::ids::{ApiKeyId, ChapterId, JobId};
use crate::stage::Stage;

/// Lifecycle of a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Success => "success",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failed | JobState::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome counters over the job's task tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobStatistics {
    pub total: i32,
    pub success: i32,
    pub failed: i32,
    pub skipped: i32,
}

impl JobStatistics {
    /// All accounted tasks reached a terminal state.
    pub fn settled(&self) -> bool {
        self.success + self.failed + self.skipped >= self.total
    }
}

/// Which credential/model each capability uses for a job.
///
/// Unset capabilities fall back to the provider registry defaults. Model
/// names are passed through verbatim (allow-create).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub text_api_key_id: Option<ApiKeyId>,
    pub text_model: Option<String>,
    pub image_api_key_id: Option<ApiKeyId>,
    pub image_model: Option<String>,
    pub tts_api_key_id: Option<ApiKeyId>,
    pub tts_model: Option<String>,
    pub tts_voice: Option<String>,
    pub video_api_key_id: Option<ApiKeyId>,
    pub video_model: Option<String>,
}

/// A user-submitted request to drive part of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: JobId,
    pub chapter_id: ChapterId,
    /// The stage the chapter should reach; doubles as the job kind.
    pub target_stage: Stage,
    pub state: JobState,
    /// Weighted completion in `[0, 1]`, monotonically nondecreasing.
    pub progress: f32,
    #[sqlx(flatten)]
    pub statistics: JobStatistics,
    /// Sum of weights over all materialized tasks.
    pub weight_total: i64,
    /// Sum of weights over satisfied tasks.
    pub weight_done: i64,
    /// Release downstream stages despite partial upstream failure.
    pub continue_on_partial: bool,
    pub cancel_requested: bool,
    /// Stage names whose task fan-out has been materialized.
    pub materialized_stages: Vec<String>,
    /// Per-job override of the per-kind task deadlines, in seconds.
    pub task_timeout_secs: Option<i64>,
    pub models: Json<ModelSelection>,
    /// Reference to the job's primary output (e.g. final video blob key).
    pub result_ref: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(chapter_id: ChapterId, target_stage: Stage, models: ModelSelection) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            chapter_id,
            target_stage,
            state: JobState::Pending,
            progress: 0.0,
            statistics: JobStatistics::default(),
            weight_total: 0,
            weight_done: 0,
            continue_on_partial: false,
            cancel_requested: false,
            materialized_stages: Vec::new(),
            task_timeout_secs: None,
            models: Json(models),
            result_ref: None,
            error: None,
            error_code: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_continue_on_partial(mut self, enabled: bool) -> Self {
        self.continue_on_partial = enabled;
        self
    }

    pub fn with_task_timeout(mut self, secs: Option<i64>) -> Self {
        self.task_timeout_secs = secs;
        self
    }

    /// Whether a stage's fan-out has been materialized into tasks.
    pub fn stage_materialized(&self, stage: Stage) -> bool {
        self.materialized_stages.iter().any(|s| s == stage.as_str())
    }

    /// Retention window after the terminal timestamp (TTL sweep).
    pub fn retention_days(&self) -> i64 {
        match self.state {
            JobState::Failed => 90,
            _ => 14,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statistics_settled() {
        let stats = JobStatistics {
            total: 5,
            success: 3,
            failed: 1,
            skipped: 1,
        };
        assert!(stats.settled());

        let pending = JobStatistics {
            total: 5,
            success: 3,
            failed: 0,
            skipped: 1,
        };
        assert!(!pending.settled());
    }

    #[test]
    fn retention_depends_on_outcome() {
        let mut job = Job::new(
            ChapterId::new(),
            Stage::ComposeVideo,
            ModelSelection::default(),
        );
        job.state = JobState::Success;
        assert_eq!(job.retention_days(), 14);
        job.state = JobState::Failed;
        assert_eq!(job.retention_days(), 90);
    }
}
