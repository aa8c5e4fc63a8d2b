//! The seam between the HTTP layer and the executor.
//!
//! The controller is presentation-thin by design; everything it can do is
//! expressed by this trait, implemented by the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use aicg_models::{
    ChapterId, GenerationHistory, Job, JobId, JobState, JobStatistics, ModelSelection,
    ResourceType, Stage, TaskError,
};
use uuid::Uuid;

/// Requested output settings for a compose job.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoSettings {
    #[serde(default = "default_width")]
    pub width: i32,
    #[serde(default = "default_height")]
    pub height: i32,
    #[serde(default = "default_fps")]
    pub fps: i32,
    #[serde(default)]
    pub bgm_ref: Option<String>,
    #[serde(default)]
    pub bgm_volume: f32,
}

fn default_width() -> i32 {
    1920
}
fn default_height() -> i32 {
    1080
}
fn default_fps() -> i32 {
    30
}

/// Job submission request.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitJobRequest {
    pub chapter_id: ChapterId,
    pub target_stage: Stage,
    #[serde(default)]
    pub models: ModelSelection,
    #[serde(default)]
    pub continue_on_partial: bool,
    /// Override of the per-kind task deadlines, in seconds.
    #[serde(default)]
    pub task_timeout_secs: Option<i64>,
    #[serde(default)]
    pub video: Option<VideoSettings>,
}

/// User-visible job snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub chapter_id: ChapterId,
    pub target_stage: Stage,
    pub state: JobState,
    pub progress: f32,
    pub statistics: JobStatistics,
    pub result_ref: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            chapter_id: job.chapter_id,
            target_stage: job.target_stage,
            state: job.state,
            progress: job.progress,
            statistics: job.statistics,
            result_ref: job.result_ref,
            error_code: job.error_code,
            error_message: job.error,
        }
    }
}

/// Request to list or select generation history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
}

/// Dependency health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub database: bool,
    pub queue: bool,
    pub blob_store: bool,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.database && self.queue && self.blob_store
    }
}

/// Operations the controller exposes.
#[async_trait]
pub trait PipelineService: Send + Sync + 'static {
    async fn submit_job(&self, request: SubmitJobRequest) -> Result<JobView, TaskError>;
    async fn job_status(&self, job_id: JobId) -> Result<JobView, TaskError>;
    async fn cancel_job(&self, job_id: JobId) -> Result<(), TaskError>;

    async fn list_history(&self, query: HistoryQuery)
        -> Result<Vec<GenerationHistory>, TaskError>;
    /// Make a historical result live; returns the now-current URL.
    async fn select_history(&self, history_id: i64) -> Result<String, TaskError>;

    /// Explicit acceptance of partial materials for a chapter.
    async fn accept_partial_materials(&self, chapter_id: ChapterId) -> Result<(), TaskError>;

    async fn health(&self) -> HealthReport;
}
