//! The engine's implementation of the HTTP controller seam.

use async_trait::async_trait;

use aicg_api::{
    HealthReport, HistoryQuery, JobView, PipelineService, SubmitJobRequest, VideoSettings,
};
use aicg_models::{ChapterId, GenerationHistory, JobId, Stage, TaskError};
use aicg_repo::ArtifactRef;

use crate::context::EngineContext;
use crate::planner::{self, SubmitOptions, VideoSpec};

impl From<VideoSettings> for VideoSpec {
    fn from(settings: VideoSettings) -> Self {
        Self {
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            bgm_ref: settings.bgm_ref,
            bgm_volume: settings.bgm_volume,
        }
    }
}

#[async_trait]
impl PipelineService for EngineContext {
    async fn submit_job(&self, request: SubmitJobRequest) -> Result<JobView, TaskError> {
        let video_spec = match (request.target_stage, request.video) {
            (Stage::ComposeVideo, Some(settings)) => Some(settings.into()),
            (Stage::ComposeVideo, None) => None,
            (_, Some(_)) => {
                return Err(TaskError::validation(
                    "video settings only apply to compose_video jobs",
                ))
            }
            _ => None,
        };
        let job = planner::submit_job(
            self,
            request.chapter_id,
            request.target_stage,
            request.models,
            SubmitOptions {
                continue_on_partial: request.continue_on_partial,
                task_timeout_secs: request.task_timeout_secs,
                video_spec,
            },
        )
        .await?;
        Ok(job.into())
    }

    async fn job_status(&self, job_id: JobId) -> Result<JobView, TaskError> {
        Ok(self.repos.jobs.get(job_id).await?.into())
    }

    async fn cancel_job(&self, job_id: JobId) -> Result<(), TaskError> {
        planner::cancel_job(self, job_id).await
    }

    async fn list_history(
        &self,
        query: HistoryQuery,
    ) -> Result<Vec<GenerationHistory>, TaskError> {
        Ok(self
            .repos
            .history
            .list(ArtifactRef::new(query.resource_type, query.resource_id))
            .await?)
    }

    async fn select_history(&self, history_id: i64) -> Result<String, TaskError> {
        Ok(self.repos.history.select_history(history_id).await?)
    }

    async fn accept_partial_materials(&self, chapter_id: ChapterId) -> Result<(), TaskError> {
        planner::accept_partial_materials(self, chapter_id).await
    }

    async fn health(&self) -> HealthReport {
        HealthReport {
            database: aicg_repo::check_connectivity(&self.pool).await.is_ok(),
            queue: self.queue.check_connectivity().await.is_ok(),
            blob_store: self.blob.check_connectivity().await.is_ok(),
        }
    }
}
