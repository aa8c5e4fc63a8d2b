//! Shared process context.
//!
//! The process-wide singletons: repositories over one pool, the blob
//! store client, the queue client, the progress channel, the provider
//! registry and the configuration snapshot. Constructed once at startup,
//! never mutated.

use std::sync::Arc;

use sqlx::PgPool;

use aicg_models::{ApiKey, Job, JobId, Project, TaskError};
use aicg_providers::ProviderRegistry;
use aicg_queue::{ProgressChannel, TaskQueue};
use aicg_repo::Repositories;
use aicg_storage::BlobStore;

use crate::config::EngineConfig;

/// Default models per capability when a job does not pin one.
pub const DEFAULT_TEXT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
pub const DEFAULT_TTS_MODEL: &str = "tts-1";
pub const DEFAULT_TTS_VOICE: &str = "alloy";
pub const DEFAULT_VIDEO_MODEL: &str = "kling-v1-6";

/// Provider names used when a job does not pin a credential.
const TEXT_PROVIDER: &str = "openai";
const VIDEO_PROVIDER: &str = "kling";

/// Everything a handler needs, cheap to clone.
#[derive(Clone)]
pub struct EngineContext {
    pub pool: PgPool,
    pub repos: Repositories,
    pub blob: BlobStore,
    pub queue: Arc<TaskQueue>,
    pub progress: ProgressChannel,
    pub providers: ProviderRegistry,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(
        pool: PgPool,
        blob: BlobStore,
        queue: Arc<TaskQueue>,
        progress: ProgressChannel,
        config: EngineConfig,
    ) -> Self {
        Self {
            repos: Repositories::new(pool.clone()),
            pool,
            blob,
            queue,
            progress,
            providers: ProviderRegistry::new(),
            config,
        }
    }

    /// Cooperative cancel check; called immediately before every
    /// suspension point in handlers.
    pub async fn ensure_not_cancelled(&self, job_id: JobId) -> Result<(), TaskError> {
        let flagged = self
            .queue
            .is_cancelled(job_id)
            .await
            .map_err(|e| TaskError::provider(e.to_string()))?;
        if flagged {
            return Err(TaskError::Cancelled);
        }
        Ok(())
    }

    async fn resolve_key(
        &self,
        pinned: Option<aicg_models::ApiKeyId>,
        project: &Project,
        provider: &str,
        capability: &str,
    ) -> Result<ApiKey, TaskError> {
        if let Some(id) = pinned {
            return Ok(self.repos.api_keys.get(id).await?);
        }
        self.repos
            .api_keys
            .find_active(&project.owner_id, provider)
            .await?
            .ok_or_else(|| {
                TaskError::validation(format!(
                    "no active {provider} api key for user {} ({capability})",
                    project.owner_id
                ))
            })
    }

    /// Credential + model for text completion.
    pub async fn text_model(
        &self,
        job: &Job,
        project: &Project,
    ) -> Result<(ApiKey, String), TaskError> {
        let key = self
            .resolve_key(job.models.text_api_key_id, project, TEXT_PROVIDER, "text")
            .await?;
        let model = job
            .models
            .text_model
            .clone()
            .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string());
        Ok((key, model))
    }

    /// Credential + model for image generation.
    pub async fn image_model(
        &self,
        job: &Job,
        project: &Project,
    ) -> Result<(ApiKey, String), TaskError> {
        let key = self
            .resolve_key(job.models.image_api_key_id, project, TEXT_PROVIDER, "image")
            .await?;
        let model = job
            .models
            .image_model
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());
        Ok((key, model))
    }

    /// Credential + model + voice for speech synthesis.
    pub async fn tts_model(
        &self,
        job: &Job,
        project: &Project,
    ) -> Result<(ApiKey, String, String), TaskError> {
        let key = self
            .resolve_key(job.models.tts_api_key_id, project, TEXT_PROVIDER, "tts")
            .await?;
        let model = job
            .models
            .tts_model
            .clone()
            .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string());
        let voice = job
            .models
            .tts_voice
            .clone()
            .unwrap_or_else(|| DEFAULT_TTS_VOICE.to_string());
        Ok((key, model, voice))
    }

    /// Credential + model for video generation.
    pub async fn video_model(
        &self,
        job: &Job,
        project: &Project,
    ) -> Result<(ApiKey, String), TaskError> {
        let key = self
            .resolve_key(job.models.video_api_key_id, project, VIDEO_PROVIDER, "video")
            .await?;
        let model = job
            .models
            .video_model
            .clone()
            .unwrap_or_else(|| DEFAULT_VIDEO_MODEL.to_string());
        Ok((key, model))
    }

    /// The owner's video credential, resolved without a job (sweeper).
    pub async fn video_key_for_project(&self, project: &Project) -> Result<ApiKey, TaskError> {
        self.repos
            .api_keys
            .find_active(&project.owner_id, VIDEO_PROVIDER)
            .await?
            .ok_or_else(|| {
                TaskError::validation(format!(
                    "no active {VIDEO_PROVIDER} api key for user {}",
                    project.owner_id
                ))
            })
    }
}
