//! Provider resolution and dispatch.

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use aicg_models::{ApiKey, TaskError, TaskKind};

use crate::openai::OpenAiAdapter;
use crate::traits::{ImageModel, ProviderResult, TextModel, TtsModel, VideoModel};
use crate::types::{
    ImageRequest, ImageResponse, TextRequest, TextResponse, TtsRequest, TtsResponse,
    VideoPollResponse, VideoSubmitRequest,
};
use crate::videogen::KlingAdapter;
use crate::http::with_deadline;

/// Provider names with a registered adapter. Matching is exact-string.
pub const KNOWN_PROVIDERS: &[&str] = &["openai", "kling"];

/// Uniform invocation surface over heterogeneous provider endpoints.
///
/// Given a credential record the registry picks the adapter, shapes the
/// request and enforces the per-capability deadline. Model names are
/// passed through verbatim (allow-create): an unknown model is the
/// provider's problem, and its rejection comes back as a retryable
/// provider error.
#[derive(Clone)]
pub struct ProviderRegistry {
    http: Client,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        // Per-request deadlines are applied per capability; the client
        // itself only bounds connect time.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction is infallible with static config");
        Self { http }
    }

    fn check_key(key: &ApiKey) -> ProviderResult<()> {
        if !key.is_active() {
            return Err(TaskError::validation(format!(
                "api key {} is disabled",
                key.id
            )));
        }
        Ok(())
    }

    fn text_adapter(&self, key: &ApiKey) -> ProviderResult<Box<dyn TextModel>> {
        Self::check_key(key)?;
        match key.provider.as_str() {
            "openai" => Ok(Box::new(OpenAiAdapter::new(
                self.http.clone(),
                key.base_url.clone(),
                key.secret.clone(),
            ))),
            other => Err(TaskError::not_found(format!(
                "no text adapter registered for provider '{other}'"
            ))),
        }
    }

    fn image_adapter(&self, key: &ApiKey) -> ProviderResult<Box<dyn ImageModel>> {
        Self::check_key(key)?;
        match key.provider.as_str() {
            "openai" => Ok(Box::new(OpenAiAdapter::new(
                self.http.clone(),
                key.base_url.clone(),
                key.secret.clone(),
            ))),
            other => Err(TaskError::not_found(format!(
                "no image adapter registered for provider '{other}'"
            ))),
        }
    }

    fn tts_adapter(&self, key: &ApiKey) -> ProviderResult<Box<dyn TtsModel>> {
        Self::check_key(key)?;
        match key.provider.as_str() {
            "openai" => Ok(Box::new(OpenAiAdapter::new(
                self.http.clone(),
                key.base_url.clone(),
                key.secret.clone(),
            ))),
            other => Err(TaskError::not_found(format!(
                "no tts adapter registered for provider '{other}'"
            ))),
        }
    }

    fn video_adapter(&self, key: &ApiKey) -> ProviderResult<Box<dyn VideoModel>> {
        Self::check_key(key)?;
        match key.provider.as_str() {
            "kling" => Ok(Box::new(KlingAdapter::new(
                self.http.clone(),
                key.base_url.clone(),
                key.secret.clone(),
            ))),
            other => Err(TaskError::not_found(format!(
                "no video adapter registered for provider '{other}'"
            ))),
        }
    }

    /// Text completion under the 120 s capability deadline.
    pub async fn complete(
        &self,
        key: &ApiKey,
        request: TextRequest,
    ) -> ProviderResult<TextResponse> {
        debug!(provider = %key.provider, model = %request.model, "dispatching text completion");
        let adapter = self.text_adapter(key)?;
        with_deadline(
            "text",
            Duration::from_secs(TaskKind::Text.timeout_secs()),
            adapter.complete(request),
        )
        .await
    }

    /// Image generation under the 180 s capability deadline.
    pub async fn generate_image(
        &self,
        key: &ApiKey,
        request: ImageRequest,
    ) -> ProviderResult<ImageResponse> {
        debug!(provider = %key.provider, model = %request.model, "dispatching image generation");
        let adapter = self.image_adapter(key)?;
        with_deadline(
            "image",
            Duration::from_secs(TaskKind::Image.timeout_secs()),
            adapter.generate(request),
        )
        .await
    }

    /// Speech synthesis under the 60 s capability deadline.
    pub async fn synthesize(
        &self,
        key: &ApiKey,
        request: TtsRequest,
    ) -> ProviderResult<TtsResponse> {
        debug!(provider = %key.provider, model = %request.model, "dispatching tts");
        let adapter = self.tts_adapter(key)?;
        with_deadline(
            "tts",
            Duration::from_secs(TaskKind::Tts.timeout_secs()),
            adapter.synthesize(request),
        )
        .await
    }

    /// Video submit under the 60 s capability deadline.
    pub async fn submit_video(
        &self,
        key: &ApiKey,
        request: VideoSubmitRequest,
    ) -> ProviderResult<String> {
        debug!(provider = %key.provider, model = %request.model, "dispatching video submit");
        let adapter = self.video_adapter(key)?;
        with_deadline(
            "video_submit",
            Duration::from_secs(TaskKind::VideoSubmit.timeout_secs()),
            adapter.submit(request),
        )
        .await
    }

    /// Video poll under the 30 s capability deadline.
    pub async fn poll_video(
        &self,
        key: &ApiKey,
        external_task_id: &str,
    ) -> ProviderResult<VideoPollResponse> {
        let adapter = self.video_adapter(key)?;
        with_deadline(
            "video_poll",
            Duration::from_secs(TaskKind::VideoPoll.timeout_secs()),
            adapter.poll(external_task_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aicg_models::{ApiKeyId, ApiKeyStatus};
    use chrono::Utc;

    fn key(provider: &str, status: ApiKeyStatus) -> ApiKey {
        ApiKey {
            id: ApiKeyId::new(),
            user_id: "u1".into(),
            provider: provider.into(),
            name: "default".into(),
            secret: "sk-test".into(),
            base_url: None,
            status,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let registry = ProviderRegistry::new();
        let err = registry
            .complete(
                &key("acme-ai", ApiKeyStatus::Active),
                TextRequest {
                    prompt: "hi".into(),
                    model: "m".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn provider_match_is_case_sensitive() {
        let registry = ProviderRegistry::new();
        let err = registry
            .complete(
                &key("OpenAI", ApiKeyStatus::Active),
                TextRequest {
                    prompt: "hi".into(),
                    model: "m".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn disabled_key_is_rejected() {
        let registry = ProviderRegistry::new();
        let err = registry
            .complete(
                &key("openai", ApiKeyStatus::Disabled),
                TextRequest {
                    prompt: "hi".into(),
                    model: "m".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation");
    }

    #[tokio::test]
    async fn text_provider_has_no_video_capability() {
        let registry = ProviderRegistry::new();
        let err = registry
            .poll_video(&key("openai", ApiKeyStatus::Active), "task-1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
