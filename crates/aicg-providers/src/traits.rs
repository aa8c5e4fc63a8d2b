//! Capability interfaces.
//!
//! One trait per capability; an adapter implements whichever subset its
//! provider supports. Retries are never performed here — classification
//! into the error taxonomy is this layer's whole failure contract, and
//! the Task Runtime decides what to do with it.

use async_trait::async_trait;

use aicg_models::TaskError;

use crate::types::{
    ImageRequest, ImageResponse, TextRequest, TextResponse, TtsRequest, TtsResponse,
    VideoPollResponse, VideoSubmitRequest,
};

pub type ProviderResult<T> = Result<T, TaskError>;

/// Text completion.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, request: TextRequest) -> ProviderResult<TextResponse>;
}

/// Synchronous image generation.
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn generate(&self, request: ImageRequest) -> ProviderResult<ImageResponse>;
}

/// Speech synthesis.
#[async_trait]
pub trait TtsModel: Send + Sync {
    async fn synthesize(&self, request: TtsRequest) -> ProviderResult<TtsResponse>;
}

/// Two-phase long-running video generation.
#[async_trait]
pub trait VideoModel: Send + Sync {
    /// Start generation; returns the provider-side task id.
    async fn submit(&self, request: VideoSubmitRequest) -> ProviderResult<String>;

    /// Poll a previously submitted task.
    async fn poll(&self, external_task_id: &str) -> ProviderResult<VideoPollResponse>;
}
