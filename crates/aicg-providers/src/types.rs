//! Capability request/response types.
//!
//! These are the normalized shapes the rest of the system speaks; each
//! adapter translates them to its provider's wire format with explicit
//! serde structs (never untyped maps).

use serde::{Deserialize, Serialize};

/// Request for a text completion.
#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub model: String,
    /// Ask the model for a JSON document; code fences are stripped from
    /// the response before return.
    pub json_mode: bool,
    pub temperature: Option<f32>,
}

/// Token accounting reported by the provider (zeroed when absent).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Normalized text completion.
#[derive(Debug, Clone)]
pub struct TextResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// A reference image passed alongside an image-generation prompt.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Request for synchronous image generation.
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub prompt: String,
    pub model: String,
    pub reference_images: Vec<ReferenceImage>,
    /// e.g. "16:9", "1:1"; provider-interpreted.
    pub aspect_ratio: Option<String>,
    pub style: Option<String>,
}

/// Normalized image payload.
#[derive(Debug, Clone)]
pub struct ImageResponse {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Request for speech synthesis.
#[derive(Debug, Clone, Default)]
pub struct TtsRequest {
    pub text: String,
    pub voice_id: String,
    pub model: String,
    pub speed: Option<f32>,
    pub emotion: Option<String>,
}

/// Normalized audio payload.
///
/// `duration_ms` is authoritative: adapters re-measure WAV payloads from
/// the header and only fall back to the provider-reported value for
/// formats they cannot measure locally.
#[derive(Debug, Clone)]
pub struct TtsResponse {
    pub audio_bytes: Vec<u8>,
    pub mime: String,
    pub duration_ms: Option<u64>,
}

/// Request to start long-running video generation.
#[derive(Debug, Clone)]
pub struct VideoSubmitRequest {
    pub prompt: String,
    pub model: String,
    /// Anchor frame the clip starts on.
    pub first_frame: Vec<u8>,
    /// Anchor frame the clip ends on.
    pub last_frame: Vec<u8>,
    pub duration_s: u32,
}

impl VideoSubmitRequest {
    pub fn new(
        prompt: impl Into<String>,
        model: impl Into<String>,
        first_frame: Vec<u8>,
        last_frame: Vec<u8>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            first_frame,
            last_frame,
            duration_s: 8,
        }
    }
}

/// Provider-side status of a long-running video task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoGenStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl VideoGenStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoGenStatus::Succeeded | VideoGenStatus::Failed)
    }
}

/// Normalized poll result.
#[derive(Debug, Clone)]
pub struct VideoPollResponse {
    pub status: VideoGenStatus,
    /// Present iff `status == Succeeded`.
    pub video_bytes: Option<Vec<u8>>,
    /// Present iff `status == Failed`.
    pub error: Option<String>,
}
