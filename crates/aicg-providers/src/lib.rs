//! Uniform adapter layer over external AI model providers.
//!
//! Four capability traits (text, image, tts, video) with normalized
//! request/response types, a registry that resolves credential records to
//! adapters and enforces per-capability deadlines, and the built-in
//! adapters. Failures are classified into the shared error taxonomy at
//! this boundary; retrying is the Task Runtime's concern, never this
//! layer's.

mod http;
pub mod json_util;
pub mod openai;
pub mod registry;
pub mod traits;
pub mod types;
pub mod videogen;
pub mod wav;

pub use json_util::{extract_json, strip_code_fences};
pub use openai::OpenAiAdapter;
pub use registry::{ProviderRegistry, KNOWN_PROVIDERS};
pub use traits::{ImageModel, ProviderResult, TextModel, TtsModel, VideoModel};
pub use types::{
    ImageRequest, ImageResponse, ReferenceImage, TextRequest, TextResponse, TokenUsage,
    TtsRequest, TtsResponse, VideoGenStatus, VideoPollResponse, VideoSubmitRequest,
};
pub use videogen::KlingAdapter;
pub use wav::wav_duration_ms;
