//! Narrative-pipeline sentences and their generated assets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChapterId, SentenceId};
use crate::script::AssetStatus;

/// An ordered leaf of chapter text.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sentence {
    pub id: SentenceId,
    pub chapter_id: ChapterId,
    pub idx: i32,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Sentence {
    pub fn new(chapter_id: ChapterId, idx: i32, text: impl Into<String>) -> Self {
        Self {
            id: SentenceId::new(),
            chapter_id,
            idx,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

/// The at-most-one asset tuple a sentence owns.
///
/// `duration_ms` must be the true measured length of `audio_url` by the
/// time assembly runs; the TTS handler re-probes the payload rather than
/// trusting the provider.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SentenceAsset {
    pub sentence_id: SentenceId,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
    pub duration_ms: Option<i64>,
    pub subtitle_text: Option<String>,
    pub image_prompt: Option<String>,
    pub voice_prompt: Option<String>,
    pub image_status: AssetStatus,
    pub audio_status: AssetStatus,
    pub error: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SentenceAsset {
    pub fn new(sentence_id: SentenceId) -> Self {
        let now = Utc::now();
        Self {
            sentence_id,
            image_url: None,
            audio_url: None,
            duration_ms: None,
            subtitle_text: None,
            image_prompt: None,
            voice_prompt: None,
            image_status: AssetStatus::Pending,
            audio_status: AssetStatus::Pending,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Both halves of the tuple are present and ready for assembly.
    pub fn is_complete(&self) -> bool {
        self.image_url.is_some() && self.audio_url.is_some() && self.duration_ms.is_some()
    }
}
