//! Append-only generation history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which artifact family a history row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ResourceType {
    SceneImage,
    CharacterAvatar,
    ShotKeyframe,
    TransitionVideo,
    SentenceImage,
    SentenceAudio,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::SceneImage => "scene_image",
            ResourceType::CharacterAvatar => "character_avatar",
            ResourceType::ShotKeyframe => "shot_keyframe",
            ResourceType::TransitionVideo => "transition_video",
            ResourceType::SentenceImage => "sentence_image",
            ResourceType::SentenceAudio => "sentence_audio",
        }
    }
}

/// One displaced generation result.
///
/// Rows are only ever appended by the repository's `record_result` /
/// `select_history` paths; they never point back at live artifacts other
/// than by `(resource_type, resource_id)`. When the parent artifact is
/// deleted the rows survive, flagged `orphaned`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GenerationHistory {
    pub id: i64,
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
    pub url: String,
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub orphaned: bool,
    pub created_at: DateTime<Utc>,
}
