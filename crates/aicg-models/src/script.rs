//! Movie-pipeline script structure: scenes, shots and transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChapterId, SceneId, ScriptId, ShotId, TransitionId};

/// Generation state of a single artifact (scene image, keyframe, sentence
/// asset).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum AssetStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Pending => "pending",
            AssetStatus::Processing => "processing",
            AssetStatus::Completed => "completed",
            AssetStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AssetStatus::Completed | AssetStatus::Failed)
    }
}

/// One script per chapter; owns ordered scenes.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Script {
    pub id: ScriptId,
    pub chapter_id: ChapterId,
    /// Short summary produced during scene extraction.
    pub synopsis: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Script {
    pub fn new(chapter_id: ChapterId) -> Self {
        Self {
            id: ScriptId::new(),
            chapter_id,
            synopsis: None,
            created_at: Utc::now(),
        }
    }
}

/// An ordered group of shots sharing a location/time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Scene {
    pub id: SceneId,
    pub script_id: ScriptId,
    pub idx: i32,
    pub title: String,
    /// Environment description used to prompt the scene image.
    pub description: String,
    /// Environment-only image (no characters).
    pub scene_image_url: Option<String>,
    pub image_prompt: Option<String>,
    pub image_status: AssetStatus,
    pub error: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Scene {
    pub fn new(
        script_id: ScriptId,
        idx: i32,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SceneId::new(),
            script_id,
            idx,
            title: title.into(),
            description: description.into(),
            scene_image_url: None,
            image_prompt: None,
            image_status: AssetStatus::Pending,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The smallest filmable unit: one keyframe plus optional dialogue.
///
/// `character_refs` holds character names; resolution against the project's
/// characters is exact-string. A keyframe must be generatable from the shot
/// and its scene alone, so an empty `character_refs` is valid.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shot {
    pub id: ShotId,
    pub scene_id: SceneId,
    pub idx: i32,
    /// What happens in the shot; feeds the keyframe prompt.
    pub action: String,
    pub dialogue: Option<String>,
    /// Names of characters appearing in the shot.
    pub character_refs: Vec<String>,
    pub keyframe_url: Option<String>,
    pub keyframe_prompt: Option<String>,
    pub keyframe_status: AssetStatus,
    pub error: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shot {
    pub fn new(scene_id: SceneId, idx: i32, action: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ShotId::new(),
            scene_id,
            idx,
            action: action.into(),
            dialogue: None,
            character_refs: Vec::new(),
            keyframe_url: None,
            keyframe_prompt: None,
            keyframe_status: AssetStatus::Pending,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dialogue(mut self, dialogue: impl Into<String>) -> Self {
        self.dialogue = Some(dialogue.into());
        self
    }

    pub fn with_character_refs(mut self, refs: Vec<String>) -> Self {
        self.character_refs = refs;
        self
    }
}

/// Lifecycle of a transition's externally-generated video.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransitionStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TransitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionStatus::Pending => "pending",
            TransitionStatus::Processing => "processing",
            TransitionStatus::Completed => "completed",
            TransitionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransitionStatus::Completed | TransitionStatus::Failed)
    }
}

/// Directed edge between two consecutive shots.
///
/// Exactly one transition exists per consecutive ordered shot pair of a
/// script. The finished clip is an 8-second video whose first frame is the
/// `from` shot's keyframe and whose last frame is the `to` shot's keyframe.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transition {
    pub id: TransitionId,
    pub script_id: ScriptId,
    pub from_shot_id: ShotId,
    pub to_shot_id: ShotId,
    /// Position within the script's transition ordering.
    pub idx: i32,
    pub video_prompt: Option<String>,
    pub video_url: Option<String>,
    pub status: TransitionStatus,
    /// Provider-side task id while the clip is being generated.
    pub external_task_id: Option<String>,
    pub error: Option<String>,
    /// How many times the sweeper has polled this transition.
    pub poll_count: i32,
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Sweeper does not poll before this instant.
    pub next_poll_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transition {
    pub fn new(script_id: ScriptId, from_shot_id: ShotId, to_shot_id: ShotId, idx: i32) -> Self {
        let now = Utc::now();
        Self {
            id: TransitionId::new(),
            script_id,
            from_shot_id,
            to_shot_id,
            idx,
            video_prompt: None,
            video_url: None,
            status: TransitionStatus::Pending,
            external_task_id: None,
            error: None,
            poll_count: 0,
            last_polled_at: None,
            next_poll_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the sweeper needs to reconcile this transition.
    pub fn needs_polling(&self) -> bool {
        self.status == TransitionStatus::Processing && self.external_task_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_needs_polling_only_while_processing() {
        let mut t = Transition::new(ScriptId::new(), ShotId::new(), ShotId::new(), 0);
        assert!(!t.needs_polling());

        t.status = TransitionStatus::Processing;
        assert!(!t.needs_polling(), "no external task id yet");

        t.external_task_id = Some("ext-123".into());
        assert!(t.needs_polling());

        t.status = TransitionStatus::Completed;
        assert!(!t.needs_polling());
    }

    #[test]
    fn shot_builder_sets_refs() {
        let shot = Shot::new(SceneId::new(), 0, "Alice enters")
            .with_dialogue("Hello")
            .with_character_refs(vec!["Alice".into()]);
        assert_eq!(shot.character_refs, vec!["Alice".to_string()]);
        assert_eq!(shot.dialogue.as_deref(), Some("Hello"));
    }
}
