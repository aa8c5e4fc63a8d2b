//! Project-scoped characters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CharacterId, ProjectId};
use crate::script::AssetStatus;

/// A recurring figure in a movie project.
///
/// Characters are referenced from shots by name; the name is unique within
/// its project and matching is exact-string (no fuzzy resolution). The
/// avatar is a three-view reference sheet used as a reference image for
/// keyframe generation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Character {
    pub id: CharacterId,
    pub project_id: ProjectId,
    pub name: String,
    /// Full visual description extracted from the chapter text.
    pub visual_traits: String,
    /// The handful of traits that must stay consistent across shots.
    pub key_visual_traits: String,
    pub avatar_url: Option<String>,
    /// Three-view reference prompt used to generate the avatar sheet.
    pub generated_prompt: Option<String>,
    pub avatar_status: AssetStatus,
    pub error: Option<String>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Character {
    pub fn new(
        project_id: ProjectId,
        name: impl Into<String>,
        visual_traits: impl Into<String>,
        key_visual_traits: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CharacterId::new(),
            project_id,
            name: name.into(),
            visual_traits: visual_traits.into(),
            key_visual_traits: key_visual_traits.into(),
            avatar_url: None,
            generated_prompt: None,
            avatar_status: AssetStatus::Pending,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
