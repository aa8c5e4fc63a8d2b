//! Projects and chapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChapterId, ProjectId};

/// What kind of video a project produces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ProjectKind {
    /// Image + voice explanation video built per sentence.
    #[default]
    Narrative,
    /// Multi-shot stylized film built from scenes, shots and transitions.
    Movie,
}

impl ProjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectKind::Narrative => "narrative",
            ProjectKind::Movie => "movie",
        }
    }
}

/// A user-owned container of chapters.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: ProjectId,
    pub owner_id: String,
    pub name: String,
    pub kind: ProjectKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(owner_id: impl Into<String>, name: impl Into<String>, kind: ProjectKind) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::new(),
            owner_id: owner_id.into(),
            name: name.into(),
            kind,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Production state of a chapter.
///
/// Transitions are monotonic along the enum order; `Failed` is a separate
/// sink. The only backward transition is an explicit admin reset on the
/// repository.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Draft,
    Parsed,
    ScriptGenerated,
    MaterialsPrepared,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Draft => "draft",
            PipelineStatus::Parsed => "parsed",
            PipelineStatus::ScriptGenerated => "script_generated",
            PipelineStatus::MaterialsPrepared => "materials_prepared",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
        }
    }

    /// Position along the forward progression. `Failed` has no rank.
    fn rank(&self) -> Option<u8> {
        match self {
            PipelineStatus::Draft => Some(0),
            PipelineStatus::Parsed => Some(1),
            PipelineStatus::ScriptGenerated => Some(2),
            PipelineStatus::MaterialsPrepared => Some(3),
            PipelineStatus::Completed => Some(4),
            PipelineStatus::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Completed | PipelineStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Entering `Failed` is always allowed; leaving it is not (admin reset
    /// bypasses this check).
    pub fn can_advance_to(&self, next: PipelineStatus) -> bool {
        if next == PipelineStatus::Failed {
            return *self != PipelineStatus::Completed;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An ordered slice of project text; the unit of production.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Chapter {
    pub id: ChapterId,
    pub project_id: ProjectId,
    /// Position within the project.
    pub idx: i32,
    pub title: String,
    /// Raw chapter text as fed in by the ingestion subsystem.
    pub content: String,
    pub pipeline_status: PipelineStatus,
    /// Optimistic-concurrency version.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chapter {
    pub fn new(
        project_id: ProjectId,
        idx: i32,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ChapterId::new(),
            project_id,
            idx,
            title: title.into(),
            content: content.into(),
            pipeline_status: PipelineStatus::Draft,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_status_is_monotonic() {
        use PipelineStatus::*;

        assert!(Draft.can_advance_to(Parsed));
        assert!(Draft.can_advance_to(Completed));
        assert!(Parsed.can_advance_to(ScriptGenerated));
        assert!(MaterialsPrepared.can_advance_to(Completed));

        assert!(!Parsed.can_advance_to(Draft));
        assert!(!Completed.can_advance_to(MaterialsPrepared));
        assert!(!Completed.can_advance_to(Completed));
    }

    #[test]
    fn failed_is_a_sink() {
        use PipelineStatus::*;

        assert!(Draft.can_advance_to(Failed));
        assert!(MaterialsPrepared.can_advance_to(Failed));
        assert!(!Completed.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Parsed));
        assert!(!Failed.can_advance_to(Completed));
    }
}
