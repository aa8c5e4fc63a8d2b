//! Typed identifiers.
//!
//! Every persisted entity gets its own UUID newtype so a `ShotId` can never
//! be passed where a `SceneId` is expected.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize, sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from a string representation.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }
    };
}

entity_id!(
    /// Identifier for a user-owned project.
    ProjectId
);
entity_id!(
    /// Identifier for a chapter (the unit of production).
    ChapterId
);
entity_id!(
    /// Identifier for a movie-pipeline script.
    ScriptId
);
entity_id!(
    /// Identifier for a scene within a script.
    SceneId
);
entity_id!(
    /// Identifier for a shot within a scene.
    ShotId
);
entity_id!(
    /// Identifier for a transition between two consecutive shots.
    TransitionId
);
entity_id!(
    /// Identifier for a project-scoped character.
    CharacterId
);
entity_id!(
    /// Identifier for a narrative-pipeline sentence.
    SentenceId
);
entity_id!(
    /// Identifier for a pipeline job.
    JobId
);
entity_id!(
    /// Identifier for an executor task.
    TaskId
);
entity_id!(
    /// Identifier for a terminal video-assembly record.
    VideoTaskId
);
entity_id!(
    /// Identifier for a stored provider credential.
    ApiKeyId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types_and_roundtrip() {
        let id = ChapterId::new();
        let s = id.to_string();
        assert_eq!(ChapterId::parse(&s).unwrap(), id);

        let json = serde_json::to_string(&id).unwrap();
        let back: ChapterId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(JobId::parse("not-a-uuid").is_err());
    }
}
