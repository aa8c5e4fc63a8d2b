//! Shared data model for the AICG production pipeline.
//!
//! This crate provides Serde- and sqlx-ready types for:
//! - Projects, chapters and the chapter pipeline status machine
//! - Movie-pipeline artifacts (scripts, scenes, shots, transitions,
//!   characters)
//! - Narrative-pipeline artifacts (sentences and their assets)
//! - Jobs, tasks and the tagged task-payload union
//! - Video assembly records
//! - Generation history and provider credentials
//! - The pipeline error taxonomy and progress message schema

pub mod api_key;
pub mod character;
pub mod error;
pub mod history;
pub mod ids;
pub mod job;
pub mod progress;
pub mod project;
pub mod script;
pub mod sentence;
pub mod stage;
pub mod task;
pub mod video_task;

// Re-export common types
pub use api_key::{ApiKey, ApiKeyStatus};
pub use character::Character;
pub use error::{truncate_message, TaskError, MAX_ERROR_MESSAGE_BYTES};
pub use history::{GenerationHistory, ResourceType};
pub use ids::{
    ApiKeyId, ChapterId, CharacterId, JobId, ProjectId, SceneId, ScriptId, SentenceId, ShotId,
    TaskId, TransitionId, VideoTaskId,
};
pub use job::{Job, JobState, JobStatistics, ModelSelection};
pub use progress::ProgressMessage;
pub use project::{Chapter, PipelineStatus, Project, ProjectKind};
pub use script::{AssetStatus, Scene, Script, Shot, Transition, TransitionStatus};
pub use sentence::{Sentence, SentenceAsset};
pub use stage::{Stage, UnknownStage};
pub use task::{Task, TaskKind, TaskPayload, TaskState};
pub use video_task::{VideoTask, VideoTaskStatus, MAX_BGM_VOLUME};
