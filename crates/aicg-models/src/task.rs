//! Executor tasks: kinds, payloads and the persisted record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::ids::{
    ChapterId, CharacterId, JobId, SceneId, ScriptId, SentenceId, ShotId, TaskId, TransitionId,
    VideoTaskId,
};
use crate::stage::Stage;

/// Kind of executor work; drives concurrency caps, weights, timeouts and
/// retry budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskKind {
    Text,
    Image,
    Tts,
    VideoSubmit,
    VideoPoll,
    Assembly,
}

impl TaskKind {
    pub const ALL: &'static [TaskKind] = &[
        TaskKind::Text,
        TaskKind::Image,
        TaskKind::Tts,
        TaskKind::VideoSubmit,
        TaskKind::VideoPoll,
        TaskKind::Assembly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Text => "text",
            TaskKind::Image => "image",
            TaskKind::Tts => "tts",
            TaskKind::VideoSubmit => "video_submit",
            TaskKind::VideoPoll => "video_poll",
            TaskKind::Assembly => "assembly",
        }
    }

    /// Default per-process concurrency cap.
    ///
    /// Video polling is reconciliation work owned by the sweeper and is
    /// effectively unbounded; assembly is serialized per chapter.
    pub fn default_concurrency(&self) -> usize {
        match self {
            TaskKind::Text => 3,
            TaskKind::Image => 5,
            TaskKind::Tts => 5,
            TaskKind::VideoSubmit => 5,
            TaskKind::VideoPoll => usize::MAX,
            TaskKind::Assembly => 1,
        }
    }

    /// Cost weight used for job progress rollup.
    pub fn weight(&self) -> i32 {
        match self {
            TaskKind::Text => 1,
            TaskKind::Image => 2,
            TaskKind::Tts => 2,
            TaskKind::VideoSubmit => 8,
            TaskKind::VideoPoll => 0,
            TaskKind::Assembly => 10,
        }
    }

    /// Retry budget; `None` means unbounded (polling).
    pub fn max_retries(&self) -> Option<u32> {
        match self {
            TaskKind::Text => Some(3),
            TaskKind::Image => Some(2),
            TaskKind::Tts => Some(3),
            TaskKind::VideoSubmit => Some(2),
            TaskKind::VideoPoll => None,
            TaskKind::Assembly => Some(1),
        }
    }

    /// Overall per-attempt deadline in seconds.
    pub fn timeout_secs(&self) -> u64 {
        match self {
            TaskKind::Text => 120,
            TaskKind::Image => 180,
            TaskKind::Tts => 60,
            TaskKind::VideoSubmit => 60,
            TaskKind::VideoPoll => 30,
            TaskKind::Assembly => 1800,
        }
    }

    /// Suffix for the `WORKER_CONCURRENCY_<KIND>` override variable.
    pub fn env_suffix(&self) -> &'static str {
        match self {
            TaskKind::Text => "TEXT",
            TaskKind::Image => "IMAGE",
            TaskKind::Tts => "TTS",
            TaskKind::VideoSubmit => "VIDEO_SUBMIT",
            TaskKind::VideoPoll => "VIDEO_POLL",
            TaskKind::Assembly => "ASSEMBLY",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    /// The artifact already existed at materialization; no work was done.
    Skipped,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
            TaskState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Running)
    }

    /// Terminal and the artifact is usable downstream.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Skipped)
    }
}

/// What a task actually does.
///
/// The dispatcher pattern-matches on this; no reflection, no dynamic
/// payload maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TaskPayload {
    ExtractCharacters { chapter_id: ChapterId },
    ExtractScenes { chapter_id: ChapterId },
    ExtractShots { scene_id: SceneId },
    GenerateSceneImage { scene_id: SceneId },
    GenerateCharacterAvatar { character_id: CharacterId },
    GenerateKeyframe { shot_id: ShotId },
    CreateTransition {
        script_id: ScriptId,
        from_shot_id: ShotId,
        to_shot_id: ShotId,
    },
    SubmitTransitionVideo { transition_id: TransitionId },
    GenerateSentencePrompts { chapter_id: ChapterId },
    GenerateSentenceImage { sentence_id: SentenceId },
    SynthesizeSentenceAudio { sentence_id: SentenceId },
    ComposeVideo {
        chapter_id: ChapterId,
        video_task_id: VideoTaskId,
    },
}

impl TaskPayload {
    pub fn stage(&self) -> Stage {
        match self {
            TaskPayload::ExtractCharacters { .. } => Stage::ExtractCharacters,
            TaskPayload::ExtractScenes { .. } => Stage::ExtractScenes,
            TaskPayload::ExtractShots { .. } => Stage::ExtractShots,
            TaskPayload::GenerateSceneImage { .. } => Stage::GenerateSceneImages,
            TaskPayload::GenerateCharacterAvatar { .. } => Stage::GenerateCharacterAvatars,
            TaskPayload::GenerateKeyframe { .. } => Stage::GenerateKeyframes,
            TaskPayload::CreateTransition { .. } => Stage::CreateTransitions,
            TaskPayload::SubmitTransitionVideo { .. } => Stage::GenerateTransitionVideos,
            TaskPayload::GenerateSentencePrompts { .. } => Stage::GenerateSentencePrompts,
            TaskPayload::GenerateSentenceImage { .. } => Stage::GenerateSentenceImages,
            TaskPayload::SynthesizeSentenceAudio { .. } => Stage::SynthesizeSentenceAudio,
            TaskPayload::ComposeVideo { .. } => Stage::ComposeVideo,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.stage().task_kind()
    }

    /// Deduplication key: one live task per payload identity.
    pub fn dedup_key(&self) -> String {
        match self {
            TaskPayload::ExtractCharacters { chapter_id } => {
                format!("extract_characters:{chapter_id}")
            }
            TaskPayload::ExtractScenes { chapter_id } => format!("extract_scenes:{chapter_id}"),
            TaskPayload::ExtractShots { scene_id } => format!("extract_shots:{scene_id}"),
            TaskPayload::GenerateSceneImage { scene_id } => format!("scene_image:{scene_id}"),
            TaskPayload::GenerateCharacterAvatar { character_id } => {
                format!("character_avatar:{character_id}")
            }
            TaskPayload::GenerateKeyframe { shot_id } => format!("keyframe:{shot_id}"),
            TaskPayload::CreateTransition {
                from_shot_id,
                to_shot_id,
                ..
            } => format!("transition:{from_shot_id}:{to_shot_id}"),
            TaskPayload::SubmitTransitionVideo { transition_id } => {
                format!("transition_video:{transition_id}")
            }
            TaskPayload::GenerateSentencePrompts { chapter_id } => {
                format!("sentence_prompts:{chapter_id}")
            }
            TaskPayload::GenerateSentenceImage { sentence_id } => {
                format!("sentence_image:{sentence_id}")
            }
            TaskPayload::SynthesizeSentenceAudio { sentence_id } => {
                format!("sentence_audio:{sentence_id}")
            }
            TaskPayload::ComposeVideo { chapter_id, .. } => format!("compose:{chapter_id}"),
        }
    }
}

/// Persisted unit of executor work.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub chapter_id: ChapterId,
    pub stage: Stage,
    pub kind: TaskKind,
    pub payload: Json<TaskPayload>,
    pub state: TaskState,
    pub retries: i32,
    pub weight: i32,
    pub dedup_key: String,
    /// Backoff gate; the runtime does not start the task before this.
    pub not_before: Option<DateTime<Utc>>,
    /// Reference to the produced artifact (blob key or row id).
    pub result: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(job_id: JobId, chapter_id: ChapterId, payload: TaskPayload) -> Self {
        let now = Utc::now();
        let stage = payload.stage();
        let kind = payload.kind();
        let dedup_key = payload.dedup_key();
        Self {
            id: TaskId::new(),
            job_id,
            chapter_id,
            stage,
            kind,
            payload: Json(payload),
            state: TaskState::Pending,
            retries: 0,
            weight: kind.weight(),
            dedup_key,
            not_before: None,
            result: None,
            error: None,
            error_code: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// A pre-satisfied task recorded for resume bookkeeping.
    pub fn skipped(job_id: JobId, chapter_id: ChapterId, payload: TaskPayload) -> Self {
        let now = Utc::now();
        let mut task = Self::new(job_id, chapter_id, payload);
        task.state = TaskState::Skipped;
        task.finished_at = Some(now);
        task
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_maps_to_stage_and_kind() {
        let payload = TaskPayload::GenerateKeyframe {
            shot_id: ShotId::new(),
        };
        assert_eq!(payload.stage(), Stage::GenerateKeyframes);
        assert_eq!(payload.kind(), TaskKind::Image);

        let payload = TaskPayload::SubmitTransitionVideo {
            transition_id: TransitionId::new(),
        };
        assert_eq!(payload.kind(), TaskKind::VideoSubmit);
        assert_eq!(payload.kind().weight(), 8);
    }

    #[test]
    fn payload_serde_is_tagged() {
        let payload = TaskPayload::ExtractScenes {
            chapter_id: ChapterId::new(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""op":"extract_scenes""#));
        let back: TaskPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn dedup_keys_are_stable_per_identity() {
        let shot = ShotId::new();
        let a = TaskPayload::GenerateKeyframe { shot_id: shot };
        let b = TaskPayload::GenerateKeyframe { shot_id: shot };
        assert_eq!(a.dedup_key(), b.dedup_key());

        let c = TaskPayload::GenerateKeyframe {
            shot_id: ShotId::new(),
        };
        assert_ne!(a.dedup_key(), c.dedup_key());
    }

    #[test]
    fn skipped_tasks_are_terminal_and_satisfied() {
        let task = Task::skipped(
            JobId::new(),
            ChapterId::new(),
            TaskPayload::GenerateSceneImage {
                scene_id: SceneId::new(),
            },
        );
        assert!(task.state.is_terminal());
        assert!(task.state.is_satisfied());
        assert!(task.finished_at.is_some());
    }
}
