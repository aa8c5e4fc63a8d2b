//! Progress message schema published over the progress channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChapterId, TaskId};
use crate::stage::Stage;
use crate::task::{TaskKind, TaskState};
use crate::video_task::VideoTaskStatus;

/// Message envelope published per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressMessage {
    /// Free-form log line.
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Weighted job progress in `[0, 1]`.
    Progress { value: f32 },

    TaskStarted {
        task_id: TaskId,
        stage: Stage,
        kind: TaskKind,
    },

    TaskFinished {
        task_id: TaskId,
        stage: Stage,
        state: TaskState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Every task of a stage reached a terminal state.
    StageCompleted {
        stage: Stage,
        success: u32,
        failed: u32,
        skipped: u32,
    },

    /// Assembly step advanced (download or mux).
    AssemblyStep {
        status: VideoTaskStatus,
        current: u32,
        total: u32,
    },

    /// Job finished successfully.
    Done {
        chapter_id: ChapterId,
        #[serde(skip_serializing_if = "Option::is_none")]
        video_url: Option<String>,
    },

    /// Job failed terminally.
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressMessage {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn progress(value: f32) -> Self {
        Self::Progress {
            value: value.clamp(0.0, 1.0),
        }
    }

    pub fn task_started(task_id: TaskId, stage: Stage, kind: TaskKind) -> Self {
        Self::TaskStarted {
            task_id,
            stage,
            kind,
        }
    }

    pub fn task_finished(
        task_id: TaskId,
        stage: Stage,
        state: TaskState,
        error: Option<String>,
    ) -> Self {
        Self::TaskFinished {
            task_id,
            stage,
            state,
            error,
        }
    }

    pub fn stage_completed(stage: Stage, success: u32, failed: u32, skipped: u32) -> Self {
        Self::StageCompleted {
            stage,
            success,
            failed,
            skipped,
        }
    }

    pub fn assembly_step(status: VideoTaskStatus, current: u32, total: u32) -> Self {
        Self::AssemblyStep {
            status,
            current,
            total,
        }
    }

    pub fn done(chapter_id: ChapterId, video_url: Option<String>) -> Self {
        Self::Done {
            chapter_id,
            video_url,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_clamped() {
        match ProgressMessage::progress(1.7) {
            ProgressMessage::Progress { value } => assert_eq!(value, 1.0),
            _ => unreachable!(),
        }
        match ProgressMessage::progress(-0.3) {
            ProgressMessage::Progress { value } => assert_eq!(value, 0.0),
            _ => unreachable!(),
        }
    }

    #[test]
    fn messages_serialize_tagged() {
        let msg = ProgressMessage::stage_completed(Stage::GenerateKeyframes, 3, 0, 1);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"stage_completed""#));
        assert!(json.contains("generate_keyframes"));
    }
}
