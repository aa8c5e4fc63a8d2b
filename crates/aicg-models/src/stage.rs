//! Pipeline stages.
//!
//! A stage is a level in the production DAG; the dependency edges between
//! stages live in the executor. Stage names double as job target names on
//! the API surface.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::TaskKind;

/// A level in the production DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Stage {
    // Movie pipeline, in dependency order.
    ExtractCharacters,
    ExtractScenes,
    ExtractShots,
    GenerateSceneImages,
    GenerateCharacterAvatars,
    GenerateKeyframes,
    CreateTransitions,
    GenerateTransitionVideos,

    // Narrative pipeline.
    GenerateSentencePrompts,
    GenerateSentenceImages,
    SynthesizeSentenceAudio,

    // Terminal stage of both pipelines.
    ComposeVideo,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ExtractCharacters => "extract_characters",
            Stage::ExtractScenes => "extract_scenes",
            Stage::ExtractShots => "extract_shots",
            Stage::GenerateSceneImages => "generate_scene_images",
            Stage::GenerateCharacterAvatars => "generate_character_avatars",
            Stage::GenerateKeyframes => "generate_keyframes",
            Stage::CreateTransitions => "create_transitions",
            Stage::GenerateTransitionVideos => "generate_transition_videos",
            Stage::GenerateSentencePrompts => "generate_sentence_prompts",
            Stage::GenerateSentenceImages => "generate_sentence_images",
            Stage::SynthesizeSentenceAudio => "synthesize_sentence_audio",
            Stage::ComposeVideo => "compose_video",
        }
    }

    /// The kind of tasks this stage fans out.
    pub fn task_kind(&self) -> TaskKind {
        match self {
            Stage::ExtractCharacters
            | Stage::ExtractScenes
            | Stage::ExtractShots
            | Stage::CreateTransitions
            | Stage::GenerateSentencePrompts => TaskKind::Text,
            Stage::GenerateSceneImages
            | Stage::GenerateCharacterAvatars
            | Stage::GenerateKeyframes
            | Stage::GenerateSentenceImages => TaskKind::Image,
            Stage::SynthesizeSentenceAudio => TaskKind::Tts,
            Stage::GenerateTransitionVideos => TaskKind::VideoSubmit,
            Stage::ComposeVideo => TaskKind::Assembly,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error parsing a stage name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown stage: {0}")]
pub struct UnknownStage(pub String);

impl std::str::FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract_characters" => Ok(Stage::ExtractCharacters),
            "extract_scenes" => Ok(Stage::ExtractScenes),
            "extract_shots" => Ok(Stage::ExtractShots),
            "generate_scene_images" => Ok(Stage::GenerateSceneImages),
            "generate_character_avatars" => Ok(Stage::GenerateCharacterAvatars),
            "generate_keyframes" => Ok(Stage::GenerateKeyframes),
            "create_transitions" => Ok(Stage::CreateTransitions),
            "generate_transition_videos" => Ok(Stage::GenerateTransitionVideos),
            "generate_sentence_prompts" => Ok(Stage::GenerateSentencePrompts),
            "generate_sentence_images" => Ok(Stage::GenerateSentenceImages),
            "synthesize_sentence_audio" => Ok(Stage::SynthesizeSentenceAudio),
            "compose_video" => Ok(Stage::ComposeVideo),
            other => Err(UnknownStage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn stage_names_roundtrip() {
        for stage in [
            Stage::ExtractCharacters,
            Stage::ExtractScenes,
            Stage::ExtractShots,
            Stage::GenerateSceneImages,
            Stage::GenerateCharacterAvatars,
            Stage::GenerateKeyframes,
            Stage::CreateTransitions,
            Stage::GenerateTransitionVideos,
            Stage::GenerateSentencePrompts,
            Stage::GenerateSentenceImages,
            Stage::SynthesizeSentenceAudio,
            Stage::ComposeVideo,
        ] {
            assert_eq!(Stage::from_str(stage.as_str()).unwrap(), stage);
        }
    }

    #[test]
    fn unknown_stage_is_an_error() {
        assert!(Stage::from_str("publish_to_platform").is_err());
    }
}
