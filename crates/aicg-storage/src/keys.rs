//! Blob key layout.
//!
//! Keys are a flat namespace with the path-prefix convention
//! `{project_id}/{artifact_type}/{uuid}.{ext}`.

use uuid::Uuid;

use aicg_models::ProjectId;

use crate::error::{StorageError, StorageResult};

/// Artifact families stored under a project prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    SceneImage,
    CharacterAvatar,
    Keyframe,
    TransitionVideo,
    SentenceImage,
    SentenceAudio,
    Bgm,
    FinalVideo,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::SceneImage => "scene_images",
            ArtifactKind::CharacterAvatar => "avatars",
            ArtifactKind::Keyframe => "keyframes",
            ArtifactKind::TransitionVideo => "transitions",
            ArtifactKind::SentenceImage => "sentence_images",
            ArtifactKind::SentenceAudio => "sentence_audio",
            ArtifactKind::Bgm => "bgm",
            ArtifactKind::FinalVideo => "videos",
        }
    }

    /// Canonical extension for the artifact's payload.
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::SceneImage
            | ArtifactKind::CharacterAvatar
            | ArtifactKind::Keyframe
            | ArtifactKind::SentenceImage => "png",
            ArtifactKind::TransitionVideo | ArtifactKind::FinalVideo => "mp4",
            ArtifactKind::SentenceAudio => "wav",
            ArtifactKind::Bgm => "mp3",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self.extension() {
            "png" => "image/png",
            "mp4" => "video/mp4",
            "wav" => "audio/wav",
            "mp3" => "audio/mpeg",
            _ => "application/octet-stream",
        }
    }
}

/// Mint a fresh key for an artifact.
pub fn new_key(project_id: ProjectId, kind: ArtifactKind) -> String {
    format!(
        "{}/{}/{}.{}",
        project_id,
        kind.as_str(),
        Uuid::new_v4(),
        kind.extension()
    )
}

/// Parsed view of a blob key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKey {
    pub project_id: ProjectId,
    pub artifact_dir: String,
    pub file_name: String,
}

/// Parse a key back into its components.
pub fn parse_key(key: &str) -> StorageResult<ParsedKey> {
    let mut parts = key.splitn(3, '/');
    let (project, dir, file) = match (parts.next(), parts.next(), parts.next()) {
        (Some(p), Some(d), Some(f)) if !d.is_empty() && !f.is_empty() => (p, d, f),
        _ => return Err(StorageError::InvalidKey(key.to_string())),
    };
    let project_id = ProjectId::parse(project)
        .map_err(|_| StorageError::InvalidKey(format!("bad project segment in {key}")))?;
    Ok(ParsedKey {
        project_id,
        artifact_dir: dir.to_string(),
        file_name: file.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_roundtrips() {
        let project = ProjectId::new();
        let key = new_key(project, ArtifactKind::Keyframe);
        let parsed = parse_key(&key).unwrap();
        assert_eq!(parsed.project_id, project);
        assert_eq!(parsed.artifact_dir, "keyframes");
        assert!(parsed.file_name.ends_with(".png"));
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(parse_key("no-slashes").is_err());
        assert!(parse_key("only/two").is_err());
        assert!(parse_key("not-a-uuid/keyframes/x.png").is_err());
    }

    #[test]
    fn content_types_match_extensions() {
        assert_eq!(ArtifactKind::TransitionVideo.content_type(), "video/mp4");
        assert_eq!(ArtifactKind::SentenceAudio.content_type(), "audio/wav");
        assert_eq!(ArtifactKind::Keyframe.content_type(), "image/png");
    }
}
