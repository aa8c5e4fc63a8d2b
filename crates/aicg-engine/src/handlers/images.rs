//! Image-generation handlers: scene images, character avatars, shot
//! keyframes and sentence illustrations.

use tracing::info;

use aicg_models::{
    AssetStatus, CharacterId, ResourceType, SceneId, SentenceId, ShotId, Task, TaskError,
};
use aicg_providers::{ImageRequest, ReferenceImage};
use aicg_repo::ArtifactRef;
use aicg_storage::{new_key, ArtifactKind};

use crate::context::EngineContext;
use crate::handlers::load_env;

pub async fn generate_scene_image(
    ctx: &EngineContext,
    task: &Task,
    scene_id: SceneId,
) -> Result<Option<String>, TaskError> {
    let (job, _chapter, project) = load_env(ctx, task).await?;
    let scene = ctx.repos.scripts.get_scene(scene_id).await?;
    let (key, model) = ctx.image_model(&job, &project).await?;

    let prompt = format!(
        "Establishing shot of a film set, no people. {}. Cinematic lighting, wide angle.",
        scene.description
    );

    ctx.repos
        .scripts
        .set_scene_image_status(scene_id, AssetStatus::Processing, None)
        .await?;

    let result = async {
        ctx.ensure_not_cancelled(job.id).await?;
        let image = ctx
            .providers
            .generate_image(
                &key,
                ImageRequest {
                    prompt: prompt.clone(),
                    model: model.clone(),
                    aspect_ratio: Some("16:9".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        ctx.ensure_not_cancelled(job.id).await?;
        let blob_key = new_key(project.id, ArtifactKind::SceneImage);
        ctx.blob
            .put(&blob_key, image.bytes, &image.mime)
            .await
            .map_err(TaskError::from)?;

        ctx.repos
            .history
            .record_result(
                ArtifactRef::new(ResourceType::SceneImage, scene_id.as_uuid()),
                &blob_key,
                Some(&prompt),
                Some(&model),
            )
            .await?;
        Ok::<_, TaskError>(blob_key)
    }
    .await;

    match result {
        Ok(blob_key) => {
            info!(scene_id = %scene_id, "scene image generated");
            Ok(Some(blob_key))
        }
        Err(e) => {
            if !matches!(e, TaskError::Cancelled) {
                ctx.repos
                    .scripts
                    .set_scene_image_status(scene_id, AssetStatus::Failed, Some(&e.to_string()))
                    .await
                    .ok();
            }
            Err(e)
        }
    }
}

/// Three-view reference sheet prompt for a character.
fn avatar_prompt(name: &str, visual_traits: &str, key_visual_traits: &str) -> String {
    format!(
        "Character reference sheet for {name}: front view, side view and back view of the same \
         character on a neutral background. {visual_traits}. Always consistent: \
         {key_visual_traits}. Full body, uniform lighting."
    )
}

pub async fn generate_character_avatar(
    ctx: &EngineContext,
    task: &Task,
    character_id: CharacterId,
) -> Result<Option<String>, TaskError> {
    let (job, _chapter, project) = load_env(ctx, task).await?;
    let character = ctx.repos.characters.get(character_id).await?;
    let (key, model) = ctx.image_model(&job, &project).await?;

    let prompt = avatar_prompt(
        &character.name,
        &character.visual_traits,
        &character.key_visual_traits,
    );

    ctx.repos
        .characters
        .set_avatar_status(character_id, AssetStatus::Processing, None)
        .await?;
    ctx.repos
        .characters
        .set_generated_prompt(character_id, &prompt)
        .await?;

    let result = async {
        ctx.ensure_not_cancelled(job.id).await?;
        let image = ctx
            .providers
            .generate_image(
                &key,
                ImageRequest {
                    prompt: prompt.clone(),
                    model: model.clone(),
                    aspect_ratio: Some("16:9".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        ctx.ensure_not_cancelled(job.id).await?;
        let blob_key = new_key(project.id, ArtifactKind::CharacterAvatar);
        ctx.blob
            .put(&blob_key, image.bytes, &image.mime)
            .await
            .map_err(TaskError::from)?;

        ctx.repos
            .history
            .record_result(
                ArtifactRef::new(ResourceType::CharacterAvatar, character_id.as_uuid()),
                &blob_key,
                Some(&prompt),
                Some(&model),
            )
            .await?;
        Ok::<_, TaskError>(blob_key)
    }
    .await;

    match result {
        Ok(blob_key) => {
            info!(character_id = %character_id, name = %character.name, "avatar generated");
            Ok(Some(blob_key))
        }
        Err(e) => {
            if !matches!(e, TaskError::Cancelled) {
                ctx.repos
                    .characters
                    .set_avatar_status(character_id, AssetStatus::Failed, Some(&e.to_string()))
                    .await
                    .ok();
            }
            Err(e)
        }
    }
}

pub async fn generate_keyframe(
    ctx: &EngineContext,
    task: &Task,
    shot_id: ShotId,
) -> Result<Option<String>, TaskError> {
    let (job, _chapter, project) = load_env(ctx, task).await?;
    let shot = ctx.repos.scripts.get_shot(shot_id).await?;
    let scene = ctx.repos.scripts.get_scene(shot.scene_id).await?;
    let (key, model) = ctx.image_model(&job, &project).await?;

    // Reference images: the scene environment plus each resolved
    // character's avatar sheet. A shot with no references still renders
    // from scene context alone.
    let mut references = Vec::new();
    let mut trait_lines = Vec::new();
    if let Some(scene_image_key) = &scene.scene_image_url {
        ctx.ensure_not_cancelled(job.id).await?;
        if let Ok(bytes) = ctx.blob.get(scene_image_key).await {
            references.push(ReferenceImage {
                bytes,
                mime: "image/png".to_string(),
            });
        }
    }
    let characters = ctx
        .repos
        .characters
        .find_by_names(project.id, &shot.character_refs)
        .await?;
    for character in &characters {
        if let Some(avatar_key) = &character.avatar_url {
            ctx.ensure_not_cancelled(job.id).await?;
            if let Ok(bytes) = ctx.blob.get(avatar_key).await {
                references.push(ReferenceImage {
                    bytes,
                    mime: "image/png".to_string(),
                });
            }
        }
        trait_lines.push(format!("{}: {}", character.name, character.key_visual_traits));
    }

    let mut prompt = format!(
        "Film still. Setting: {}. Action: {}.",
        scene.description, shot.action
    );
    if let Some(dialogue) = &shot.dialogue {
        prompt.push_str(&format!(" A character says: \"{dialogue}\"."));
    }
    if !trait_lines.is_empty() {
        prompt.push_str(&format!(" Characters: {}.", trait_lines.join("; ")));
    }
    prompt.push_str(" Cinematic composition, consistent with the reference images.");

    ctx.repos
        .scripts
        .set_keyframe_prompt(shot_id, &prompt)
        .await?;
    ctx.repos
        .scripts
        .set_keyframe_status(shot_id, AssetStatus::Processing, None)
        .await?;

    let result = async {
        ctx.ensure_not_cancelled(job.id).await?;
        let image = ctx
            .providers
            .generate_image(
                &key,
                ImageRequest {
                    prompt: prompt.clone(),
                    model: model.clone(),
                    reference_images: references,
                    aspect_ratio: Some("16:9".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        ctx.ensure_not_cancelled(job.id).await?;
        let blob_key = new_key(project.id, ArtifactKind::Keyframe);
        ctx.blob
            .put(&blob_key, image.bytes, &image.mime)
            .await
            .map_err(TaskError::from)?;

        ctx.repos
            .history
            .record_result(
                ArtifactRef::new(ResourceType::ShotKeyframe, shot_id.as_uuid()),
                &blob_key,
                Some(&prompt),
                Some(&model),
            )
            .await?;
        Ok::<_, TaskError>(blob_key)
    }
    .await;

    match result {
        Ok(blob_key) => {
            info!(shot_id = %shot_id, "keyframe generated");
            Ok(Some(blob_key))
        }
        Err(e) => {
            if !matches!(e, TaskError::Cancelled) {
                ctx.repos
                    .scripts
                    .set_keyframe_status(shot_id, AssetStatus::Failed, Some(&e.to_string()))
                    .await
                    .ok();
            }
            Err(e)
        }
    }
}

pub async fn generate_sentence_image(
    ctx: &EngineContext,
    task: &Task,
    sentence_id: SentenceId,
) -> Result<Option<String>, TaskError> {
    let (job, _chapter, project) = load_env(ctx, task).await?;
    let asset = ctx.repos.sentences.get_asset(sentence_id).await?;
    let prompt = asset.image_prompt.clone().ok_or_else(|| {
        TaskError::validation(format!("sentence {sentence_id} has no image prompt yet"))
    })?;
    let (key, model) = ctx.image_model(&job, &project).await?;

    ctx.repos
        .sentences
        .set_image_status(sentence_id, AssetStatus::Processing, None)
        .await?;

    let result = async {
        ctx.ensure_not_cancelled(job.id).await?;
        let image = ctx
            .providers
            .generate_image(
                &key,
                ImageRequest {
                    prompt: prompt.clone(),
                    model: model.clone(),
                    aspect_ratio: Some("16:9".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        ctx.ensure_not_cancelled(job.id).await?;
        let blob_key = new_key(project.id, ArtifactKind::SentenceImage);
        ctx.blob
            .put(&blob_key, image.bytes, &image.mime)
            .await
            .map_err(TaskError::from)?;

        ctx.repos
            .history
            .record_result(
                ArtifactRef::new(ResourceType::SentenceImage, sentence_id.as_uuid()),
                &blob_key,
                Some(&prompt),
                Some(&model),
            )
            .await?;
        Ok::<_, TaskError>(blob_key)
    }
    .await;

    match result {
        Ok(blob_key) => Ok(Some(blob_key)),
        Err(e) => {
            if !matches!(e, TaskError::Cancelled) {
                ctx.repos
                    .sentences
                    .set_image_status(sentence_id, AssetStatus::Failed, Some(&e.to_string()))
                    .await
                    .ok();
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_prompt_mentions_three_views_and_traits() {
        let prompt = avatar_prompt("Alice", "tall, red coat", "red coat, green eyes");
        assert!(prompt.contains("front view"));
        assert!(prompt.contains("back view"));
        assert!(prompt.contains("Alice"));
        assert!(prompt.contains("red coat, green eyes"));
    }
}
