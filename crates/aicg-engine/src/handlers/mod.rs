//! Task handlers.
//!
//! The dispatcher pattern-matches the payload union; each handler is a
//! plain async function over the engine context. Handlers check the
//! job's cancel flag immediately before every suspension point and
//! return the artifact reference (blob key) they produced, if any.

mod audio;
mod compose;
mod extract;
mod images;
mod video;

use aicg_models::{Chapter, Job, Project, Task, TaskError, TaskPayload};

use crate::context::EngineContext;

/// Execute a task; returns an optional result reference.
pub async fn dispatch(ctx: &EngineContext, task: &Task) -> Result<Option<String>, TaskError> {
    match &task.payload.0 {
        TaskPayload::ExtractCharacters { chapter_id } => {
            extract::extract_characters(ctx, task, *chapter_id).await
        }
        TaskPayload::ExtractScenes { chapter_id } => {
            extract::extract_scenes(ctx, task, *chapter_id).await
        }
        TaskPayload::ExtractShots { scene_id } => {
            extract::extract_shots(ctx, task, *scene_id).await
        }
        TaskPayload::GenerateSceneImage { scene_id } => {
            images::generate_scene_image(ctx, task, *scene_id).await
        }
        TaskPayload::GenerateCharacterAvatar { character_id } => {
            images::generate_character_avatar(ctx, task, *character_id).await
        }
        TaskPayload::GenerateKeyframe { shot_id } => {
            images::generate_keyframe(ctx, task, *shot_id).await
        }
        TaskPayload::CreateTransition {
            script_id,
            from_shot_id,
            to_shot_id,
        } => video::create_transition(ctx, task, *script_id, *from_shot_id, *to_shot_id).await,
        TaskPayload::SubmitTransitionVideo { transition_id } => {
            video::submit_transition_video(ctx, task, *transition_id).await
        }
        TaskPayload::GenerateSentencePrompts { chapter_id } => {
            extract::generate_sentence_prompts(ctx, task, *chapter_id).await
        }
        TaskPayload::GenerateSentenceImage { sentence_id } => {
            images::generate_sentence_image(ctx, task, *sentence_id).await
        }
        TaskPayload::SynthesizeSentenceAudio { sentence_id } => {
            audio::synthesize_sentence_audio(ctx, task, *sentence_id).await
        }
        TaskPayload::ComposeVideo {
            chapter_id,
            video_task_id,
        } => compose::compose_video(ctx, task, *chapter_id, *video_task_id).await,
    }
}

/// Load the job/chapter/project triple every handler needs.
pub(crate) async fn load_env(
    ctx: &EngineContext,
    task: &Task,
) -> Result<(Job, Chapter, Project), TaskError> {
    let job = ctx.repos.jobs.get(task.job_id).await?;
    let chapter = ctx.repos.chapters.get(task.chapter_id).await?;
    let project = ctx.repos.projects.get(chapter.project_id).await?;
    Ok((job, chapter, project))
}
