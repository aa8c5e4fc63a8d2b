//! Transition handlers: prompt creation and external video submission.
//!
//! Submission deliberately ends the task once the provider accepts it —
//! generation takes minutes and must not hold a worker slot. The sweeper
//! owns completion.

use tracing::info;

use aicg_models::{ScriptId, ShotId, Task, TaskError, Transition, TransitionId};
use aicg_providers::{TextRequest, VideoSubmitRequest};

use crate::context::EngineContext;
use crate::handlers::load_env;

const TRANSITION_PROMPT_SYSTEM: &str = "You are directing an 8-second camera move between two \
    film frames. Given the two shots, describe the motion that carries the first into the \
    second: camera movement, subject movement, lighting change. One paragraph, no lists, \
    present tense.";

pub async fn create_transition(
    ctx: &EngineContext,
    task: &Task,
    script_id: ScriptId,
    from_shot_id: ShotId,
    to_shot_id: ShotId,
) -> Result<Option<String>, TaskError> {
    let (job, _chapter, project) = load_env(ctx, task).await?;
    let from = ctx.repos.scripts.get_shot(from_shot_id).await?;
    let to = ctx.repos.scripts.get_shot(to_shot_id).await?;
    let (key, model) = ctx.text_model(&job, &project).await?;

    // One transition per consecutive pair; re-runs reuse the row.
    let transition = match ctx
        .repos
        .transitions
        .find_by_pair(script_id, from_shot_id, to_shot_id)
        .await?
    {
        Some(existing) => existing,
        None => {
            let idx = from.idx.min(to.idx);
            let transition = Transition::new(script_id, from_shot_id, to_shot_id, idx);
            ctx.repos.transitions.create(&transition).await?;
            transition
        }
    };

    let prompt_input = format!(
        "First shot: {}{}\nSecond shot: {}{}",
        from.action,
        from.dialogue
            .as_deref()
            .map(|d| format!(" (dialogue: \"{d}\")"))
            .unwrap_or_default(),
        to.action,
        to.dialogue
            .as_deref()
            .map(|d| format!(" (dialogue: \"{d}\")"))
            .unwrap_or_default(),
    );

    ctx.ensure_not_cancelled(job.id).await?;
    let response = ctx
        .providers
        .complete(
            &key,
            TextRequest {
                prompt: prompt_input,
                system: Some(TRANSITION_PROMPT_SYSTEM.to_string()),
                model,
                json_mode: false,
                temperature: Some(0.6),
            },
        )
        .await?;

    let video_prompt = response.text.trim().to_string();
    if video_prompt.is_empty() {
        return Err(TaskError::malformed("model returned an empty transition prompt"));
    }

    ctx.ensure_not_cancelled(job.id).await?;
    ctx.repos
        .transitions
        .set_video_prompt(transition.id, &video_prompt)
        .await?;

    info!(transition_id = %transition.id, "transition prompt created");
    Ok(Some(transition.id.to_string()))
}

pub async fn submit_transition_video(
    ctx: &EngineContext,
    task: &Task,
    transition_id: TransitionId,
) -> Result<Option<String>, TaskError> {
    let (job, _chapter, project) = load_env(ctx, task).await?;
    let transition = ctx.repos.transitions.get(transition_id).await?;
    let prompt = transition.video_prompt.clone().ok_or_else(|| {
        TaskError::validation(format!("transition {transition_id} has no video prompt"))
    })?;

    let from = ctx.repos.scripts.get_shot(transition.from_shot_id).await?;
    let to = ctx.repos.scripts.get_shot(transition.to_shot_id).await?;
    let first_key = from.keyframe_url.ok_or_else(|| {
        TaskError::IncompleteMaterials {
            missing: vec![format!("shot_{}.keyframe", from.idx)],
        }
    })?;
    let last_key = to.keyframe_url.ok_or_else(|| TaskError::IncompleteMaterials {
        missing: vec![format!("shot_{}.keyframe", to.idx)],
    })?;

    ctx.ensure_not_cancelled(job.id).await?;
    let first_frame = ctx.blob.get(&first_key).await.map_err(TaskError::from)?;
    ctx.ensure_not_cancelled(job.id).await?;
    let last_frame = ctx.blob.get(&last_key).await.map_err(TaskError::from)?;

    let (key, model) = ctx.video_model(&job, &project).await?;

    ctx.ensure_not_cancelled(job.id).await?;
    let external_task_id = ctx
        .providers
        .submit_video(
            &key,
            VideoSubmitRequest::new(prompt, model, first_frame, last_frame),
        )
        .await?;

    // Persist the external id and release the worker; polling is the
    // sweeper's job from here.
    ctx.repos
        .transitions
        .mark_submitted(transition_id, &external_task_id)
        .await?;

    info!(transition_id = %transition_id, external_task_id, "transition video submitted");
    Ok(Some(external_task_id))
}
