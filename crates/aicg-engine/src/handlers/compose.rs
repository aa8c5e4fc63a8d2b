//! Terminal assembly handler.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use aicg_models::{
    ChapterId, PipelineStatus, ProgressMessage, ProjectKind, Task, TaskError, TransitionStatus,
    VideoTaskId, VideoTaskStatus,
};
use aicg_media::{Assembler, AssemblyStep, BgmTrack, OutputSettings, SentenceClip};
use aicg_storage::{new_key, ArtifactKind, DEFAULT_PRESIGN_TTL};

use crate::context::EngineContext;
use crate::handlers::load_env;

/// Map an assembly step onto the task's overall progress fraction.
fn step_progress(step: &AssemblyStep) -> f32 {
    let fraction = if step.total == 0 {
        0.0
    } else {
        step.current as f32 / step.total as f32
    };
    match step.status {
        VideoTaskStatus::Validating => 0.02,
        VideoTaskStatus::Downloading => 0.05 + 0.25 * fraction,
        VideoTaskStatus::Synthesizing => 0.30 + 0.30 * fraction,
        VideoTaskStatus::Concatenating => 0.60 + 0.30 * fraction,
        VideoTaskStatus::Uploading => 0.95,
        VideoTaskStatus::Completed => 1.0,
        VideoTaskStatus::Failed => 0.0,
    }
}

pub async fn compose_video(
    ctx: &EngineContext,
    task: &Task,
    chapter_id: ChapterId,
    video_task_id: VideoTaskId,
) -> Result<Option<String>, TaskError> {
    let (job, chapter, project) = load_env(ctx, task).await?;
    let video_task = ctx.repos.video_tasks.get(video_task_id).await?;

    let settings = OutputSettings {
        width: video_task.width,
        height: video_task.height,
        fps: video_task.fps,
        bgm: match &video_task.bgm_ref {
            Some(bgm_key) if video_task.bgm_volume > 0.0 => Some(BgmTrack {
                url: ctx
                    .blob
                    .presign(bgm_key, DEFAULT_PRESIGN_TTL)
                    .await
                    .map_err(TaskError::from)?,
                volume: video_task.bgm_volume,
            }),
            _ => None,
        },
    };

    // Validate inputs before any work; gaps are enumerated for the
    // caller's remediation.
    ctx.repos
        .video_tasks
        .update_step(video_task_id, VideoTaskStatus::Validating, 0, 0, 0.02)
        .await?;

    let result = match project.kind {
        ProjectKind::Movie => {
            compose_movie(ctx, &job, chapter_id, video_task_id, &settings).await
        }
        ProjectKind::Narrative => {
            compose_narrative(ctx, &job, chapter_id, video_task_id, &settings).await
        }
    };

    match result {
        Ok(final_key) => {
            ctx.repos
                .video_tasks
                .complete(video_task_id, &final_key)
                .await?;
            ctx.repos.jobs.set_result_ref(job.id, &final_key).await?;
            ctx.repos
                .chapters
                .advance_status(chapter.id, PipelineStatus::Completed)
                .await?;
            info!(chapter_id = %chapter_id, key = %final_key, "chapter video composed");
            Ok(Some(final_key))
        }
        Err(e) => {
            if !matches!(e, TaskError::Cancelled) {
                ctx.repos
                    .video_tasks
                    .fail(video_task_id, &e.to_string())
                    .await
                    .ok();
            }
            Err(e)
        }
    }
}

async fn compose_movie(
    ctx: &EngineContext,
    job: &aicg_models::Job,
    chapter_id: ChapterId,
    video_task_id: VideoTaskId,
    settings: &OutputSettings,
) -> Result<String, TaskError> {
    let script = ctx
        .repos
        .scripts
        .get_by_chapter(chapter_id)
        .await?
        .ok_or_else(|| TaskError::not_found(format!("script for chapter {chapter_id}")))?;

    let shots = ctx.repos.scripts.list_shots_by_script(script.id).await?;
    if shots.len() < 2 {
        return Err(TaskError::IncompleteMaterials {
            missing: vec!["at least 2 shots required for movie assembly".to_string()],
        });
    }

    let mut missing: Vec<String> = shots
        .iter()
        .filter(|s| s.keyframe_url.is_none())
        .map(|s| format!("shot_{}.keyframe", s.idx))
        .collect();
    missing.extend(ctx.repos.transitions.incomplete_for_script(script.id).await?);

    let transitions = ctx.repos.transitions.list_by_script(script.id).await?;
    if transitions.len() + 1 < shots.len() {
        missing.push(format!(
            "{} transition(s) not yet created",
            shots.len() - 1 - transitions.len()
        ));
    }
    if !missing.is_empty() {
        return Err(TaskError::IncompleteMaterials { missing });
    }

    // Presign every clip in order.
    let mut clip_urls = Vec::with_capacity(transitions.len());
    for transition in &transitions {
        debug_assert_eq!(transition.status, TransitionStatus::Completed);
        let key = transition.video_url.as_ref().expect("validated above");
        ctx.ensure_not_cancelled(job.id).await?;
        clip_urls.push(
            ctx.blob
                .presign(key, DEFAULT_PRESIGN_TTL)
                .await
                .map_err(TaskError::from)?,
        );
    }

    run_assembly(ctx, job, video_task_id, settings, AssemblyInput::Movie(clip_urls)).await
}

async fn compose_narrative(
    ctx: &EngineContext,
    job: &aicg_models::Job,
    chapter_id: ChapterId,
    video_task_id: VideoTaskId,
    settings: &OutputSettings,
) -> Result<String, TaskError> {
    let assets = ctx.repos.sentences.list_assets_by_chapter(chapter_id).await?;
    if assets.is_empty() {
        return Err(TaskError::IncompleteMaterials {
            missing: vec!["no sentences ingested".to_string()],
        });
    }

    let mut missing = Vec::new();
    for (sentence, asset) in &assets {
        if asset.image_url.is_none() {
            missing.push(format!("sentence_{}.image", sentence.idx));
        }
        if asset.audio_url.is_none() || asset.duration_ms.is_none() {
            missing.push(format!("sentence_{}.audio", sentence.idx));
        }
    }
    if !missing.is_empty() {
        return Err(TaskError::IncompleteMaterials { missing });
    }

    // All materials verified present; the chapter is prepared even if the
    // mux below fails and gets retried.
    ctx.repos
        .chapters
        .advance_status(chapter_id, PipelineStatus::MaterialsPrepared)
        .await
        .ok();

    let mut sentences = Vec::with_capacity(assets.len());
    for (sentence, asset) in &assets {
        ctx.ensure_not_cancelled(job.id).await?;
        let image_url = ctx
            .blob
            .presign(asset.image_url.as_ref().expect("validated"), DEFAULT_PRESIGN_TTL)
            .await
            .map_err(TaskError::from)?;
        let audio_url = ctx
            .blob
            .presign(asset.audio_url.as_ref().expect("validated"), DEFAULT_PRESIGN_TTL)
            .await
            .map_err(TaskError::from)?;
        sentences.push(SentenceClip {
            image_url,
            audio_url,
            duration_ms: asset.duration_ms.expect("validated") as u64,
            subtitle_text: asset
                .subtitle_text
                .clone()
                .unwrap_or_else(|| sentence.text.clone()),
        });
    }

    run_assembly(
        ctx,
        job,
        video_task_id,
        settings,
        AssemblyInput::Narrative(sentences),
    )
    .await
}

enum AssemblyInput {
    Movie(Vec<String>),
    Narrative(Vec<SentenceClip>),
}

/// Drive the assembler with progress persistence and cancel bridging,
/// then upload the finished file.
async fn run_assembly(
    ctx: &EngineContext,
    job: &aicg_models::Job,
    video_task_id: VideoTaskId,
    settings: &OutputSettings,
    input: AssemblyInput,
) -> Result<String, TaskError> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<AssemblyStep>();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    // Persist each step and republish it on the progress channel.
    let persist_ctx = ctx.clone();
    let persist_job = job.id;
    let persister = tokio::spawn(async move {
        while let Some(step) = events_rx.recv().await {
            persist_ctx
                .repos
                .video_tasks
                .update_step(
                    video_task_id,
                    step.status,
                    step.current as i32,
                    step.total as i32,
                    step_progress(&step),
                )
                .await
                .ok();
            persist_ctx
                .progress
                .message(
                    persist_job,
                    ProgressMessage::assembly_step(step.status, step.current, step.total),
                )
                .await
                .ok();
        }
    });

    // Bridge the cooperative cancel flag onto the assembler's watch
    // channel so a kill reaches the running FFmpeg process.
    let cancel_ctx = ctx.clone();
    let cancel_job = job.id;
    let canceller = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(2)).await;
            if cancel_ctx
                .queue
                .is_cancelled(cancel_job)
                .await
                .unwrap_or(false)
            {
                let _ = cancel_tx.send(true);
                break;
            }
        }
    });

    let assembler = Assembler::new();
    let assembled = match input {
        AssemblyInput::Movie(clips) => {
            assembler
                .assemble_movie(settings, &clips, events_tx, cancel_rx)
                .await
        }
        AssemblyInput::Narrative(sentences) => {
            assembler
                .assemble_narrative(settings, &sentences, events_tx, cancel_rx)
                .await
        }
    };
    canceller.abort();
    persister.await.ok();

    let output = assembled.map_err(TaskError::from)?;

    // Upload the final blob; scratch cleans itself up on drop.
    ctx.ensure_not_cancelled(job.id).await?;
    let project = ctx.repos.projects.get_for_chapter(job.chapter_id).await?;
    let final_key = new_key(project.id, ArtifactKind::FinalVideo);
    ctx.repos
        .video_tasks
        .update_step(video_task_id, VideoTaskStatus::Uploading, 0, 0, 0.95)
        .await?;
    ctx.blob
        .put_file(&final_key, &output.video_path, "video/mp4")
        .await
        .map_err(TaskError::from)?;

    if output.duration_s < 0.5 {
        warn!(duration_s = output.duration_s, "assembled video is suspiciously short");
    }

    Ok(final_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_progress_is_monotonic_over_the_pipeline() {
        let steps = [
            AssemblyStep {
                status: VideoTaskStatus::Validating,
                current: 0,
                total: 0,
            },
            AssemblyStep {
                status: VideoTaskStatus::Downloading,
                current: 1,
                total: 4,
            },
            AssemblyStep {
                status: VideoTaskStatus::Downloading,
                current: 4,
                total: 4,
            },
            AssemblyStep {
                status: VideoTaskStatus::Synthesizing,
                current: 2,
                total: 4,
            },
            AssemblyStep {
                status: VideoTaskStatus::Concatenating,
                current: 4,
                total: 4,
            },
            AssemblyStep {
                status: VideoTaskStatus::Uploading,
                current: 0,
                total: 0,
            },
            AssemblyStep {
                status: VideoTaskStatus::Completed,
                current: 0,
                total: 0,
            },
        ];
        let values: Vec<f32> = steps.iter().map(step_progress).collect();
        for pair in values.windows(2) {
            assert!(pair[1] >= pair[0], "progress went backwards: {values:?}");
        }
        assert_eq!(*values.last().unwrap(), 1.0);
    }
}
