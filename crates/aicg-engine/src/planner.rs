//! Job planning and frontier advancement.
//!
//! `submit_job` creates the job and runs one advancement pass;
//! `advance_job` is re-run after every terminal task (and by the sweeper
//! when a transition completes) to materialize newly-ready stages,
//! enqueue their tasks and finalize the job once everything settled.
//!
//! Stages expand lazily: a stage's fan-out is computed from repository
//! state at the moment its upstream gate opens, because the artifacts it
//! fans out over (scenes, shots, transitions) do not exist earlier.
//! Tasks whose artifact already exists are recorded as `skipped` without
//! ever being enqueued, which is what makes resubmission idempotent.

use tracing::{info, warn};

use aicg_models::{
    AssetStatus, Chapter, Job, JobId, JobState, ModelSelection, PipelineStatus, Project,
    ProjectKind, Stage, Task, TaskError, TaskPayload, TaskState, TransitionStatus, VideoTask,
    VideoTaskStatus,
};
use aicg_queue::TaskEnvelope;

use crate::context::EngineContext;
use crate::graph;

/// Requested output settings for a compose target.
#[derive(Debug, Clone)]
pub struct VideoSpec {
    pub width: i32,
    pub height: i32,
    pub fps: i32,
    pub bgm_ref: Option<String>,
    pub bgm_volume: f32,
}

impl Default for VideoSpec {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            bgm_ref: None,
            bgm_volume: 0.0,
        }
    }
}

/// Outcome of evaluating a stage's upstream gate.
enum Gate {
    Open,
    Waiting,
    Blocked(String),
}

/// Submit a job driving `chapter_id` to `target_stage`.
/// Options beyond the target stage.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub continue_on_partial: bool,
    pub task_timeout_secs: Option<i64>,
    pub video_spec: Option<VideoSpec>,
}

pub async fn submit_job(
    ctx: &EngineContext,
    chapter_id: aicg_models::ChapterId,
    target_stage: Stage,
    models: ModelSelection,
    options: SubmitOptions,
) -> Result<Job, TaskError> {
    let chapter = ctx.repos.chapters.get(chapter_id).await?;
    let project = ctx.repos.projects.get(chapter.project_id).await?;

    // Total readiness logic depends on the target being in the pipeline.
    graph::required_stages(project.kind, target_stage)?;

    if target_stage == Stage::ComposeVideo {
        ensure_video_task(ctx, &chapter, options.video_spec.unwrap_or_default()).await?;
    }

    let job = Job::new(chapter_id, target_stage, models)
        .with_continue_on_partial(options.continue_on_partial)
        .with_task_timeout(options.task_timeout_secs);
    ctx.repos.jobs.create(&job).await?;
    ctx.progress
        .add_active_job(job.id)
        .await
        .map_err(|e| TaskError::provider(e.to_string()))?;

    advance_job(ctx, job.id).await?;
    Ok(ctx.repos.jobs.get(job.id).await?)
}

/// Request cooperative cancellation of a job.
pub async fn cancel_job(ctx: &EngineContext, job_id: JobId) -> Result<(), TaskError> {
    ctx.repos.jobs.request_cancel(job_id).await?;
    ctx.queue
        .set_cancelled(job_id)
        .await
        .map_err(|e| TaskError::provider(e.to_string()))?;
    advance_job(ctx, job_id).await
}

/// Explicit acceptance of partial materials (S7 → materials_prepared).
pub async fn accept_partial_materials(
    ctx: &EngineContext,
    chapter_id: aicg_models::ChapterId,
) -> Result<(), TaskError> {
    ctx.repos
        .chapters
        .advance_status(chapter_id, PipelineStatus::MaterialsPrepared)
        .await?;
    Ok(())
}

/// Reuse or create the chapter's assembly record.
async fn ensure_video_task(
    ctx: &EngineContext,
    chapter: &Chapter,
    spec: VideoSpec,
) -> Result<VideoTask, TaskError> {
    if let Some(existing) = ctx.repos.video_tasks.latest_by_chapter(chapter.id).await? {
        if !existing.status.is_terminal() {
            return Ok(existing);
        }
        if existing.status == VideoTaskStatus::Completed && existing.video_url.is_some() {
            return Ok(existing);
        }
    }
    let task = VideoTask::new(
        chapter.id,
        spec.width,
        spec.height,
        spec.fps,
        spec.bgm_ref,
        spec.bgm_volume,
    )?;
    ctx.repos.video_tasks.create(&task).await?;
    Ok(task)
}

/// One advancement pass over a job's stage frontier.
pub async fn advance_job(ctx: &EngineContext, job_id: JobId) -> Result<(), TaskError> {
    let job = match ctx.repos.jobs.get(job_id).await {
        Ok(job) => job,
        // Swept or deleted concurrently; nothing to advance.
        Err(aicg_repo::RepoError::NotFound(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if job.state.is_terminal() {
        return Ok(());
    }

    if job.cancel_requested {
        return settle_cancellation(ctx, &job).await;
    }

    ctx.repos.jobs.mark_running(job_id).await?;

    let chapter = ctx.repos.chapters.get(job.chapter_id).await?;
    let project = ctx.repos.projects.get(chapter.project_id).await?;
    let stages = graph::required_stages(project.kind, job.target_stage)?;

    let mut all_settled = true;

    for stage in &stages {
        // Re-read so this pass sees its own materializations.
        let job = ctx.repos.jobs.get(job_id).await?;

        if *stage == Stage::GenerateKeyframes {
            materialize_ready_keyframes(ctx, &job, &project).await?;
        }

        if !job.stage_materialized(*stage) {
            match stage_gate(ctx, &job, &project, *stage).await? {
                Gate::Open => {
                    materialize_stage(ctx, &job, &chapter, &project, *stage).await?;
                }
                Gate::Waiting => {
                    all_settled = false;
                    continue;
                }
                Gate::Blocked(reason) => {
                    return finalize_job(ctx, &job, JobState::Failed, Some(reason)).await;
                }
            }
        }

        let job = ctx.repos.jobs.get(job_id).await?;
        if !job.stage_materialized(*stage) {
            // Incremental stages mark themselves materialized only once
            // their full fan-out exists.
            all_settled = false;
            continue;
        }

        let counts = ctx.repos.tasks.stage_counts(job_id, *stage).await?;
        if !counts.settled() {
            all_settled = false;
            continue;
        }

        if counts.total > 0 && counts.satisfied() == 0 {
            return finalize_job(
                ctx,
                &job,
                JobState::Failed,
                Some(format!("stage {stage} produced no successful tasks")),
            )
            .await;
        }

        if counts.failed == 0 {
            advance_chapter_milestone(ctx, &chapter, project.kind, *stage).await?;
        }
    }

    if all_settled {
        let job = ctx.repos.jobs.get(job_id).await?;
        if job.statistics.failed > 0 && !job.continue_on_partial {
            return finalize_job(
                ctx,
                &job,
                JobState::Failed,
                Some(format!("{} task(s) failed", job.statistics.failed)),
            )
            .await;
        }
        return finalize_job(ctx, &job, JobState::Success, None).await;
    }

    Ok(())
}

/// Cancellation settles once no task is still running.
async fn settle_cancellation(ctx: &EngineContext, job: &Job) -> Result<(), TaskError> {
    ctx.repos.tasks.cancel_open_tasks(job.id).await?;
    let open = ctx.repos.tasks.open_count(job.id).await?;
    if open == 0 {
        finalize_job(ctx, job, JobState::Cancelled, None).await?;
    }
    Ok(())
}

async fn finalize_job(
    ctx: &EngineContext,
    job: &Job,
    state: JobState,
    error: Option<String>,
) -> Result<(), TaskError> {
    let (code, message) = match (&state, &error) {
        (JobState::Failed, Some(msg)) => (Some("pipeline_failed"), Some(msg.as_str())),
        (JobState::Cancelled, _) => (Some("cancelled"), None),
        _ => (None, None),
    };
    ctx.repos.jobs.finish(job.id, state, code, message).await?;

    // Tasks that never started must not run against a dead job.
    if state != JobState::Success {
        ctx.repos.tasks.cancel_open_tasks(job.id).await?;
    }

    if state == JobState::Failed {
        ctx.repos
            .chapters
            .advance_status(job.chapter_id, PipelineStatus::Failed)
            .await
            .ok();
    }

    let refreshed = ctx.repos.jobs.get(job.id).await?;
    let message = match state {
        JobState::Success => {
            aicg_models::ProgressMessage::done(job.chapter_id, refreshed.result_ref.clone())
        }
        JobState::Cancelled => aicg_models::ProgressMessage::log("job cancelled"),
        _ => aicg_models::ProgressMessage::error(
            error.unwrap_or_else(|| "job failed".to_string()),
        ),
    };
    ctx.progress.message(job.id, message).await.ok();
    ctx.progress.remove_active_job(job.id).await.ok();
    ctx.queue.clear_cancelled(job.id).await.ok();

    info!(job_id = %job.id, state = %state, "job finalized");
    Ok(())
}

/// Evaluate a stage's upstream gate.
async fn stage_gate(
    ctx: &EngineContext,
    job: &Job,
    project: &Project,
    stage: Stage,
) -> Result<Gate, TaskError> {
    for upstream in graph::upstreams(project.kind, stage) {
        if !job.stage_materialized(*upstream) {
            return Ok(Gate::Waiting);
        }
        let counts = ctx.repos.tasks.stage_counts(job.id, *upstream).await?;
        if !counts.settled() {
            return Ok(Gate::Waiting);
        }
        if counts.total > 0 && counts.satisfied() == 0 {
            return Ok(Gate::Blocked(format!(
                "upstream stage {upstream} produced no successful tasks"
            )));
        }
        if counts.failed > 0 && !job.continue_on_partial {
            return Ok(Gate::Blocked(format!(
                "upstream stage {upstream} is partial ({} failed) and continue_on_partial is off",
                counts.failed
            )));
        }
    }

    // Compose additionally waits for the transitions themselves: the
    // submit tasks settle long before the external generations finish.
    if stage == Stage::ComposeVideo && project.kind == ProjectKind::Movie {
        return compose_gate(ctx, job).await;
    }

    Ok(Gate::Open)
}

async fn compose_gate(ctx: &EngineContext, job: &Job) -> Result<Gate, TaskError> {
    let Some(script) = ctx.repos.scripts.get_by_chapter(job.chapter_id).await? else {
        return Ok(Gate::Blocked("chapter has no script".to_string()));
    };
    let transitions = ctx.repos.transitions.list_by_script(script.id).await?;

    let mut failed = 0usize;
    for transition in &transitions {
        match transition.status {
            TransitionStatus::Completed => {}
            TransitionStatus::Failed => failed += 1,
            _ => return Ok(Gate::Waiting),
        }
    }

    if failed > 0 && !job.continue_on_partial {
        return Ok(Gate::Blocked(format!(
            "{failed} transition video(s) failed and continue_on_partial is off"
        )));
    }
    Ok(Gate::Open)
}

/// Keyframe tasks materialize per shot as soon as the shot exists and the
/// avatars it references are done — the character edge is a fine-grained
/// dependency, not the coarse stage edge.
async fn materialize_ready_keyframes(
    ctx: &EngineContext,
    job: &Job,
    project: &Project,
) -> Result<(), TaskError> {
    if job.stage_materialized(Stage::GenerateKeyframes) {
        return Ok(());
    }
    if !job.stage_materialized(Stage::ExtractShots) {
        return Ok(());
    }
    let Some(script) = ctx.repos.scripts.get_by_chapter(job.chapter_id).await? else {
        return Ok(());
    };

    let shots_counts = ctx
        .repos
        .tasks
        .stage_counts(job.id, Stage::ExtractShots)
        .await?;
    let avatars_settled = job.stage_materialized(Stage::GenerateCharacterAvatars)
        && ctx
            .repos
            .tasks
            .stage_counts(job.id, Stage::GenerateCharacterAvatars)
            .await?
            .settled();

    let shots = ctx.repos.scripts.list_shots_by_script(script.id).await?;
    let mut batch = MaterializedBatch::default();

    for shot in &shots {
        let payload = TaskPayload::GenerateKeyframe { shot_id: shot.id };

        let ready = if shot.character_refs.is_empty() {
            true
        } else {
            let characters = ctx
                .repos
                .characters
                .find_by_names(project.id, &shot.character_refs)
                .await?;
            let all_done = characters
                .iter()
                .all(|c| c.avatar_status == AssetStatus::Completed)
                && characters.len() == shot.character_refs.len();
            // Failed or dangling avatars stop blocking once the avatar
            // stage settles; the keyframe then renders from scene
            // context alone (if policy allows the job to continue).
            all_done || (avatars_settled && (job.continue_on_partial || characters.iter().all(|c| c.avatar_status.is_terminal())))
        };

        if ready {
            batch
                .push(ctx, job, payload, shot.keyframe_url.is_some())
                .await?;
        }
    }

    batch.commit(ctx, job, Stage::GenerateKeyframes).await?;

    // The stage is fully materialized once every shot has a task and the
    // shot extraction itself is settled.
    if shots_counts.settled() && avatars_settled {
        let keyframe_counts = ctx
            .repos
            .tasks
            .stage_counts(job.id, Stage::GenerateKeyframes)
            .await?;
        if keyframe_counts.total as usize >= shots.len() {
            ctx.repos
                .jobs
                .mark_stage_materialized(job.id, Stage::GenerateKeyframes.as_str())
                .await?;
        }
    }
    Ok(())
}

/// Accumulates inserted tasks of one materialization pass.
#[derive(Default)]
struct MaterializedBatch {
    total: i32,
    skipped: i32,
    weight_total: i64,
    weight_done: i64,
    to_enqueue: Vec<TaskEnvelope>,
}

impl MaterializedBatch {
    /// Insert one task, as `skipped` when the artifact already exists.
    async fn push(
        &mut self,
        ctx: &EngineContext,
        job: &Job,
        payload: TaskPayload,
        pre_satisfied: bool,
    ) -> Result<(), TaskError> {
        let task = if pre_satisfied {
            Task::skipped(job.id, job.chapter_id, payload)
        } else {
            Task::new(job.id, job.chapter_id, payload)
        };

        let inserted = ctx.repos.tasks.insert(&task).await?;
        if !inserted {
            return Ok(()); // already materialized in an earlier pass
        }

        self.total += 1;
        self.weight_total += task.weight as i64;
        if task.state == TaskState::Skipped {
            self.skipped += 1;
            self.weight_done += task.weight as i64;
        } else {
            self.to_enqueue.push(TaskEnvelope {
                task_id: task.id,
                kind: task.kind,
            });
        }
        Ok(())
    }

    /// Roll counters into the job and enqueue the runnable tasks, in
    /// submission order (the tie-break for equal-priority tasks).
    async fn commit(self, ctx: &EngineContext, job: &Job, stage: Stage) -> Result<(), TaskError> {
        if self.total > 0 {
            ctx.repos
                .jobs
                .add_materialized(
                    job.id,
                    self.total,
                    self.skipped,
                    self.weight_total,
                    self.weight_done,
                )
                .await?;
            info!(
                job_id = %job.id,
                stage = stage.as_str(),
                total = self.total,
                skipped = self.skipped,
                "materialized stage tasks"
            );
        }
        for envelope in self.to_enqueue {
            match ctx.queue.enqueue(&envelope).await {
                Ok(_) => {}
                Err(aicg_queue::QueueError::EnqueueFailed(_)) => {
                    // Another pass raced us; the delivery already exists.
                }
                Err(e) => return Err(TaskError::provider(e.to_string())),
            }
        }
        Ok(())
    }
}

/// Materialize a coarse stage's fan-out from current repository state.
async fn materialize_stage(
    ctx: &EngineContext,
    job: &Job,
    chapter: &Chapter,
    project: &Project,
    stage: Stage,
) -> Result<(), TaskError> {
    let mut batch = MaterializedBatch::default();

    match stage {
        Stage::ExtractCharacters => {
            let pre = !ctx
                .repos
                .characters
                .list_by_project(project.id)
                .await?
                .is_empty();
            batch
                .push(
                    ctx,
                    job,
                    TaskPayload::ExtractCharacters {
                        chapter_id: chapter.id,
                    },
                    pre,
                )
                .await?;
        }

        Stage::ExtractScenes => {
            let pre = match ctx.repos.scripts.get_by_chapter(chapter.id).await? {
                Some(script) => !ctx.repos.scripts.list_scenes(script.id).await?.is_empty(),
                None => false,
            };
            batch
                .push(
                    ctx,
                    job,
                    TaskPayload::ExtractScenes {
                        chapter_id: chapter.id,
                    },
                    pre,
                )
                .await?;
        }

        Stage::ExtractShots => {
            let script = require_script(ctx, chapter).await?;
            for scene in ctx.repos.scripts.list_scenes(script.id).await? {
                let pre = !ctx
                    .repos
                    .scripts
                    .list_shots_by_scene(scene.id)
                    .await?
                    .is_empty();
                batch
                    .push(
                        ctx,
                        job,
                        TaskPayload::ExtractShots { scene_id: scene.id },
                        pre,
                    )
                    .await?;
            }
        }

        Stage::GenerateSceneImages => {
            let script = require_script(ctx, chapter).await?;
            for scene in ctx.repos.scripts.list_scenes(script.id).await? {
                let pre = scene.scene_image_url.is_some();
                batch
                    .push(
                        ctx,
                        job,
                        TaskPayload::GenerateSceneImage { scene_id: scene.id },
                        pre,
                    )
                    .await?;
            }
        }

        Stage::GenerateCharacterAvatars => {
            for character in ctx.repos.characters.list_by_project(project.id).await? {
                let pre = character.avatar_url.is_some();
                batch
                    .push(
                        ctx,
                        job,
                        TaskPayload::GenerateCharacterAvatar {
                            character_id: character.id,
                        },
                        pre,
                    )
                    .await?;
            }
        }

        Stage::GenerateKeyframes => {
            // Handled incrementally by materialize_ready_keyframes.
        }

        Stage::CreateTransitions => {
            let script = require_script(ctx, chapter).await?;
            let shots = ctx.repos.scripts.list_shots_by_script(script.id).await?;
            for pair in shots.windows(2) {
                let (from, to) = (&pair[0], &pair[1]);
                if from.keyframe_url.is_none() || to.keyframe_url.is_none() {
                    warn!(
                        from = %from.id,
                        to = %to.id,
                        "skipping transition over missing keyframe"
                    );
                    continue;
                }
                let pre = ctx
                    .repos
                    .transitions
                    .find_by_pair(script.id, from.id, to.id)
                    .await?
                    .is_some_and(|t| t.video_prompt.is_some());
                batch
                    .push(
                        ctx,
                        job,
                        TaskPayload::CreateTransition {
                            script_id: script.id,
                            from_shot_id: from.id,
                            to_shot_id: to.id,
                        },
                        pre,
                    )
                    .await?;
            }
        }

        Stage::GenerateTransitionVideos => {
            let script = require_script(ctx, chapter).await?;
            for transition in ctx.repos.transitions.list_by_script(script.id).await? {
                if transition.video_prompt.is_none() {
                    continue;
                }
                let pre = transition.status == TransitionStatus::Completed
                    && transition.video_url.is_some();
                batch
                    .push(
                        ctx,
                        job,
                        TaskPayload::SubmitTransitionVideo {
                            transition_id: transition.id,
                        },
                        pre,
                    )
                    .await?;
            }
        }

        Stage::GenerateSentencePrompts => {
            let assets = ctx.repos.sentences.list_assets_by_chapter(chapter.id).await?;
            if assets.is_empty() {
                return Err(TaskError::validation(format!(
                    "chapter {} has no sentences; run text ingestion first",
                    chapter.id
                )));
            }
            let pre = assets
                .iter()
                .all(|(_, a)| a.image_prompt.is_some() && a.voice_prompt.is_some());
            batch
                .push(
                    ctx,
                    job,
                    TaskPayload::GenerateSentencePrompts {
                        chapter_id: chapter.id,
                    },
                    pre,
                )
                .await?;
        }

        Stage::GenerateSentenceImages => {
            for (sentence, asset) in
                ctx.repos.sentences.list_assets_by_chapter(chapter.id).await?
            {
                batch
                    .push(
                        ctx,
                        job,
                        TaskPayload::GenerateSentenceImage {
                            sentence_id: sentence.id,
                        },
                        asset.image_url.is_some(),
                    )
                    .await?;
            }
        }

        Stage::SynthesizeSentenceAudio => {
            for (sentence, asset) in
                ctx.repos.sentences.list_assets_by_chapter(chapter.id).await?
            {
                let pre = asset.audio_url.is_some() && asset.duration_ms.is_some();
                batch
                    .push(
                        ctx,
                        job,
                        TaskPayload::SynthesizeSentenceAudio {
                            sentence_id: sentence.id,
                        },
                        pre,
                    )
                    .await?;
            }
        }

        Stage::ComposeVideo => {
            let video_task = ensure_video_task(ctx, chapter, VideoSpec::default()).await?;
            let pre = video_task.status == VideoTaskStatus::Completed
                && video_task.video_url.is_some();
            batch
                .push(
                    ctx,
                    job,
                    TaskPayload::ComposeVideo {
                        chapter_id: chapter.id,
                        video_task_id: video_task.id,
                    },
                    pre,
                )
                .await?;
        }
    }

    batch.commit(ctx, job, stage).await?;
    if stage != Stage::GenerateKeyframes {
        ctx.repos
            .jobs
            .mark_stage_materialized(job.id, stage.as_str())
            .await?;
    }
    Ok(())
}

async fn require_script(
    ctx: &EngineContext,
    chapter: &Chapter,
) -> Result<aicg_models::Script, TaskError> {
    ctx.repos
        .scripts
        .get_by_chapter(chapter.id)
        .await?
        .ok_or_else(|| TaskError::not_found(format!("script for chapter {}", chapter.id)))
}

/// Advance the chapter's pipeline status when a stage boundary completes
/// cleanly. The repository enforces monotonicity, so races are no-ops.
async fn advance_chapter_milestone(
    ctx: &EngineContext,
    chapter: &Chapter,
    kind: ProjectKind,
    stage: Stage,
) -> Result<(), TaskError> {
    let next = match (kind, stage) {
        (ProjectKind::Movie, Stage::ExtractScenes) => Some(PipelineStatus::Parsed),
        (ProjectKind::Movie, Stage::ExtractShots) => Some(PipelineStatus::ScriptGenerated),
        (ProjectKind::Movie, Stage::GenerateTransitionVideos) => {
            // Submissions settled; the materials themselves are prepared
            // once the sweeper sees every transition through.
            None
        }
        (ProjectKind::Narrative, Stage::GenerateSentencePrompts) => {
            Some(PipelineStatus::ScriptGenerated)
        }
        _ => None,
    };
    if let Some(next) = next {
        ctx.repos.chapters.advance_status(chapter.id, next).await?;
    }
    Ok(())
}

/// Called by the sweeper when a transition reaches a terminal state:
/// re-evaluates every live job of the chapter, and advances the chapter
/// to `materials_prepared` once all transitions completed.
pub async fn on_transition_settled(
    ctx: &EngineContext,
    chapter_id: aicg_models::ChapterId,
) -> Result<(), TaskError> {
    if let Some(script) = ctx.repos.scripts.get_by_chapter(chapter_id).await? {
        let transitions = ctx.repos.transitions.list_by_script(script.id).await?;
        let all_completed = !transitions.is_empty()
            && transitions
                .iter()
                .all(|t| t.status == TransitionStatus::Completed);
        if all_completed {
            ctx.repos
                .chapters
                .advance_status(chapter_id, PipelineStatus::MaterialsPrepared)
                .await?;
        }
    }

    for job in ctx.repos.jobs.list_by_chapter(chapter_id).await? {
        if !job.state.is_terminal() {
            advance_job(ctx, job.id).await?;
        }
    }
    Ok(())
}
