//! Background reconciliation: transition polling, stale-job recovery and
//! the job TTL sweep.
//!
//! The sweeper's only durable state is the artifact repository, so it is
//! idempotent across restarts — on boot it simply finds every
//! `processing` transition with an external task id and resumes polling.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use aicg_models::{JobState, ResourceType, Transition};
use aicg_providers::VideoGenStatus;
use aicg_repo::ArtifactRef;
use aicg_storage::{new_key, ArtifactKind};

use crate::context::EngineContext;
use crate::planner;

/// Main polling cadence.
const TICK_INTERVAL: Duration = Duration::from_secs(5);
/// Stale-job detection cadence.
const STALE_INTERVAL: Duration = Duration::from_secs(30);
/// Job TTL sweep cadence.
const TTL_INTERVAL: Duration = Duration::from_secs(3600);
/// Transitions polled per tick.
const POLL_BATCH: i64 = 50;

pub struct Sweeper {
    ctx: EngineContext,
}

impl Sweeper {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }

    /// Run until the process is stopped.
    pub async fn run(&self) {
        info!("starting sweeper");
        let mut poll_ticker = tokio::time::interval(TICK_INTERVAL);
        let mut stale_ticker = tokio::time::interval(STALE_INTERVAL);
        let mut ttl_ticker = tokio::time::interval(TTL_INTERVAL);

        loop {
            tokio::select! {
                _ = poll_ticker.tick() => {
                    if let Err(e) = self.poll_transitions().await {
                        error!("transition polling pass failed: {e}");
                    }
                }
                _ = stale_ticker.tick() => {
                    if let Err(e) = self.recover_stale_jobs().await {
                        error!("stale job detection failed: {e}");
                    }
                }
                _ = ttl_ticker.tick() => {
                    if let Err(e) = self.ctx.repos.jobs.sweep_expired().await {
                        error!("job TTL sweep failed: {e}");
                    }
                }
            }
        }
    }

    /// Poll every due in-flight transition.
    async fn poll_transitions(&self) -> anyhow::Result<()> {
        let due = self
            .ctx
            .repos
            .transitions
            .list_pollable(chrono::Utc::now(), POLL_BATCH)
            .await?;

        for transition in due {
            if let Err(e) = self.poll_one(&transition).await {
                warn!(transition_id = %transition.id, "poll failed: {e}");
                // Keep polling on the exponential schedule; transient
                // provider trouble must not kill the transition.
                self.ctx.repos.transitions.record_poll(transition.id).await.ok();
            }
        }
        Ok(())
    }

    async fn poll_one(&self, transition: &Transition) -> anyhow::Result<()> {
        let external_task_id = transition
            .external_task_id
            .as_deref()
            .expect("list_pollable filters on external_task_id");

        let script = self.ctx.repos.scripts.get(transition.script_id).await?;
        let project = self
            .ctx
            .repos
            .projects
            .get_for_chapter(script.chapter_id)
            .await?;
        let key = self.ctx.video_key_for_project(&project).await?;

        debug!(transition_id = %transition.id, external_task_id, "polling transition");
        let poll = self
            .ctx
            .providers
            .poll_video(&key, external_task_id)
            .await?;

        match poll.status {
            VideoGenStatus::Succeeded => {
                let bytes = poll
                    .video_bytes
                    .ok_or_else(|| anyhow::anyhow!("succeeded poll without video bytes"))?;
                let blob_key = new_key(project.id, ArtifactKind::TransitionVideo);
                self.ctx
                    .blob
                    .put(&blob_key, bytes, "video/mp4")
                    .await?;
                self.ctx
                    .repos
                    .history
                    .record_result(
                        ArtifactRef::new(ResourceType::TransitionVideo, transition.id.as_uuid()),
                        &blob_key,
                        transition.video_prompt.as_deref(),
                        None,
                    )
                    .await?;
                info!(transition_id = %transition.id, "transition video completed");
                planner::on_transition_settled(&self.ctx, script.chapter_id).await?;
            }
            VideoGenStatus::Failed => {
                let message = aicg_models::truncate_message(
                    poll.error
                        .unwrap_or_else(|| "provider reported failure".to_string()),
                );
                self.ctx
                    .repos
                    .transitions
                    .fail(transition.id, &message)
                    .await?;
                warn!(transition_id = %transition.id, "transition video failed: {message}");
                planner::on_transition_settled(&self.ctx, script.chapter_id).await?;
            }
            VideoGenStatus::Pending | VideoGenStatus::Processing => {
                self.ctx.repos.transitions.record_poll(transition.id).await?;
            }
        }
        Ok(())
    }

    /// Fail running jobs whose worker heartbeat lapsed.
    async fn recover_stale_jobs(&self) -> anyhow::Result<()> {
        let active = self.ctx.progress.active_jobs().await?;
        if active.is_empty() {
            return Ok(());
        }

        for job_id in active {
            let job = match self.ctx.repos.jobs.get(job_id).await {
                Ok(job) => job,
                Err(aicg_repo::RepoError::NotFound(_)) => {
                    self.ctx.progress.remove_active_job(job_id).await.ok();
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            if job.state.is_terminal() {
                self.ctx.progress.remove_active_job(job_id).await.ok();
                continue;
            }
            if job.state != JobState::Running {
                continue;
            }
            if self.ctx.progress.has_heartbeat(job_id).await? {
                continue;
            }

            let open = self.ctx.repos.tasks.open_count(job_id).await?;
            let age = chrono::Utc::now()
                - job.started_at.unwrap_or(job.created_at);
            // Jobs waiting on the sweeper itself (transitions in flight)
            // legitimately have no worker heartbeat.
            let waiting_on_external = open == 0;
            if waiting_on_external
                || age.num_seconds() < aicg_queue::STALE_GRACE_PERIOD_SECS
            {
                continue;
            }

            warn!(job_id = %job_id, "detected stale job (no heartbeat)");
            // Leave the tasks to the queue's pending-reclaim; another
            // worker will pick them up. Only flag jobs that have stopped
            // making progress entirely for much longer than the claim
            // window.
            if age.num_seconds() > 2 * 3600 {
                self.ctx
                    .repos
                    .jobs
                    .finish(
                        job_id,
                        JobState::Failed,
                        Some("stale"),
                        Some("worker stopped responding"),
                    )
                    .await?;
                self.ctx
                    .progress
                    .error(job_id, "worker stopped responding; job marked failed")
                    .await
                    .ok();
                self.ctx.progress.remove_active_job(job_id).await.ok();
            }
        }
        Ok(())
    }
}
