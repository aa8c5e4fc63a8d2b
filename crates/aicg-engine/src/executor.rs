//! Worker executor: drains the task queue under per-kind concurrency
//! caps, runs handlers, applies the retry policy and advances job
//! frontiers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use aicg_models::{ProgressMessage, TaskError, TaskKind, TaskState};
use aicg_queue::{Delivery, RetryDecision};

use crate::context::EngineContext;
use crate::handlers;
use crate::planner;

/// The worker executor.
pub struct Executor {
    ctx: EngineContext,
    semaphores: HashMap<TaskKind, Arc<Semaphore>>,
    consumer_name: String,
    shutdown: tokio::sync::watch::Sender<bool>,
}

impl Executor {
    pub fn new(ctx: EngineContext) -> Self {
        let semaphores = ctx
            .config
            .kinds
            .iter()
            .map(|kind| {
                let cap = ctx.config.cap(*kind).min(Semaphore::MAX_PERMITS);
                (*kind, Arc::new(Semaphore::new(cap)))
            })
            .collect();
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Self {
            ctx,
            semaphores,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
            shutdown,
        }
    }

    pub fn shutdown_handle(&self) -> tokio::sync::watch::Sender<bool> {
        self.shutdown.clone()
    }

    /// Run the consumption loop until shutdown.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            consumer = %self.consumer_name,
            kinds = ?self.ctx.config.kinds,
            "starting executor"
        );
        self.ctx.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        // Periodically reclaim deliveries from crashed workers.
        let claim_ctx = self.ctx.clone();
        let claim_consumer = self.consumer_name.clone();
        let claim_kinds = self.ctx.config.kinds.clone();
        let claim_semaphores = self.semaphores.clone();
        let mut claim_shutdown = self.shutdown.subscribe();
        let claim_interval = self.ctx.config.claim_interval;
        let claim_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(claim_interval);
            loop {
                tokio::select! {
                    _ = claim_shutdown.changed() => {
                        if *claim_shutdown.borrow() { break; }
                    }
                    _ = ticker.tick() => {
                        match claim_ctx.queue.claim_pending(&claim_kinds, &claim_consumer, 5).await {
                            Ok(deliveries) if !deliveries.is_empty() => {
                                info!("claimed {} stale deliveries", deliveries.len());
                                for delivery in deliveries {
                                    spawn_delivery(
                                        claim_ctx.clone(),
                                        &claim_semaphores,
                                        delivery,
                                        claim_consumer.clone(),
                                    )
                                    .await;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!("failed to claim pending deliveries: {e}"),
                        }
                    }
                }
            }
        });

        // Drain the delayed (backoff) set.
        let delayed_ctx = self.ctx.clone();
        let mut delayed_shutdown = self.shutdown.subscribe();
        let delayed_interval = self.ctx.config.delayed_drain_interval;
        let delayed_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(delayed_interval);
            loop {
                tokio::select! {
                    _ = delayed_shutdown.changed() => {
                        if *delayed_shutdown.borrow() { break; }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = delayed_ctx.queue.drain_delayed().await {
                            warn!("failed to drain delayed tasks: {e}");
                        }
                    }
                }
            }
        });

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_once() => {
                    if let Err(e) = result {
                        error!("error consuming tasks: {e}");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        claim_task.abort();
        delayed_task.abort();

        info!("waiting for in-flight tasks to finish");
        let _ = tokio::time::timeout(self.ctx.config.shutdown_timeout, self.wait_for_tasks())
            .await;
        info!("executor stopped");
        Ok(())
    }

    /// Consume from kinds that currently have free capacity.
    async fn consume_once(&self) -> anyhow::Result<()> {
        let ready_kinds: Vec<TaskKind> = self
            .ctx
            .config
            .kinds
            .iter()
            .filter(|kind| {
                self.semaphores
                    .get(kind)
                    .map(|s| s.available_permits() > 0)
                    .unwrap_or(false)
            })
            .copied()
            .collect();

        if ready_kinds.is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let deliveries = self
            .ctx
            .queue
            .consume(&ready_kinds, &self.consumer_name, 1000, 5)
            .await?;

        for delivery in deliveries {
            spawn_delivery(
                self.ctx.clone(),
                &self.semaphores,
                delivery,
                self.consumer_name.clone(),
            )
            .await;
        }
        Ok(())
    }

    async fn wait_for_tasks(&self) {
        loop {
            let all_idle = self.ctx.config.kinds.iter().all(|kind| {
                let cap = self.ctx.config.cap(*kind).min(Semaphore::MAX_PERMITS);
                self.semaphores
                    .get(kind)
                    .map(|s| s.available_permits() == cap)
                    .unwrap_or(true)
            });
            if all_idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Acquire the kind's permit and run the delivery on its own task.
async fn spawn_delivery(
    ctx: EngineContext,
    semaphores: &HashMap<TaskKind, Arc<Semaphore>>,
    delivery: Delivery,
    consumer_name: String,
) {
    let Some(semaphore) = semaphores.get(&delivery.envelope.kind).cloned() else {
        // A kind this worker does not handle; leave it pending for a
        // worker that does.
        return;
    };
    let Ok(permit) = semaphore.acquire_owned().await else {
        return;
    };

    tokio::spawn(async move {
        let _permit = permit;
        execute_delivery(ctx, delivery, consumer_name).await;
    });
}

/// Execute one delivery end to end: claim, run, settle, advance.
async fn execute_delivery(ctx: EngineContext, delivery: Delivery, consumer_name: String) {
    let task_id = delivery.envelope.task_id;

    let task = match ctx.repos.tasks.get(task_id).await {
        Ok(task) => task,
        Err(aicg_repo::RepoError::NotFound(_)) => {
            // Swept or job deleted; drop the delivery.
            ctx.queue.ack(&delivery).await.ok();
            return;
        }
        Err(e) => {
            warn!(task_id = %task_id, "failed to load task: {e}");
            return; // redelivered after the visibility timeout
        }
    };

    if task.state.is_terminal() {
        // At-least-once redelivery of settled work.
        ctx.queue.ack(&delivery).await.ok();
        return;
    }

    // Cooperative cancel before doing anything.
    if ctx.queue.is_cancelled(task.job_id).await.unwrap_or(false) {
        ctx.repos
            .tasks
            .finish(task_id, TaskState::Cancelled, None, Some("cancelled"), None)
            .await
            .ok();
        ctx.queue.ack(&delivery).await.ok();
        planner::advance_job(&ctx, task.job_id).await.ok();
        return;
    }

    if !ctx.repos.tasks.mark_running(task_id).await.unwrap_or(false) {
        // Not claimable: backoff gate still closed or another worker won.
        if let Some(not_before) = task.not_before {
            let remaining = (not_before - chrono::Utc::now())
                .to_std()
                .unwrap_or_default();
            if !remaining.is_zero() {
                ctx.queue.ack(&delivery).await.ok();
                ctx.queue
                    .enqueue_delayed(&delivery.envelope, remaining)
                    .await
                    .ok();
                return;
            }
        }
        ctx.queue.ack(&delivery).await.ok();
        return;
    }

    debug!(task_id = %task_id, kind = task.kind.as_str(), "executing task");
    counter!("aicg_tasks_started", "kind" => task.kind.as_str()).increment(1);
    ctx.progress
        .message(
            task.job_id,
            ProgressMessage::task_started(task_id, task.stage, task.kind),
        )
        .await
        .ok();

    // Heartbeat while the task runs; long-running assembly would
    // otherwise look stale.
    let heartbeat_ctx = ctx.clone();
    let heartbeat_job = task.job_id;
    let heartbeat_queue_delivery = delivery.clone();
    let heartbeat_consumer = consumer_name.clone();
    let heartbeat_interval = ctx.config.heartbeat_interval;
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            heartbeat_ctx.progress.heartbeat(heartbeat_job).await.ok();
            heartbeat_ctx
                .queue
                .refresh_visibility(&heartbeat_queue_delivery, &heartbeat_consumer)
                .await
                .ok();
        }
    });

    // Per-kind deadline, overridable per job.
    let deadline = ctx
        .repos
        .jobs
        .get(task.job_id)
        .await
        .ok()
        .and_then(|job| job.task_timeout_secs)
        .map(|secs| Duration::from_secs(secs.max(1) as u64))
        .unwrap_or_else(|| Duration::from_secs(task.kind.timeout_secs()));
    let outcome = match tokio::time::timeout(deadline, handlers::dispatch(&ctx, &task)).await {
        Ok(result) => result,
        Err(_) => Err(TaskError::timeout(format!(
            "task exceeded {}s deadline",
            deadline.as_secs()
        ))),
    };

    heartbeat.abort();

    match outcome {
        Ok(result_ref) => {
            ctx.repos
                .tasks
                .finish(task_id, TaskState::Success, result_ref.as_deref(), None, None)
                .await
                .ok();
            ctx.repos
                .jobs
                .record_task_outcome(task.job_id, true, task.weight)
                .await
                .ok();
            counter!("aicg_tasks_succeeded", "kind" => task.kind.as_str()).increment(1);
            publish_task_finished(&ctx, &task, TaskState::Success, None).await;
            ctx.queue.ack(&delivery).await.ok();
        }
        Err(TaskError::Cancelled) => {
            ctx.repos
                .tasks
                .finish(task_id, TaskState::Cancelled, None, Some("cancelled"), None)
                .await
                .ok();
            publish_task_finished(&ctx, &task, TaskState::Cancelled, None).await;
            ctx.queue.ack(&delivery).await.ok();
        }
        Err(error) => {
            settle_failure(&ctx, &task, &delivery, error).await;
        }
    }

    if let Err(e) = planner::advance_job(&ctx, task.job_id).await {
        error!(job_id = %task.job_id, "failed to advance job: {e}");
    }
}

/// Apply the retry policy to a failed attempt.
async fn settle_failure(
    ctx: &EngineContext,
    task: &aicg_models::Task,
    delivery: &Delivery,
    error: TaskError,
) {
    let retries_done = task.retries as u32;
    match aicg_queue::retry::decide(task.kind, &error, retries_done) {
        RetryDecision::Retry(delay) => {
            info!(
                task_id = %task.id,
                attempt = retries_done + 1,
                delay_secs = delay.as_secs(),
                "task failed, scheduling retry: {error}"
            );
            counter!("aicg_tasks_retried", "kind" => task.kind.as_str()).increment(1);
            let not_before = chrono::Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60));
            ctx.repos
                .tasks
                .reschedule(task.id, not_before, &error.to_string())
                .await
                .ok();
            ctx.queue.ack(delivery).await.ok();
            ctx.queue
                .enqueue_delayed(&delivery.envelope, delay)
                .await
                .ok();
        }
        RetryDecision::GiveUp => {
            warn!(task_id = %task.id, "task failed terminally: {error}");
            counter!("aicg_tasks_failed", "kind" => task.kind.as_str()).increment(1);
            let message = error.to_string();
            ctx.repos
                .tasks
                .finish(
                    task.id,
                    TaskState::Failed,
                    None,
                    Some(error.code()),
                    Some(&message),
                )
                .await
                .ok();
            ctx.repos
                .jobs
                .record_task_outcome(task.job_id, false, task.weight)
                .await
                .ok();
            ctx.queue.dlq(delivery, &message).await.ok();
            publish_task_finished(ctx, task, TaskState::Failed, Some(message)).await;
        }
    }
}

async fn publish_task_finished(
    ctx: &EngineContext,
    task: &aicg_models::Task,
    state: TaskState,
    error: Option<String>,
) {
    ctx.progress
        .message(
            task.job_id,
            ProgressMessage::task_finished(task.id, task.stage, state, error),
        )
        .await
        .ok();
    if let Ok(job) = ctx.repos.jobs.get(task.job_id).await {
        ctx.progress.progress(job.id, job.progress).await.ok();
    }
}
