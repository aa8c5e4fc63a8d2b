//! Task queue on Redis Streams.
//!
//! One stream per task kind, one consumer group shared by all workers.
//! Task rows in PostgreSQL are the source of truth; the streams carry
//! `{task_id}` envelopes only, so at-least-once redelivery is reconciled
//! against the durable row state by the executor.

use std::time::Duration;

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use aicg_models::{JobId, TaskId, TaskKind};

use crate::error::{QueueError, QueueResult};

/// Key of the sorted set holding delayed (backed-off) envelopes.
const DELAYED_KEY: &str = "aicg:delayed";
/// Prefix for per-task enqueue dedup keys.
const ENQUEUED_PREFIX: &str = "aicg:enqueued:";
/// Prefix for per-job cooperative cancel flags.
const CANCEL_PREFIX: &str = "aicg:cancel:";
/// Dedup key TTL; long enough to cover any sane queue dwell time.
const ENQUEUED_TTL_SECS: u64 = 3600;
/// Cancel flag TTL; outlives any running task of the job.
const CANCEL_TTL_SECS: u64 = 86400;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL (`QUEUE_URL`).
    pub queue_url: String,
    /// Stream name prefix; the kind is appended.
    pub stream_prefix: String,
    /// Consumer group name.
    pub consumer_group: String,
    /// Dead letter stream name.
    pub dlq_stream: String,
    /// Idle time before a pending delivery may be reclaimed.
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: "redis://localhost:6379".to_string(),
            stream_prefix: "aicg:tasks".to_string(),
            consumer_group: "aicg:workers".to_string(),
            dlq_stream: "aicg:dlq".to_string(),
            visibility_timeout: Duration::from_secs(600),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            queue_url: std::env::var("QUEUE_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            ..Default::default()
        }
    }
}

/// What actually travels on the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub kind: TaskKind,
}

/// A consumed delivery, needed later for ack/DLQ.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    pub message_id: String,
}

/// Task queue client.
pub struct TaskQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.queue_url.as_str())?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    fn stream_for(&self, kind: TaskKind) -> String {
        format!("{}:{}", self.config.stream_prefix, kind.as_str())
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Create consumer groups for every kind (idempotent).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        for kind in TaskKind::ALL {
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(self.stream_for(*kind))
                .arg(&self.config.consumer_group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;
            match result {
                Ok(_) => info!(kind = kind.as_str(), "created consumer group"),
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!(kind = kind.as_str(), "consumer group already exists");
                }
                Err(e) => return Err(QueueError::Redis(e)),
            }
        }
        Ok(())
    }

    /// Ping the broker; used by startup dependency checks.
    pub async fn check_connectivity(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Enqueue a task for immediate delivery.
    ///
    /// A per-task dedup key rejects double-enqueue while a delivery for
    /// the same task is still in flight.
    pub async fn enqueue(&self, envelope: &TaskEnvelope) -> QueueResult<String> {
        let mut conn = self.conn().await?;

        let dedup_key = format!("{ENQUEUED_PREFIX}{}", envelope.task_id);
        let fresh: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ENQUEUED_TTL_SECS)
            .query_async(&mut conn)
            .await
            .unwrap_or(false);
        if !fresh {
            warn!(task_id = %envelope.task_id, "duplicate enqueue rejected");
            return Err(QueueError::enqueue_failed("duplicate task enqueue"));
        }

        let payload = serde_json::to_string(envelope)?;
        let message_id: String = redis::cmd("XADD")
            .arg(self.stream_for(envelope.kind))
            .arg("*")
            .arg("task")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        debug!(task_id = %envelope.task_id, kind = envelope.kind.as_str(), %message_id, "enqueued task");
        Ok(message_id)
    }

    /// Schedule an envelope for delivery after `delay` (retry backoff).
    ///
    /// The dedup key is cleared first so the redelivery isn't rejected as
    /// a duplicate of the attempt that just failed.
    pub async fn enqueue_delayed(
        &self,
        envelope: &TaskEnvelope,
        delay: Duration,
    ) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let dedup_key = format!("{ENQUEUED_PREFIX}{}", envelope.task_id);
        conn.del::<_, ()>(&dedup_key).await?;

        let visible_at = chrono::Utc::now().timestamp() + delay.as_secs() as i64;
        let payload = serde_json::to_string(envelope)?;
        conn.zadd::<_, _, _, ()>(DELAYED_KEY, payload, visible_at)
            .await?;
        debug!(task_id = %envelope.task_id, delay_secs = delay.as_secs(), "scheduled delayed redelivery");
        Ok(())
    }

    /// Move due delayed envelopes onto their streams.
    ///
    /// Called periodically by the worker loop; returns how many moved.
    pub async fn drain_delayed(&self) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let now = chrono::Utc::now().timestamp();

        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(DELAYED_KEY)
            .arg(0)
            .arg(now)
            .query_async(&mut conn)
            .await?;

        if due.is_empty() {
            return Ok(0);
        }

        let mut moved = 0;
        for payload in &due {
            match serde_json::from_str::<TaskEnvelope>(payload) {
                Ok(envelope) => match self.enqueue(&envelope).await {
                    Ok(_) => moved += 1,
                    Err(QueueError::EnqueueFailed(_)) => {
                        debug!(task_id = %envelope.task_id, "delayed envelope already enqueued");
                    }
                    Err(e) => {
                        warn!("failed to enqueue delayed task: {e}");
                        continue; // keep it scheduled
                    }
                },
                Err(e) => warn!("failed to parse delayed envelope: {e}"),
            }
            conn.zrem::<_, _, ()>(DELAYED_KEY, payload).await.ok();
        }

        if moved > 0 {
            debug!(count = moved, "moved delayed tasks to streams");
        }
        Ok(moved)
    }

    /// Blocking read of new deliveries for the given kinds.
    pub async fn consume(
        &self,
        kinds: &[TaskKind],
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        if kinds.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS");
        for kind in kinds {
            cmd.arg(self.stream_for(*kind));
        }
        for _ in kinds {
            cmd.arg(">");
        }

        let reply: Option<redis::streams::StreamReadReply> =
            cmd.query_async(&mut conn).await?;

        let mut deliveries = Vec::new();
        if let Some(reply) = reply {
            for stream_key in reply.keys {
                for entry in stream_key.ids {
                    let message_id = entry.id.clone();
                    let Some(redis::Value::BulkString(payload)) = entry.map.get("task") else {
                        continue;
                    };
                    match serde_json::from_str::<TaskEnvelope>(&String::from_utf8_lossy(payload)) {
                        Ok(envelope) => deliveries.push(Delivery {
                            envelope,
                            message_id,
                        }),
                        Err(e) => {
                            warn!("failed to parse task envelope: {e}");
                            // Ack the malformed message so it never loops.
                            self.ack_raw(&stream_key.key, &message_id).await.ok();
                        }
                    }
                }
            }
        }
        Ok(deliveries)
    }

    /// Acknowledge a delivery and drop its dedup key.
    pub async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let stream = self.stream_for(delivery.envelope.kind);
        self.ack_raw(&stream, &delivery.message_id).await?;

        let mut conn = self.conn().await?;
        let dedup_key = format!("{ENQUEUED_PREFIX}{}", delivery.envelope.task_id);
        conn.del::<_, ()>(&dedup_key).await?;
        Ok(())
    }

    async fn ack_raw(&self, stream: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("XACK")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;
        redis::cmd("XDEL")
            .arg(stream)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    /// Move an exhausted delivery to the dead letter stream and ack it.
    pub async fn dlq(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(&delivery.envelope)?;
        redis::cmd("XADD")
            .arg(&self.config.dlq_stream)
            .arg("*")
            .arg("task")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(delivery).await?;
        warn!(task_id = %delivery.envelope.task_id, "task moved to DLQ: {error}");
        Ok(())
    }

    /// Reclaim deliveries from crashed workers (idle past the visibility
    /// timeout).
    pub async fn claim_pending(
        &self,
        kinds: &[TaskKind],
        consumer_name: &str,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;
        let mut conn = self.conn().await?;
        let mut deliveries = Vec::new();

        for kind in kinds {
            let stream = self.stream_for(*kind);
            // XAUTOCLAIM walks pending entries and reassigns stale ones.
            let reply: redis::Value = redis::cmd("XAUTOCLAIM")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg(consumer_name)
                .arg(min_idle_ms)
                .arg("0-0")
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await?;

            // Reply: [next_cursor, [[id, [field, value, ...]], ...], deleted]
            let redis::Value::Array(items) = reply else {
                continue;
            };
            let Some(redis::Value::Array(messages)) = items.get(1) else {
                continue;
            };
            for message in messages {
                let redis::Value::Array(parts) = message else {
                    continue;
                };
                let (Some(redis::Value::BulkString(id)), Some(redis::Value::Array(fields))) =
                    (parts.first(), parts.get(1))
                else {
                    continue;
                };
                let message_id = String::from_utf8_lossy(id).to_string();
                let mut payload = None;
                let mut i = 0;
                while i + 1 < fields.len() {
                    if let (
                        redis::Value::BulkString(field),
                        redis::Value::BulkString(value),
                    ) = (&fields[i], &fields[i + 1])
                    {
                        if field.as_slice() == b"task" {
                            payload = Some(String::from_utf8_lossy(value).to_string());
                            break;
                        }
                    }
                    i += 2;
                }
                if let Some(payload) = payload {
                    match serde_json::from_str::<TaskEnvelope>(&payload) {
                        Ok(envelope) => {
                            info!(task_id = %envelope.task_id, "claimed stale delivery");
                            deliveries.push(Delivery {
                                envelope,
                                message_id,
                            });
                        }
                        Err(e) => {
                            warn!("failed to parse claimed envelope: {e}");
                            self.ack_raw(&stream, &message_id).await.ok();
                        }
                    }
                }
            }
        }
        Ok(deliveries)
    }

    /// Refresh ownership of a long-running delivery so it is not
    /// reclaimed mid-flight.
    pub async fn refresh_visibility(
        &self,
        delivery: &Delivery,
        consumer_name: &str,
    ) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let _res: redis::Value = redis::cmd("XCLAIM")
            .arg(self.stream_for(delivery.envelope.kind))
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(&delivery.message_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Stream depth per kind.
    pub async fn len(&self, kind: TaskKind) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(self.stream_for(kind)).await?;
        Ok(len)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream).await?;
        Ok(len)
    }

    // --- cooperative cancellation -------------------------------------

    /// Raise the cancel flag for a job.
    pub async fn set_cancelled(&self, job_id: JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(format!("{CANCEL_PREFIX}{job_id}"), 1, CANCEL_TTL_SECS)
            .await?;
        info!(job_id = %job_id, "cancel flag set");
        Ok(())
    }

    /// Cheap cancel check; consulted before every suspension point.
    pub async fn is_cancelled(&self, job_id: JobId) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(format!("{CANCEL_PREFIX}{job_id}")).await?;
        Ok(exists)
    }

    pub async fn clear_cancelled(&self, job_id: JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(format!("{CANCEL_PREFIX}{job_id}")).await?;
        Ok(())
    }
}
