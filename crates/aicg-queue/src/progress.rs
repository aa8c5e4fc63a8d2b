//! Progress events via Redis Pub/Sub with persistence and heartbeats.
//!
//! Dual-write on publish: Pub/Sub for connected observers, a sorted set
//! (scored by timestamp) for history/recovery. Worker heartbeats and the
//! active-jobs set feed stale-job detection in the sweeper.

use chrono::Utc;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use aicg_models::{JobId, ProgressMessage};

use crate::error::QueueResult;

const HEARTBEAT_PREFIX: &str = "aicg:heartbeat:";
const HISTORY_PREFIX: &str = "aicg:progress:history:";
const ACTIVE_JOBS_KEY: &str = "aicg:jobs:active";

/// Heartbeat TTL; a running job missing this window is a stale candidate.
pub const HEARTBEAT_TTL_SECS: u64 = 60;
/// Progress history retention.
pub const HISTORY_TTL_SECS: u64 = 3600;
/// Grace period before a job without any heartbeat counts as stale.
pub const STALE_GRACE_PERIOD_SECS: i64 = 120;

/// Event envelope published per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub message: ProgressMessage,
    /// Milliseconds since epoch.
    pub timestamp_ms: i64,
}

impl ProgressEvent {
    pub fn new(job_id: JobId, message: ProgressMessage) -> Self {
        Self {
            job_id,
            message,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Channel for publishing/subscribing to progress events.
#[derive(Clone)]
pub struct ProgressChannel {
    client: redis::Client,
}

impl ProgressChannel {
    pub fn new(queue_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(queue_url)?;
        Ok(Self { client })
    }

    pub fn from_env() -> QueueResult<Self> {
        let url =
            std::env::var("QUEUE_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(&url)
    }

    pub fn channel_name(job_id: &JobId) -> String {
        format!("aicg:progress:{job_id}")
    }

    async fn conn(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Publish with history persistence.
    pub async fn publish(&self, event: &ProgressEvent) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let channel = Self::channel_name(&event.job_id);
        let history_key = format!("{HISTORY_PREFIX}{}", event.job_id);
        let payload = serde_json::to_string(event)?;

        redis::pipe()
            .publish(&channel, &payload)
            .ignore()
            .zadd(&history_key, &payload, event.timestamp_ms as f64)
            .ignore()
            .expire(&history_key, HISTORY_TTL_SECS as i64)
            .ignore()
            .exec_async(&mut conn)
            .await?;

        Ok(())
    }

    pub async fn log(&self, job_id: JobId, message: impl Into<String>) -> QueueResult<()> {
        self.publish(&ProgressEvent::new(job_id, ProgressMessage::log(message)))
            .await
    }

    pub async fn progress(&self, job_id: JobId, value: f32) -> QueueResult<()> {
        self.publish(&ProgressEvent::new(
            job_id,
            ProgressMessage::progress(value),
        ))
        .await
    }

    pub async fn error(&self, job_id: JobId, message: impl Into<String>) -> QueueResult<()> {
        self.publish(&ProgressEvent::new(job_id, ProgressMessage::error(message)))
            .await
    }

    pub async fn message(&self, job_id: JobId, message: ProgressMessage) -> QueueResult<()> {
        self.publish(&ProgressEvent::new(job_id, message)).await
    }

    /// Subscribe to a job's progress events.
    pub async fn subscribe(
        &self,
        job_id: JobId,
    ) -> QueueResult<std::pin::Pin<Box<dyn futures_util::Stream<Item = ProgressEvent> + Send>>>
    {
        use futures_util::StreamExt;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(Self::channel_name(&job_id)).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = msg.get_payload().ok()?;
            serde_json::from_str(&payload).ok()
        });

        Ok(Box::pin(stream))
    }

    /// Progress history since a timestamp (for observer reconnects).
    pub async fn history_since(
        &self,
        job_id: JobId,
        since_ms: i64,
    ) -> QueueResult<Vec<ProgressEvent>> {
        let mut conn = self.conn().await?;
        let key = format!("{HISTORY_PREFIX}{job_id}");
        let events: Vec<String> = conn.zrangebyscore(&key, since_ms as f64, "+inf").await?;
        Ok(events
            .into_iter()
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect())
    }

    // --- heartbeats ----------------------------------------------------

    /// Record a worker heartbeat for a running job.
    pub async fn heartbeat(&self, job_id: JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let key = format!("{HEARTBEAT_PREFIX}{job_id}");
        conn.set_ex::<_, _, ()>(&key, Utc::now().timestamp(), HEARTBEAT_TTL_SECS)
            .await?;
        debug!(job_id = %job_id, "heartbeat");
        Ok(())
    }

    pub async fn has_heartbeat(&self, job_id: JobId) -> QueueResult<bool> {
        let mut conn = self.conn().await?;
        let exists: bool = conn.exists(format!("{HEARTBEAT_PREFIX}{job_id}")).await?;
        Ok(exists)
    }

    pub async fn clear_heartbeat(&self, job_id: JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(format!("{HEARTBEAT_PREFIX}{job_id}")).await?;
        Ok(())
    }

    // --- active jobs ----------------------------------------------------

    pub async fn add_active_job(&self, job_id: JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.zadd::<_, _, _, ()>(
            ACTIVE_JOBS_KEY,
            job_id.to_string(),
            Utc::now().timestamp_millis() as f64,
        )
        .await?;
        Ok(())
    }

    pub async fn remove_active_job(&self, job_id: JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        conn.zrem::<_, _, ()>(ACTIVE_JOBS_KEY, job_id.to_string())
            .await?;
        self.clear_heartbeat(job_id).await?;
        Ok(())
    }

    /// Job ids the sweeper should inspect for staleness.
    pub async fn active_jobs(&self) -> QueueResult<Vec<JobId>> {
        let mut conn = self.conn().await?;
        let ids: Vec<String> = conn.zrange(ACTIVE_JOBS_KEY, 0, -1).await?;
        Ok(ids
            .into_iter()
            .filter_map(|s| JobId::parse(&s).ok())
            .collect())
    }
}
