//! Task Runtime transport: Redis Streams queue, retry policy and the
//! progress channel.

pub mod error;
pub mod progress;
pub mod queue;
pub mod retry;

pub use error::{QueueError, QueueResult};
pub use progress::{
    ProgressChannel, ProgressEvent, HEARTBEAT_TTL_SECS, HISTORY_TTL_SECS,
    STALE_GRACE_PERIOD_SECS,
};
pub use queue::{Delivery, QueueConfig, TaskEnvelope, TaskQueue};
pub use retry::{decide, delay_for, RetryDecision};
