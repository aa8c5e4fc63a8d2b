//! Retry policy.
//!
//! Pure functions so the schedule is trivially testable: given the task
//! kind, the error and how many retries have already happened, decide
//! whether to retry and after how long.

use std::time::Duration;

use aicg_models::{TaskError, TaskKind};

/// Base backoff delay.
const BASE_DELAY: Duration = Duration::from_secs(2);
/// Backoff cap for the base schedule.
const MAX_DELAY: Duration = Duration::from_secs(60);
/// Backoff cap for the slow (quota) schedule.
const QUOTA_MAX_DELAY: Duration = Duration::from_secs(300);

/// Malformed responses get exactly one more attempt, regardless of kind.
const MALFORMED_MAX_RETRIES: u32 = 1;

/// What the runtime should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue after the delay.
    Retry(Duration),
    /// Mark the task failed terminally.
    GiveUp,
}

/// Decide retry behavior for a failed attempt.
///
/// `retries_done` counts attempts already retried (0 on the first
/// failure).
pub fn decide(kind: TaskKind, error: &TaskError, retries_done: u32) -> RetryDecision {
    if !error.is_retryable() {
        return RetryDecision::GiveUp;
    }

    let budget = match error {
        TaskError::Malformed { .. } => Some(MALFORMED_MAX_RETRIES.min(kind.max_retries().unwrap_or(u32::MAX))),
        _ => kind.max_retries(),
    };

    if let Some(max) = budget {
        if retries_done >= max {
            return RetryDecision::GiveUp;
        }
    }

    RetryDecision::Retry(delay_for(error, retries_done))
}

/// Exponential backoff: base 2 s doubling per attempt, capped at 60 s
/// (300 s for quota exhaustion).
pub fn delay_for(error: &TaskError, retries_done: u32) -> Duration {
    let cap = match error {
        TaskError::Quota { .. } => QUOTA_MAX_DELAY,
        _ => MAX_DELAY,
    };
    let delay = BASE_DELAY.saturating_mul(2u32.saturating_pow(retries_done.min(16)));
    delay.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_schedule_doubles_and_caps() {
        let err = TaskError::provider("boom");
        assert_eq!(delay_for(&err, 0), Duration::from_secs(2));
        assert_eq!(delay_for(&err, 1), Duration::from_secs(4));
        assert_eq!(delay_for(&err, 2), Duration::from_secs(8));
        assert_eq!(delay_for(&err, 4), Duration::from_secs(32));
        assert_eq!(delay_for(&err, 5), Duration::from_secs(60));
        assert_eq!(delay_for(&err, 12), Duration::from_secs(60));
    }

    #[test]
    fn quota_schedule_caps_higher() {
        let err = TaskError::quota("429");
        assert_eq!(delay_for(&err, 6), Duration::from_secs(128));
        assert_eq!(delay_for(&err, 7), Duration::from_secs(256));
        assert_eq!(delay_for(&err, 8), Duration::from_secs(300));
    }

    #[test]
    fn content_policy_never_retries() {
        let err = TaskError::content_policy("refused");
        assert_eq!(decide(TaskKind::Image, &err, 0), RetryDecision::GiveUp);
    }

    #[test]
    fn validation_and_cancel_never_retry() {
        assert_eq!(
            decide(TaskKind::Text, &TaskError::validation("bad"), 0),
            RetryDecision::GiveUp
        );
        assert_eq!(
            decide(TaskKind::Text, &TaskError::Cancelled, 0),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn kind_budgets_are_enforced() {
        let err = TaskError::provider("boom");
        // text: 3 retries
        assert!(matches!(decide(TaskKind::Text, &err, 2), RetryDecision::Retry(_)));
        assert_eq!(decide(TaskKind::Text, &err, 3), RetryDecision::GiveUp);
        // image: 2 retries
        assert!(matches!(decide(TaskKind::Image, &err, 1), RetryDecision::Retry(_)));
        assert_eq!(decide(TaskKind::Image, &err, 2), RetryDecision::GiveUp);
        // video submit: 2 retries
        assert_eq!(decide(TaskKind::VideoSubmit, &err, 2), RetryDecision::GiveUp);
    }

    #[test]
    fn polling_is_unbounded() {
        let err = TaskError::provider("flaky poll");
        assert!(matches!(
            decide(TaskKind::VideoPoll, &err, 10_000),
            RetryDecision::Retry(_)
        ));
    }

    #[test]
    fn malformed_retries_exactly_once() {
        let err = TaskError::malformed("not json");
        assert!(matches!(decide(TaskKind::Text, &err, 0), RetryDecision::Retry(_)));
        assert_eq!(decide(TaskKind::Text, &err, 1), RetryDecision::GiveUp);
    }
}
