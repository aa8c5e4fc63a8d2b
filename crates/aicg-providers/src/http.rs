//! Shared HTTP plumbing for adapters.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::warn;

use aicg_models::TaskError;

use crate::traits::ProviderResult;

/// Map a provider HTTP status + body into the error taxonomy.
///
/// Content-policy refusals are detected from well-known body markers since
/// most providers return them as plain 400s.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> TaskError {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("insufficient_quota") {
        return TaskError::quota(format!("{status}: {body}"));
    }
    if is_content_policy_body(body) {
        return TaskError::content_policy(format!("{status}: {body}"));
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return TaskError::timeout(format!("{status}: {body}"));
    }
    TaskError::provider(format!("{status}: {body}"))
}

fn is_content_policy_body(body: &str) -> bool {
    const MARKERS: &[&str] = &[
        "content_policy_violation",
        "content_filter",
        "ResponsibleAIPolicyViolation",
        "safety system",
        "sensitive content",
    ];
    MARKERS.iter().any(|m| body.contains(m))
}

/// Map transport-level failures into the taxonomy.
pub(crate) fn classify_transport(err: reqwest::Error) -> TaskError {
    if err.is_timeout() {
        TaskError::timeout(err.to_string())
    } else {
        TaskError::provider(err.to_string())
    }
}

/// Run an adapter call under the capability deadline.
///
/// Deadline expiry is indistinguishable from a hung provider, so it
/// surfaces as `Timeout` and follows the base retry policy.
pub(crate) async fn with_deadline<T, F>(
    what: &str,
    timeout: Duration,
    fut: F,
) -> ProviderResult<T>
where
    F: std::future::Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(capability = what, timeout_secs = timeout.as_secs(), "provider call deadline elapsed");
            Err(TaskError::timeout(format!(
                "{what} exceeded {}s deadline",
                timeout.as_secs()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_classification() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(err.code(), "quota");

        let err = classify_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"insufficient_quota"}}"#,
        );
        assert_eq!(err.code(), "quota");
    }

    #[test]
    fn content_policy_classification() {
        let err = classify_status(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"content_policy_violation"}}"#,
        );
        assert_eq!(err.code(), "content_policy");
        assert!(!err.is_retryable());
    }

    #[test]
    fn generic_5xx_is_provider_error() {
        let err = classify_status(StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert_eq!(err.code(), "provider");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn deadline_maps_to_timeout() {
        let result: ProviderResult<()> = with_deadline("text", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result.unwrap_err().code(), "timeout");
    }
}
