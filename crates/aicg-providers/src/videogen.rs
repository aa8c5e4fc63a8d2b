//! Two-phase video generation adapter.
//!
//! Speaks the task-style API exposed by Kling-compatible image-to-video
//! endpoints: a submit call that returns a task id, then polling until the
//! task reaches a terminal state. Generation takes minutes, which is why
//! this capability never blocks a worker slot (the sweeper owns polling).

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use aicg_models::TaskError;

use crate::http::{classify_status, classify_transport};
use crate::traits::{ProviderResult, VideoModel};
use crate::types::{VideoGenStatus, VideoPollResponse, VideoSubmitRequest};

/// Adapter over a Kling-compatible image-to-video endpoint.
#[derive(Clone)]
pub struct KlingAdapter {
    http: Client,
    base_url: String,
    api_key: String,
}

impl KlingAdapter {
    pub fn new(http: Client, base_url: Option<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| "https://api.klingai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            http,
            base_url,
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    model_name: &'a str,
    prompt: &'a str,
    /// First keyframe, base64.
    image: String,
    /// Last keyframe, base64.
    image_tail: String,
    duration: u32,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    data: TaskData,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task_id: String,
    #[serde(default)]
    task_status: Option<String>,
    #[serde(default)]
    task_status_msg: Option<String>,
    #[serde(default)]
    task_result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    videos: Vec<TaskVideo>,
}

#[derive(Debug, Deserialize)]
struct TaskVideo {
    url: String,
}

fn normalize_status(raw: Option<&str>) -> VideoGenStatus {
    match raw {
        Some("submitted") => VideoGenStatus::Pending,
        Some("processing") => VideoGenStatus::Processing,
        Some("succeed") | Some("succeeded") => VideoGenStatus::Succeeded,
        Some("failed") => VideoGenStatus::Failed,
        // Unknown statuses keep the task alive; the sweeper retries.
        _ => VideoGenStatus::Processing,
    }
}

#[async_trait]
impl VideoModel for KlingAdapter {
    #[instrument(skip_all, fields(model = %request.model))]
    async fn submit(&self, request: VideoSubmitRequest) -> ProviderResult<String> {
        let engine = base64::engine::general_purpose::STANDARD;
        let body = SubmitBody {
            model_name: &request.model,
            prompt: &request.prompt,
            image: engine.encode(&request.first_frame),
            image_tail: engine.encode(&request.last_frame),
            duration: request.duration_s,
        };

        let response = self
            .http
            .post(format!("{}/videos/image2video", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let envelope: TaskEnvelope = serde_json::from_str(&text)
            .map_err(|e| TaskError::malformed(format!("submit response: {e}")))?;

        debug!(external_task_id = %envelope.data.task_id, "video generation submitted");
        Ok(envelope.data.task_id)
    }

    #[instrument(skip(self))]
    async fn poll(&self, external_task_id: &str) -> ProviderResult<VideoPollResponse> {
        let response = self
            .http
            .get(format!(
                "{}/videos/image2video/{}",
                self.base_url, external_task_id
            ))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let envelope: TaskEnvelope = serde_json::from_str(&text)
            .map_err(|e| TaskError::malformed(format!("poll response: {e}")))?;

        let gen_status = normalize_status(envelope.data.task_status.as_deref());

        match gen_status {
            VideoGenStatus::Succeeded => {
                let url = envelope
                    .data
                    .task_result
                    .and_then(|r| r.videos.into_iter().next())
                    .map(|v| v.url)
                    .ok_or_else(|| {
                        TaskError::malformed("succeeded task carries no video url")
                    })?;

                // Fetch the finished clip; result URLs are short-lived.
                let clip = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .map_err(classify_transport)?;
                let clip_status = clip.status();
                if !clip_status.is_success() {
                    return Err(TaskError::provider(format!(
                        "video result fetch failed: {clip_status}"
                    )));
                }
                let bytes = clip.bytes().await.map_err(classify_transport)?.to_vec();

                Ok(VideoPollResponse {
                    status: VideoGenStatus::Succeeded,
                    video_bytes: Some(bytes),
                    error: None,
                })
            }
            VideoGenStatus::Failed => Ok(VideoPollResponse {
                status: VideoGenStatus::Failed,
                video_bytes: None,
                error: Some(
                    envelope
                        .data
                        .task_status_msg
                        .unwrap_or_else(|| "provider reported failure".to_string()),
                ),
            }),
            other => Ok(VideoPollResponse {
                status: other,
                video_bytes: None,
                error: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> KlingAdapter {
        KlingAdapter::new(Client::new(), Some(server.uri()), "test-key")
    }

    fn submit_request() -> VideoSubmitRequest {
        VideoSubmitRequest::new(
            "camera pans from the door to the desk",
            "kling-v1-6",
            b"first".to_vec(),
            b"last".to_vec(),
        )
    }

    #[tokio::test]
    async fn submit_returns_task_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos/image2video"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"task_id": "task-42", "task_status": "submitted"}
            })))
            .mount(&server)
            .await;

        let id = adapter(&server).submit(submit_request()).await.unwrap();
        assert_eq!(id, "task-42");
        assert_eq!(submit_request().duration_s, 8);
    }

    #[tokio::test]
    async fn poll_in_flight_is_not_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/image2video/task-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {"task_id": "task-42", "task_status": "processing"}
            })))
            .mount(&server)
            .await;

        let poll = adapter(&server).poll("task-42").await.unwrap();
        assert_eq!(poll.status, VideoGenStatus::Processing);
        assert!(poll.video_bytes.is_none());
    }

    #[tokio::test]
    async fn poll_success_fetches_clip_bytes() {
        let server = MockServer::start().await;
        let clip_url = format!("{}/results/clip.mp4", server.uri());
        Mock::given(method("GET"))
            .and(path("/videos/image2video/task-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "task_id": "task-42",
                    "task_status": "succeed",
                    "task_result": {"videos": [{"url": clip_url}]}
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/results/clip.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4-bytes".to_vec()))
            .mount(&server)
            .await;

        let poll = adapter(&server).poll("task-42").await.unwrap();
        assert_eq!(poll.status, VideoGenStatus::Succeeded);
        assert_eq!(poll.video_bytes.unwrap(), b"mp4-bytes");
    }

    #[tokio::test]
    async fn poll_failure_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videos/image2video/task-9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "task_id": "task-9",
                    "task_status": "failed",
                    "task_status_msg": "frame rejected"
                }
            })))
            .mount(&server)
            .await;

        let poll = adapter(&server).poll("task-9").await.unwrap();
        assert_eq!(poll.status, VideoGenStatus::Failed);
        assert_eq!(poll.error.as_deref(), Some("frame rejected"));
    }

    #[test]
    fn unknown_status_keeps_task_alive() {
        assert_eq!(normalize_status(Some("queued")), VideoGenStatus::Processing);
        assert_eq!(normalize_status(None), VideoGenStatus::Processing);
    }
}
