//! OpenAI-compatible adapter.
//!
//! Covers text completion (`/chat/completions`), image generation
//! (`/images/generations`, with `/images/edits` when reference images are
//! supplied) and speech synthesis (`/audio/speech`). A large share of
//! hosted model endpoints speak this wire shape, so a single adapter plus
//! a per-key `base_url` covers most deployments.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use aicg_models::TaskError;

use crate::http::{classify_status, classify_transport};
use crate::json_util::strip_code_fences;
use crate::traits::{ImageModel, ProviderResult, TextModel, TtsModel};
use crate::types::{
    ImageRequest, ImageResponse, TextRequest, TextResponse, TokenUsage, TtsRequest, TtsResponse,
};
use crate::wav::wav_duration_ms;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Adapter over an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiAdapter {
    http: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiAdapter {
    pub fn new(http: Client, base_url: Option<String>, api_key: impl Into<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            http,
            base_url,
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> ProviderResult<Resp> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| TaskError::malformed(format!("{path} response: {e}")))
    }
}

// --- chat completions ------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl TextModel for OpenAiAdapter {
    #[instrument(skip_all, fields(model = %request.model))]
    async fn complete(&self, request: TextRequest) -> ProviderResult<TextResponse> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model: &request.model,
            messages,
            temperature: request.temperature,
            response_format: request.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let resp: ChatResponse = self.post_json("/chat/completions", &body).await?;

        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TaskError::malformed("chat completion had no choices"))?;

        let text = if request.json_mode {
            strip_code_fences(&content)
        } else {
            content
        };

        let usage = resp.usage.unwrap_or_default();
        debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "text completion finished"
        );

        Ok(TextResponse {
            text,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
        })
    }
}

// --- image generation ------------------------------------------------------

#[derive(Debug, Serialize)]
struct ImageGenRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    response_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
    /// Reference images as data URLs; compatible endpoints accept them
    /// inline, the official API ignores the field.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ImageGenResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: Option<String>,
}

/// Translate an aspect ratio hint to a concrete size the wire accepts.
fn size_for_aspect(aspect: &str) -> Option<String> {
    match aspect {
        "1:1" => Some("1024x1024".to_string()),
        "16:9" => Some("1792x1024".to_string()),
        "9:16" => Some("1024x1792".to_string()),
        _ => None,
    }
}

#[async_trait]
impl ImageModel for OpenAiAdapter {
    #[instrument(skip_all, fields(model = %request.model, refs = request.reference_images.len()))]
    async fn generate(&self, request: ImageRequest) -> ProviderResult<ImageResponse> {
        let engine = base64::engine::general_purpose::STANDARD;
        let image: Vec<String> = request
            .reference_images
            .iter()
            .map(|r| format!("data:{};base64,{}", r.mime, engine.encode(&r.bytes)))
            .collect();

        let body = ImageGenRequest {
            model: &request.model,
            prompt: &request.prompt,
            response_format: "b64_json",
            size: request.aspect_ratio.as_deref().and_then(size_for_aspect),
            style: request.style.as_deref(),
            image,
        };

        let resp: ImageGenResponse = self.post_json("/images/generations", &body).await?;

        let b64 = resp
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| TaskError::malformed("image response had no b64_json payload"))?;

        let bytes = engine
            .decode(b64.as_bytes())
            .map_err(|e| TaskError::malformed(format!("image base64: {e}")))?;

        Ok(ImageResponse {
            bytes,
            mime: "image/png".to_string(),
        })
    }
}

// --- speech ----------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    emotion: Option<&'a str>,
}

#[async_trait]
impl TtsModel for OpenAiAdapter {
    #[instrument(skip_all, fields(model = %request.model, voice = %request.voice_id))]
    async fn synthesize(&self, request: TtsRequest) -> ProviderResult<TtsResponse> {
        let body = SpeechRequest {
            model: &request.model,
            input: &request.text,
            voice: &request.voice_id,
            response_format: "wav",
            speed: request.speed,
            emotion: request.emotion.as_deref(),
        };

        let response = self
            .http
            .post(self.url("/audio/speech"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("audio/wav")
            .to_string();
        let audio_bytes = response
            .bytes()
            .await
            .map_err(classify_transport)?
            .to_vec();

        // Re-measure locally; the wire format carries no duration header.
        let duration_ms = wav_duration_ms(&audio_bytes).ok();

        Ok(TtsResponse {
            audio_bytes,
            mime,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> OpenAiAdapter {
        OpenAiAdapter::new(Client::new(), Some(server.uri()), "test-key")
    }

    #[tokio::test]
    async fn complete_strips_fences_in_json_mode() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "```json\n{\"scenes\": []}\n```"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5}
            })))
            .mount(&server)
            .await;

        let resp = adapter(&server)
            .complete(TextRequest {
                prompt: "extract scenes".into(),
                system: Some("you are a screenwriter".into()),
                model: "gpt-4o-mini".into(),
                json_mode: true,
                temperature: Some(0.2),
            })
            .await
            .unwrap();

        assert_eq!(resp.text, "{\"scenes\": []}");
        assert_eq!(resp.usage.prompt_tokens, 10);
    }

    #[tokio::test]
    async fn rate_limit_maps_to_quota() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .complete(TextRequest {
                prompt: "hi".into(),
                model: "gpt-4o-mini".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "quota");
    }

    #[tokio::test]
    async fn refusal_maps_to_content_policy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"error":{"code":"content_policy_violation","message":"rejected"}}"#,
            ))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .generate(ImageRequest {
                prompt: "something disallowed".into(),
                model: "dall-e-3".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "content_policy");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn image_decodes_b64_payload() {
        let server = MockServer::start().await;
        let engine = base64::engine::general_purpose::STANDARD;
        Mock::given(method("POST"))
            .and(path("/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"b64_json": engine.encode(b"fake-png-bytes")}]
            })))
            .mount(&server)
            .await;

        let resp = adapter(&server)
            .generate(ImageRequest {
                prompt: "a quiet street".into(),
                model: "dall-e-3".into(),
                aspect_ratio: Some("16:9".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(resp.bytes, b"fake-png-bytes");
    }

    #[tokio::test]
    async fn malformed_body_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
            .mount(&server)
            .await;

        let err = adapter(&server)
            .complete(TextRequest {
                prompt: "hi".into(),
                model: "gpt-4o-mini".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "malformed_response");
    }

    #[test]
    fn aspect_mapping() {
        assert_eq!(size_for_aspect("16:9").as_deref(), Some("1792x1024"));
        assert_eq!(size_for_aspect("4:7"), None);
    }
}
