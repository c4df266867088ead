//! The external generation API

use std::pin::Pin;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt, future};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::classify::Failure;
use crate::protocol::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ImageGenerationRequest,
    ImageGenerationResponse, ModelList, VideoCreateRequest, VideoObject,
};
use crate::types::{ChatMessage, ImageAsset, ImagePayload, Output, VideoJob, VideoPayload};

/// Default `OpenAI` API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Incremental chat text; ends when the provider finishes
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, Failure>> + Send>>;

/// A generation backend
///
/// Implementations report raw [`Failure`]s; classification happens in the
/// gateway.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<Output, Failure>;

    async fn chat_stream(&self, model: &str, messages: &[ChatMessage]) -> Result<DeltaStream, Failure>;

    async fn image(&self, model: &str, payload: &ImagePayload) -> Result<Output, Failure>;

    async fn video(&self, model: &str, payload: &VideoPayload) -> Result<Output, Failure>;

    /// Model ids the backend currently serves
    async fn models(&self) -> Result<Vec<String>, Failure>;
}

/// OpenAI-compatible HTTP backend
pub struct OpenAiUpstream {
    client: Client,
    base_url: Url,
    api_key: SecretString,
}

impl OpenAiUpstream {
    /// # Panics
    ///
    /// Panics if the hardcoded default base URL is invalid (should never happen).
    pub fn new(api_key: SecretString, base_url: Option<Url>) -> Self {
        let base_url = base_url.unwrap_or_else(|| Url::parse(DEFAULT_BASE_URL).expect("valid default URL"));

        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/{path}")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, Failure> {
        let response = builder
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(transport_failure)?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(upstream = %self.name(), status, "upstream returned error");

        Err(Failure::from_response(status, &body))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, Failure> {
        response
            .json()
            .await
            .map_err(|e| Failure::Transport(format!("failed to parse response: {e}")))
    }
}

fn transport_failure(error: reqwest::Error) -> Failure {
    if error.is_timeout() {
        Failure::Timeout
    } else {
        let failure = Failure::Transport(error.to_string());
        tracing::error!(error = %failure.redacted(), "upstream request failed");
        failure
    }
}

/// One parsed server-sent event
enum SseEvent {
    Delta(String),
    Skip,
    Done,
    Error(Failure),
}

#[async_trait]
impl Upstream for OpenAiUpstream {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<Output, Failure> {
        let request = ChatCompletionRequest {
            model,
            messages,
            stream: None,
        };
        let response = self
            .send(self.client.post(self.endpoint("chat/completions")).json(&request))
            .await?;
        let body: ChatCompletionResponse = Self::read_json(response).await?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Failure::Transport("response contained no choices".to_owned()))?;

        Ok(Output::chat(
            choice.message.content.unwrap_or_default(),
            choice.finish_reason,
        ))
    }

    async fn chat_stream(&self, model: &str, messages: &[ChatMessage]) -> Result<DeltaStream, Failure> {
        let request = ChatCompletionRequest {
            model,
            messages,
            stream: Some(true),
        };
        let response = self
            .send(self.client.post(self.endpoint("chat/completions")).json(&request))
            .await?;

        let events = response
            .bytes_stream()
            .eventsource()
            .map(|result| match result {
                Ok(event) => {
                    let data = event.data.trim();
                    if data == "[DONE]" {
                        return SseEvent::Done;
                    }

                    match serde_json::from_str::<ChatCompletionChunk>(data) {
                        Ok(chunk) => chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|choice| choice.delta.content)
                            .filter(|content| !content.is_empty())
                            .map_or(SseEvent::Skip, SseEvent::Delta),
                        Err(e) => {
                            tracing::debug!(error = %e, data = %data, "skipping unparseable SSE chunk");
                            SseEvent::Skip
                        }
                    }
                }
                Err(e) => SseEvent::Error(Failure::Transport(format!("stream interrupted: {e}"))),
            })
            .take_while(|event| future::ready(!matches!(event, SseEvent::Done)))
            .filter_map(|event| {
                future::ready(match event {
                    SseEvent::Delta(text) => Some(Ok(text)),
                    SseEvent::Error(failure) => Some(Err(failure)),
                    SseEvent::Skip | SseEvent::Done => None,
                })
            });

        Ok(Box::pin(events))
    }

    async fn image(&self, model: &str, payload: &ImagePayload) -> Result<Output, Failure> {
        let request = ImageGenerationRequest {
            model,
            prompt: &payload.prompt,
            n: payload.n,
            size: payload.size.as_deref(),
        };
        let response = self
            .send(self.client.post(self.endpoint("images/generations")).json(&request))
            .await?;
        let body: ImageGenerationResponse = Self::read_json(response).await?;

        let images = body
            .data
            .into_iter()
            .map(|image| ImageAsset {
                url: image.url,
                b64_json: image.b64_json,
                revised_prompt: image.revised_prompt,
            })
            .collect();

        Ok(Output::Image { images })
    }

    async fn video(&self, model: &str, payload: &VideoPayload) -> Result<Output, Failure> {
        let request = VideoCreateRequest {
            model,
            prompt: &payload.prompt,
            seconds: payload.seconds.map(|s| s.to_string()),
            size: payload.size.as_deref(),
        };
        let response = self
            .send(self.client.post(self.endpoint("videos")).json(&request))
            .await?;
        let body: VideoObject = Self::read_json(response).await?;

        Ok(Output::Video {
            video: VideoJob {
                id: body.id,
                status: body.status,
                url: None,
            },
        })
    }

    async fn models(&self) -> Result<Vec<String>, Failure> {
        let response = self.send(self.client.get(self.endpoint("models"))).await?;
        let body: ModelList = Self::read_json(response).await?;

        Ok(body.data.into_iter().map(|m| m.id).collect())
    }
}

impl std::fmt::Debug for OpenAiUpstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiUpstream")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::types::Role;

    fn upstream(server: &MockServer) -> OpenAiUpstream {
        let base = Url::parse(&format!("{}/v1", server.uri())).unwrap();
        OpenAiUpstream::new(SecretString::from("sk-test".to_owned()), Some(base))
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::new(Role::User, "hello")]
    }

    #[tokio::test]
    async fn chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi there"}, "finish_reason": "stop"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let output = upstream(&server).chat("gpt-4o-mini", &messages()).await.unwrap();
        assert_eq!(output.text(), Some("hi there"));
    }

    #[tokio::test]
    async fn error_bodies_become_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "You exceeded your current quota", "type": "insufficient_quota", "code": "insufficient_quota"}
            })))
            .mount(&server)
            .await;

        let failure = upstream(&server).chat("gpt-4o", &messages()).await.unwrap_err();
        assert_eq!(
            failure,
            Failure::Http {
                status: 429,
                code: Some("insufficient_quota".to_owned()),
                error_type: Some("insufficient_quota".to_owned()),
                message: Some("You exceeded your current quota".to_owned()),
            }
        );
    }

    #[tokio::test]
    async fn streams_deltas_until_done() {
        let server = MockServer::start().await;
        let body = [
            r#"data: {"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#,
            r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#,
            r#"data: {"choices":[{"index":0,"delta":{"content":"lo"}}]}"#,
            r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
            r#"data: {"choices":[{"index":0,"delta":{"content":"ignored"}}]}"#,
        ]
        .map(|line| format!("{line}\n\n"))
        .concat();

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = upstream(&server).chat_stream("gpt-4o", &messages()).await.unwrap();
        let deltas: Vec<_> = stream.collect().await;
        let deltas: Vec<String> = deltas.into_iter().map(Result::unwrap).collect();

        assert_eq!(deltas, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn image_generation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .and(body_partial_json(json!({"model": "gpt-image-1", "prompt": "a lighthouse", "size": "1024x1024"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "created": 1,
                "data": [{"url": "https://cdn.example.com/1.png"}]
            })))
            .mount(&server)
            .await;

        let payload = ImagePayload {
            prompt: "a lighthouse".to_owned(),
            size: Some("1024x1024".to_owned()),
            n: None,
        };
        let Output::Image { images } = upstream(&server).image("gpt-image-1", &payload).await.unwrap() else {
            panic!("expected image output");
        };
        assert_eq!(images[0].url.as_deref(), Some("https://cdn.example.com/1.png"));
    }

    #[tokio::test]
    async fn video_job_creation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/videos"))
            .and(body_partial_json(json!({"model": "sora-2", "seconds": "8"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "video_123", "object": "video", "status": "queued", "progress": 0
            })))
            .mount(&server)
            .await;

        let payload = VideoPayload {
            prompt: "waves".to_owned(),
            seconds: Some(8),
            size: None,
        };
        let Output::Video { video } = upstream(&server).video("sora-2", &payload).await.unwrap() else {
            panic!("expected video output");
        };
        assert_eq!(video.id, "video_123");
        assert_eq!(video.status, "queued");
    }

    #[tokio::test]
    async fn lists_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"id": "gpt-4o-mini", "object": "model"}, {"id": "dall-e-3", "object": "model"}]
            })))
            .mount(&server)
            .await;

        let models = upstream(&server).models().await.unwrap();
        assert_eq!(models, vec!["gpt-4o-mini", "dall-e-3"]);
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_failure() {
        let base = Url::parse("http://127.0.0.1:1/v1").unwrap();
        let upstream = OpenAiUpstream::new(SecretString::from("sk-test".to_owned()), Some(base));

        let failure = upstream.models().await.unwrap_err();
        assert!(matches!(failure, Failure::Transport(_)));
    }
}
