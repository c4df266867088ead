//! Mock generation backend for integration tests
//!
//! Implements the slice of the OpenAI-compatible API the gateway calls and
//! can be scripted to fail or stall.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// Mock backend that returns predictable responses
pub struct MockUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    chat_count: AtomicU32,
    image_count: AtomicU32,
    video_count: AtomicU32,
    models_count: AtomicU32,
    /// Requests still to fail with `failure`
    fail_count: AtomicU32,
    failure: Mutex<Option<(StatusCode, Value)>>,
    delay: Mutex<Duration>,
    models: Mutex<Vec<String>>,
    last_chat: Mutex<Option<Value>>,
}

impl MockUpstream {
    /// Start the mock server, returning immediately
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockState::default());
        *state.models.lock().unwrap() = ["gpt-5.1", "gpt-image-1", "sora-2"].map(str::to_owned).to_vec();

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(handle_chat))
            .route("/v1/images/generations", routing::post(handle_image))
            .route("/v1/videos", routing::post(handle_video))
            .route("/v1/models", routing::get(handle_models))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as the upstream
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Fail the next `n` generation requests with `status` and an OpenAI error body
    pub fn fail_next(&self, n: u32, status: u16, code: &str, message: &str) {
        let body = json!({ "error": { "message": message, "type": "invalid_request_error", "code": code } });
        let status = StatusCode::from_u16(status).expect("valid status");
        *self.state.failure.lock().unwrap() = Some((status, body));
        self.state.fail_count.store(n, Ordering::SeqCst);
    }

    /// Stall every generation request
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// Replace the advertised model catalog
    pub fn set_models(&self, models: &[&str]) {
        *self.state.models.lock().unwrap() = models.iter().map(|m| (*m).to_owned()).collect();
    }

    pub fn chat_count(&self) -> u32 {
        self.state.chat_count.load(Ordering::SeqCst)
    }

    pub fn image_count(&self) -> u32 {
        self.state.image_count.load(Ordering::SeqCst)
    }

    pub fn video_count(&self) -> u32 {
        self.state.video_count.load(Ordering::SeqCst)
    }

    pub fn models_count(&self) -> u32 {
        self.state.models_count.load(Ordering::SeqCst)
    }

    /// Body of the most recent chat completion request
    pub fn last_chat(&self) -> Option<Value> {
        self.state.last_chat.lock().unwrap().clone()
    }

    /// Wait until the gateway has fetched the model catalog
    pub async fn wait_for_discovery(&self) {
        for _ in 0..100 {
            if self.models_count() > 0 {
                // the snapshot is published right after the response
                tokio::time::sleep(Duration::from_millis(50)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("gateway never fetched the model catalog");
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl MockState {
    /// Apply the scripted delay and failure, if any
    async fn scripted(&self) -> Option<Response> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.fail_count.load(Ordering::SeqCst);
        if remaining == 0 {
            return None;
        }
        self.fail_count.store(remaining - 1, Ordering::SeqCst);

        let (status, body) = self.failure.lock().unwrap().clone()?;
        Some((status, Json(body)).into_response())
    }
}

async fn handle_chat(State(state): State<Arc<MockState>>, Json(request): Json<Value>) -> Response {
    state.chat_count.fetch_add(1, Ordering::SeqCst);
    *state.last_chat.lock().unwrap() = Some(request.clone());

    if let Some(failure) = state.scripted().await {
        return failure;
    }

    let model = request["model"].as_str().unwrap_or_default().to_owned();
    let last = request["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_owned();
    let reply = format!("Echo: {last}");

    if request["stream"].as_bool().unwrap_or(false) {
        let mut body = String::new();
        for word in reply.split_inclusive(' ') {
            let chunk = json!({ "choices": [{ "index": 0, "delta": { "content": word }, "finish_reason": null }] });
            body.push_str(&format!("data: {chunk}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");

        return ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response();
    }

    Json(json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": reply },
            "finish_reason": "stop"
        }]
    }))
    .into_response()
}

async fn handle_image(State(state): State<Arc<MockState>>, Json(request): Json<Value>) -> Response {
    state.image_count.fetch_add(1, Ordering::SeqCst);
    if let Some(failure) = state.scripted().await {
        return failure;
    }

    let n = request["n"].as_u64().unwrap_or(1);
    let data: Vec<Value> = (0..n)
        .map(|i| json!({ "url": format!("https://images.mock/{i}.png") }))
        .collect();

    Json(json!({ "created": 0, "data": data })).into_response()
}

async fn handle_video(State(state): State<Arc<MockState>>, Json(_request): Json<Value>) -> Response {
    state.video_count.fetch_add(1, Ordering::SeqCst);
    if let Some(failure) = state.scripted().await {
        return failure;
    }

    Json(json!({ "id": "video_mock", "object": "video", "status": "queued" })).into_response()
}

async fn handle_models(State(state): State<Arc<MockState>>) -> Response {
    state.models_count.fetch_add(1, Ordering::SeqCst);
    let data: Vec<Value> = state
        .models
        .lock()
        .unwrap()
        .iter()
        .map(|id| json!({ "id": id, "object": "model" }))
        .collect();

    Json(json!({ "object": "list", "data": data })).into_response()
}
