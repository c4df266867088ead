//! Feature and account routes

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures_util::stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tollgate_core::RequestContext;
use tollgate_provider::{ChatPayload, ErrorKind, ImagePayload, Payload, StructuredError, VideoPayload};

use crate::AppState;
use crate::error::{denial_response, error_body, structured_response};
use crate::facade::{Outcome, StreamEvent};

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Logical model id, family default when absent
    #[serde(default)]
    pub model: Option<String>,
    #[serde(flatten)]
    pub payload: ChatPayload,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(flatten)]
    pub payload: ImagePayload,
}

#[derive(Debug, Deserialize)]
pub struct VideoRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(flatten)]
    pub payload: VideoPayload,
}

/// Handle `POST /v1/chat`
pub async fn chat_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return bad_request(&context, rejection.body_text()),
    };

    if let Err(message) = request.payload.validate() {
        return bad_request(&context, message);
    }

    if request.stream {
        return match state
            .facade
            .handle_stream(&context, request.model.as_deref(), request.payload)
            .await
        {
            Ok(events) => sse_response(events).into_response(),
            Err(outcome) => outcome_response(outcome),
        };
    }

    let outcome = state
        .facade
        .handle(&context, request.model.as_deref(), Payload::Chat(request.payload))
        .await;
    outcome_response(outcome)
}

/// Handle `POST /v1/image`
pub async fn image_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    body: Result<Json<ImageRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => run(&state, &context, request.model.as_deref(), Payload::Image(request.payload)).await,
        Err(rejection) => bad_request(&context, rejection.body_text()),
    }
}

/// Handle `POST /v1/video`
pub async fn video_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    body: Result<Json<VideoRequest>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(request)) => run(&state, &context, request.model.as_deref(), Payload::Video(request.payload)).await,
        Err(rejection) => bad_request(&context, rejection.body_text()),
    }
}

/// Handle `GET /v1/account`
pub async fn account_handler(State(state): State<AppState>, Extension(context): Extension<RequestContext>) -> Response {
    match state.facade.account(&context).await {
        Ok(view) => Json(view).into_response(),
        Err(error) => structured_response(&error),
    }
}

async fn run(state: &AppState, context: &RequestContext, model: Option<&str>, payload: Payload) -> Response {
    if let Err(message) = payload.validate() {
        return bad_request(context, message);
    }

    outcome_response(state.facade.handle(context, model, payload).await)
}

fn outcome_response(outcome: Outcome) -> Response {
    match outcome {
        Outcome::Succeeded(success) => Json(success).into_response(),
        Outcome::Denied { denial, feature } => denial_response(denial, feature),
        Outcome::Failed(error) => structured_response(&error),
    }
}

fn bad_request(context: &RequestContext, message: impl Into<String>) -> Response {
    let error = StructuredError::new(ErrorKind::BadRequest, message, context.request_id.clone());
    structured_response(&error)
}

/// Relay facade stream events as `chunk`, `done` and `error` SSE events
fn sse_response(
    events: mpsc::Receiver<StreamEvent>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let stream = stream::unfold(events, |mut events| async move {
        let event = events.recv().await?;
        Some((Ok(to_sse(event)), events))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: StreamEvent) -> Event {
    let (name, data) = match event {
        StreamEvent::Chunk(delta) => ("chunk", json!({ "delta": delta })),
        StreamEvent::Done(success) => ("done", serde_json::to_value(&success).unwrap_or_default()),
        StreamEvent::Error(error) => ("error", error_body(&error)),
    };

    Event::default().event(name).data(data.to_string())
}
