//! One bounded upstream call
//!
//! The gateway is the only place raw upstream failures become
//! [`StructuredError`]s. Without a credential it runs in demo mode and
//! answers every call with synthetic output.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt, stream};
use indexmap::IndexMap;
use tokio::time::{Instant, timeout, timeout_at};
use tollgate_config::{FeatureTimeouts, ProviderConfig, WorkspaceConfig};
use tollgate_core::{Feature, RequestId};

use crate::classify::{Failure, classify};
use crate::demo;
use crate::error::StructuredError;
use crate::types::{ChatMessage, ChatPayload, Output, Payload, Role};
use crate::upstream::{DeltaStream, Upstream};

/// A successful call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub output: Output,
    /// Synthetic output, either demo mode or soft fallback
    pub is_demo: bool,
}

/// Item of a streamed chat call
///
/// A stream yields any number of chunks followed by exactly one terminal
/// item: `Finished` or an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Chunk(String),
    Finished(Completion),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamItem, StructuredError>> + Send>>;

pub struct ProviderGateway {
    upstream: Option<Arc<dyn Upstream>>,
    timeouts: FeatureTimeouts,
    demo_fallback: bool,
    workspaces: IndexMap<String, WorkspaceConfig>,
    default_workspace: String,
}

impl ProviderGateway {
    /// `upstream = None` puts the gateway in demo mode
    pub fn new(upstream: Option<Arc<dyn Upstream>>, config: &ProviderConfig) -> Self {
        Self {
            upstream,
            timeouts: config.timeouts,
            demo_fallback: config.demo_fallback,
            workspaces: config.workspaces.clone(),
            default_workspace: config.default_workspace.clone(),
        }
    }

    pub fn upstream(&self) -> Option<&Arc<dyn Upstream>> {
        self.upstream.as_ref()
    }

    pub const fn is_demo(&self) -> bool {
        self.upstream.is_none()
    }

    pub const fn timeout(&self, feature: Feature) -> Duration {
        match feature {
            Feature::Chat => self.timeouts.chat,
            Feature::Image => self.timeouts.image,
            Feature::Video => self.timeouts.video,
        }
    }

    /// Perform one call within the feature's time ceiling
    pub async fn call(
        &self,
        payload: &Payload,
        model: &str,
        request_id: &RequestId,
    ) -> Result<Completion, StructuredError> {
        let Some(upstream) = &self.upstream else {
            return Ok(Completion {
                output: demo::output(payload),
                is_demo: true,
            });
        };

        let attempt = async {
            match payload {
                Payload::Chat(chat) => upstream.chat(model, &self.frame(chat)).await,
                Payload::Image(image) => upstream.image(model, image).await,
                Payload::Video(video) => upstream.video(model, video).await,
            }
        };

        let failure = match timeout(self.timeout(payload.feature()), attempt).await {
            Ok(Ok(output)) => {
                return Ok(Completion { output, is_demo: false });
            }
            Ok(Err(failure)) => failure,
            Err(_) => Failure::Timeout,
        };

        let error = classify(&failure, request_id);
        if self.demo_fallback {
            tracing::warn!(
                request_id = %request_id,
                kind = %error.kind,
                error = %error.message,
                "upstream call failed, serving demo fallback"
            );
            return Ok(Completion {
                output: demo::output(payload),
                is_demo: true,
            });
        }

        Err(error)
    }

    /// Stream a chat call
    ///
    /// The chat ceiling bounds the whole stream, not each chunk. Failures to
    /// open the stream honour the soft demo fallback; a failure after the
    /// first chunk always ends the stream with an error.
    pub async fn call_stream(&self, chat: &ChatPayload, model: &str, request_id: &RequestId) -> ChatStream {
        let Some(upstream) = &self.upstream else {
            return demo_stream(chat);
        };

        let deadline = Instant::now() + self.timeouts.chat;
        let messages = self.frame(chat);

        let failure = match timeout_at(deadline, upstream.chat_stream(model, &messages)).await {
            Ok(Ok(inner)) => return relay(inner, deadline, request_id.clone()),
            Ok(Err(failure)) => failure,
            Err(_) => Failure::Timeout,
        };

        let error = classify(&failure, request_id);
        if self.demo_fallback {
            tracing::warn!(
                request_id = %request_id,
                kind = %error.kind,
                "upstream stream failed to open, serving demo fallback"
            );
            return demo_stream(chat);
        }

        Box::pin(stream::once(async move { Err(error) }))
    }

    /// Workspace used for `hint`
    ///
    /// Unknown hints fall back to the default workspace.
    pub fn workspace_for<'a>(&'a self, hint: Option<&'a str>) -> &'a str {
        hint.filter(|name| self.workspaces.contains_key(*name))
            .unwrap_or(&self.default_workspace)
    }

    /// Conversation as sent upstream, framed by the workspace prompt
    fn frame(&self, chat: &ChatPayload) -> Vec<ChatMessage> {
        let hint = chat.workspace.as_deref();
        let workspace = self.workspace_for(hint);
        if let Some(name) = hint
            && name != workspace
        {
            tracing::warn!(workspace = %name, fallback = %workspace, "unknown workspace, using default");
        }

        let prompt = self
            .workspaces
            .get(workspace)
            .and_then(|w| w.system_prompt.as_deref());

        prompt
            .map(|p| ChatMessage::new(Role::System, p))
            .into_iter()
            .chain(chat.messages.iter().cloned())
            .collect()
    }
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateway")
            .field("demo", &self.is_demo())
            .field("timeouts", &self.timeouts)
            .field("demo_fallback", &self.demo_fallback)
            .finish_non_exhaustive()
    }
}

struct Relay {
    inner: DeltaStream,
    deadline: Instant,
    text: String,
    request_id: RequestId,
}

/// Forward upstream deltas, accumulating the final message
fn relay(inner: DeltaStream, deadline: Instant, request_id: RequestId) -> ChatStream {
    let state = Relay {
        inner,
        deadline,
        text: String::new(),
        request_id,
    };

    Box::pin(stream::unfold(Some(state), |state| async move {
        let mut state = state?;

        match timeout_at(state.deadline, state.inner.next()).await {
            Ok(Some(Ok(delta))) => {
                state.text.push_str(&delta);
                Some((Ok(StreamItem::Chunk(delta)), Some(state)))
            }
            Ok(None) => {
                let completion = Completion {
                    output: Output::chat(std::mem::take(&mut state.text), Some("stop".to_owned())),
                    is_demo: false,
                };
                Some((Ok(StreamItem::Finished(completion)), None))
            }
            Ok(Some(Err(failure))) => Some((Err(classify(&failure, &state.request_id)), None)),
            Err(_) => Some((Err(classify(&Failure::Timeout, &state.request_id)), None)),
        }
    }))
}

fn demo_stream(chat: &ChatPayload) -> ChatStream {
    let chunks = demo::reply_chunks(chat);
    let finished = Completion {
        output: Output::chat(chunks.concat(), Some("stop".to_owned())),
        is_demo: true,
    };

    let items = chunks
        .into_iter()
        .map(|chunk| Ok(StreamItem::Chunk(chunk)))
        .chain(std::iter::once(Ok(StreamItem::Finished(finished))));

    Box::pin(stream::iter(items))
}
