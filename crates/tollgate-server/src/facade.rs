//! Per-request orchestration
//!
//! Every feature request walks the same path: admission against the
//! ledger, model resolution, one bounded upstream call, then commit and
//! broadcast on success. Admission always happens before anything leaves
//! the process, and nothing is charged unless the call succeeded.

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tollgate_core::{Feature, HttpError, RequestContext, RequestId};
use tollgate_ledger::{AccountView, Admission, Denial, LedgerError, Reservation, UsageLedger};
use tollgate_provider::{
    ChatPayload, Completion, ErrorKind, ModelCatalog, ModelResolver, Output, Payload, ProviderGateway, Resolution,
    StreamItem, StructuredError,
};
use tollgate_sync::{SyncBroadcaster, SyncEvent};
use tollgate_telemetry::GatewayMetrics;

const STREAM_BUFFER: usize = 32;

/// Lifecycle of one feature request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Admitted,
    Resolving,
    Calling,
    Succeeded,
    Failed,
    Denied,
}

impl RequestState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Admitted => "admitted",
            Self::Resolving => "resolving",
            Self::Calling => "calling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Denied => "denied",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Denied)
    }

    /// Whether `next` may follow `self`
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::Admitted | Self::Denied | Self::Failed)
                | (Self::Admitted, Self::Resolving)
                | (Self::Resolving, Self::Calling | Self::Failed)
                | (Self::Calling, Self::Succeeded | Self::Failed)
        )
    }
}

/// State tracker for a single request
#[derive(Debug)]
struct Lifecycle {
    state: RequestState,
    request_id: RequestId,
    feature: Feature,
}

impl Lifecycle {
    fn new(request_id: RequestId, feature: Feature) -> Self {
        tracing::debug!(request_id = %request_id, %feature, state = "received", "request state");
        Self {
            state: RequestState::Received,
            request_id,
            feature,
        }
    }

    fn advance(&mut self, next: RequestState) {
        if !self.state.can_transition(next) {
            tracing::error!(
                request_id = %self.request_id,
                from = self.state.as_str(),
                to = next.as_str(),
                "invalid request state transition"
            );
        }

        tracing::debug!(
            request_id = %self.request_id,
            feature = %self.feature,
            from = self.state.as_str(),
            to = next.as_str(),
            "request state"
        );
        self.state = next;
    }
}

/// Successful response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Success {
    pub request_id: RequestId,
    pub output: Output,
    pub resolved_model: String,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub is_demo: bool,
}

/// Result of a non-streamed request
#[derive(Debug)]
pub enum Outcome {
    Succeeded(Success),
    Denied { denial: Denial, feature: Feature },
    Failed(StructuredError),
}

/// Event relayed to a streaming client
#[derive(Debug)]
pub enum StreamEvent {
    Chunk(String),
    Done(Success),
    Error(StructuredError),
}

/// Request that passed admission and resolution, ready to call upstream
struct Admitted {
    lifecycle: Lifecycle,
    reservation: Reservation,
    resolution: Resolution,
}

pub struct GatewayFacade {
    ledger: Arc<UsageLedger>,
    resolver: ModelResolver,
    catalog: Arc<ModelCatalog>,
    gateway: ProviderGateway,
    broadcaster: Arc<SyncBroadcaster>,
    metrics: GatewayMetrics,
}

impl GatewayFacade {
    pub const fn new(
        ledger: Arc<UsageLedger>,
        resolver: ModelResolver,
        catalog: Arc<ModelCatalog>,
        gateway: ProviderGateway,
        broadcaster: Arc<SyncBroadcaster>,
        metrics: GatewayMetrics,
    ) -> Self {
        Self {
            ledger,
            resolver,
            catalog,
            gateway,
            broadcaster,
            metrics,
        }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn broadcaster(&self) -> &Arc<SyncBroadcaster> {
        &self.broadcaster
    }

    /// Account projection for the caller
    pub async fn account(&self, context: &RequestContext) -> Result<AccountView, StructuredError> {
        self.ledger
            .view(&context.identity)
            .await
            .map_err(|e| ledger_failure(&e, &context.request_id))
    }

    /// Serve one request to completion
    pub async fn handle(&self, context: &RequestContext, model: Option<&str>, payload: Payload) -> Outcome {
        let feature = payload.feature();
        let admitted = match self.admit(context, feature, model).await {
            Ok(admitted) => admitted,
            Err(outcome) => return outcome,
        };

        let Admitted {
            mut lifecycle,
            reservation,
            resolution,
        } = admitted;

        lifecycle.advance(RequestState::Calling);
        let started = Instant::now();
        let result = self
            .gateway
            .call(&payload, &resolution.resolved_model, &context.request_id)
            .await;

        match result {
            Ok(completion) => {
                self.metrics
                    .record_upstream(feature.as_str(), started, completion.is_demo);
                lifecycle.advance(RequestState::Succeeded);
                let chat = match &payload {
                    Payload::Chat(chat) => Some(chat),
                    _ => None,
                };
                Outcome::Succeeded(self.succeed(context, reservation, resolution, completion, chat).await)
            }
            Err(error) => {
                self.metrics.record_upstream(feature.as_str(), started, false);
                lifecycle.advance(RequestState::Failed);
                Outcome::Failed(self.fail(feature, error))
            }
        }
    }

    /// Serve a streamed chat request
    ///
    /// Admission and resolution happen before this returns, so a denial or
    /// resolution failure is reported as a plain [`Outcome`]. Afterwards the
    /// call runs on its own task; dropping the receiver cancels it and
    /// releases the reservation without charge.
    pub async fn handle_stream(
        self: &Arc<Self>,
        context: &RequestContext,
        model: Option<&str>,
        chat: ChatPayload,
    ) -> Result<mpsc::Receiver<StreamEvent>, Outcome> {
        let admitted = self.admit(context, Feature::Chat, model).await?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let facade = Arc::clone(self);
        let context = context.clone();

        tokio::spawn(async move {
            facade.drive_stream(context, chat, admitted, tx).await;
        });

        Ok(rx)
    }

    async fn drive_stream(
        &self,
        context: RequestContext,
        chat: ChatPayload,
        admitted: Admitted,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let Admitted {
            mut lifecycle,
            reservation,
            resolution,
        } = admitted;

        lifecycle.advance(RequestState::Calling);
        let started = Instant::now();
        let mut stream = self
            .gateway
            .call_stream(&chat, &resolution.resolved_model, &context.request_id)
            .await;

        loop {
            let item = tokio::select! {
                () = tx.closed() => {
                    tracing::info!(request_id = %context.request_id, "stream client disconnected, releasing reservation");
                    lifecycle.advance(RequestState::Failed);
                    self.metrics.record_request(Feature::Chat.as_str(), "cancelled");
                    return;
                }
                item = stream.next() => item,
            };

            match item {
                Some(Ok(StreamItem::Chunk(delta))) => {
                    if tx.send(StreamEvent::Chunk(delta)).await.is_err() {
                        lifecycle.advance(RequestState::Failed);
                        self.metrics.record_request(Feature::Chat.as_str(), "cancelled");
                        return;
                    }
                }
                Some(Ok(StreamItem::Finished(completion))) => {
                    self.metrics
                        .record_upstream(Feature::Chat.as_str(), started, completion.is_demo);
                    lifecycle.advance(RequestState::Succeeded);
                    let success = self
                        .succeed(&context, reservation, resolution, completion, Some(&chat))
                        .await;
                    // Usage is already committed; a client gone by now still pays
                    if tx.send(StreamEvent::Done(success)).await.is_err() {
                        tracing::info!(
                            request_id = %context.request_id,
                            "stream client left after completion, usage already committed"
                        );
                    }
                    return;
                }
                Some(Err(error)) => {
                    self.metrics.record_upstream(Feature::Chat.as_str(), started, false);
                    lifecycle.advance(RequestState::Failed);
                    if tx
                        .send(StreamEvent::Error(self.fail(Feature::Chat, error)))
                        .await
                        .is_err()
                    {
                        tracing::debug!(request_id = %context.request_id, "stream client left before the error arrived");
                    }
                    return;
                }
                None => {
                    // The gateway always ends with a terminal item
                    let error = StructuredError::new(
                        ErrorKind::Server,
                        "upstream stream ended unexpectedly",
                        context.request_id.clone(),
                    );
                    lifecycle.advance(RequestState::Failed);
                    let _ = tx.send(StreamEvent::Error(self.fail(Feature::Chat, error))).await;
                    return;
                }
            }
        }
    }

    /// RECEIVED through RESOLVING
    async fn admit(&self, context: &RequestContext, feature: Feature, model: Option<&str>) -> Result<Admitted, Outcome> {
        let mut lifecycle = Lifecycle::new(context.request_id.clone(), feature);
        let cost = self.ledger.cost(feature);

        let reservation = match self.ledger.check_and_reserve(&context.identity, feature, cost).await {
            Ok(Admission::Allowed(reservation)) => reservation,
            Ok(Admission::Denied(denial)) => {
                lifecycle.advance(RequestState::Denied);
                self.metrics.record_denial(feature.as_str(), denial.code());
                self.metrics.record_request(feature.as_str(), "denied");
                tracing::info!(
                    request_id = %context.request_id,
                    account_id = %context.account_id(),
                    %feature,
                    reason = denial.code(),
                    "request denied"
                );
                return Err(Outcome::Denied { denial, feature });
            }
            Err(e) => {
                lifecycle.advance(RequestState::Failed);
                return Err(Outcome::Failed(self.fail(feature, ledger_failure(&e, &context.request_id))));
            }
        };

        lifecycle.advance(RequestState::Admitted);
        lifecycle.advance(RequestState::Resolving);

        let catalog = self.catalog.snapshot().await;
        let resolution = match self.resolver.resolve(feature, model, catalog.as_deref()) {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::warn!(request_id = %context.request_id, %feature, error = %e, "model resolution failed");
                lifecycle.advance(RequestState::Failed);
                let error = e.into_structured(context.request_id.clone());
                return Err(Outcome::Failed(self.fail(feature, error)));
            }
        };

        if resolution.used_fallback {
            self.metrics
                .record_fallback(feature.as_str(), &resolution.resolved_model);
            tracing::info!(
                request_id = %context.request_id,
                %feature,
                model = %resolution.resolved_model,
                reason = resolution.fallback_reason.as_deref().unwrap_or_default(),
                "using fallback model"
            );
        }

        Ok(Admitted {
            lifecycle,
            reservation,
            resolution,
        })
    }

    /// Commit, broadcast and build the response body
    async fn succeed(
        &self,
        context: &RequestContext,
        reservation: Reservation,
        resolution: Resolution,
        completion: Completion,
        chat: Option<&ChatPayload>,
    ) -> Success {
        let feature = reservation.feature();

        if completion.is_demo && !self.ledger.charges_demo() {
            drop(reservation);
        } else if let Err(e) = reservation.commit().await {
            // The output exists already; report it and keep the ledger untouched
            tracing::error!(request_id = %context.request_id, error = %e, "failed to commit usage");
        }

        self.metrics.record_request(feature.as_str(), "success");
        self.broadcast(context, feature, &completion, chat);

        Success {
            request_id: context.request_id.clone(),
            output: completion.output,
            resolved_model: resolution.resolved_model,
            used_fallback: resolution.used_fallback,
            fallback_reason: resolution.fallback_reason,
            is_demo: completion.is_demo,
        }
    }

    fn fail(&self, feature: Feature, error: StructuredError) -> StructuredError {
        self.metrics.record_request(feature.as_str(), "failed");
        tracing::warn!(
            request_id = %error.request_id,
            %feature,
            kind = %error.kind,
            upstream_status = error.upstream_status,
            error = %error.message,
            "request failed"
        );
        error
    }

    fn broadcast(&self, context: &RequestContext, feature: Feature, completion: &Completion, chat: Option<&ChatPayload>) {
        let request_id = context.request_id.to_string();

        let event = match (&completion.output, chat) {
            (output @ Output::Chat { .. }, Some(chat)) => SyncEvent::ChatMessage {
                request_id,
                workspace: self.gateway.workspace_for(chat.workspace.as_deref()).to_owned(),
                content: output.text().unwrap_or_default().to_owned(),
                is_demo: completion.is_demo,
            },
            (output, _) => match serde_json::to_value(output) {
                Ok(output) => SyncEvent::WorkspaceUpdate {
                    request_id,
                    feature,
                    output,
                    is_demo: completion.is_demo,
                },
                Err(e) => {
                    tracing::error!(error = %e, "failed to encode sync payload");
                    return;
                }
            },
        };

        match self.broadcaster.broadcast(context.account_id(), &event) {
            Ok(delivered) => self.metrics.record_broadcast(delivered),
            Err(e) => tracing::error!(error = %e, "sync broadcast failed"),
        }
    }
}

impl std::fmt::Debug for GatewayFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayFacade")
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

fn ledger_failure(error: &LedgerError, request_id: &RequestId) -> StructuredError {
    tracing::error!(request_id = %request_id, error = %error, "ledger failure");
    StructuredError::new(ErrorKind::Server, error.client_message(), request_id.clone())
}
