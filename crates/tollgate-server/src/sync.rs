use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::Extension;
use futures_util::{SinkExt, StreamExt};
use tollgate_core::RequestContext;
use tollgate_sync::{ClientMessage, Outbound, SyncBroadcaster};

use crate::AppState;

/// Upgrade `GET /v1/sync` to a WebSocket
///
/// Authentication already happened in the middleware, so an unauthenticated
/// caller never reaches the upgrade.
pub async fn sync_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    ws: WebSocketUpgrade,
) -> Response {
    let broadcaster = Arc::clone(state.facade.broadcaster());
    ws.on_upgrade(move |socket| run_connection(socket, broadcaster, context))
}

async fn run_connection(socket: WebSocket, broadcaster: Arc<SyncBroadcaster>, context: RequestContext) {
    let (connection, mut outbound) = broadcaster.register(context.account_id());
    let (mut sink, mut inbound) = socket.split();

    loop {
        tokio::select! {
            () = connection.closed() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            frame = outbound.recv() => {
                let Some(Outbound::Text(text)) = frame else { break };
                if sink.send(Message::Text(text.as_ref().into())).await.is_err() {
                    break;
                }
            }
            message = inbound.next() => match message {
                Some(Ok(Message::Text(text))) => match ClientMessage::parse(text.as_str()) {
                    Ok(ClientMessage::HeartbeatAck) => connection.acknowledge(),
                    Err(e) => tracing::debug!(connection = %connection.id(), error = %e, "ignoring client message"),
                },
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    broadcaster.unregister(&connection);
    tracing::debug!(
        request_id = %context.request_id,
        account_id = %context.account_id(),
        connection = %connection.id(),
        "sync connection closed"
    );
}
