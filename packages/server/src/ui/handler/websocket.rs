//! WebSocket connection handlers.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{
    sink::{Sink, SinkExt},
    stream::{Stream, StreamExt},
};
use tokio::sync::{Notify, mpsc};

use crate::{
    domain::ConnectionId,
    ui::{
        dispatcher::Flow,
        state::{AppState, ConnectQuery},
    },
};

/// How long queued events may take to drain after the connection ends
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, query: ConnectQuery) {
    let (sender, receiver) = socket.split();
    serve_connection(state, query, sender, receiver).await;
}

/// Drive one connection from registration to cleanup.
///
/// An event that has started dispatching always runs to completion, even when
/// the connection is superseded or its peer goes away meanwhile.
pub(crate) async fn serve_connection<S, R, E>(
    state: Arc<AppState>,
    query: ConnectQuery,
    mut sender: S,
    mut receiver: R,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    // Channel through which the registry delivers events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection_id = state.registry.register(tx).await;
    tracing::info!(connection = %connection_id, "websocket connected");

    // Signalled once nothing more can be written to this connection.
    let outbound_closed = Arc::new(Notify::new());
    let send_closed = outbound_closed.clone();

    // Sender is dropped by the registry on unregister or supersession, which ends this loop.
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                send_closed.notify_one();
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        send_closed.notify_one();
    });

    let mut authenticated = true;
    if let Some((identity_id, room_code, kind)) = query.handshake() {
        authenticated = state
            .dispatcher
            .authenticate(&connection_id, identity_id, room_code, kind)
            .await
            == Flow::Continue;
    }

    let recv_state = state.clone();
    let recv_connection = connection_id.clone();
    let recv_task = tokio::spawn(async move {
        if !authenticated {
            return;
        }
        // Messages of one connection are handled strictly in arrival order.
        loop {
            // Only the wait for the next frame is interruptible.
            let next = tokio::select! {
                biased;
                _ = outbound_closed.notified() => {
                    tracing::debug!(connection = %recv_connection, "outbound side closed");
                    break;
                }
                next = receiver.next() => next,
            };
            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    tracing::warn!(connection = %recv_connection, error = %e, "websocket error");
                    break;
                }
                None => break,
            };
            match message {
                Message::Text(text) => {
                    let flow = recv_state
                        .dispatcher
                        .dispatch_text(&recv_connection, text.as_str())
                        .await;
                    if flow == Flow::Terminate {
                        break;
                    }
                }
                Message::Binary(_) => {
                    tracing::debug!(connection = %recv_connection, "binary frame ignored");
                }
                Message::Close(_) => {
                    tracing::info!(connection = %recv_connection, "client requested close");
                    break;
                }
                _ => {}
            }
        }
    });

    if let Err(e) = recv_task.await {
        tracing::error!(connection = %connection_id, error = %e, "receive task failed");
    }

    disconnect(&state, &connection_id).await;

    // Unregistering dropped our sender; let queued events (connect-error included) flush.
    if tokio::time::timeout(DRAIN_TIMEOUT, &mut send_task)
        .await
        .is_err()
    {
        send_task.abort();
    }
    tracing::info!(connection = %connection_id, "websocket closed");
}

async fn disconnect(state: &AppState, connection_id: &ConnectionId) {
    // Also unregisters unauthenticated and superseded connections.
    if let Some(identity) = state.presence.disconnect(connection_id).await {
        tracing::info!(connection = %connection_id, identity = %identity.id, "departure handled");
    }
}
