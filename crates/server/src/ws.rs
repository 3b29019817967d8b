use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use shared::protocol::{JoinRequest, SyncMessage};
use tracing::{debug, warn};

use crate::AppState;

/// Handshake arrives as query parameters; a request missing `sessionId`,
/// `userId`, or `role` fails extraction and is rejected with 400 before the
/// upgrade ever happens (fail closed).
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(join): Query<JoinRequest>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket, join))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, join: JoinRequest) {
    let joined = match state
        .registry
        .join(join.session_id, join.user_id, join.role)
        .await
    {
        Ok(joined) => joined,
        Err(error) => {
            warn!(session_id = %join.session_id, %error, "rejecting websocket join");
            return;
        }
    };
    let connection_id = joined.connection_id;
    let mut events_rx = joined.receiver;

    let (mut sender, mut receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            if event.origin == connection_id {
                continue;
            }
            let text = match serde_json::to_string(&event.message) {
                Ok(text) => text,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(frame)) = receiver.next().await {
        let Message::Text(text) = frame else {
            continue;
        };
        let message: SyncMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(error) => {
                warn!(session_id = %join.session_id, %error, "dropping malformed sync frame");
                continue;
            }
        };
        if message.session_id != join.session_id {
            warn!(
                claimed = %message.session_id,
                actual = %join.session_id,
                "dropping sync frame addressed to another session"
            );
            continue;
        }
        if let Err(error) = state
            .registry
            .handle_message(join.session_id, connection_id, message)
            .await
        {
            debug!(session_id = %join.session_id, %error, "failed to handle sync message");
        }
    }

    send_task.abort();
    state.registry.leave(join.session_id, connection_id).await;
}
