//! WebSocket transport for the realtime gateway.
//!
//! Client -> Server:
//! ```json
//! {"event": "joinRoom", "data": "<groupId>"}
//! {"event": "sendMessage", "data": {"groupId": "...", "content": "hi"}}
//! ```
//!
//! Server -> Client:
//! ```json
//! {"event": "allMessage", "data": {"groupId": "...", "messages": [], "groupDescription": "...", "nextCursor": null}}
//! {"event": "newMessage", "data": {"id": "...", "content": "hi", "sender": {}}}
//! {"event": "error", "data": {"message": "..."}}
//! ```

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, Uri},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use civic_shared::constants::{MAX_MESSAGE_SIZE, SESSION_RECHECK_SECS};
use civic_shared::protocol::ServerEvent;

use crate::error::ServerError;
use crate::extract::presented_token;
use crate::gateway::Connection;
use crate::state::AppState;

/// How long queued events get to reach the client after the read side ends.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Authenticates before upgrading; a failed handshake never opens a socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    uri: Uri,
    State(state): State<AppState>,
) -> Response {
    let token = presented_token(&headers, &uri);
    match state.gateway.connect(token.as_deref()).await {
        Ok((conn, outbox)) => ws
            // Leave headroom for JSON framing around the content limit.
            .max_message_size(MAX_MESSAGE_SIZE * 4)
            .on_upgrade(move |socket| handle_socket(socket, conn, outbox)),
        Err(e) => ServerError::Unauthorized(e.to_string()).into_response(),
    }
}

async fn handle_socket(
    socket: WebSocket,
    mut conn: Connection,
    mut outbox: mpsc::Receiver<ServerEvent>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let conn_id = conn.id();

    let mut forwarder = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn = %conn_id, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let mut recheck = tokio::time::interval(Duration::from_secs(SESSION_RECHECK_SECS));
    recheck.tick().await;

    while !conn.is_closed() {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => conn.handle_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn = %conn_id, error = %e, "WebSocket read failed");
                    break;
                }
            },
            _ = recheck.tick() => {
                conn.revalidate().await;
            }
        }
    }

    // Dropping the last outbox sender lets the forwarder drain and close.
    conn.disconnect().await;
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut forwarder).await.is_err() {
        forwarder.abort();
    }
}
