use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use common::{log, log_debug, log_error, ClientId, ErrorCode, ServerMessage};

use crate::message_handler::Connection;
use crate::web_server::WebServerState;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for a new connection.
fn next_client_id() -> ClientId {
    ClientId::new(format!("client-{}", NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)))
}

pub async fn handle_websocket(socket: WebSocket, state: WebServerState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(state.client_buffer_size);

    let client_id = next_client_id();
    log!("WebSocket client connected: {}", client_id);

    let send_client_id = client_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    log_error!("Failed to serialize message for {}: {}", send_client_id, e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let gateway = state.gateway;
    let mut conn = Connection::new(client_id, tx);

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => gateway.handle_text(&mut conn, text.as_str()).await,
            Ok(Message::Binary(_)) => {
                let error = ServerMessage::error(ErrorCode::MalformedIntent, "Binary frames are not supported");
                if conn.sender.send(error).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                log_debug!("WebSocket error for {}: {}", conn.client_id, e);
                break;
            }
        }
    }

    gateway.handle_disconnect(&mut conn).await;
    log!("WebSocket client disconnected: {}", conn.client_id);
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_client_ids_never_repeat() {
        let ids: HashSet<ClientId> = (0..10_000).map(|_| next_client_id()).collect();
        assert_eq!(ids.len(), 10_000);
    }
}
