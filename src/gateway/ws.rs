//! WebSocket event feed.
//!
//! One socket per transaction id: the client subscribes to the transaction
//! room and receives each committed transition event as a JSON text frame.
//! Consumers dedupe on `event_id`.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use super::handlers::map_error;
use super::AppState;
use crate::core_types::TransactionId;
use crate::error::EscrowError;

pub async fn ws_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let id = match TransactionId::from_str(&id) {
        Ok(id) => id,
        Err(_) => {
            return map_error(EscrowError::Validation(format!("malformed id {id}")));
        }
    };
    upgrade
        .on_upgrade(move |socket| forward_events(state, socket, id))
        .into_response()
}

async fn forward_events(state: Arc<AppState>, mut socket: WebSocket, id: TransactionId) {
    let mut rx = state.notifier.subscribe(id);
    debug!(transaction_id = %id, "websocket subscriber attached");

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(err) => {
                            warn!(error = %err, "failed to serialize event");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // Slow consumer skipped events; it re-reads state over HTTP
                Err(RecvError::Lagged(skipped)) => {
                    warn!(transaction_id = %id, skipped, "websocket subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // Client frames are ignored; the feed is one-way
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    drop(rx);
    state.notifier.unsubscribe(id);
    debug!(transaction_id = %id, "websocket subscriber detached");
}
