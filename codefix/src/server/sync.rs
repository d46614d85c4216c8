// `/sync` push channel
// A connection binds to a live session identifier or is closed with 4001.

use super::error::ApiError;
use super::middleware::request_credential;
use super::AppState;
use crate::session::channel::Binding;
use crate::session::protocol::{ErrorKind, CHANNEL_REJECT_CODE, CHANNEL_REJECT_REASON};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct SyncQuery {
    #[serde(default)]
    pub identifier: Option<String>,
}

/// `GET /sync?identifier=<id>`
pub async fn sync_by_query(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SyncQuery>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    accept(state, ws, query.identifier, &headers, &uri)
}

/// `GET /sync/<id>`
pub async fn sync_by_path(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    accept(state, ws, Some(identifier), &headers, &uri)
}

fn accept(
    state: Arc<AppState>,
    ws: WebSocketUpgrade,
    identifier: Option<String>,
    headers: &HeaderMap,
    uri: &Uri,
) -> Response {
    let credential = request_credential(headers, uri);
    if state.sync_requires_key && !state.auth.authorize(credential.as_deref()) {
        tracing::warn!("Rejected push connection without a valid key");
        return ApiError::new(ErrorKind::Unauthorized).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, identifier))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identifier: Option<String>) {
    // Membership check and bind happen under one registry read so a sweep
    // cannot slip between them
    let bound = {
        let registry = state.registry.read().await;
        match identifier {
            Some(id) if registry.contains(&id) => {
                let binding = state.channels.bind(&id).await;
                Some((id, binding))
            }
            _ => None,
        }
    };

    match bound {
        Some((identifier, binding)) => run_bound(socket, &state, identifier, binding).await,
        None => reject(socket).await,
    }
}

async fn reject(mut socket: WebSocket) {
    tracing::info!("Closing push connection for an unknown identifier");
    let frame = CloseFrame {
        code: CHANNEL_REJECT_CODE,
        reason: Cow::Borrowed(CHANNEL_REJECT_REASON),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn run_bound(socket: WebSocket, state: &AppState, identifier: String, binding: Binding) {
    let Binding {
        connection_id,
        mut outbound,
    } = binding;
    tracing::info!(identifier = %identifier, connection_id, "Push connection bound");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                match queued {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Sender dropped: replaced by a newer connection or evicted
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        tracing::info!(identifier = %identifier, "Received message: {}", text);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        tracing::info!(identifier = %identifier, bytes = data.len(), "Received binary message");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(identifier = %identifier, "Push connection error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    if state.channels.unbind(&identifier, connection_id).await {
        tracing::info!(identifier = %identifier, connection_id, "Push connection closed");
    }
}
