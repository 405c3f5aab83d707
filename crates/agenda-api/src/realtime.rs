//! `/v1/realtime` WebSocket channel.

use std::sync::Arc;

use agenda_core::util::user_fingerprint;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::auth::{extract_access_token, AuthenticatedUser};
use crate::error::AppError;
use crate::fanout::{DeliveryScope, FanoutEnvelope};
use crate::routes::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RealtimeQuery {
    scope: Option<String>,
    access_token: Option<String>,
}

pub fn parse_scope(raw: Option<&str>) -> Result<DeliveryScope, AppError> {
    match raw.map(str::trim) {
        None | Some("" | "all") => Ok(DeliveryScope::All),
        Some("user") => Ok(DeliveryScope::User),
        Some(other) => Err(AppError::bad_request(format!(
            "scope must be `user` or `all`, got `{other}`"
        ))),
    }
}

pub async fn realtime_handler(
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = extract_access_token(&headers, query.access_token.as_deref())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    let scope = parse_scope(query.scope.as_deref())?;

    // Subscribe before upgrading so nothing published in between is missed.
    let receiver = state.fanout.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, scope, receiver)))
}

async fn handle_socket(
    socket: WebSocket,
    user: AuthenticatedUser,
    scope: DeliveryScope,
    mut receiver: broadcast::Receiver<Arc<FanoutEnvelope>>,
) {
    let user_hash = user_fingerprint(user.user_id);
    tracing::info!(user = user_hash, ?scope, "Real-time session connected");
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            envelope = receiver.recv() => match envelope {
                Ok(envelope) => {
                    if !envelope.is_visible_to(user.user_id, scope) {
                        continue;
                    }
                    let payload = match serde_json::to_string(&envelope.message) {
                        Ok(payload) => payload,
                        Err(error) => {
                            tracing::warn!(%error, "Failed to encode push message");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(user = user_hash, skipped, "Real-time session lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                // Clients only listen; pings are answered by axum.
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!(user = user_hash, "Real-time session closed");
}
