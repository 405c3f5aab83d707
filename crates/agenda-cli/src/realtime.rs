//! WebSocket listener that feeds server pushes into a [`Session`].

use std::sync::Arc;
use std::time::Duration;

use agenda_core::client::Session;
use agenda_core::config::ClientConfig;
use agenda_core::models::PushMessage;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::error::CliError;

/// Keep a push connection open until `cancel` fires, reconnecting after
/// `probe_interval` whenever it drops.
pub fn spawn_listener(
    session: Arc<Session>,
    config: &ClientConfig,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, CliError> {
    let url = config.realtime_url();
    let token = config.access_token.clone();
    build_request(&url, token.as_deref())?;
    let retry_delay = config.probe_interval.max(Duration::from_secs(1));

    Ok(tokio::spawn(async move {
        loop {
            let request = match build_request(&url, token.as_deref()) {
                Ok(request) => request,
                Err(error) => {
                    tracing::warn!(%error, "cannot build real-time request");
                    break;
                }
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                result = listen_once(&session, request) => {
                    match result {
                        Ok(()) => tracing::info!("real-time connection closed by server"),
                        Err(error) => {
                            if is_link_failure(&error) {
                                session.transport_lost().await;
                            }
                            tracing::warn!(%error, "real-time connection failed");
                        }
                    }
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(retry_delay) => {}
            }
        }
        tracing::debug!("real-time listener stopped");
    }))
}

pub fn build_request(url: &str, token: Option<&str>) -> Result<Request, CliError> {
    let mut request = url
        .into_client_request()
        .map_err(|error| CliError::Realtime(error.to_string()))?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| CliError::Realtime("access token is not a valid header value".into()))?;
        request.headers_mut().insert("authorization", value);
    }
    Ok(request)
}

/// Socket-level failures mean the network path is gone; handshake or
/// protocol errors do not.
pub fn is_link_failure(error: &WsError) -> bool {
    matches!(error, WsError::Io(_) | WsError::ConnectionClosed)
}

async fn listen_once(session: &Session, request: Request) -> Result<(), WsError> {
    let (stream, _) = connect_async(request).await?;
    tracing::info!("real-time connection established");

    // Pushes sent while disconnected are gone; catch up from the API.
    match session.transport_restored().await {
        Ok(refreshed) => tracing::debug!(refreshed, "resynchronized after connect"),
        Err(error) => tracing::warn!(%error, "failed to refresh after connect"),
    }

    let (_sink, mut incoming) = stream.split();
    while let Some(frame) = incoming.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        handle_text(session, text.as_str()).await;
    }
    Ok(())
}

async fn handle_text(session: &Session, text: &str) {
    let message = match decode_push(text) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(%error, "ignoring malformed push message");
            return;
        }
    };
    match session.apply_push(&message).await {
        Ok(outcome) => {
            tracing::debug!(event_id = %message.event_id(), ?outcome, "push applied");
        }
        Err(error) => {
            tracing::warn!(event_id = %message.event_id(), %error, "failed to apply push");
        }
    }
}

pub fn decode_push(text: &str) -> Result<PushMessage, serde_json::Error> {
    serde_json::from_str(text)
}
