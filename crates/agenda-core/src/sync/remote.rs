//! HTTP client for the agenda API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::ClientConfig;
use crate::error::{Error, RemoteError, Result};
use crate::models::{Event, EventDraft, EventId};
use crate::util::{compact_text, is_http_url, normalize_text_option};

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The server's event API as seen by a client.
#[async_trait]
pub trait RemoteEventApi: Send + Sync {
    /// Every event owned by the caller
    async fn list_events(&self) -> RemoteResult<Vec<Event>>;

    /// `None` when the event does not exist or is not owned by the caller
    async fn get_event(&self, id: EventId) -> RemoteResult<Option<Event>>;

    async fn create_event(&self, draft: &EventDraft) -> RemoteResult<Event>;

    async fn update_event(&self, id: EventId, draft: &EventDraft) -> RemoteResult<Event>;

    /// Fails with [`RemoteError::NotFound`] for an absent id
    async fn delete_event(&self, id: EventId) -> RemoteResult<()>;

    async fn public_events(&self) -> RemoteResult<Vec<Event>>;

    /// Copy a public event into the caller's calendar
    async fn join_event(&self, id: EventId) -> RemoteResult<Event>;
}

/// Lightweight reachability check used by the connectivity monitor.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> RemoteResult<()>;
}

/// `reqwest` implementation of [`RemoteEventApi`] and [`HealthProbe`]
#[derive(Clone)]
pub struct HttpEventApi {
    base_url: String,
    access_token: Option<String>,
    client: Client,
    probe_timeout: Duration,
}

impl std::fmt::Debug for HttpEventApi {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpEventApi")
            .field("base_url", &self.base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl HttpEventApi {
    pub fn new(
        base_url: &str,
        access_token: Option<String>,
        request_timeout: Duration,
        probe_timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|error| {
                Error::InvalidInput(format!("failed to build HTTP client: {error}"))
            })?;

        Ok(Self {
            base_url,
            access_token: normalize_text_option(access_token),
            client,
            probe_timeout,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(
            &config.api_url,
            config.access_token.clone(),
            config.request_timeout,
            config.probe_timeout,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| RemoteError::InvalidResponse(error.to_string()))
    }
}

#[async_trait]
impl RemoteEventApi for HttpEventApi {
    async fn list_events(&self) -> RemoteResult<Vec<Event>> {
        self.send_json(self.client.get(self.url("/v1/events"))).await
    }

    async fn get_event(&self, id: EventId) -> RemoteResult<Option<Event>> {
        let request = self.client.get(self.url(&format!("/v1/events/{id}")));
        match self.send_json(request).await {
            Ok(event) => Ok(Some(event)),
            Err(RemoteError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn create_event(&self, draft: &EventDraft) -> RemoteResult<Event> {
        let request = self.client.post(self.url("/v1/events")).json(draft);
        self.send_json(request).await
    }

    async fn update_event(&self, id: EventId, draft: &EventDraft) -> RemoteResult<Event> {
        let request = self
            .client
            .put(self.url(&format!("/v1/events/{id}")))
            .json(draft);
        self.send_json(request).await
    }

    async fn delete_event(&self, id: EventId) -> RemoteResult<()> {
        let request = self.client.delete(self.url(&format!("/v1/events/{id}")));
        self.send(request).await.map(|_| ())
    }

    async fn public_events(&self) -> RemoteResult<Vec<Event>> {
        self.send_json(self.client.get(self.url("/v1/events/public")))
            .await
    }

    async fn join_event(&self, id: EventId) -> RemoteResult<Event> {
        let request = self.client.post(self.url(&format!("/v1/events/{id}/join")));
        self.send_json(request).await
    }
}

#[async_trait]
impl HealthProbe for HttpEventApi {
    async fn probe(&self) -> RemoteResult<()> {
        let request = self
            .client
            .get(self.url("/healthz"))
            .timeout(self.probe_timeout);
        self.send(request).await.map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn map_transport_error(error: reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else if error.is_decode() {
        RemoteError::InvalidResponse(error.to_string())
    } else {
        RemoteError::Unreachable(error.to_string())
    }
}

fn map_status(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Server(message)
        }
        status if status.is_server_error() => RemoteError::Server(message),
        _ => RemoteError::Rejected(message),
    }
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let base_url = normalize_text_option(Some(raw.to_string()))
        .ok_or_else(|| Error::InvalidInput("API URL must not be empty".to_string()))?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "API URL must include http:// or https://".to_string(),
        ))
    }
}
