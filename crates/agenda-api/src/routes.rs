use std::sync::Arc;

use agenda_core::db::{EventStore, NewEvent, SqliteEventStore};
use agenda_core::models::{BatchSyncRequest, BatchSyncResponse, Event, EventDraft, Visibility};
use agenda_core::util::user_fingerprint;
use agenda_core::EventId;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::batch::apply_batch;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::fanout::NotificationFanout;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};
use crate::realtime::realtime_handler;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) jwt_verifier: Arc<JwtVerifier>,
    pub(crate) fanout: NotificationFanout,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let store = if config.is_in_memory() {
            SqliteEventStore::open_in_memory()
        } else {
            SqliteEventStore::open(&config.database_path)
        }
        .map_err(|error| AppError::Config(format!("cannot open event store: {error}")))?;

        Ok(Self {
            store: Arc::new(store),
            jwt_verifier: Arc::new(JwtVerifier::new(&config)),
            fanout: NotificationFanout::new(config.fanout_channel_capacity),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            config,
        })
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/events", get(list_events).post(create_event))
        .route("/events/public", get(list_public_events))
        .route("/events/public/{id}", get(get_public_event))
        .route(
            "/events/{id}",
            get(get_event).put(update_event).delete(delete_event),
        )
        .route("/events/{id}/join", post(join_event))
        .route("/sync/batch", post(batch_sync))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        // Authenticates itself: the token may arrive as a query parameter.
        .route("/v1/realtime", get(realtime_handler))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    realtime_sessions: usize,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        realtime_sessions: state.fanout.connected_sessions(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
struct RangeQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

async fn list_events(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<Event>>, AppError> {
    let events = match (range.start, range.end) {
        (Some(start), Some(end)) => {
            state
                .store
                .get_by_date_range(user.user_id, start, end)
                .await?
        }
        (None, None) => state.store.get_all(user.user_id).await?,
        _ => {
            return Err(AppError::bad_request(
                "`start` and `end` must be given together",
            ))
        }
    };
    Ok(Json(events))
}

async fn get_event(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<Event>, AppError> {
    let id = EventId::new(id);
    state
        .store
        .get_by_id(id, user.user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("event {id}")))
}

async fn create_event(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(draft): Json<EventDraft>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Mutation, user.user_id)
        .await?;

    let event = state
        .store
        .create(NewEvent::owned(user.user_id, draft))
        .await?;
    state.fanout.created(&event);
    tracing::info!(
        endpoint = "create_event",
        user = user_fingerprint(user.user_id),
        event_id = %event.id,
        "Created event"
    );
    Ok((StatusCode::CREATED, Json(event)))
}

async fn update_event(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(draft): Json<EventDraft>,
) -> Result<Json<Event>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Mutation, user.user_id)
        .await?;

    let id = EventId::new(id);
    let mut event = state
        .store
        .get_by_id(id, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("event {id}")))?;
    event.apply_draft(draft);
    let updated = state.store.update(&event).await?;
    state.fanout.updated(&updated);
    tracing::info!(
        endpoint = "update_event",
        user = user_fingerprint(user.user_id),
        event_id = %id,
        "Updated event"
    );
    Ok(Json(updated))
}

async fn delete_event(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Mutation, user.user_id)
        .await?;

    let id = EventId::new(id);
    let event = state
        .store
        .get_by_id(id, user.user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("event {id}")))?;
    state.store.delete(id, user.user_id).await?;
    state.fanout.deleted(&event);
    tracing::info!(
        endpoint = "delete_event",
        user = user_fingerprint(user.user_id),
        event_id = %id,
        "Deleted event"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn list_public_events(State(state): State<AppState>) -> Result<Json<Vec<Event>>, AppError> {
    Ok(Json(state.store.get_public().await?))
}

async fn get_public_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Event>, AppError> {
    let id = EventId::new(id);
    state
        .store
        .get_public_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("public event {id}")))
}

async fn join_event(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<Event>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Mutation, user.user_id)
        .await?;

    let id = EventId::new(id);
    let original = state
        .store
        .get_public_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("public event {id}")))?;
    if original.owner_id == user.user_id {
        return Err(AppError::bad_request("cannot join your own event"));
    }
    if state
        .store
        .find_joined_copy(original.id, user.user_id)
        .await?
        .is_some()
    {
        return Err(AppError::bad_request("event already joined"));
    }

    let mut draft = original.to_draft();
    draft.visibility = Visibility::Private;
    let copy = state
        .store
        .create(NewEvent {
            owner_id: user.user_id,
            draft,
            original_event_id: Some(original.id),
        })
        .await?;
    state.fanout.created(&copy);
    tracing::info!(
        endpoint = "join_event",
        user = user_fingerprint(user.user_id),
        event_id = %copy.id,
        original_event_id = %original.id,
        "Joined public event"
    );
    Ok((StatusCode::CREATED, Json(copy)))
}

async fn batch_sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<BatchSyncRequest>,
) -> Result<Json<BatchSyncResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::BatchSync, user.user_id)
        .await?;

    let response = apply_batch(
        state.store.as_ref(),
        &state.fanout,
        user.user_id,
        request.operations,
    )
    .await;
    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use agenda_core::models::{PushMessage, SyncOperation};
    use agenda_core::UserId;
    use axum::body::Body;
    use axum::http::{header, Method};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::{test_config, TEST_SECRET};

    struct TestApp {
        router: Router,
        state: AppState,
    }

    impl TestApp {
        fn new() -> Self {
            Self::with_config(test_config())
        }

        fn with_config(config: AppConfig) -> Self {
            let state = AppState::from_config(Arc::new(config)).unwrap();
            Self {
                router: app_router(state.clone()),
                state,
            }
        }

        fn token(&self, user_id: UserId) -> String {
            self.state
                .jwt_verifier
                .issue(user_id, Duration::from_secs(300))
                .unwrap()
        }

        async fn call(
            &self,
            method: Method,
            uri: &str,
            user_id: Option<UserId>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = axum::http::Request::builder().method(method).uri(uri);
            if let Some(user_id) = user_id {
                builder = builder.header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", self.token(user_id)),
                );
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, hour, 0, 0).unwrap()
    }

    fn draft(title: &str, start: u32, end: u32) -> EventDraft {
        EventDraft::new(title, at(start), at(end))
    }

    fn body(draft: &EventDraft) -> Option<Value> {
        Some(serde_json::to_value(draft).unwrap())
    }

    #[tokio::test]
    async fn healthz_is_public() {
        let app = TestApp::new();
        let (status, body) = app.call(Method::GET, "/healthz", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["rate_limit"]["mutation_allowed"], 0);
    }

    #[tokio::test]
    async fn event_routes_require_a_valid_token() {
        let app = TestApp::new();
        let (status, body) = app.call(Method::GET, "/v1/events", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("Authorization"));

        let request = axum::http::Request::builder()
            .uri("/v1/events")
            .header(header::AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let app = TestApp::new();
        let (status, created) = app
            .call(Method::POST, "/v1/events", Some(1), body(&draft("Standup", 9, 10)))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_i64().unwrap();
        let uri = format!("/v1/events/{id}");

        let (status, listed) = app.call(Method::GET, "/v1/events", Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let (status, updated) = app
            .call(Method::PUT, &uri, Some(1), body(&draft("Retro", 9, 10)))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "Retro");

        let (status, _) = app.call(Method::DELETE, &uri, Some(1), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.call(Method::GET, &uri, Some(1), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_users_events_look_missing() {
        let app = TestApp::new();
        let (_, created) = app
            .call(Method::POST, "/v1/events", Some(1), body(&draft("Private", 9, 10)))
            .await;
        let uri = format!("/v1/events/{}", created["id"]);

        let (status, _) = app.call(Method::GET, &uri, Some(2), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .call(Method::PUT, &uri, Some(2), body(&draft("Mine now", 9, 10)))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app.call(Method::DELETE, &uri, Some(2), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_events_are_rejected() {
        let app = TestApp::new();
        let (status, body) = app
            .call(Method::POST, "/v1/events", Some(1), body(&draft("Backwards", 10, 9)))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn date_range_filters_by_overlap() {
        let app = TestApp::new();
        app.call(Method::POST, "/v1/events", Some(1), body(&draft("Morning", 9, 10)))
            .await;
        app.call(Method::POST, "/v1/events", Some(1), body(&draft("Evening", 18, 19)))
            .await;

        let uri = format!(
            "/v1/events?start={}&end={}",
            at(8).format("%Y-%m-%dT%H:%M:%SZ"),
            at(12).format("%Y-%m-%dT%H:%M:%SZ")
        );
        let (status, events) = app.call(Method::GET, &uri, Some(1), None).await;
        assert_eq!(status, StatusCode::OK);
        let titles: Vec<&str> = events
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|event| event["title"].as_str())
            .collect();
        assert_eq!(titles, vec!["Morning"]);

        let (status, _) = app
            .call(Method::GET, "/v1/events?start=2026-10-19T08:00:00Z", Some(1), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn public_events_can_be_joined_once() {
        let app = TestApp::new();
        let mut public = draft("Meetup", 18, 20);
        public.visibility = Visibility::Public;
        let (_, original) = app
            .call(Method::POST, "/v1/events", Some(1), body(&public))
            .await;
        let id = original["id"].as_i64().unwrap();
        app.call(Method::POST, "/v1/events", Some(1), body(&draft("Dentist", 8, 9)))
            .await;

        let (status, listed) = app
            .call(Method::GET, "/v1/events/public", Some(2), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let join = format!("/v1/events/{id}/join");
        let (status, copy) = app.call(Method::POST, &join, Some(2), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(copy["original_event_id"], json!(id));
        assert_eq!(copy["owner_id"], json!(2));
        assert_eq!(copy["visibility"], "private");

        let (status, _) = app.call(Method::POST, &join, Some(2), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app.call(Method::POST, &join, Some(1), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = app
            .call(Method::POST, "/v1/events/999/join", Some(2), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn batch_sync_maps_temporary_ids() {
        let app = TestApp::new();
        let temp = EventId::new(-123);
        let request = BatchSyncRequest {
            operations: vec![
                SyncOperation::create(temp, &draft("Standup", 9, 10), 1_000).unwrap(),
                SyncOperation::update(temp, &draft("Standup (moved)", 10, 11), 2_000).unwrap(),
                SyncOperation::delete(EventId::new(404), None, 3_000).unwrap(),
            ],
        };

        let (status, body) = app
            .call(
                Method::POST,
                "/v1/sync/batch",
                Some(1),
                Some(serde_json::to_value(&request).unwrap()),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let response: BatchSyncResponse = serde_json::from_value(body).unwrap();
        assert!(response.results.iter().all(|result| result.success));
        let server_id = response.results[0].server_id.unwrap();

        let (_, event) = app
            .call(Method::GET, &format!("/v1/events/{server_id}"), Some(1), None)
            .await;
        assert_eq!(event["title"], "Standup (moved)");
    }

    #[tokio::test]
    async fn mutations_are_rate_limited() {
        let mut map = HashMap::new();
        map.insert("AGENDA_JWT_SECRET", TEST_SECRET);
        map.insert("AGENDA_DATABASE_PATH", ":memory:");
        map.insert("MUTATION_RATE_LIMIT_PER_WINDOW", "1");
        let config =
            AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap();
        let app = TestApp::with_config(config);

        let (status, _) = app
            .call(Method::POST, "/v1/events", Some(1), body(&draft("One", 9, 10)))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/v1/events")
            .header(header::AUTHORIZATION, format!("Bearer {}", app.token(1)))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&draft("Two", 9, 10)).unwrap()))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        let (_, health) = app.call(Method::GET, "/healthz", None, None).await;
        assert_eq!(health["rate_limit"]["mutation_limited"], 1);
    }

    #[tokio::test]
    async fn mutations_fan_out_to_real_time_sessions() {
        let app = TestApp::new();
        let mut pushes = app.state.fanout.subscribe();

        let (_, created) = app
            .call(Method::POST, "/v1/events", Some(1), body(&draft("Standup", 9, 10)))
            .await;
        let uri = format!("/v1/events/{}", created["id"]);
        app.call(Method::DELETE, &uri, Some(1), None).await;

        let first = pushes.recv().await.unwrap();
        assert!(matches!(first.message, PushMessage::Created(_)));
        assert_eq!(first.owner_id, 1);
        let second = pushes.recv().await.unwrap();
        assert!(matches!(&second.message, PushMessage::Deleted(deleted) if deleted.title == "Standup"));
    }
}
