//! HTTP/SSE session surface (§6): submit, list, inspect, cancel, and stream
//! research sessions over axum, gated behind an `X-API-Key` header.
//!
//! Modeled on the broadcast-to-SSE pattern the crate already uses for
//! single-invocation streaming (see `demos/demo7_axum_sse.rs`), generalized
//! here to replay-then-live delivery over the session manager's per-session
//! event log instead of a single in-flight `App::invoke_streaming` run.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::api::auth::{require_valid_key, ApiKeyStore, AuthError, RateLimiter};
use crate::runtimes::{SessionManager, SessionManagerError, SessionRecord};

const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
pub struct HttpState {
    pub sessions: Arc<SessionManager>,
    pub keys: Arc<ApiKeyStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub rate_limit_per_minute: u32,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(submit_session).get(list_sessions))
        .route(
            "/api/sessions/:id",
            get(get_session).delete(cancel_session),
        )
        .route("/api/sessions/:id/report", get(get_report))
        .route("/api/sessions/:id/events", get(stream_events))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn authenticate(headers: &HeaderMap, state: &HttpState) -> Result<(), ApiError> {
    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    require_valid_key(
        presented,
        &state.keys,
        &state.rate_limiter,
        state.rate_limit_per_minute,
    )
    .map(|_| ())
    .map_err(ApiError::Auth)
}

#[derive(Debug, Deserialize)]
struct SubmitSessionBody {
    query: String,
    #[serde(default)]
    budget_usd: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SubmitSessionResponse {
    #[serde(flatten)]
    record: SessionRecord,
}

async fn submit_session(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(body): Json<SubmitSessionBody>,
) -> Result<Json<SubmitSessionResponse>, ApiError> {
    authenticate(&headers, &state)?;
    if body.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let budget = body.budget_usd.unwrap_or(2.0);
    let record = state.sessions.submit(body.query, budget).await?;
    Ok(Json(SubmitSessionResponse { record }))
}

async fn list_sessions(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    authenticate(&headers, &state)?;
    Ok(Json(state.sessions.list()))
}

async fn get_session(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    authenticate(&headers, &state)?;
    state
        .sessions
        .get(&session_id)
        .map(Json)
        .ok_or(ApiError::NotFound(session_id))
}

async fn cancel_session(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    authenticate(&headers, &state)?;
    state.sessions.cancel(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_report(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    authenticate(&headers, &state)?;
    match state.sessions.read_report(&session_id) {
        Some(markdown) => Ok(([("content-type", "text/markdown; charset=utf-8")], markdown).into_response()),
        None => Err(ApiError::NotFound(format!("{session_id} report"))),
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    last_event_id: u64,
}

async fn stream_events(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    authenticate(&headers, &state)?;
    let last_event_id = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(query.last_event_id);

    let (catch_up, live) = state.sessions.subscribe(&session_id, last_event_id);
    let target_session = session_id.clone();
    let live_stream = BroadcastStream::new(live)
        .filter_map(move |item| item.ok())
        .filter(move |event| event.session_id == target_session);

    let combined = tokio_stream::iter(catch_up).chain(live_stream).map(|event| {
        let sse = SseEvent::default()
            .event(event.event_type.clone())
            .id(event.id.to_string())
            .json_data(&event)
            .expect("SessionEvent serializes to JSON");
        Ok(sse)
    });

    Ok(Sse::new(combined).keep_alive(KeepAlive::default()))
}

enum ApiError {
    Auth(AuthError),
    NotFound(String),
    BadRequest(String),
    Manager(SessionManagerError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<SessionManagerError> for ApiError {
    fn from(err: SessionManagerError) -> Self {
        ApiError::Manager(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Auth(err) => (
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::UNAUTHORIZED),
                err.to_string(),
            ),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("not found: {what}")),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Manager(SessionManagerError::NotFound { session_id }) => {
                (StatusCode::NOT_FOUND, format!("session not found: {session_id}"))
            }
            ApiError::Manager(SessionManagerError::QueueOverflow { queue_limit }) => (
                StatusCode::TOO_MANY_REQUESTS,
                format!("queue full at {queue_limit} sessions"),
            ),
            ApiError::Manager(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
