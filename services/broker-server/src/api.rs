//! Public HTTP API
//!
//! Endpoints:
//! - GET    /health                        liveness plus store counts
//! - GET    /metrics                       Prometheus text exposition
//! - GET    /services                      capacity of every service
//! - GET    /services/{id}                 capacity of one service
//! - GET    /services/{id}/revenue?since=  cost recovery of one service
//! - POST   /sessions                      request a session (201 active, 202 queued)
//! - GET    /sessions/{id}                 session with its queue position
//! - DELETE /sessions/{id}                 end or cancel a session
//! - GET    /users/{id}/sessions?all=      a user's active sessions (every session with all=true)
//! - GET    /users/{id}/bill?start=&end=   a user's bill
//! - GET    /billing/summary?since=        platform cost against billed usage
//!
//! Handlers call the synchronous core directly; every call is a short
//! critical section with no I/O.

use std::time::Instant;

use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use broker_core::{
    BillingSummary, PlatformSummary, Platform, ServiceRevenue, ServiceStatus, Session,
    SessionState, UsageRecord,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub platform: Platform,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(platform: Platform, prometheus: PrometheusHandle) -> Self {
        Self {
            platform,
            prometheus,
            started_at: Instant::now(),
        }
    }
}

/// Build the public router.
///
/// Applies a concurrency limit layer based on `max_connections`.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/services", get(list_services))
        .route("/services/{id}", get(get_service))
        .route("/services/{id}/revenue", get(service_revenue))
        .route("/sessions", axum::routing::post(create_session))
        .route("/sessions/{id}", get(get_session).delete(end_session))
        .route("/users/{id}/sessions", get(user_sessions))
        .route("/users/{id}/bill", get(user_bill))
        .route("/billing/summary", get(billing_summary))
        .route_layer(middleware::from_fn(track_requests))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Count every routed request by its route template and response status.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let response = next.run(request).await;
    crate::metrics::record_request(&route, response.status().as_u16());
    response
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let (services, credentials, sessions, usage_records) = state.platform.store.counts();
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "services": services,
        "credentials": credentials,
        "sessions": sessions,
        "usage_records": usage_records,
    }))
}

/// Prometheus metrics endpoint: returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

#[derive(Serialize)]
struct ServiceList {
    services: Vec<ServiceStatus>,
}

async fn list_services(State(state): State<AppState>) -> Result<Json<ServiceList>, ApiError> {
    let broker = &state.platform.broker;
    let services = state
        .platform
        .store
        .list_services()
        .iter()
        .map(|s| broker.service_status(&s.id))
        .collect::<broker_core::Result<Vec<_>>>()?;
    Ok(Json(ServiceList { services }))
}

async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ServiceStatus>, ApiError> {
    Ok(Json(state.platform.broker.service_status(&id)?))
}

#[derive(Debug, Default, Deserialize)]
struct SinceQuery {
    since: Option<u64>,
}

async fn service_revenue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<ServiceRevenue>, ApiError> {
    Ok(Json(state.platform.billing.service_revenue(&id, query.since)?))
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    user_id: String,
    service_id: String,
}

/// A session plus where it stands in its service's queue.
#[derive(Serialize)]
struct SessionView {
    #[serde(flatten)]
    session: Session,
    queue_position: Option<usize>,
}

impl SessionView {
    fn load(state: &AppState, session: Session) -> Self {
        let queue_position = state.platform.broker.get_queue_position(&session.id);
        Self {
            session,
            queue_position,
        }
    }
}

async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), ApiError> {
    if body.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".into()));
    }
    let session = state
        .platform
        .broker
        .request_session(&body.user_id, &body.service_id)?;
    let status = match session.state {
        SessionState::Active => StatusCode::CREATED,
        _ => StatusCode::ACCEPTED,
    };
    Ok((status, Json(SessionView::load(&state, session))))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.platform.broker.get_session(&id)?;
    Ok(Json(SessionView::load(&state, session)))
}

#[derive(Serialize)]
struct EndSessionResponse {
    session: Session,
    /// Present only when an active session was ended by this call.
    usage: Option<UsageRecord>,
}

async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EndSessionResponse>, ApiError> {
    let broker = &state.platform.broker;
    broker.get_session(&id)?;
    let usage = broker.end_session(&id);
    if usage.is_none() {
        debug!(session_id = %id, "end request billed nothing");
    }
    let session = broker.get_session(&id)?;
    Ok(Json(EndSessionResponse { session, usage }))
}

#[derive(Debug, Default, Deserialize)]
struct UserSessionsQuery {
    #[serde(default)]
    all: bool,
}

#[derive(Serialize)]
struct SessionList {
    user_id: String,
    sessions: Vec<Session>,
}

async fn user_sessions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<UserSessionsQuery>,
) -> Json<SessionList> {
    let sessions = if query.all {
        state.platform.store.sessions_for_user(&id)
    } else {
        state.platform.broker.active_sessions(&id)
    };
    Json(SessionList {
        user_id: id,
        sessions,
    })
}

#[derive(Debug, Default, Deserialize)]
struct PeriodQuery {
    start: Option<u64>,
    end: Option<u64>,
}

async fn user_bill(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> Json<BillingSummary> {
    Json(state.platform.billing.user_bill(&id, query.start, query.end))
}

async fn billing_summary(
    State(state): State<AppState>,
    Query(query): Query<SinceQuery>,
) -> Json<PlatformSummary> {
    Json(state.platform.billing.platform_summary(query.since))
}
