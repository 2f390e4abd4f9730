//! Admin API for credential management
//!
//! Runs on a separate listener port and must not be exposed publicly.
//! Responses never carry secret material.
//!
//! Endpoints:
//! - GET  /admin/credentials               list credentials with occupancy
//! - POST /admin/credentials               issue a credential for a service
//! - POST /admin/credentials/{id}/disable  stop new checkouts on a credential
//! - POST /admin/credentials/{id}/rotate   replace a credential's secret
//! - POST /admin/credentials/{id}/verify   log in to the upstream with it
//! - POST /admin/sweep                     run the max-duration sweep now
//! - POST /admin/users                     register a user

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use broker_core::{Credential, Error as CoreError, Platform, Tier, User};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use upstream::{ErrorClassification, Upstream};

use crate::api::track_requests;
use crate::error::ApiError;

/// Upstream providers keyed by service id.
pub type Upstreams = HashMap<String, Arc<dyn Upstream>>;

/// Device fingerprint presented by verification logins.
const VERIFY_FINGERPRINT: &str = "pool-broker-verify";

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    platform: Platform,
    upstreams: Arc<Upstreams>,
}

impl AdminState {
    pub fn new(platform: Platform, upstreams: Upstreams) -> Self {
        Self {
            platform,
            upstreams: Arc::new(upstreams),
        }
    }
}

/// Build the admin axum router.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/credentials", get(list_credentials).post(add_credential))
        .route("/admin/credentials/{id}/disable", post(disable_credential))
        .route("/admin/credentials/{id}/rotate", post(rotate_credential))
        .route("/admin/credentials/{id}/verify", post(verify_credential))
        .route("/admin/sweep", post(sweep_now))
        .route("/admin/users", post(register_user))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

#[derive(Serialize)]
struct CredentialList {
    credentials: Vec<Credential>,
}

/// GET /admin/credentials: every credential in issue order.
async fn list_credentials(State(state): State<AdminState>) -> Json<CredentialList> {
    Json(CredentialList {
        credentials: state.platform.store.list_credentials(),
    })
}

#[derive(Deserialize)]
struct AddCredentialRequest {
    service_id: String,
    identity: String,
    secret: String,
    tier: String,
}

/// POST /admin/credentials: issue a credential.
///
/// The account must already exist at the upstream; this only pools it.
async fn add_credential(
    State(state): State<AdminState>,
    Json(body): Json<AddCredentialRequest>,
) -> Result<(StatusCode, Json<Credential>), ApiError> {
    let tier: Tier = body.tier.parse().map_err(ApiError::BadRequest)?;
    if body.identity.trim().is_empty() || body.secret.is_empty() {
        return Err(ApiError::BadRequest(
            "identity and secret must not be empty".into(),
        ));
    }
    let credential = state.platform.vault.store_credential(
        &body.service_id,
        &body.identity,
        &body.secret,
        tier,
    )?;
    Ok((StatusCode::CREATED, Json(credential)))
}

/// POST /admin/credentials/{id}/disable
async fn disable_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Credential>, ApiError> {
    if !state.platform.vault.disable(&id) {
        return Err(CoreError::CredentialNotFound(id).into());
    }
    credential(&state, &id)
}

#[derive(Deserialize)]
struct RotateRequest {
    secret: String,
}

/// POST /admin/credentials/{id}/rotate
async fn rotate_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(body): Json<RotateRequest>,
) -> Result<Json<Credential>, ApiError> {
    if body.secret.is_empty() {
        return Err(ApiError::BadRequest("secret must not be empty".into()));
    }
    if !state.platform.vault.rotate_secret(&id, &body.secret) {
        return Err(CoreError::CredentialNotFound(id).into());
    }
    credential(&state, &id)
}

fn credential(state: &AdminState, id: &str) -> Result<Json<Credential>, ApiError> {
    state
        .platform
        .vault
        .get(id)
        .map(Json)
        .ok_or_else(|| CoreError::CredentialNotFound(id.to_string()).into())
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    credential_id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    classification: Option<&'static str>,
    disabled: bool,
}

/// POST /admin/credentials/{id}/verify: test login against the upstream.
///
/// A successful login closes its stream straight away. A permanent failure
/// (bad secret, sharing flag) disables the credential; a transient one
/// (stream limit) leaves it alone.
async fn verify_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let vault = &state.platform.vault;
    let credential = vault
        .get(&id)
        .ok_or_else(|| CoreError::CredentialNotFound(id.clone()))?;
    let upstream = state
        .upstreams
        .get(&credential.service_id)
        .ok_or_else(|| ApiError::NoUpstream(credential.service_id.clone()))?;
    let secret = vault
        .reveal_secret(&id)
        .ok_or_else(|| CoreError::SecretDecode(format!("credential {id}")))?;

    match upstream.login(&credential.identity, secret.expose(), Some(VERIFY_FINGERPRINT)) {
        Ok(token) => {
            upstream.end_stream(&credential.identity, &token);
            info!(credential_id = %id, service_id = %credential.service_id, "credential verified");
            Ok(Json(VerifyResponse {
                credential_id: id,
                ok: true,
                error: None,
                classification: None,
                disabled: false,
            }))
        }
        Err(e) => {
            let (classification, disabled) = match e.classify() {
                ErrorClassification::Permanent => ("permanent", vault.disable(&id)),
                ErrorClassification::Transient => ("transient", false),
            };
            warn!(
                credential_id = %id,
                service_id = %credential.service_id,
                error = e.label(),
                classification,
                "credential verification failed"
            );
            Ok(Json(VerifyResponse {
                credential_id: id,
                ok: false,
                error: Some(e.label()),
                classification: Some(classification),
                disabled,
            }))
        }
    }
}

#[derive(Serialize)]
struct SweepResponse {
    expired: Vec<String>,
}

/// POST /admin/sweep: expire overdue sessions immediately.
async fn sweep_now(State(state): State<AdminState>) -> Json<SweepResponse> {
    let expired = crate::sweep::sweep_cycle(&state.platform);
    Json(SweepResponse { expired })
}

#[derive(Deserialize)]
struct RegisterUserRequest {
    username: String,
}

/// POST /admin/users: register a user (idempotent by username).
async fn register_user(
    State(state): State<AdminState>,
    Json(body): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let username = body.username.trim();
    if username.is_empty() {
        return Err(ApiError::BadRequest("username must not be empty".into()));
    }
    Ok((StatusCode::CREATED, Json(state.platform.register_user(username))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use broker_core::{CredentialState, ManualClock, ServiceDefinition, SessionState};
    use common::Secret;
    use std::time::Duration;
    use tower::ServiceExt;
    use upstream::MockStreamingService;

    /// Service "svc1" with one premium credential that its mock upstream knows.
    fn test_state() -> (AdminState, Credential, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let platform = Platform::new(&Secret::new("test".to_string()), clock.clone());
        platform.store.add_service(
            ServiceDefinition::new("svc1", "Test Service", 1000, 2).with_max_session_duration(60),
        );
        platform
            .store
            .add_service(ServiceDefinition::new("orphan", "No Upstream", 500, 1));
        let credential = platform
            .vault
            .store_credential("svc1", "pool-1@test.com", "hunter2", Tier::Premium)
            .unwrap();

        let mock = Arc::new(MockStreamingService::new("svc1", "Test Service", 2));
        mock.register_account("pool-1@test.com", "hunter2");
        let mut upstreams: Upstreams = HashMap::new();
        upstreams.insert("svc1".into(), mock);

        (AdminState::new(platform, upstreams), credential, clock)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (
            status,
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
        )
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn list_credentials_never_exposes_secrets() {
        let (state, credential, _) = test_state();
        let app = build_admin_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/credentials")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("sealed_secret"));

        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        let credentials = json["credentials"].as_array().unwrap();
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials[0]["id"], credential.id.as_str());
        assert_eq!(credentials[0]["tier"], "premium");
        assert_eq!(credentials[0]["max_streams"], 2);
    }

    #[tokio::test]
    async fn add_credential_validates_input() {
        let (state, _, _) = test_state();
        let app = build_admin_router(state.clone());

        let (status, json) = send(
            app.clone(),
            post(
                "/admin/credentials",
                serde_json::json!({
                    "service_id": "svc1",
                    "identity": "pool-2@test.com",
                    "secret": "pw",
                    "tier": "basic",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["max_streams"], 1);
        assert!(json.get("secret").is_none());
        assert_eq!(state.platform.store.list_credentials().len(), 2);

        let (status, json) = send(
            app.clone(),
            post(
                "/admin/credentials",
                serde_json::json!({
                    "service_id": "svc1",
                    "identity": "x@test.com",
                    "secret": "pw",
                    "tier": "gold",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["message"], "unknown tier: gold");

        let (status, json) = send(
            app,
            post(
                "/admin/credentials",
                serde_json::json!({
                    "service_id": "ghost",
                    "identity": "x@test.com",
                    "secret": "pw",
                    "tier": "basic",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["type"], "service_not_found");
    }

    #[tokio::test]
    async fn disable_and_rotate() {
        let (state, credential, _) = test_state();
        let app = build_admin_router(state.clone());

        let (status, json) = send(
            app.clone(),
            post_empty(&format!("/admin/credentials/{}/disable", credential.id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["state"], "disabled");

        let (status, _) = send(
            app.clone(),
            post(
                &format!("/admin/credentials/{}/rotate", credential.id),
                serde_json::json!({ "secret": "new-secret" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state
                .platform
                .vault
                .reveal_secret(&credential.id)
                .unwrap()
                .expose(),
            "new-secret"
        );

        let (status, json) = send(app, post_empty("/admin/credentials/missing/disable")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["type"], "credential_not_found");
    }

    #[tokio::test]
    async fn verify_succeeds_and_leaves_no_stream_open() {
        let (state, credential, _) = test_state();
        let upstream = state.upstreams.get("svc1").unwrap().clone();
        let app = build_admin_router(state);

        let (status, json) = send(
            app,
            post_empty(&format!("/admin/credentials/{}/verify", credential.id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["disabled"], false);
        assert_eq!(upstream.active_session_count("pool-1@test.com"), 0);
    }

    #[tokio::test]
    async fn verify_with_wrong_secret_disables_credential() {
        let (state, credential, _) = test_state();
        state.platform.vault.rotate_secret(&credential.id, "wrong");
        let app = build_admin_router(state.clone());

        let (status, json) = send(
            app,
            post_empty(&format!("/admin/credentials/{}/verify", credential.id)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"], "invalid_credentials");
        assert_eq!(json["classification"], "permanent");
        assert_eq!(json["disabled"], true);
        assert_eq!(
            state.platform.vault.get(&credential.id).unwrap().state,
            CredentialState::Disabled
        );
    }

    #[tokio::test]
    async fn verify_at_stream_limit_is_transient() {
        let (state, credential, _) = test_state();
        let upstream = state.upstreams.get("svc1").unwrap().clone();
        upstream.login("pool-1@test.com", "hunter2", Some("tv")).unwrap();
        upstream.login("pool-1@test.com", "hunter2", Some("tv")).unwrap();
        let app = build_admin_router(state.clone());

        let (_, json) = send(
            app,
            post_empty(&format!("/admin/credentials/{}/verify", credential.id)),
        )
        .await;
        assert_eq!(json["classification"], "transient");
        assert_eq!(json["disabled"], false);
        assert_ne!(
            state.platform.vault.get(&credential.id).unwrap().state,
            CredentialState::Disabled
        );
    }

    #[tokio::test]
    async fn verify_without_upstream_is_422() {
        let (state, _, _) = test_state();
        let orphan = state
            .platform
            .vault
            .store_credential("orphan", "o@test.com", "pw", Tier::Basic)
            .unwrap();
        let app = build_admin_router(state);

        let (status, json) = send(
            app.clone(),
            post_empty(&format!("/admin/credentials/{}/verify", orphan.id)),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"]["type"], "no_upstream");

        let (status, _) = send(app, post_empty("/admin/credentials/missing/verify")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sweep_expires_overdue_sessions() {
        let (state, _, clock) = test_state();
        let session = state
            .platform
            .broker
            .request_session("alice", "svc1")
            .unwrap();
        clock.advance(Duration::from_secs(61));
        let app = build_admin_router(state.clone());

        let (status, json) = send(app, post_empty("/admin/sweep")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["expired"], serde_json::json!([session.id.clone()]));
        assert_eq!(
            state.platform.broker.get_session(&session.id).unwrap().state,
            SessionState::Expired
        );
    }

    #[tokio::test]
    async fn register_user_is_idempotent() {
        let (state, _, _) = test_state();
        let app = build_admin_router(state.clone());

        let (status, first) = send(
            app.clone(),
            post("/admin/users", serde_json::json!({ "username": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, second) = send(
            app.clone(),
            post("/admin/users", serde_json::json!({ "username": "alice" })),
        )
        .await;
        assert_eq!(first["id"], second["id"]);
        assert_eq!(state.platform.store.list_users().len(), 1);

        let empty = post("/admin/users", serde_json::json!({ "username": "" }));
        let (status, _) = send(app, empty).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
