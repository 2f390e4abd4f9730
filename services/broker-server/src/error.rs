//! HTTP error responses
//!
//! Every handler failure renders as `{"error": {"type": ..., "message": ...}}`
//! with a status chosen from the error kind.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug)]
pub enum ApiError {
    Core(broker_core::Error),
    BadRequest(String),
    /// No upstream provider is registered for the credential's service.
    NoUpstream(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(broker_core::Error::SecretDecode(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Core(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NoUpstream(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Core(e) => e.kind(),
            ApiError::BadRequest(_) => "invalid_request",
            ApiError::NoUpstream(_) => "no_upstream",
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Core(e) => e.to_string(),
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::NoUpstream(service_id) => {
                format!("no upstream provider for service {service_id}")
            }
        }
    }
}

impl From<broker_core::Error> for ApiError {
    fn from(e: broker_core::Error) -> Self {
        ApiError::Core(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.kind(),
                "message": self.message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}
