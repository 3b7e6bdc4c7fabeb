use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

/// Infrastructure failures on the decision path. A business denial is never
/// one of these; it comes back as a normal `AccessDecision` with
/// `granted: false`.
#[derive(Debug, Error, Diagnostic)]
pub enum AccessError {
    #[error("Storage error: {0}")]
    #[diagnostic(code(concordia::access::storage))]
    Storage(#[from] crate::errors::ConsentError),

    #[error("{operation} timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(concordia::access::timeout),
        help("The caller should retry or escalate; a timeout is not a denial")
    )]
    Timeout { operation: &'static str, timeout_ms: u64 },

    #[error("Invalid request: {0}")]
    #[diagnostic(code(concordia::access::invalid_request))]
    InvalidRequest(String),

    #[error("Role lookup failed: {0}")]
    #[diagnostic(
        code(concordia::access::role_lookup),
        help("The Auth service was unreachable or returned garbage; emergency checks cannot proceed without it")
    )]
    RoleLookup(String),

    #[error("Rate limit exceeded for actor `{actor}`")]
    #[diagnostic(code(concordia::access::rate_limited))]
    RateLimited { actor: String },
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AccessError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AccessError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AccessError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, self.to_string()),
            AccessError::RoleLookup(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AccessError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
