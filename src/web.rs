//! Thin HTTP surface over the consent service. The gateway in front of this
//! service owns authentication; actor ids arriving here are trusted to be
//! upstream-authenticated.

use crate::access::errors::AccessError;
use crate::access::types::{AccessDecision, AccessRequest, DecisionKey};
use crate::access::ConsentService;
use crate::errors::ConsentError;
use crate::settings::Settings;
use crate::storage::{NewConsent, RevokeOutcome};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub service: Arc<ConsentService>,
}

// Security headers middleware. Decision responses carry PHI-adjacent data,
// so caching anywhere between here and the caller is forbidden.
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-store"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/access/check", post(check_access))
        .route("/access/check/batch", post(batch_check))
        .route("/consents", post(create_consent))
        .route("/consents/{consent_id}/revoke", post(revoke_consent))
        .route("/patients/{patient_id}/consents", get(list_consents))
        .route(
            "/patients/{patient_id}/recent-accessors",
            get(recent_accessors),
        )
        .route("/emergency/alerts", get(emergency_alerts))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: Settings, service: Arc<ConsentService>) -> miette::Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .into_diagnostic()?;
    let state = AppState {
        settings: Arc::new(settings),
        service,
    };
    let app = router(state);

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn check_access(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut request): Json<AccessRequest>,
) -> Result<Json<AccessDecision>, AccessError> {
    // Fill request metadata from transport headers when the caller did not
    if request.ip_address.is_none() {
        request.ip_address = header_value(&headers, "x-forwarded-for");
    }
    if request.user_agent.is_none() {
        request.user_agent = header_value(&headers, "user-agent");
    }

    let decision = state.service.check_access(&request).await?;
    Ok(Json(decision))
}

#[derive(Debug, Deserialize)]
struct BatchCheckRequest {
    keys: Vec<DecisionKey>,
}

/// Cache-only bulk lookup; absent keys are misses the caller resolves via
/// `/access/check`.
async fn batch_check(
    State(state): State<AppState>,
    Json(request): Json<BatchCheckRequest>,
) -> impl IntoResponse {
    let hits = state.service.batch_check(&request.keys);
    let decisions: HashMap<String, AccessDecision> = hits
        .into_iter()
        .map(|(key, decision)| {
            let data_types: Vec<&str> = key.data_types.iter().map(String::as_str).collect();
            (
                format!(
                    "{}:{}:{}:{}",
                    key.actor_id,
                    key.patient_id,
                    key.purpose,
                    data_types.join(",")
                ),
                decision,
            )
        })
        .collect();
    Json(json!({ "decisions": decisions }))
}

async fn create_consent(
    State(state): State<AppState>,
    Json(input): Json<NewConsent>,
) -> Response {
    match state.service.create_consent(input).await {
        Ok(consent) => (StatusCode::CREATED, Json(consent)).into_response(),
        Err(e) => consent_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    revoked_by: String,
    #[serde(default)]
    reason: Option<String>,
}

async fn revoke_consent(
    State(state): State<AppState>,
    Path(consent_id): Path<i64>,
    Json(request): Json<RevokeRequest>,
) -> Response {
    match state
        .service
        .revoke_consent(consent_id, &request.revoked_by, request.reason.as_deref())
        .await
    {
        Ok(RevokeOutcome::Revoked) => Json(json!({ "status": "revoked" })).into_response(),
        Ok(RevokeOutcome::Unauthorized) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "only the patient or the grantor may revoke" })),
        )
            .into_response(),
        Ok(RevokeOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "consent not found or already revoked" })),
        )
            .into_response(),
        Err(e) => consent_error_response(e),
    }
}

async fn list_consents(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> Response {
    match state.service.list_active_consents(&patient_id, None).await {
        Ok(consents) => Json(consents).into_response(),
        Err(e) => consent_error_response(e),
    }
}

/// Observational: who touched this patient's records within the access-set
/// TTL. Not an authorization source.
async fn recent_accessors(
    State(state): State<AppState>,
    Path(patient_id): Path<String>,
) -> impl IntoResponse {
    Json(state.service.cache().recent_accessors(&patient_id))
}

async fn emergency_alerts(State(state): State<AppState>) -> impl IntoResponse {
    let buckets: Vec<_> = state
        .service
        .cache()
        .emergency_alerts()
        .into_iter()
        .map(|(bucket, grants)| json!({ "bucket_start": bucket, "grants": grants }))
        .collect();
    Json(json!({ "buckets": buckets }))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn consent_error_response(e: ConsentError) -> Response {
    let status = match &e {
        ConsentError::BadRequest(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}
