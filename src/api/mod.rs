//! HTTP surface: campaign REST, approval WebSocket, provider callbacks.

pub mod analytics;
pub mod callbacks;
pub mod campaigns;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use tower_http::cors::{Any, CorsLayer};

use crate::approval::ApprovalService;
use crate::approval::ws::approval_ws;
use crate::error::{ApprovalError, DatabaseError, DispatchError};
use crate::pipeline::Orchestrator;
use crate::store::Database;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub orchestrator: Arc<Orchestrator>,
    pub approvals: Arc<ApprovalService>,
}

/// Build the full router.
pub fn routes(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/campaigns",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route("/api/campaigns/{id}", get(campaigns::get_campaign))
        .route("/api/campaigns/{id}/runs", get(campaigns::list_runs))
        .route("/api/campaigns/{id}/logs", get(campaigns::list_logs))
        .route("/api/campaigns/{id}/messages", get(campaigns::list_messages))
        .route("/api/campaigns/{id}/events", get(campaigns::list_events))
        .route(
            "/api/campaigns/{id}/content/{channel}",
            patch(campaigns::edit_content),
        )
        .route("/api/campaigns/{id}/approve", post(campaigns::approve_campaign))
        .route("/api/campaigns/{id}/dispatch", post(campaigns::dispatch_campaign))
        .route("/api/campaigns/{id}/preview", get(campaigns::preview_message))
        .route("/api/campaigns/{id}/analytics", get(analytics::campaign_analytics))
        .route("/api/voice/status", post(callbacks::voice_status))
        .route("/api/tracking/email", post(callbacks::email_events))
        .route("/api/tracking/linkedin", post(callbacks::network_events))
        .route("/ws/campaigns/{id}/approval", get(approval_ws))
        .layer(cors)
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "campaign-engine"
    }))
}

// ── Error responses ─────────────────────────────────────────────────────

pub(crate) fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({"error": message.into(), "code": code})),
    )
        .into_response()
}

pub(crate) fn database_error(err: DatabaseError) -> Response {
    tracing::error!(error = %err, "Database error");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", err.to_string())
}

pub(crate) fn approval_error(err: ApprovalError) -> Response {
    let status = match &err {
        ApprovalError::NotFound(_) => StatusCode::NOT_FOUND,
        ApprovalError::InvalidState { .. } => StatusCode::CONFLICT,
        ApprovalError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ApprovalError::Database(_) | ApprovalError::Llm(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.code(), err.to_string())
}

pub(crate) fn dispatch_error(err: DispatchError) -> Response {
    match err {
        DispatchError::Database(e) => database_error(e),
        other => error_response(StatusCode::NOT_FOUND, "NOT_FOUND", other.to_string()),
    }
}
