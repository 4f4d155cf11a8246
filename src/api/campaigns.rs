//! Campaign REST endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::{AppState, approval_error, database_error, dispatch_error, error_response};
use crate::campaign::{Campaign, Channel};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub prompt: String,
    #[serde(default)]
    pub product_link: Option<String>,
    #[serde(default)]
    pub approval_required: Option<bool>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub approved_by: String,
}

fn parse_id(id: &str) -> Result<Uuid, Response> {
    Uuid::parse_str(id)
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Invalid campaign ID"))
}

pub(super) async fn load(state: &AppState, id: &str) -> Result<Campaign, Response> {
    let id = parse_id(id)?;
    match state.db.get_campaign(id).await {
        Ok(Some(campaign)) => Ok(campaign),
        Ok(None) => Err(error_response(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Campaign {id} not found"),
        )),
        Err(e) => Err(database_error(e)),
    }
}

/// `POST /api/campaigns`. Starts the pipeline in the background.
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(req): Json<CreateCampaignRequest>,
) -> Response {
    if req.prompt.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", "prompt must not be empty");
    }

    let product_link = req.product_link.filter(|l| !l.trim().is_empty());
    let mut campaign = Campaign::new(req.prompt, product_link, req.approval_required.unwrap_or(true));
    if let Some(who) = req.created_by.filter(|w| !w.trim().is_empty()) {
        campaign = campaign.with_created_by(who);
    }

    if let Err(e) = state.db.insert_campaign(&campaign).await {
        return database_error(e);
    }
    info!(
        campaign_id = %campaign.id,
        approval_required = campaign.approval_required,
        "Campaign created"
    );

    state.orchestrator.spawn(campaign.id);
    (StatusCode::ACCEPTED, Json(campaign)).into_response()
}

/// `GET /api/campaigns?limit=`, newest first.
pub async fn list_campaigns(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    match state.db.list_campaigns(limit).await {
        Ok(campaigns) => Json(campaigns).into_response(),
        Err(e) => database_error(e),
    }
}

pub async fn get_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match load(&state, &id).await {
        Ok(campaign) => Json(campaign).into_response(),
        Err(response) => response,
    }
}

pub async fn list_runs(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let campaign = match load(&state, &id).await {
        Ok(c) => c,
        Err(response) => return response,
    };
    match state.db.list_runs(campaign.id).await {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => database_error(e),
    }
}

pub async fn list_logs(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let campaign = match load(&state, &id).await {
        Ok(c) => c,
        Err(response) => return response,
    };
    match state.db.list_stage_logs(campaign.id).await {
        Ok(logs) => Json(logs).into_response(),
        Err(e) => database_error(e),
    }
}

pub async fn list_messages(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let campaign = match load(&state, &id).await {
        Ok(c) => c,
        Err(response) => return response,
    };
    match state.db.list_outbound(campaign.id).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => database_error(e),
    }
}

pub async fn list_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let campaign = match load(&state, &id).await {
        Ok(c) => c,
        Err(response) => return response,
    };
    match state.db.list_engagement_events(campaign.id).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => database_error(e),
    }
}

/// `PATCH /api/campaigns/{id}/content/{channel}` with the template object.
pub async fn edit_content(
    State(state): State<AppState>,
    Path((id, channel)): Path<(String, String)>,
    Json(content): Json<serde_json::Value>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let channel: Channel = match channel.parse() {
        Ok(c) => c,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", message),
    };

    match state.approvals.edit_template(id, channel, content).await {
        Ok(template) => Json(serde_json::json!({
            "campaign_id": id,
            "channel": channel,
            "content": template,
        }))
        .into_response(),
        Err(e) => approval_error(e),
    }
}

/// `POST /api/campaigns/{id}/approve`: non-interactive close-out.
pub async fn approve_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let approved_by = req.approved_by.trim();
    if approved_by.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", "approved_by must not be empty");
    }

    match state.approvals.approve(id, approved_by).await {
        Ok(approved_at) => Json(serde_json::json!({
            "campaign_id": id,
            "status": "approved",
            "approved_by": approved_by,
            "approved_at": approved_at,
        }))
        .into_response(),
        Err(e) => approval_error(e),
    }
}

/// `POST /api/campaigns/{id}/dispatch`. A no-op unless `approved`.
pub async fn dispatch_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.orchestrator.dispatcher().dispatch(id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => dispatch_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub contact: String,
}

/// `GET /api/campaigns/{id}/preview?contact=`: one contact's rendered
/// message. Nothing is sent.
pub async fn preview_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let id = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match state.orchestrator.dispatcher().preview(id, query.contact.trim()).await {
        Ok(preview) => Json(preview).into_response(),
        Err(e) => dispatch_error(e),
    }
}
