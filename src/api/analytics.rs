//! Campaign analytics endpoint.

use axum::{
    Json,
    extract::{Path, State},
    response::{IntoResponse, Response},
};

use super::campaigns::load;
use super::{AppState, database_error};
use crate::dispatch::CampaignAnalytics;

/// `GET /api/campaigns/{id}/analytics`
pub async fn campaign_analytics(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let campaign = match load(&state, &id).await {
        Ok(campaign) => campaign,
        Err(response) => return response,
    };
    match state.db.ledger_stats(campaign.id).await {
        Ok(stats) => Json(CampaignAnalytics::from_ledger(campaign.id, stats)).into_response(),
        Err(e) => database_error(e),
    }
}
