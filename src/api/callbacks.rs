//! Delivery-provider callbacks, correlated through the outbound ledger.

use axum::{
    Form, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{AppState, database_error, error_response};
use crate::campaign::Channel;
use crate::dispatch::EngagementEvent;

/// Twilio call status callback (form-encoded).
#[derive(Debug, Deserialize)]
pub struct VoiceStatus {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "CallDuration", default)]
    pub call_duration: Option<String>,
}

/// Terminal call status → engagement event type. Progress statuses map to
/// `None`.
pub fn call_event_type(status: &str) -> Option<&'static str> {
    match status {
        "completed" => Some("ANSWERED"),
        "busy" => Some("BUSY"),
        "no-answer" => Some("NO_ANSWER"),
        "failed" => Some("FAILED"),
        "canceled" => Some("CANCELED"),
        _ => None,
    }
}

/// `POST /api/voice/status`
pub async fn voice_status(State(state): State<AppState>, Form(status): Form<VoiceStatus>) -> Response {
    let Some(event_type) = call_event_type(&status.call_status) else {
        debug!(sid = %status.call_sid, status = %status.call_status, "Ignoring non-terminal call status");
        return Json(json!({"status": "ignored"})).into_response();
    };

    let message = match state.db.find_outbound_by_provider_id(&status.call_sid).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            warn!(sid = %status.call_sid, "Call status for unknown sid");
            return error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Unknown call sid");
        }
        Err(e) => return database_error(e),
    };

    let event = EngagementEvent::new(
        message.campaign_id,
        message.contact_email.as_str(),
        message.channel,
        event_type,
        json!({
            "call_sid": status.call_sid,
            "call_status": status.call_status,
            "duration": status.call_duration,
        }),
    );
    if let Err(e) = state.db.insert_engagement_event(&event).await {
        return database_error(e);
    }

    info!(
        campaign_id = %message.campaign_id,
        contact = %message.contact_email,
        event = event_type,
        "Call outcome recorded"
    );
    Json(json!({"status": "recorded", "event_type": event_type})).into_response()
}

/// One entry of a SendGrid event-webhook batch.
#[derive(Debug, Deserialize)]
pub struct MailEvent {
    pub event: String,
    #[serde(default)]
    pub sg_message_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// `POST /api/tracking/email`
pub async fn email_events(State(state): State<AppState>, Json(events): Json<Vec<MailEvent>>) -> Response {
    let mut recorded = 0usize;
    let mut unmatched = 0usize;

    for item in events {
        // SendGrid appends a filter suffix to the X-Message-Id it returned.
        let Some(message_id) = item
            .sg_message_id
            .as_deref()
            .and_then(|id| id.split('.').next())
            .filter(|id| !id.is_empty())
        else {
            unmatched += 1;
            continue;
        };

        let message = match state.db.find_outbound_by_provider_id(message_id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!(message_id, event = %item.event, "Mail event for unknown message");
                unmatched += 1;
                continue;
            }
            Err(e) => return database_error(e),
        };

        let event = EngagementEvent::new(
            message.campaign_id,
            message.contact_email.as_str(),
            message.channel,
            item.event.to_uppercase(),
            json!({"sg_message_id": item.sg_message_id, "timestamp": item.timestamp}),
        );
        if let Err(e) = state.db.insert_engagement_event(&event).await {
            return database_error(e);
        }
        recorded += 1;
    }

    info!(recorded, unmatched, "Mail events processed");
    (StatusCode::OK, Json(json!({"recorded": recorded, "unmatched": unmatched}))).into_response()
}

/// Professional-network engagement report. The whole body is kept as the
/// event payload.
#[derive(Debug, Deserialize)]
pub struct NetworkEvent {
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
}

/// `POST /api/tracking/linkedin`
pub async fn network_events(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    let Ok(report) = serde_json::from_value::<NetworkEvent>(body.clone()) else {
        return error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Malformed engagement report");
    };
    let (Some(campaign_id), Some(contact_email)) = (
        report.campaign_id.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        report.contact_email.as_deref().map(str::trim).filter(|s| !s.is_empty()),
    ) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST",
            "Missing campaign_id or contact_email",
        );
    };
    let Ok(campaign_id) = uuid::Uuid::parse_str(campaign_id) else {
        return error_response(StatusCode::BAD_REQUEST, "BAD_REQUEST", "Invalid campaign id");
    };

    match state.db.get_campaign(campaign_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Campaign {campaign_id} not found"),
            );
        }
        Err(e) => return database_error(e),
    }

    let event_type = report
        .event_type
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("LINKEDIN_ENGAGEMENT")
        .to_uppercase();
    let event = EngagementEvent::new(
        campaign_id,
        contact_email,
        Channel::ProfessionalNetwork,
        event_type.as_str(),
        body,
    );
    if let Err(e) = state.db.insert_engagement_event(&event).await {
        return database_error(e);
    }

    info!(campaign_id = %campaign_id, contact = contact_email, event = %event_type, "Network engagement recorded");
    Json(json!({"status": "recorded", "event_type": event_type})).into_response()
}
