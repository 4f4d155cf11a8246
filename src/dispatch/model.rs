//! Outbound message ledger and engagement events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::campaign::Channel;

/// Send status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    /// Claimed by a dispatcher, provider call in flight.
    Pending,
    Sent,
    Failed,
    /// Not attempted (e.g. no phone number for a call).
    Skipped,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Engagement event type recorded for a finalized attempt.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for SendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SendStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Unknown send status: {}", s)),
        }
    }
}

/// One (campaign, contact, channel) dispatch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_email: String,
    pub channel: Channel,
    pub payload: serde_json::Value,
    pub send_status: SendStatus,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// An engagement event correlated with a campaign contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_email: String,
    pub channel: Channel,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl EngagementEvent {
    pub fn new(
        campaign_id: Uuid,
        contact_email: impl Into<String>,
        channel: Channel,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            contact_email: contact_email.into(),
            channel,
            event_type: event_type.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }
}
