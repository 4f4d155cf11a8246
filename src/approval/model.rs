//! Approval protocol wire types.
//!
//! Server events are tagged by `type`, client actions by `action`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::campaign::{Channel, ChannelTemplate};

/// Contacts listed in a `CHANNEL_CONTENT` preview.
pub const CONTACT_PREVIEW: usize = 20;

/// Messages sent from server to reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalEvent {
    /// Session opened. Channels are listed in review order.
    Start {
        campaign_id: Uuid,
        total_contacts: usize,
        channel_counts: BTreeMap<Channel, usize>,
        channels: Vec<Channel>,
    },
    GroupStart {
        channel: Channel,
        count: usize,
    },
    /// Current template for the channel under review.
    ChannelContent {
        channel: Channel,
        content: ChannelTemplate,
        contact_count: usize,
        contacts: Vec<String>,
    },
    ContentUpdated {
        channel: Channel,
    },
    Regenerating {
        channel: Channel,
    },
    RegenerateFailed {
        channel: Channel,
        error: String,
    },
    ChannelApproved {
        channel: Channel,
    },
    AllApproved {
        approved_count: usize,
    },
    /// Campaign moved to `approved`; dispatch has been started.
    Approved {
        campaign_id: Uuid,
        approved_by: String,
        approved_at: DateTime<Utc>,
        approved_channels: Vec<Channel>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ApprovalEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Reviewer actions for the channel under review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    ApproveAll,
    /// Replace the template. Does not advance.
    Edit { content: Value },
    /// Redraft with the original prompt inputs. Does not advance.
    Regenerate,
}

const KNOWN_ACTIONS: [&str; 4] = ["approve", "approve_all", "edit", "regenerate"];

impl ApprovalAction {
    /// Parse a client frame, mapping failures to the protocol error event.
    pub fn parse(text: &str) -> Result<Self, ApprovalEvent> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ApprovalEvent::error("BAD_REQUEST", format!("Invalid JSON: {e}")))?;

        let Some(action) = value.get("action").and_then(Value::as_str) else {
            return Err(ApprovalEvent::error("BAD_REQUEST", "Missing \"action\" field"));
        };
        if !KNOWN_ACTIONS.contains(&action) {
            return Err(ApprovalEvent::error(
                "UNKNOWN_ACTION",
                format!("Unknown action: {action}"),
            ));
        }

        let parsed: Self = serde_json::from_value(value)
            .map_err(|e| ApprovalEvent::error("BAD_REQUEST", e.to_string()))?;
        if let Self::Edit { content } = &parsed
            && !content.is_object()
        {
            return Err(ApprovalEvent::error("BAD_REQUEST", "Edit content must be a JSON object"));
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn code(result: Result<ApprovalAction, ApprovalEvent>) -> String {
        match result {
            Err(ApprovalEvent::Error { code, .. }) => code,
            other => panic!("expected an error event, got {other:?}"),
        }
    }

    #[test]
    fn parses_every_action() {
        assert_eq!(ApprovalAction::parse(r#"{"action":"approve"}"#).unwrap(), ApprovalAction::Approve);
        assert_eq!(
            ApprovalAction::parse(r#"{"action":"approve_all"}"#).unwrap(),
            ApprovalAction::ApproveAll
        );
        assert_eq!(
            ApprovalAction::parse(r#"{"action":"regenerate"}"#).unwrap(),
            ApprovalAction::Regenerate
        );
        assert_eq!(
            ApprovalAction::parse(r#"{"action":"edit","content":{"subject":"Hi"}}"#).unwrap(),
            ApprovalAction::Edit {
                content: json!({"subject": "Hi"})
            }
        );
    }

    #[test]
    fn classifies_bad_frames() {
        assert_eq!(code(ApprovalAction::parse("not json")), "BAD_REQUEST");
        assert_eq!(code(ApprovalAction::parse(r#"{"verb":"approve"}"#)), "BAD_REQUEST");
        assert_eq!(code(ApprovalAction::parse(r#"{"action":"reject"}"#)), "UNKNOWN_ACTION");
        assert_eq!(code(ApprovalAction::parse(r#"{"action":"edit"}"#)), "BAD_REQUEST");
        assert_eq!(
            code(ApprovalAction::parse(r#"{"action":"edit","content":"plain"}"#)),
            "BAD_REQUEST"
        );
    }

    #[test]
    fn events_use_screaming_tags() {
        let event = ApprovalEvent::GroupStart {
            channel: Channel::ProfessionalNetwork,
            count: 2,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "GROUP_START", "channel": "linkedin", "count": 2})
        );

        let start = ApprovalEvent::Start {
            campaign_id: Uuid::nil(),
            total_contacts: 1,
            channel_counts: BTreeMap::from([(Channel::Email, 1)]),
            channels: vec![Channel::Email],
        };
        let json = serde_json::to_value(&start).unwrap();
        assert_eq!(json["type"], "START");
        assert_eq!(json["channel_counts"]["email"], 1);

        let json = serde_json::to_value(ApprovalEvent::error("NOT_FOUND", "gone")).unwrap();
        assert_eq!(json, json!({"type": "ERROR", "code": "NOT_FOUND", "message": "gone"}));
    }
}
