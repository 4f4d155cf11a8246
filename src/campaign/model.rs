//! Campaign domain model: lifecycle state machine, channels, content bundle.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::contact::{Contact, TargetFilters};

/// Maximum characters of the prompt used for an auto-generated campaign name.
const NAME_PREVIEW_CHARS: usize = 60;

// ── Lifecycle ───────────────────────────────────────────────────────────

/// Campaign lifecycle state.
///
/// States advance along a fixed graph; `Failed` is reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    Classified,
    ContactsRetrieved,
    ChannelDecided,
    ContentGenerated,
    AwaitingApproval,
    Approved,
    Dispatched,
    Completed,
    Failed,
}

impl PipelineState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        use PipelineState::*;

        if target == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, target),
            (Created, Classified)
                | (Classified, ContactsRetrieved)
                | (ContactsRetrieved, ChannelDecided)
                | (ChannelDecided, ContentGenerated)
                | (ContentGenerated, AwaitingApproval)
                | (ContentGenerated, Approved)
                | (AwaitingApproval, Approved)
                | (Approved, Dispatched)
                | (Dispatched, Completed)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Classified => "classified",
            Self::ContactsRetrieved => "contacts_retrieved",
            Self::ChannelDecided => "channel_decided",
            Self::ContentGenerated => "content_generated",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Approved => "approved",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PipelineState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "classified" => Ok(Self::Classified),
            "contacts_retrieved" => Ok(Self::ContactsRetrieved),
            "channel_decided" => Ok(Self::ChannelDecided),
            "content_generated" => Ok(Self::ContentGenerated),
            "awaiting_approval" => Ok(Self::AwaitingApproval),
            "approved" => Ok(Self::Approved),
            "dispatched" => Ok(Self::Dispatched),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown pipeline state: {}", s)),
        }
    }
}

// ── Channels ────────────────────────────────────────────────────────────

/// Outreach medium. Declaration order is the tie-break priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[default]
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "linkedin")]
    ProfessionalNetwork,
    #[serde(rename = "call")]
    Call,
}

impl Channel {
    /// Every channel, highest priority first.
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::ProfessionalNetwork, Channel::Call];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::ProfessionalNetwork => "linkedin",
            Self::Call => "call",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "email" => Ok(Self::Email),
            "linkedin" | "professional_network" => Ok(Self::ProfessionalNetwork),
            "call" | "phone" => Ok(Self::Call),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}

// ── Content bundle ──────────────────────────────────────────────────────

/// One channel's template: a flat JSON object of text fields carrying
/// `[PLACEHOLDER]` tokens.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelTemplate(serde_json::Map<String, serde_json::Value>);

impl ChannelTemplate {
    /// Build from a JSON value. Returns `None` unless the value is an object.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn set_str(&mut self, key: &str, value: &str) {
        self.0.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    }

    pub fn fields(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.0
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.0.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for ChannelTemplate {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(map)
    }
}

/// Per-channel templates plus the contact → channel assignment.
///
/// Shared by the approval protocol and the dispatcher; always re-read from
/// the store after a mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentBundle {
    #[serde(default)]
    pub templates: BTreeMap<Channel, ChannelTemplate>,
    #[serde(default)]
    pub contacts: BTreeMap<String, Channel>,
}

impl ContentBundle {
    pub fn template(&self, channel: Channel) -> Option<&ChannelTemplate> {
        self.templates.get(&channel)
    }

    /// Number of contacts assigned to each channel (every channel present).
    pub fn channel_counts(&self) -> BTreeMap<Channel, usize> {
        let mut counts: BTreeMap<Channel, usize> = Channel::ALL.iter().map(|c| (*c, 0)).collect();
        for channel in self.contacts.values() {
            *counts.entry(*channel).or_default() += 1;
        }
        counts
    }

    /// Contact addresses assigned to a channel, in map order.
    pub fn contacts_for(&self, channel: Channel) -> Vec<&str> {
        self.contacts
            .iter()
            .filter(|(_, c)| **c == channel)
            .map(|(email, _)| email.as_str())
            .collect()
    }

    /// Channels that have a template, in priority order.
    pub fn channels_with_templates(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.templates.contains_key(c))
            .collect()
    }

    /// Every channel referenced by the contact map has a template.
    pub fn is_consistent(&self) -> bool {
        self.contacts.values().all(|c| self.templates.contains_key(c))
    }
}

// ── Campaign ────────────────────────────────────────────────────────────

/// One outreach intent and its full lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub prompt: String,
    pub company: Option<String>,
    pub campaign_purpose: Option<String>,
    pub target_audience: Option<String>,
    pub platform: Option<String>,
    pub product_link: Option<String>,
    pub approval_required: bool,
    pub pipeline_state: PipelineState,
    pub pipeline_locked: bool,
    pub content: Option<ContentBundle>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// New campaign in `Created`, named after the start of its prompt.
    pub fn new(prompt: impl Into<String>, product_link: Option<String>, approval_required: bool) -> Self {
        let prompt = prompt.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: preview_name(&prompt),
            prompt,
            company: None,
            campaign_purpose: None,
            target_audience: None,
            platform: None,
            product_link,
            approval_required,
            pipeline_state: PipelineState::Created,
            pipeline_locked: false,
            content: None,
            approved_by: None,
            approved_at: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_created_by(mut self, who: impl Into<String>) -> Self {
        self.created_by = Some(who.into());
        self
    }

    /// Purpose for prompts, falling back to the raw prompt.
    pub fn purpose_or_prompt(&self) -> &str {
        self.campaign_purpose
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.prompt)
    }
}

fn preview_name(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.chars().count() <= NAME_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(NAME_PREVIEW_CHARS).collect();
    format!("{}…", head.trim_end())
}

/// Profile fields extracted from the free-text prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub campaign_purpose: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
}

// ── Pipeline run ────────────────────────────────────────────────────────

/// One execution attempt of a campaign's stage sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub state: PipelineState,
    pub classification: Option<TargetFilters>,
    pub contacts: Option<Vec<Contact>>,
    pub channel_map: Option<BTreeMap<String, Channel>>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl PipelineRun {
    pub fn new(campaign_id: Uuid, state: PipelineState) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            state,
            classification: None,
            contacts: None,
            channel_map: None,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

// ── Stage log ───────────────────────────────────────────────────────────

/// Pipeline stage identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    PromptParse,
    Classification,
    Retrieval,
    ChannelDecision,
    ContentGeneration,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptParse => "prompt_parse",
            Self::Classification => "classification",
            Self::Retrieval => "retrieval",
            Self::ChannelDecision => "channel_decision",
            Self::ContentGeneration => "content_generation",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prompt_parse" => Ok(Self::PromptParse),
            "classification" => Ok(Self::Classification),
            "retrieval" => Ok(Self::Retrieval),
            "channel_decision" => Ok(Self::ChannelDecision),
            "content_generation" => Ok(Self::ContentGeneration),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// Outcome of one stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Running,
    Success,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown stage status: {}", s)),
        }
    }
}

/// Append-only record of one stage execution within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageLogEntry {
    pub id: Uuid,
    pub run_id: Uuid,
    pub campaign_id: Uuid,
    pub stage: StageName,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
}

impl StageLogEntry {
    pub fn running(run_id: Uuid, campaign_id: Uuid, stage: StageName) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            campaign_id,
            stage,
            status: StageStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORWARD: [PipelineState; 8] = [
        PipelineState::Created,
        PipelineState::Classified,
        PipelineState::ContactsRetrieved,
        PipelineState::ChannelDecided,
        PipelineState::ContentGenerated,
        PipelineState::AwaitingApproval,
        PipelineState::Approved,
        PipelineState::Dispatched,
    ];

    #[test]
    fn every_allowed_transition_moves_forward() {
        let ordered = [
            PipelineState::Created,
            PipelineState::Classified,
            PipelineState::ContactsRetrieved,
            PipelineState::ChannelDecided,
            PipelineState::ContentGenerated,
            PipelineState::AwaitingApproval,
            PipelineState::Approved,
            PipelineState::Dispatched,
            PipelineState::Completed,
        ];
        for (i, from) in ordered.iter().enumerate() {
            for (j, to) in ordered.iter().enumerate() {
                if from.can_transition_to(*to) {
                    assert!(j > i, "{from} -> {to} goes backwards");
                }
            }
        }
        assert!(ordered.iter().all(|s| !PipelineState::Failed.can_transition_to(*s)));
    }

    #[test]
    fn failed_reachable_from_every_non_terminal() {
        for s in FORWARD {
            assert!(s.can_transition_to(PipelineState::Failed), "{s}");
        }
        assert!(!PipelineState::Completed.can_transition_to(PipelineState::Failed));
        assert!(!PipelineState::Failed.can_transition_to(PipelineState::Failed));
    }

    #[test]
    fn approval_branch() {
        assert!(PipelineState::ContentGenerated.can_transition_to(PipelineState::AwaitingApproval));
        assert!(PipelineState::ContentGenerated.can_transition_to(PipelineState::Approved));
        assert!(!PipelineState::AwaitingApproval.can_transition_to(PipelineState::Dispatched));
        assert!(!PipelineState::Created.can_transition_to(PipelineState::Approved));
    }

    #[test]
    fn state_string_roundtrip() {
        for s in FORWARD {
            assert_eq!(s.as_str().parse::<PipelineState>().unwrap(), s);
        }
        assert!("bogus".parse::<PipelineState>().is_err());
    }

    #[test]
    fn channel_wire_names() {
        assert_eq!(serde_json::to_string(&Channel::ProfessionalNetwork).unwrap(), "\"linkedin\"");
        assert_eq!("phone".parse::<Channel>().unwrap(), Channel::Call);
        assert_eq!("LinkedIn".parse::<Channel>().unwrap(), Channel::ProfessionalNetwork);
        assert!(Channel::Email < Channel::ProfessionalNetwork);
        assert!(Channel::ProfessionalNetwork < Channel::Call);
    }

    #[test]
    fn bundle_serializes_with_channel_keys() {
        let mut bundle = ContentBundle::default();
        bundle.templates.insert(
            Channel::Email,
            ChannelTemplate::from_value(serde_json::json!({"subject": "Hi"})).unwrap(),
        );
        bundle.contacts.insert("a@x.com".into(), Channel::Email);

        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(json["templates"]["email"]["subject"], "Hi");
        assert_eq!(json["contacts"]["a@x.com"], "email");

        let back: ContentBundle = serde_json::from_value(json).unwrap();
        assert_eq!(back, bundle);
    }

    #[test]
    fn bundle_counts_and_consistency() {
        let mut bundle = ContentBundle::default();
        bundle.contacts.insert("a@x.com".into(), Channel::Email);
        bundle.contacts.insert("b@x.com".into(), Channel::Call);
        bundle.contacts.insert("c@x.com".into(), Channel::Email);

        let counts = bundle.channel_counts();
        assert_eq!(counts[&Channel::Email], 2);
        assert_eq!(counts[&Channel::ProfessionalNetwork], 0);
        assert_eq!(counts[&Channel::Call], 1);
        assert_eq!(bundle.contacts_for(Channel::Email), vec!["a@x.com", "c@x.com"]);
        assert!(!bundle.is_consistent());

        for c in Channel::ALL {
            bundle.templates.insert(c, ChannelTemplate::default());
        }
        assert!(bundle.is_consistent());
        assert_eq!(bundle.channels_with_templates(), Channel::ALL.to_vec());
    }

    #[test]
    fn template_requires_object() {
        assert!(ChannelTemplate::from_value(serde_json::json!("text")).is_none());
        assert!(ChannelTemplate::from_value(serde_json::json!([1])).is_none());
    }

    #[test]
    fn campaign_name_is_prompt_preview() {
        let short = Campaign::new("Launch promo", None, true);
        assert_eq!(short.name, "Launch promo");
        assert_eq!(short.pipeline_state, PipelineState::Created);
        assert!(!short.pipeline_locked);

        let long = Campaign::new("x".repeat(100), None, false);
        assert_eq!(long.name.chars().count(), NAME_PREVIEW_CHARS + 1);
        assert!(long.name.ends_with('…'));
    }
}
