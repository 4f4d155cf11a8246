//! Unified `Database` trait: single async interface for all persistence.
//!
//! Covers campaign lifecycle records, the read-only contact store, and the
//! outbound/engagement ledger. Multi-row writes that form one stage boundary
//! are single trait calls so a backend can make them atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::campaign::{
    Campaign, Channel, ChannelTemplate, Contact, FilterField, PipelineRun, PipelineState,
    StageLogEntry, TargetFilters,
};
use crate::dispatch::analytics::LedgerStats;
use crate::dispatch::model::{EngagementEvent, OutboundMessage, SendStatus};
use crate::error::DatabaseError;
use crate::stages::StageCommit;

/// Final values written when an outbound claim is resolved.
#[derive(Debug, Clone)]
pub struct OutboundResult {
    pub status: SendStatus,
    pub payload: serde_json::Value,
    pub provider_message_id: Option<String>,
    pub error_message: Option<String>,
}

/// Backend-agnostic database trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Campaigns ───────────────────────────────────────────────────

    async fn insert_campaign(&self, campaign: &Campaign) -> Result<(), DatabaseError>;

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>, DatabaseError>;

    /// Most recent first.
    async fn list_campaigns(&self, limit: usize) -> Result<Vec<Campaign>, DatabaseError>;

    /// Set the pipeline lock if it is clear and the campaign is still
    /// `created`. Returns false otherwise.
    async fn try_lock_campaign(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Write the run outcome: campaign and run state, run error/completion,
    /// and clear the campaign lock. Atomic.
    async fn finish_pipeline(
        &self,
        campaign_id: Uuid,
        run_id: Uuid,
        state: PipelineState,
        error: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Move the campaign (and its latest run) from `from` to `to`.
    /// Returns false if the campaign was not in `from`.
    async fn advance_campaign_state(
        &self,
        id: Uuid,
        from: PipelineState,
        to: PipelineState,
    ) -> Result<bool, DatabaseError>;

    /// `AwaitingApproval → Approved` with approver stamp.
    /// Returns false if the campaign was not awaiting approval.
    async fn approve_campaign(
        &self,
        id: Uuid,
        approved_by: &str,
        approved_at: DateTime<Utc>,
    ) -> Result<bool, DatabaseError>;

    /// Replace a single channel template inside the content bundle.
    async fn update_channel_template(
        &self,
        id: Uuid,
        channel: Channel,
        template: &ChannelTemplate,
    ) -> Result<(), DatabaseError>;

    // ── Runs & stage logs ───────────────────────────────────────────

    async fn insert_run(&self, run: &PipelineRun) -> Result<(), DatabaseError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<PipelineRun>, DatabaseError>;

    async fn list_runs(&self, campaign_id: Uuid) -> Result<Vec<PipelineRun>, DatabaseError>;

    async fn insert_stage_log(&self, entry: &StageLogEntry) -> Result<(), DatabaseError>;

    /// Complete a stage log entry without touching the run or campaign.
    async fn finish_stage_log(&self, entry: &StageLogEntry) -> Result<(), DatabaseError>;

    /// Complete a stage: log entry, stage output, and lifecycle state. Atomic.
    async fn commit_stage(&self, commit: &StageCommit) -> Result<(), DatabaseError>;

    async fn list_stage_logs(&self, campaign_id: Uuid) -> Result<Vec<StageLogEntry>, DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Insert or replace a contact and its buying score.
    async fn upsert_contact(&self, contact: &Contact) -> Result<(), DatabaseError>;

    async fn get_contact(&self, email: &str) -> Result<Option<Contact>, DatabaseError>;

    /// Contacts matching every non-empty filter field (terms OR-ed within a
    /// field, case-insensitive substring), ranked by buying score, nulls last.
    async fn find_contacts(
        &self,
        filters: &TargetFilters,
        limit: Option<usize>,
    ) -> Result<Vec<Contact>, DatabaseError>;

    /// Distinct non-empty values of one column.
    async fn sample_distinct(
        &self,
        field: FilterField,
        limit: usize,
    ) -> Result<Vec<String>, DatabaseError>;

    // ── Outbound ledger ─────────────────────────────────────────────

    /// True if the tuple already has a successful send.
    async fn has_successful_send(
        &self,
        campaign_id: Uuid,
        contact_email: &str,
        channel: Channel,
    ) -> Result<bool, DatabaseError>;

    /// Claim a tuple with a pending row. Returns `None` when another pending
    /// or sent row already holds it.
    async fn claim_outbound(
        &self,
        campaign_id: Uuid,
        contact_email: &str,
        channel: Channel,
    ) -> Result<Option<Uuid>, DatabaseError>;

    /// Resolve a claimed row and append its engagement event. Atomic.
    async fn finalize_outbound(
        &self,
        id: Uuid,
        result: &OutboundResult,
        event: &EngagementEvent,
    ) -> Result<(), DatabaseError>;

    async fn list_outbound(&self, campaign_id: Uuid) -> Result<Vec<OutboundMessage>, DatabaseError>;

    async fn find_outbound_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<OutboundMessage>, DatabaseError>;

    // ── Engagement ──────────────────────────────────────────────────

    async fn insert_engagement_event(&self, event: &EngagementEvent) -> Result<(), DatabaseError>;

    async fn list_engagement_events(
        &self,
        campaign_id: Uuid,
    ) -> Result<Vec<EngagementEvent>, DatabaseError>;

    /// Per-channel engagement counts and activity aggregates for one campaign.
    async fn ledger_stats(&self, campaign_id: Uuid) -> Result<LedgerStats, DatabaseError>;
}
