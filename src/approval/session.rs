//! Approval session: a transport-agnostic review loop over a campaign's
//! content bundle.
//!
//! The bundle is re-read from the store after every edit or regeneration,
//! so the loop never persists over a stale copy.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{ApprovalAction, ApprovalEvent, CONTACT_PREVIEW};
use crate::campaign::{Campaign, Channel, ChannelTemplate, ContentBundle, PipelineState};
use crate::dispatch::Dispatcher;
use crate::error::ApprovalError;
use crate::stages::{ContentGenerator, cap_network_message};
use crate::store::Database;

/// The reviewer went away mid-send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Bidirectional channel to one reviewer.
#[async_trait]
pub trait ApprovalTransport: Send {
    async fn send(&mut self, event: &ApprovalEvent) -> Result<(), Disconnected>;

    /// Next client frame as text. `None` once the reviewer disconnects.
    async fn recv(&mut self) -> Option<String>;

    async fn close(&mut self) {}
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Approved { approved_at: DateTime<Utc> },
    /// Reviewer left; the campaign stays `awaiting_approval`.
    Disconnected,
    /// Refused at open or close-out with the given error code.
    Rejected { code: &'static str },
}

/// Loop state for one review. Refreshed after each persisted mutation.
struct ReviewState {
    campaign: Campaign,
    bundle: ContentBundle,
    approved: Vec<Channel>,
}

impl ReviewState {
    fn new(campaign: Campaign) -> Self {
        let bundle = campaign.content.clone().unwrap_or_default();
        Self {
            campaign,
            bundle,
            approved: Vec::new(),
        }
    }

    async fn refresh(&mut self, db: &dyn Database) -> Result<(), ApprovalError> {
        let campaign = db
            .get_campaign(self.campaign.id)
            .await?
            .ok_or(ApprovalError::NotFound(self.campaign.id))?;
        self.bundle = campaign.content.clone().unwrap_or_default();
        self.campaign = campaign;
        Ok(())
    }

    fn content_event(&self, channel: Channel) -> ApprovalEvent {
        let contacts = self.bundle.contacts_for(channel);
        ApprovalEvent::ChannelContent {
            channel,
            content: self.bundle.template(channel).cloned().unwrap_or_default(),
            contact_count: contacts.len(),
            contacts: contacts
                .into_iter()
                .take(CONTACT_PREVIEW)
                .map(str::to_string)
                .collect(),
        }
    }
}

/// What the inner loop decided for the channel under review.
enum Step {
    Next,
    ApproveRest,
}

/// Approval operations shared by the WebSocket session and the REST API.
pub struct ApprovalService {
    db: Arc<dyn Database>,
    generator: Arc<ContentGenerator>,
    dispatcher: Arc<Dispatcher>,
}

impl ApprovalService {
    pub fn new(db: Arc<dyn Database>, generator: Arc<ContentGenerator>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            db,
            generator,
            dispatcher,
        }
    }

    /// Load a campaign that must be awaiting approval.
    async fn reviewable(&self, campaign_id: Uuid) -> Result<Campaign, ApprovalError> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or(ApprovalError::NotFound(campaign_id))?;
        if campaign.pipeline_state != PipelineState::AwaitingApproval {
            return Err(ApprovalError::InvalidState {
                id: campaign_id,
                state: campaign.pipeline_state.to_string(),
            });
        }
        Ok(campaign)
    }

    /// Replace one channel template while the campaign is under review.
    pub async fn edit_template(
        &self,
        campaign_id: Uuid,
        channel: Channel,
        content: Value,
    ) -> Result<ChannelTemplate, ApprovalError> {
        let mut template = ChannelTemplate::from_value(content)
            .ok_or_else(|| ApprovalError::BadRequest("content must be a JSON object".into()))?;
        if channel == Channel::ProfessionalNetwork {
            cap_network_message(&mut template);
        }
        self.reviewable(campaign_id).await?;
        self.db
            .update_channel_template(campaign_id, channel, &template)
            .await?;
        info!(campaign_id = %campaign_id, channel = %channel, "Channel template edited");
        Ok(template)
    }

    /// Redraft one channel with the campaign's original inputs and persist it.
    pub async fn regenerate_template(
        &self,
        campaign_id: Uuid,
        channel: Channel,
    ) -> Result<ChannelTemplate, ApprovalError> {
        let campaign = self.reviewable(campaign_id).await?;
        let template = self.generator.generate(&campaign, channel).await?;
        self.db
            .update_channel_template(campaign_id, channel, &template)
            .await?;
        info!(campaign_id = %campaign_id, channel = %channel, "Channel template regenerated");
        Ok(template)
    }

    /// Move `awaiting_approval → approved` and start dispatch in the
    /// background.
    pub async fn approve(&self, campaign_id: Uuid, approved_by: &str) -> Result<DateTime<Utc>, ApprovalError> {
        self.reviewable(campaign_id).await?;

        let approved_at = Utc::now();
        if !self
            .db
            .approve_campaign(campaign_id, approved_by, approved_at)
            .await?
        {
            // Lost a race with another approver.
            let state = self
                .db
                .get_campaign(campaign_id)
                .await?
                .map(|c| c.pipeline_state.to_string())
                .unwrap_or_default();
            return Err(ApprovalError::InvalidState { id: campaign_id, state });
        }

        info!(campaign_id = %campaign_id, approved_by, "Campaign approved");
        self.spawn_dispatch(campaign_id);
        Ok(approved_at)
    }

    fn spawn_dispatch(&self, campaign_id: Uuid) {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            match dispatcher.dispatch(campaign_id).await {
                Ok(report) => info!(
                    campaign_id = %campaign_id,
                    sent = report.sent,
                    failed = report.failed,
                    "Post-approval dispatch finished"
                ),
                Err(e) => error!(campaign_id = %campaign_id, error = %e, "Post-approval dispatch failed"),
            }
        });
    }

    /// Drive one review session to completion.
    pub async fn run_session<T: ApprovalTransport>(
        &self,
        campaign_id: Uuid,
        approver: &str,
        transport: &mut T,
    ) -> SessionOutcome {
        match self.review(campaign_id, approver, transport).await {
            Ok(outcome) => outcome,
            Err(Disconnected) => {
                info!(campaign_id = %campaign_id, "Reviewer disconnected, campaign left awaiting approval");
                SessionOutcome::Disconnected
            }
        }
    }

    async fn review<T: ApprovalTransport>(
        &self,
        campaign_id: Uuid,
        approver: &str,
        transport: &mut T,
    ) -> Result<SessionOutcome, Disconnected> {
        let campaign = match self.reviewable(campaign_id).await {
            Ok(campaign) => campaign,
            Err(e) => return reject(transport, e).await,
        };

        let mut state = ReviewState::new(campaign);
        let channels = state.bundle.channels_with_templates();
        info!(campaign_id = %campaign_id, approver, channels = channels.len(), "Approval session opened");

        transport
            .send(&ApprovalEvent::Start {
                campaign_id,
                total_contacts: state.bundle.contacts.len(),
                channel_counts: state.bundle.channel_counts(),
                channels: channels.clone(),
            })
            .await?;

        for (index, &channel) in channels.iter().enumerate() {
            transport
                .send(&ApprovalEvent::GroupStart {
                    channel,
                    count: state.bundle.contacts_for(channel).len(),
                })
                .await?;
            transport.send(&state.content_event(channel)).await?;

            match self.review_channel(&mut state, channel, transport).await? {
                Step::Next => {
                    state.approved.push(channel);
                    transport.send(&ApprovalEvent::ChannelApproved { channel }).await?;
                }
                Step::ApproveRest => {
                    state.approved.extend_from_slice(&channels[index..]);
                    transport
                        .send(&ApprovalEvent::AllApproved {
                            approved_count: state.approved.len(),
                        })
                        .await?;
                    break;
                }
            }
        }

        match self.approve(campaign_id, approver).await {
            Ok(approved_at) => {
                transport
                    .send(&ApprovalEvent::Approved {
                        campaign_id,
                        approved_by: approver.to_string(),
                        approved_at,
                        approved_channels: state.approved.clone(),
                    })
                    .await?;
                transport.close().await;
                Ok(SessionOutcome::Approved { approved_at })
            }
            Err(e) => reject(transport, e).await,
        }
    }

    /// Handle actions for one channel until it is approved.
    async fn review_channel<T: ApprovalTransport>(
        &self,
        state: &mut ReviewState,
        channel: Channel,
        transport: &mut T,
    ) -> Result<Step, Disconnected> {
        let campaign_id = state.campaign.id;
        loop {
            let Some(frame) = transport.recv().await else {
                return Err(Disconnected);
            };

            let action = match ApprovalAction::parse(&frame) {
                Ok(action) => action,
                Err(event) => {
                    warn!(campaign_id = %campaign_id, frame = %frame, "Rejected approval frame");
                    transport.send(&event).await?;
                    continue;
                }
            };

            match action {
                ApprovalAction::Approve => return Ok(Step::Next),
                ApprovalAction::ApproveAll => return Ok(Step::ApproveRest),
                ApprovalAction::Edit { content } => {
                    match self.edit_template(campaign_id, channel, content).await {
                        Ok(_) => self.push_update(state, channel, transport).await?,
                        Err(e) => transport.send(&error_event(&e)).await?,
                    }
                }
                ApprovalAction::Regenerate => {
                    transport.send(&ApprovalEvent::Regenerating { channel }).await?;
                    match self.regenerate_template(campaign_id, channel).await {
                        Ok(_) => self.push_update(state, channel, transport).await?,
                        Err(e) => {
                            warn!(campaign_id = %campaign_id, channel = %channel, error = %e, "Regeneration failed");
                            transport
                                .send(&ApprovalEvent::RegenerateFailed {
                                    channel,
                                    error: e.to_string(),
                                })
                                .await?;
                        }
                    }
                }
            }
        }
    }

    /// Re-read the bundle and echo the persisted template.
    async fn push_update<T: ApprovalTransport>(
        &self,
        state: &mut ReviewState,
        channel: Channel,
        transport: &mut T,
    ) -> Result<(), Disconnected> {
        if let Err(e) = state.refresh(self.db.as_ref()).await {
            return transport.send(&error_event(&e)).await;
        }
        transport.send(&ApprovalEvent::ContentUpdated { channel }).await?;
        transport.send(&state.content_event(channel)).await
    }
}

fn error_event(err: &ApprovalError) -> ApprovalEvent {
    ApprovalEvent::error(err.code(), err.to_string())
}

async fn reject<T: ApprovalTransport>(
    transport: &mut T,
    err: ApprovalError,
) -> Result<SessionOutcome, Disconnected> {
    let code = err.code();
    warn!(code, error = %err, "Approval session rejected");
    transport.send(&error_event(&err)).await?;
    transport.close().await;
    Ok(SessionOutcome::Rejected { code })
}
