//! Pipeline stages and their uniform side-effect contract.
//!
//! Every stage appends a `running` log entry, executes, and then either
//! commits its output + lifecycle state together with a `success` entry, or
//! records `failed`. Stages with a defined fallback return `Ok` with a
//! `degraded` reason: the output is still committed but the entry is marked
//! `failed` so the hiccup stays visible.

pub mod channel_decision;
pub mod classification;
pub mod content;
pub mod grounding;
pub mod prompt_parser;
pub mod retrieval;

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::campaign::{
    Campaign, CampaignProfile, Channel, Contact, ContentBundle, PipelineRun, PipelineState,
    StageLogEntry, StageName, StageStatus, TargetFilters,
};
use crate::error::PipelineError;
use crate::store::Database;

pub use channel_decision::{ChannelDecisionStage, decide_channel};
pub use classification::ClassificationStage;
pub use content::{ContentGenerationStage, ContentGenerator, cap_network_message};
pub use grounding::{Clock, GroundingCache, SystemClock};
pub use prompt_parser::PromptParseStage;
pub use retrieval::RetrievalStage;

/// Output a stage persists onto the run or campaign.
#[derive(Debug, Clone)]
pub enum StageOutput {
    None,
    /// Final campaign profile values (blank fields already merged).
    Profile(CampaignProfile),
    Classification(TargetFilters),
    Contacts(Vec<Contact>),
    ChannelMap(BTreeMap<String, Channel>),
    Content(ContentBundle),
}

/// What a stage hands back to the runner.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub output: StageOutput,
    /// Lifecycle state to enter, if the stage owns one.
    pub state: Option<PipelineState>,
    /// Set when the stage fell back instead of failing.
    pub degraded: Option<String>,
}

impl StageResult {
    pub fn advance(output: StageOutput, state: PipelineState) -> Self {
        Self {
            output,
            state: Some(state),
            degraded: None,
        }
    }

    pub fn degraded(mut self, reason: impl Into<String>) -> Self {
        self.degraded = Some(reason.into());
        self
    }
}

/// Everything written at one stage boundary.
#[derive(Debug, Clone)]
pub struct StageCommit {
    pub campaign_id: uuid::Uuid,
    pub run_id: uuid::Uuid,
    pub log: StageLogEntry,
    pub output: StageOutput,
    pub state: Option<PipelineState>,
}

/// One unit of pipeline work: `(campaign, run) → output`.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn execute(&self, campaign: &Campaign, run: &PipelineRun) -> Result<StageResult, PipelineError>;
}

/// Execute a stage under the logging contract and commit its result.
pub async fn run_stage(
    db: &dyn Database,
    stage: &dyn Stage,
    campaign: &Campaign,
    run: &PipelineRun,
) -> Result<(), PipelineError> {
    let name = stage.name();
    let mut log = StageLogEntry::running(run.id, campaign.id, name);
    db.insert_stage_log(&log).await?;

    let started = Instant::now();
    info!(campaign_id = %campaign.id, stage = %name, "Stage started");
    let result = stage.execute(campaign, run).await;
    log.duration_ms = Some(started.elapsed().as_millis() as i64);
    log.completed_at = Some(Utc::now());

    match result {
        Ok(result) => {
            if let Some(target) = result.state
                && !campaign.pipeline_state.can_transition_to(target)
            {
                let err = PipelineError::InvalidTransition {
                    id: campaign.id,
                    from: campaign.pipeline_state.to_string(),
                    to: target.to_string(),
                };
                log.status = StageStatus::Failed;
                log.error_message = Some(err.to_string());
                db.finish_stage_log(&log).await?;
                return Err(err);
            }

            match &result.degraded {
                Some(reason) => {
                    warn!(campaign_id = %campaign.id, stage = %name, reason = %reason, "Stage fell back");
                    log.status = StageStatus::Failed;
                    log.error_message = Some(reason.clone());
                }
                None => log.status = StageStatus::Success,
            }

            db.commit_stage(&StageCommit {
                campaign_id: campaign.id,
                run_id: run.id,
                log,
                output: result.output,
                state: result.state,
            })
            .await?;
            info!(campaign_id = %campaign.id, stage = %name, "Stage completed");
            Ok(())
        }
        Err(err) => {
            log.status = StageStatus::Failed;
            log.error_message = Some(err.to_string());
            if let Err(e) = db.finish_stage_log(&log).await {
                warn!(campaign_id = %campaign.id, stage = %name, error = %e, "Failed to record stage failure");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    struct FixedStage {
        result: Result<StageResult, String>,
    }

    #[async_trait]
    impl Stage for FixedStage {
        fn name(&self) -> StageName {
            StageName::Classification
        }

        async fn execute(&self, _c: &Campaign, _r: &PipelineRun) -> Result<StageResult, PipelineError> {
            self.result.clone().map_err(|reason| PipelineError::Stage {
                stage: "classification".into(),
                reason,
            })
        }
    }

    async fn setup() -> (LibSqlBackend, Campaign, PipelineRun) {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let campaign = Campaign::new("p", None, true);
        db.insert_campaign(&campaign).await.unwrap();
        let run = PipelineRun::new(campaign.id, campaign.pipeline_state);
        db.insert_run(&run).await.unwrap();
        (db, campaign, run)
    }

    #[tokio::test]
    async fn success_commits_state_and_log() {
        let (db, campaign, run) = setup().await;
        let stage = FixedStage {
            result: Ok(StageResult::advance(
                StageOutput::Classification(TargetFilters::default()),
                PipelineState::Classified,
            )),
        };

        run_stage(&db, &stage, &campaign, &run).await.unwrap();

        let logs = db.list_stage_logs(campaign.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, StageStatus::Success);
        assert!(logs[0].duration_ms.is_some());
        let stored = db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::Classified);
    }

    #[tokio::test]
    async fn degraded_commits_output_but_logs_failed() {
        let (db, campaign, run) = setup().await;
        let stage = FixedStage {
            result: Ok(StageResult::advance(
                StageOutput::Classification(TargetFilters::default()),
                PipelineState::Classified,
            )
            .degraded("generator timed out")),
        };

        run_stage(&db, &stage, &campaign, &run).await.unwrap();

        let logs = db.list_stage_logs(campaign.id).await.unwrap();
        assert_eq!(logs[0].status, StageStatus::Failed);
        assert_eq!(logs[0].error_message.as_deref(), Some("generator timed out"));
        let stored = db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::Classified);
    }

    #[tokio::test]
    async fn error_logs_failed_without_state_change() {
        let (db, campaign, run) = setup().await;
        let stage = FixedStage {
            result: Err("boom".into()),
        };

        let err = run_stage(&db, &stage, &campaign, &run).await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        let logs = db.list_stage_logs(campaign.id).await.unwrap();
        assert_eq!(logs[0].status, StageStatus::Failed);
        let stored = db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::Created);
    }

    #[tokio::test]
    async fn backward_transition_is_rejected() {
        let (db, campaign, run) = setup().await;
        let stage = FixedStage {
            result: Ok(StageResult::advance(StageOutput::None, PipelineState::Completed)),
        };

        let err = run_stage(&db, &stage, &campaign, &run).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));
    }
}
