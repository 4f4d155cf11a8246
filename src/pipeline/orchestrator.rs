//! Pipeline orchestrator: runs every stage for one campaign under the
//! campaign lock and owns the single `failed` write.
//!
//! **Invariant: the lock is always released.** Both the success and the
//! failure path end in `finish_pipeline`, which clears it together with the
//! final lifecycle state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::campaign::{Campaign, PipelineRun, PipelineState};
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::error::PipelineError;
use crate::llm::LlmProvider;
use crate::stages::{
    ChannelDecisionStage, ClassificationStage, ContentGenerationStage, ContentGenerator,
    GroundingCache, PromptParseStage, RetrievalStage, Stage, run_stage,
};
use crate::store::Database;

/// Tunables for the standard stage sequence.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub grounding_ttl: Duration,
    pub grounding_sample_limit: usize,
    pub fallback_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            grounding_ttl: Duration::from_secs(3600),
            grounding_sample_limit: 80,
            fallback_limit: 50,
        }
    }
}

/// How a `run` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another run holds the lock; nothing was done.
    AlreadyRunning,
    /// Every stage succeeded and the campaign reached `state`.
    Finished {
        run_id: Uuid,
        state: PipelineState,
        /// Present when the campaign was auto-dispatched.
        dispatch: Option<DispatchReport>,
    },
}

pub struct Orchestrator {
    db: Arc<dyn Database>,
    stages: Vec<Arc<dyn Stage>>,
    dispatcher: Arc<Dispatcher>,
}

impl Orchestrator {
    pub fn new(db: Arc<dyn Database>, stages: Vec<Arc<dyn Stage>>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            db,
            stages,
            dispatcher,
        }
    }

    /// The production sequence: prompt parse, classification, retrieval,
    /// channel decision, content generation.
    pub fn standard(
        db: Arc<dyn Database>,
        llm: Arc<dyn LlmProvider>,
        content: Arc<ContentGenerator>,
        dispatcher: Arc<Dispatcher>,
        settings: &PipelineSettings,
    ) -> Self {
        let grounding = Arc::new(GroundingCache::new(
            db.clone(),
            settings.grounding_ttl,
            settings.grounding_sample_limit,
        ));
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(PromptParseStage::new(llm.clone())),
            Arc::new(ClassificationStage::new(llm, grounding)),
            Arc::new(RetrievalStage::new(db.clone(), settings.fallback_limit)),
            Arc::new(ChannelDecisionStage),
            Arc::new(ContentGenerationStage::new(content)),
        ];
        Self::new(db, stages, dispatcher)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run the pipeline in the background. Errors are logged.
    pub fn spawn(self: &Arc<Self>, campaign_id: Uuid) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.run(campaign_id).await {
                error!(campaign_id = %campaign_id, error = %e, "Pipeline run failed");
            }
        });
    }

    /// Run every stage for a `created` campaign.
    ///
    /// A campaign already locked by another run is an idempotent no-op.
    pub async fn run(&self, campaign_id: Uuid) -> Result<RunOutcome, PipelineError> {
        let campaign = self.load(campaign_id).await?;
        if campaign.pipeline_locked {
            info!(campaign_id = %campaign_id, "Pipeline already running, skipping");
            return Ok(RunOutcome::AlreadyRunning);
        }
        if campaign.pipeline_state != PipelineState::Created {
            return Err(PipelineError::InvalidState {
                id: campaign_id,
                state: campaign.pipeline_state.to_string(),
                expected: PipelineState::Created.to_string(),
            });
        }

        // Committed before any stage so a crash leaves a visibly locked record.
        if !self.db.try_lock_campaign(campaign_id).await? {
            // Either another run holds the lock or one already moved the state on.
            let current = self.load(campaign_id).await?;
            if current.pipeline_state != PipelineState::Created {
                return Err(PipelineError::InvalidState {
                    id: campaign_id,
                    state: current.pipeline_state.to_string(),
                    expected: PipelineState::Created.to_string(),
                });
            }
            info!(campaign_id = %campaign_id, "Lost the pipeline lock race, skipping");
            return Ok(RunOutcome::AlreadyRunning);
        }

        let run = PipelineRun::new(campaign_id, campaign.pipeline_state);
        info!(campaign_id = %campaign_id, run_id = %run.id, "Pipeline started");

        match self.execute(&run).await {
            Ok(state) => {
                self.db.finish_pipeline(campaign_id, run.id, state, None).await?;
                info!(campaign_id = %campaign_id, run_id = %run.id, state = %state, "Pipeline finished");

                let dispatch = if state == PipelineState::Approved {
                    self.auto_dispatch(campaign_id).await
                } else {
                    None
                };
                Ok(RunOutcome::Finished {
                    run_id: run.id,
                    state,
                    dispatch,
                })
            }
            Err(err) => {
                let message = err.to_string();
                error!(campaign_id = %campaign_id, run_id = %run.id, error = %message, "Pipeline failed");
                if let Err(e) = self
                    .db
                    .finish_pipeline(campaign_id, run.id, PipelineState::Failed, Some(&message))
                    .await
                {
                    error!(campaign_id = %campaign_id, error = %e, "Failed to record pipeline failure");
                    return Err(e.into());
                }
                Err(err)
            }
        }
    }

    /// Stage sequence. Returns the post-content state for `finish_pipeline`.
    async fn execute(&self, run: &PipelineRun) -> Result<PipelineState, PipelineError> {
        self.db.insert_run(run).await?;

        for stage in &self.stages {
            // Stages commit through the store; always hand them fresh copies.
            let campaign = self.load(run.campaign_id).await?;
            let current = self
                .db
                .get_run(run.id)
                .await?
                .ok_or(PipelineError::NotFound(run.id))?;
            run_stage(self.db.as_ref(), stage.as_ref(), &campaign, &current).await?;
        }

        let campaign = self.load(run.campaign_id).await?;
        if campaign.pipeline_state != PipelineState::ContentGenerated {
            return Err(PipelineError::InvalidState {
                id: campaign.id,
                state: campaign.pipeline_state.to_string(),
                expected: PipelineState::ContentGenerated.to_string(),
            });
        }

        Ok(if campaign.approval_required {
            PipelineState::AwaitingApproval
        } else {
            PipelineState::Approved
        })
    }

    /// Follow-on dispatch outside the lock scope. Failures stay retryable.
    async fn auto_dispatch(&self, campaign_id: Uuid) -> Option<DispatchReport> {
        info!(campaign_id = %campaign_id, "Approval not required, dispatching");
        match self.dispatcher.dispatch(campaign_id).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(campaign_id = %campaign_id, error = %e, "Auto-dispatch failed");
                None
            }
        }
    }

    async fn load(&self, campaign_id: Uuid) -> Result<Campaign, PipelineError> {
        self.db
            .get_campaign(campaign_id)
            .await?
            .ok_or(PipelineError::NotFound(campaign_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{Channel, Contact, StageName, StageStatus};
    use crate::dispatch::{DispatchSettings, SendStatus};
    use crate::llm::testing::ScriptedLlm;
    use crate::providers::Providers;
    use crate::providers::testing::{RecordingMail, RecordingVoice};
    use crate::store::LibSqlBackend;

    /// Generator double keyed on which prompt it receives.
    fn reply_for(prompt: &str) -> Result<String, String> {
        if prompt.contains("extract structured information") {
            Ok(r#"{"name":"Robotics Outreach","company":"Acme","platform":"email","campaign_purpose":"Book demos","target_audience":"CTOs"}"#.into())
        } else if prompt.contains("targeting filters") {
            Ok(r#"{"filters":{"role":"","location":"","category":"","company":""}}"#.into())
        } else if prompt.contains("cold email") {
            Ok(r#"{"subject":"Hi [CONTACT_NAME]","body":"Hello [CONTACT_NAME]","cta_link":"[PRODUCT_LINK]"}"#.into())
        } else if prompt.contains("LinkedIn") {
            Ok(r#"{"message":"Hey [CONTACT_NAME]","cta_link":"[PRODUCT_LINK]"}"#.into())
        } else {
            Ok(r#"{"greeting":"Hi [CONTACT_NAME]","value_proposition":"v","objection_handling":"o","closing":"Bye","cta_link":"[PRODUCT_LINK]"}"#.into())
        }
    }

    struct Fixture {
        db: Arc<LibSqlBackend>,
        mail: Arc<RecordingMail>,
        voice: Arc<RecordingVoice>,
        orchestrator: Orchestrator,
    }

    async fn fixture(llm: ScriptedLlm) -> Fixture {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mail = Arc::new(RecordingMail::default());
        let voice = Arc::new(RecordingVoice::default());
        let providers = Providers::log_only()
            .with_mail(mail.clone())
            .with_voice(voice.clone());
        let dispatcher = Arc::new(Dispatcher::new(db.clone(), providers, DispatchSettings::default()));
        let llm: Arc<dyn LlmProvider> = Arc::new(llm);
        let content = Arc::new(ContentGenerator::new(llm.clone()));
        let orchestrator = Orchestrator::standard(db.clone(), llm, content, dispatcher, &PipelineSettings::default());
        Fixture {
            db,
            mail,
            voice,
            orchestrator,
        }
    }

    async fn seed_contacts(db: &LibSqlBackend) {
        db.upsert_contact(&Contact::new("a@x.io").with_name("Ann").with_scores(Some(0.9), None, None))
            .await
            .unwrap();
        db.upsert_contact(
            &Contact::new("b@x.io")
                .with_name("Bo")
                .with_phone("555-0100")
                .with_scores(None, None, Some(0.6)),
        )
        .await
        .unwrap();
        db.upsert_contact(&Contact::new("c@x.io").with_name("Cy")).await.unwrap();
    }

    #[tokio::test]
    async fn auto_dispatch_end_to_end() {
        let f = fixture(ScriptedLlm::responding(reply_for)).await;
        seed_contacts(&f.db).await;
        let campaign = Campaign::new("Promote our robotics kit", Some("https://x.io".into()), false);
        f.db.insert_campaign(&campaign).await.unwrap();

        let outcome = f.orchestrator.run(campaign.id).await.unwrap();
        let RunOutcome::Finished { state, dispatch, .. } = outcome else {
            panic!("expected a finished run");
        };
        assert_eq!(state, PipelineState::Approved);
        let report = dispatch.unwrap();
        assert_eq!(report.sent, 3);
        assert_eq!(report.final_state, Some(PipelineState::Completed));

        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::Completed);
        assert!(!stored.pipeline_locked);
        assert_eq!(stored.name, "Robotics Outreach");

        let bundle = stored.content.unwrap();
        assert_eq!(bundle.templates.len(), 3);
        assert_eq!(bundle.contacts["a@x.io"], Channel::Email);
        assert_eq!(bundle.contacts["b@x.io"], Channel::Call);
        assert_eq!(bundle.contacts["c@x.io"], Channel::Email);

        assert_eq!(f.mail.sent().len(), 2);
        assert_eq!(f.voice.calls().len(), 1);
        let rows = f.db.list_outbound(campaign.id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.send_status == SendStatus::Sent));

        let logs = f.db.list_stage_logs(campaign.id).await.unwrap();
        assert_eq!(logs.len(), 5);
        assert!(logs.iter().all(|l| l.status == StageStatus::Success));
    }

    #[tokio::test]
    async fn approval_required_stops_before_dispatch() {
        let f = fixture(ScriptedLlm::responding(reply_for)).await;
        seed_contacts(&f.db).await;
        let campaign = Campaign::new("Promote our robotics kit", None, true);
        f.db.insert_campaign(&campaign).await.unwrap();

        let outcome = f.orchestrator.run(campaign.id).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Finished {
                state: PipelineState::AwaitingApproval,
                dispatch: None,
                ..
            }
        ));

        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::AwaitingApproval);
        assert!(!stored.pipeline_locked);
        assert!(f.mail.sent().is_empty());
        assert!(f.db.list_outbound(campaign.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn content_failure_marks_failed_and_releases_lock() {
        let f = fixture(ScriptedLlm::responding(|prompt| {
            if prompt.contains("cold email") {
                Err("generator down".into())
            } else {
                reply_for(prompt)
            }
        }))
        .await;
        seed_contacts(&f.db).await;
        let campaign = Campaign::new("Promote our robotics kit", None, true);
        f.db.insert_campaign(&campaign).await.unwrap();

        let err = f.orchestrator.run(campaign.id).await.unwrap_err();
        assert!(err.to_string().contains("generator down"));

        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::Failed);
        assert!(!stored.pipeline_locked);

        let runs = f.db.list_runs(campaign.id).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].state, PipelineState::Failed);
        assert!(runs[0].error_message.as_deref().unwrap().contains("generator down"));

        let logs = f.db.list_stage_logs(campaign.id).await.unwrap();
        let content = logs.iter().find(|l| l.stage == StageName::ContentGeneration).unwrap();
        assert_eq!(content.status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn classification_failure_falls_back_and_continues() {
        let f = fixture(ScriptedLlm::responding(|prompt| {
            if prompt.contains("targeting filters") {
                Ok("not json at all".into())
            } else {
                reply_for(prompt)
            }
        }))
        .await;
        seed_contacts(&f.db).await;
        let campaign = Campaign::new("Promote our robotics kit", None, true);
        f.db.insert_campaign(&campaign).await.unwrap();

        f.orchestrator.run(campaign.id).await.unwrap();

        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::AwaitingApproval);
        assert_eq!(stored.content.unwrap().contacts.len(), 3);

        let logs = f.db.list_stage_logs(campaign.id).await.unwrap();
        let classification = logs.iter().find(|l| l.stage == StageName::Classification).unwrap();
        assert_eq!(classification.status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn locked_campaign_is_a_noop() {
        let f = fixture(ScriptedLlm::responding(reply_for)).await;
        let campaign = Campaign::new("p", None, true);
        f.db.insert_campaign(&campaign).await.unwrap();
        assert!(f.db.try_lock_campaign(campaign.id).await.unwrap());

        let outcome = f.orchestrator.run(campaign.id).await.unwrap();
        assert_eq!(outcome, RunOutcome::AlreadyRunning);
        assert!(f.db.list_runs(campaign.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_runs_never_fail_a_healthy_campaign() {
        let f = fixture(ScriptedLlm::responding(reply_for)).await;
        seed_contacts(&f.db).await;
        let campaign = Campaign::new("Promote our robotics kit", None, true);
        f.db.insert_campaign(&campaign).await.unwrap();

        let (a, b) = tokio::join!(f.orchestrator.run(campaign.id), f.orchestrator.run(campaign.id));
        let finished = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Ok(RunOutcome::Finished { .. })))
            .count();
        assert_eq!(finished, 1);
        for outcome in [&a, &b] {
            assert!(matches!(
                outcome,
                Ok(RunOutcome::Finished { .. })
                    | Ok(RunOutcome::AlreadyRunning)
                    | Err(PipelineError::InvalidState { .. })
            ));
        }

        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::AwaitingApproval);
        assert!(!stored.pipeline_locked);
        assert_eq!(f.db.list_runs(campaign.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_run_after_completion_leaves_state_alone() {
        let f = fixture(ScriptedLlm::responding(reply_for)).await;
        seed_contacts(&f.db).await;
        let campaign = Campaign::new("Promote our robotics kit", None, true);
        f.db.insert_campaign(&campaign).await.unwrap();
        f.orchestrator.run(campaign.id).await.unwrap();

        // A caller holding a pre-run snapshot still cannot take the lock.
        assert!(!f.db.try_lock_campaign(campaign.id).await.unwrap());
        let err = f.orchestrator.run(campaign.id).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState { .. }));

        let stored = f.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::AwaitingApproval);
        assert_eq!(f.db.list_runs(campaign.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejects_campaign_past_created() {
        let f = fixture(ScriptedLlm::responding(reply_for)).await;
        let mut campaign = Campaign::new("p", None, true);
        campaign.pipeline_state = PipelineState::Completed;
        f.db.insert_campaign(&campaign).await.unwrap();

        let err = f.orchestrator.run(campaign.id).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidState { .. }));
        assert!(f.db.list_runs(campaign.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_campaign_is_not_found() {
        let f = fixture(ScriptedLlm::responding(reply_for)).await;
        let err = f.orchestrator.run(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }
}
