//! Classification: campaign intent → targeting filters, grounded on real
//! contact-store values.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::grounding::{GroundingCache, format_samples};
use super::{Stage, StageOutput, StageResult};
use crate::campaign::{Campaign, PipelineRun, PipelineState, StageName, TargetFilters};
use crate::error::{ClassificationError, PipelineError};
use crate::llm::{LlmProvider, complete_json};

const SYSTEM_PROMPT: &str = "You are a B2B targeting expert. You answer with a single JSON object and nothing else.";

const PROMPT_TEMPLATE: &str = r#"Given the campaign information below, extract structured targeting filters.

Campaign Information:
- Company: {company}
- Campaign Purpose: {campaign_purpose}
- Target Audience: {target_audience}

Below are the ACTUAL distinct values that exist in the contact database for each filter field.
You MUST choose values that closely match entries from these lists. Do not invent values that are not present.

Available database values:
{column_samples}

Return a valid JSON object ONLY, in exactly this format:
{
  "filters": {
    "role": "<target job titles from the role list, comma-separated if multiple, or empty string>",
    "location": "<city/country from the location list, or empty string if not mentioned>",
    "category": "<industry vertical from the category list, or empty string>",
    "company": "<specific target company from the company list, or empty string>"
  }
}

Rules:
- role: choose the closest matching title(s) from the role list; use concrete job titles only
- company: leave EMPTY unless a specific company name is mentioned as a target
- location: leave EMPTY unless a specific city/region/country is mentioned
- category: pick the closest industry vertical from the category list"#;

#[derive(Deserialize)]
struct ClassificationReply {
    filters: TargetFilters,
}

pub struct ClassificationStage {
    llm: Arc<dyn LlmProvider>,
    grounding: Arc<GroundingCache>,
}

impl ClassificationStage {
    pub fn new(llm: Arc<dyn LlmProvider>, grounding: Arc<GroundingCache>) -> Self {
        Self { llm, grounding }
    }

    /// Ask the generator for filters. Any failure surfaces as an error for
    /// the caller to fall back on.
    pub async fn classify(&self, campaign: &Campaign) -> Result<TargetFilters, ClassificationError> {
        let samples = self.grounding.samples().await;
        let prompt = build_prompt(campaign, &format_samples(&samples));

        let object = complete_json(self.llm.as_ref(), SYSTEM_PROMPT, prompt, 0.1).await?;
        let reply: ClassificationReply = serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| ClassificationError::MalformedOutput(e.to_string()))?;
        Ok(reply.filters)
    }
}

fn build_prompt(campaign: &Campaign, column_samples: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{company}", campaign.company.as_deref().unwrap_or(""))
        .replace("{campaign_purpose}", campaign.purpose_or_prompt())
        .replace("{target_audience}", campaign.target_audience.as_deref().unwrap_or(""))
        .replace("{column_samples}", column_samples)
}

#[async_trait]
impl Stage for ClassificationStage {
    fn name(&self) -> StageName {
        StageName::Classification
    }

    async fn execute(&self, campaign: &Campaign, _run: &PipelineRun) -> Result<StageResult, PipelineError> {
        let outcome = self.classify(campaign).await;
        let degraded = outcome.as_ref().err().map(ToString::to_string);
        let filters = outcome.unwrap_or_default();

        info!(
            campaign_id = %campaign.id,
            fallback = degraded.is_some(),
            role = ?filters.role,
            location = ?filters.location,
            category = ?filters.category,
            company = ?filters.company,
            "Campaign classified"
        );

        let result = StageResult::advance(StageOutput::Classification(filters), PipelineState::Classified);
        Ok(match degraded {
            Some(reason) => result.degraded(reason),
            None => result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::Contact;
    use crate::llm::testing::ScriptedLlm;
    use crate::store::{Database, LibSqlBackend};
    use std::time::Duration;

    async fn build_stage(replies: Vec<Result<String, String>>) -> (ClassificationStage, Arc<ScriptedLlm>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.upsert_contact(&Contact::new("a@x.io").with_role("CTO").with_category("Fintech"))
            .await
            .unwrap();
        let llm = Arc::new(ScriptedLlm::new(replies));
        let grounding = Arc::new(GroundingCache::new(db, Duration::from_secs(3600), 80));
        (ClassificationStage::new(llm.clone(), grounding), llm)
    }

    #[tokio::test]
    async fn parses_filters_and_grounds_prompt() {
        let (stage, llm) = build_stage(vec![Ok(
            r#"{"filters":{"role":"CTO, VP Engineering","location":"","category":["Fintech"],"company":null}}"#.into(),
        )])
        .await;
        let campaign = Campaign::new("Reach fintech CTOs", None, true);

        let filters = stage.classify(&campaign).await.unwrap();
        assert_eq!(filters.role, vec!["CTO", "VP Engineering"]);
        assert!(filters.location.is_empty());
        assert_eq!(filters.category, vec!["Fintech"]);
        assert!(filters.company.is_empty());

        let prompt = llm.last_user_prompt().unwrap();
        assert!(prompt.contains("role: [\"CTO\"]"));
        assert!(prompt.contains("location: [no data]"));
        assert!(prompt.contains("Campaign Purpose: Reach fintech CTOs"));
    }

    #[tokio::test]
    async fn generator_failure_falls_back_to_match_everyone() {
        let (stage, _) = build_stage(vec![Err("connection refused".into())]).await;
        let campaign = Campaign::new("anything", None, true);
        let run = PipelineRun::new(campaign.id, campaign.pipeline_state);

        let result = stage.execute(&campaign, &run).await.unwrap();
        assert!(result.degraded.is_some());
        assert_eq!(result.state, Some(PipelineState::Classified));
        match result.output {
            StageOutput::Classification(filters) => assert!(filters.is_empty()),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_reply_falls_back() {
        let (stage, _) = build_stage(vec![Ok(r#"{"targets": "everyone"}"#.into())]).await;
        let campaign = Campaign::new("anything", None, true);

        let err = stage.classify(&campaign).await.unwrap_err();
        assert!(matches!(err, ClassificationError::MalformedOutput(_)));

        let (stage, _) = stage_with_text("I cannot help with that").await;
        assert!(matches!(
            stage.classify(&campaign).await.unwrap_err(),
            ClassificationError::Generator(_)
        ));
    }

    async fn stage_with_text(text: &str) -> (ClassificationStage, Arc<ScriptedLlm>) {
        build_stage(vec![Ok(text.to_string())]).await
    }
}
