//! Prompt parsing: enrich a campaign's profile from its free-text prompt.
//!
//! Non-fatal and state-neutral. A failure leaves the campaign as submitted.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Stage, StageOutput, StageResult};
use crate::campaign::{Campaign, CampaignProfile, PipelineRun, StageName};
use crate::error::{LlmError, PipelineError};
use crate::llm::{LlmProvider, complete_json};

const SYSTEM_PROMPT: &str = "You are a B2B campaign data extractor. Return a JSON object ONLY, with no extra text, markdown or explanation.";

const PROMPT_TEMPLATE: &str = r#"Read the user's campaign prompt carefully and extract structured information.

User Prompt:
"{user_prompt}"

Return exactly these keys:
{
  "name": "<short campaign name, 3-8 words, title-case>",
  "company": "<company or brand being promoted, inferred from context if not explicit>",
  "platform": "<best outreach channel: email | linkedin | call | sms>",
  "campaign_purpose": "<1-2 sentence statement of what the campaign aims to achieve>",
  "target_audience": "<ideal targets: job roles, seniority, industry vertical, location if mentioned>"
}

Rules:
- If a field is not explicitly mentioned, make a smart inference from the context.
- platform must be exactly one of: email, linkedin, call, sms
- name must be concise and descriptive (e.g. "Enterprise CTO Cold Outreach Q2")"#;

const PLATFORMS: [&str; 4] = ["email", "linkedin", "call", "sms"];
const MAX_FIELD_CHARS: usize = 255;

pub struct PromptParseStage {
    llm: Arc<dyn LlmProvider>,
}

impl PromptParseStage {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn parse(&self, prompt: &str) -> Result<CampaignProfile, LlmError> {
        let user = PROMPT_TEMPLATE.replace("{user_prompt}", &prompt.replace('"', "'"));
        let object = complete_json(self.llm.as_ref(), SYSTEM_PROMPT, user, 0.2).await?;
        let field = |key: &str| {
            object
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
        };
        Ok(CampaignProfile {
            name: field("name").map(|n| n.chars().take(MAX_FIELD_CHARS).collect()),
            company: field("company").map(|c| c.chars().take(MAX_FIELD_CHARS).collect()),
            platform: field("platform").map(|p| normalize_platform(&p).to_string()),
            campaign_purpose: field("campaign_purpose"),
            target_audience: field("target_audience"),
        })
    }
}

fn normalize_platform(raw: &str) -> &'static str {
    let lower = raw.trim().to_lowercase();
    match lower.as_str() {
        "phone" | "voice" => "call",
        other => PLATFORMS.into_iter().find(|p| *p == other).unwrap_or("email"),
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// Final profile: the parsed name always wins; other fields only fill blanks.
fn merge(campaign: &Campaign, parsed: CampaignProfile) -> CampaignProfile {
    let fill = |current: &Option<String>, parsed: Option<String>| {
        if blank(current) { parsed } else { current.clone() }
    };
    CampaignProfile {
        name: parsed.name,
        company: fill(&campaign.company, parsed.company),
        platform: fill(&campaign.platform, parsed.platform).or_else(|| Some("email".to_string())),
        campaign_purpose: fill(&campaign.campaign_purpose, parsed.campaign_purpose),
        target_audience: fill(&campaign.target_audience, parsed.target_audience),
    }
}

#[async_trait]
impl Stage for PromptParseStage {
    fn name(&self) -> StageName {
        StageName::PromptParse
    }

    async fn execute(&self, campaign: &Campaign, _run: &PipelineRun) -> Result<StageResult, PipelineError> {
        if campaign.prompt.trim().is_empty() {
            return Ok(StageResult {
                output: StageOutput::None,
                state: None,
                degraded: None,
            });
        }

        match self.parse(&campaign.prompt).await {
            Ok(parsed) => {
                let profile = merge(campaign, parsed);
                info!(campaign_id = %campaign.id, name = ?profile.name, platform = ?profile.platform, "Campaign profile enriched");
                Ok(StageResult {
                    output: StageOutput::Profile(profile),
                    state: None,
                    degraded: None,
                })
            }
            Err(e) => Ok(StageResult {
                output: StageOutput::None,
                state: None,
                degraded: Some(e.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedLlm;

    const REPLY: &str = r#"{"name":"Fintech CTO Outreach","company":"Acme","platform":"Phone","campaign_purpose":"Book demos","target_audience":"CTOs in fintech"}"#;

    #[test]
    fn platform_normalization() {
        assert_eq!(normalize_platform("LinkedIn"), "linkedin");
        assert_eq!(normalize_platform("phone"), "call");
        assert_eq!(normalize_platform("sms"), "sms");
        assert_eq!(normalize_platform("carrier pigeon"), "email");
    }

    #[tokio::test]
    async fn fills_only_blank_fields() {
        let stage = PromptParseStage::new(Arc::new(ScriptedLlm::new(vec![Ok(REPLY.into())])));
        let mut campaign = Campaign::new("Sell to fintech CTOs", None, true);
        campaign.company = Some("Initech".into());
        let run = PipelineRun::new(campaign.id, campaign.pipeline_state);

        let result = stage.execute(&campaign, &run).await.unwrap();
        assert!(result.state.is_none());
        let StageOutput::Profile(profile) = result.output else {
            panic!("expected profile output");
        };
        assert_eq!(profile.name.as_deref(), Some("Fintech CTO Outreach"));
        assert_eq!(profile.company.as_deref(), Some("Initech"));
        assert_eq!(profile.platform.as_deref(), Some("call"));
        assert_eq!(profile.campaign_purpose.as_deref(), Some("Book demos"));
    }

    #[tokio::test]
    async fn failure_is_non_fatal() {
        let stage = PromptParseStage::new(Arc::new(ScriptedLlm::new(vec![Err("timeout".into())])));
        let campaign = Campaign::new("Sell things", None, true);
        let run = PipelineRun::new(campaign.id, campaign.pipeline_state);

        let result = stage.execute(&campaign, &run).await.unwrap();
        assert!(result.degraded.is_some());
        assert!(result.state.is_none());
        assert!(matches!(result.output, StageOutput::None));
    }
}
