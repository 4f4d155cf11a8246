//! Content generation: one reusable template per channel.
//!
//! Templates carry `[CONTACT_NAME]`-style tokens that the dispatcher fills
//! per contact. All three channels are generated even when no contact is
//! assigned to one, so a reviewer can still see and edit it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{Stage, StageOutput, StageResult};
use crate::campaign::{Campaign, Channel, ChannelTemplate, ContentBundle, PipelineRun, PipelineState, StageName};
use crate::error::{LlmError, PipelineError};
use crate::llm::{LlmProvider, complete_json};

const SYSTEM_PROMPT: &str = "You write B2B outreach templates. Return ONLY valid JSON. No markdown, no explanations, no text before or after the JSON.";

const TONE_RULES: &str = "Safety and tone:
- Use respectful, professional language.
- Do NOT use abusive, inappropriate, sexual, hateful, or violent language.";

const EMAIL_PROMPT: &str = r#"Write a personalized cold email template for a campaign.
Use these placeholder tokens verbatim; they are replaced with real values at send time:
- [CONTACT_NAME]: recipient's full name
- [CONTACT_ROLE]: recipient's job title
- [CONTACT_COMPANY]: recipient's company
- [PRODUCT_LINK]: product or landing page URL

Campaign:
- Purpose: {{campaign_purpose}}
- Product Link: {{product_link}}

Instructions:
{{prompt}}

{{tone}}

Format:
{
  "subject": "string",
  "body": "string (use [CONTACT_NAME], [CONTACT_COMPANY] placeholders in the body)",
  "cta_link": "{{product_link}}"
}"#;

const NETWORK_PROMPT: &str = r#"Write a SHORT professional-network (LinkedIn) message template under 300 characters.
Use these placeholder tokens verbatim; they are replaced with real values at send time:
- [CONTACT_NAME]: recipient's full name
- [CONTACT_ROLE]: recipient's job title
- [PRODUCT_LINK]: product or landing page URL

Campaign Purpose: {{campaign_purpose}}
Product Link: {{product_link}}

Instructions:
{{prompt}}

{{tone}}

Format:
{
  "message": "string (use [CONTACT_NAME] placeholder)",
  "cta_link": "{{product_link}}"
}"#;

const CALL_PROMPT: &str = r#"Write a concise call script template for a sales agent.
Use these placeholder tokens verbatim; they are replaced with real values at call time:
- [CONTACT_NAME]: recipient's full name
- [CONTACT_ROLE]: recipient's job title
- [CONTACT_COMPANY]: recipient's company
- [PRODUCT_LINK]: product or landing page URL

Campaign Purpose: {{campaign_purpose}}
Product Link: {{product_link}}

Instructions:
{{prompt}}

{{tone}}

Format:
{
  "greeting": "string (use [CONTACT_NAME] placeholder)",
  "value_proposition": "string",
  "objection_handling": "string",
  "closing": "string (use [PRODUCT_LINK] placeholder)",
  "cta_link": "{{product_link}}"
}"#;

/// Professional-network messages must stay under this many characters.
pub const NETWORK_MESSAGE_LIMIT: usize = 300;

/// Drafts channel templates. Shared by the pipeline stage and the approval
/// session's `regenerate` action so both use identical prompt inputs.
pub struct ContentGenerator {
    llm: Arc<dyn LlmProvider>,
}

impl ContentGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn generate(&self, campaign: &Campaign, channel: Channel) -> Result<ChannelTemplate, LlmError> {
        let prompt = build_prompt(campaign, channel);
        let object = complete_json(self.llm.as_ref(), SYSTEM_PROMPT, prompt, 0.7).await?;
        let mut template = ChannelTemplate::from(object);
        fill_cta_link(&mut template, campaign.product_link.as_deref());
        if channel == Channel::ProfessionalNetwork {
            cap_network_message(&mut template);
        }
        Ok(template)
    }

    /// Generate every channel, in priority order. The first failure wins.
    pub async fn generate_all(&self, campaign: &Campaign) -> Result<BTreeMap<Channel, ChannelTemplate>, LlmError> {
        let mut templates = BTreeMap::new();
        for channel in Channel::ALL {
            info!(campaign_id = %campaign.id, channel = %channel, "Generating channel template");
            templates.insert(channel, self.generate(campaign, channel).await?);
        }
        Ok(templates)
    }
}

fn build_prompt(campaign: &Campaign, channel: Channel) -> String {
    let template = match channel {
        Channel::Email => EMAIL_PROMPT,
        Channel::ProfessionalNetwork => NETWORK_PROMPT,
        Channel::Call => CALL_PROMPT,
    };
    template
        .replace("{{tone}}", TONE_RULES)
        .replace("{{campaign_purpose}}", campaign.purpose_or_prompt())
        .replace("{{product_link}}", campaign.product_link.as_deref().unwrap_or(""))
        .replace("{{prompt}}", &campaign.prompt)
}

fn fill_cta_link(template: &mut ChannelTemplate, product_link: Option<&str>) {
    let Some(link) = product_link.filter(|l| !l.trim().is_empty()) else {
        return;
    };
    if template.get_str("cta_link").is_none_or(|l| l.trim().is_empty()) {
        template.set_str("cta_link", link);
    }
}

/// Keep a professional-network `message` under the platform limit.
pub fn cap_network_message(template: &mut ChannelTemplate) {
    if let Some(message) = template.get_str("message")
        && message.chars().count() >= NETWORK_MESSAGE_LIMIT
    {
        let cut: String = message.chars().take(NETWORK_MESSAGE_LIMIT - 1).collect();
        template.set_str("message", &cut);
    }
}

pub struct ContentGenerationStage {
    generator: Arc<ContentGenerator>,
}

impl ContentGenerationStage {
    pub fn new(generator: Arc<ContentGenerator>) -> Self {
        Self { generator }
    }
}

/// Contact → channel map for the bundle. Retrieved contacts missing from the
/// decision map default to email.
fn assignment_map(run: &PipelineRun) -> BTreeMap<String, Channel> {
    let mut map = run.channel_map.clone().unwrap_or_default();
    for contact in run.contacts.as_deref().unwrap_or_default() {
        if !contact.email.trim().is_empty() {
            map.entry(contact.email.clone()).or_insert(Channel::Email);
        }
    }
    map
}

#[async_trait]
impl Stage for ContentGenerationStage {
    fn name(&self) -> StageName {
        StageName::ContentGeneration
    }

    async fn execute(&self, campaign: &Campaign, run: &PipelineRun) -> Result<StageResult, PipelineError> {
        let templates = self.generator.generate_all(campaign).await?;
        let bundle = ContentBundle {
            templates,
            contacts: assignment_map(run),
        };
        info!(
            campaign_id = %campaign.id,
            templates = bundle.templates.len(),
            contacts = bundle.contacts.len(),
            "Content generated"
        );
        Ok(StageResult::advance(StageOutput::Content(bundle), PipelineState::ContentGenerated))
    }
}
