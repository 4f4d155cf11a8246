//! Dispatch engine: approved content bundle → per-contact sends.
//!
//! Every (campaign, contact, channel) tuple is claimed in the outbound ledger
//! before its provider call, so concurrent or repeated dispatches never send
//! twice. Per-contact failures are recorded and do not stop the loop.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::model::{EngagementEvent, SendStatus};
use super::substitution::Substitution;
use crate::campaign::{Campaign, Channel, ChannelTemplate, Contact, PipelineState};
use crate::error::{DispatchError, ProviderError};
use crate::providers::{CallRequest, OutboundEmail, Providers};
use crate::stages::cap_network_message;
use crate::store::{Database, OutboundResult};

/// Sender-side values used while rendering.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub sender_name: String,
    /// Prefix for phone numbers without a leading `+`.
    pub default_country_code: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            sender_name: "Campaign Team".to_string(),
            default_country_code: "+1".to_string(),
        }
    }
}

/// Outcome of one `dispatch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub campaign_id: Uuid,
    /// False when the campaign was not `approved` and nothing was done.
    pub performed: bool,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Tuples already sent or claimed by another dispatcher.
    pub already_handled: usize,
    pub final_state: Option<PipelineState>,
}

/// What one contact would receive, rendered but not sent.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePreview {
    pub contact_email: String,
    pub channel: Channel,
    /// Template after substitution.
    pub content: ChannelTemplate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<OutboundEmail>,
    /// Absent for calls when the contact has no usable phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call: Option<CallRequest>,
}

/// Result of one channel attempt before it is written to the ledger.
struct Attempt {
    status: SendStatus,
    payload: Value,
    provider_message_id: Option<String>,
    error: Option<String>,
}

impl Attempt {
    fn sent(payload: Value, provider_message_id: String) -> Self {
        Self {
            status: SendStatus::Sent,
            payload,
            provider_message_id: Some(provider_message_id),
            error: None,
        }
    }

    fn failed(payload: Value, error: impl ToString) -> Self {
        Self {
            status: SendStatus::Failed,
            payload,
            provider_message_id: None,
            error: Some(error.to_string()),
        }
    }

    fn skipped(payload: Value, reason: impl Into<String>) -> Self {
        Self {
            status: SendStatus::Skipped,
            payload,
            provider_message_id: None,
            error: Some(reason.into()),
        }
    }
}

pub struct Dispatcher {
    db: Arc<dyn Database>,
    providers: Providers,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(db: Arc<dyn Database>, providers: Providers, settings: DispatchSettings) -> Self {
        Self {
            db,
            providers,
            settings,
        }
    }

    /// Send the approved bundle and finalize the campaign.
    ///
    /// A campaign that is not `approved` is a logged no-op, so repeated
    /// invocations are safe.
    pub async fn dispatch(&self, campaign_id: Uuid) -> Result<DispatchReport, DispatchError> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or(DispatchError::NotFound(campaign_id))?;

        let mut report = DispatchReport {
            campaign_id,
            ..Default::default()
        };

        if campaign.pipeline_state != PipelineState::Approved {
            warn!(
                campaign_id = %campaign_id,
                state = %campaign.pipeline_state,
                "Dispatch skipped, campaign is not approved"
            );
            return Ok(report);
        }
        report.performed = true;

        let bundle = campaign.content.clone().unwrap_or_default();
        let recipients: Vec<(&String, Channel)> = bundle
            .contacts
            .iter()
            .filter(|(email, _)| email.contains('@'))
            .map(|(email, channel)| (email, *channel))
            .collect();
        info!(campaign_id = %campaign_id, contacts = recipients.len(), "Dispatching campaign");

        for (email, channel) in recipients {
            if self.db.has_successful_send(campaign_id, email, channel).await? {
                info!(contact = %email, channel = %channel, "Already sent, skipping");
                report.already_handled += 1;
                continue;
            }
            let Some(claim) = self.db.claim_outbound(campaign_id, email, channel).await? else {
                info!(contact = %email, channel = %channel, "Tuple claimed elsewhere, skipping");
                report.already_handled += 1;
                continue;
            };

            let contact = match self.db.get_contact(email).await {
                Ok(contact) => contact,
                Err(e) => {
                    warn!(contact = %email, error = %e, "Could not load contact record");
                    None
                }
            };

            let attempt = match bundle.template(channel) {
                Some(template) => {
                    self.attempt(&campaign, email, contact.as_ref(), channel, template)
                        .await
                }
                None => Attempt::skipped(Value::Null, format!("no {channel} template")),
            };

            match attempt.status {
                SendStatus::Sent => report.sent += 1,
                SendStatus::Failed => report.failed += 1,
                _ => report.skipped += 1,
            }

            let mut event_payload = attempt.payload.clone();
            if let (Some(err), Value::Object(map)) = (&attempt.error, &mut event_payload) {
                map.insert("error".to_string(), Value::String(err.clone()));
            }
            let event = EngagementEvent::new(
                campaign_id,
                email.as_str(),
                channel,
                attempt.status.event_type(),
                event_payload,
            );
            let result = OutboundResult {
                status: attempt.status,
                payload: attempt.payload,
                provider_message_id: attempt.provider_message_id,
                error_message: attempt.error,
            };
            self.db.finalize_outbound(claim, &result, &event).await?;
        }

        report.final_state = Some(self.finish(campaign_id).await?);
        info!(
            campaign_id = %campaign_id,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            already_handled = report.already_handled,
            "Dispatch finished"
        );
        Ok(report)
    }

    /// Render one contact's message without sending it or touching the
    /// ledger.
    pub async fn preview(&self, campaign_id: Uuid, email: &str) -> Result<MessagePreview, DispatchError> {
        let campaign = self
            .db
            .get_campaign(campaign_id)
            .await?
            .ok_or(DispatchError::NotFound(campaign_id))?;

        let unknown = || DispatchError::UnknownContact {
            campaign_id,
            contact: email.to_string(),
        };
        let bundle = campaign.content.as_ref().ok_or_else(unknown)?;
        let channel = *bundle.contacts.get(email).ok_or_else(unknown)?;
        let template = bundle.template(channel).ok_or(DispatchError::MissingTemplate {
            campaign_id,
            channel: channel.to_string(),
        })?;

        let contact = self.db.get_contact(email).await?;
        let rendered = self.render(&campaign, email, contact.as_ref(), channel, template);
        let (outbound, call) = match channel {
            Channel::Email => (Some(self.email_message(&campaign, email, &rendered)), None),
            Channel::Call => (None, self.call_request(&campaign, email, contact.as_ref(), &rendered)),
            Channel::ProfessionalNetwork => (None, None),
        };

        Ok(MessagePreview {
            contact_email: email.to_string(),
            channel,
            content: rendered,
            email: outbound,
            call,
        })
    }

    /// `approved → dispatched → completed`, as two checkpoints.
    async fn finish(&self, campaign_id: Uuid) -> Result<PipelineState, DispatchError> {
        if !self
            .db
            .advance_campaign_state(campaign_id, PipelineState::Approved, PipelineState::Dispatched)
            .await?
        {
            warn!(campaign_id = %campaign_id, "Campaign left approved during dispatch");
        }
        if self
            .db
            .advance_campaign_state(campaign_id, PipelineState::Dispatched, PipelineState::Completed)
            .await?
        {
            return Ok(PipelineState::Completed);
        }
        let current = self
            .db
            .get_campaign(campaign_id)
            .await?
            .map(|c| c.pipeline_state)
            .ok_or(DispatchError::NotFound(campaign_id))?;
        Ok(current)
    }

    async fn attempt(
        &self,
        campaign: &Campaign,
        email: &str,
        contact: Option<&Contact>,
        channel: Channel,
        template: &ChannelTemplate,
    ) -> Attempt {
        let rendered = self.render(campaign, email, contact, channel, template);
        let payload = rendered.to_value();

        match channel {
            Channel::Email => self.send_email(campaign, email, &rendered, payload).await,
            Channel::Call => self.place_call(campaign, email, contact, &rendered, payload).await,
            Channel::ProfessionalNetwork => {
                match self.providers.network.send_message(email, &payload).await {
                    Ok(id) => Attempt::sent(payload, id),
                    Err(e) => {
                        error!(contact = %email, error = %e, "Professional-network send failed");
                        Attempt::failed(payload, e)
                    }
                }
            }
        }
    }

    /// Substitute one contact's values, then apply channel limits.
    fn render(
        &self,
        campaign: &Campaign,
        email: &str,
        contact: Option<&Contact>,
        channel: Channel,
        template: &ChannelTemplate,
    ) -> ChannelTemplate {
        let mut rendered = Substitution::new(email, contact, campaign, &self.settings.sender_name)
            .apply_template(template);
        if channel == Channel::ProfessionalNetwork {
            cap_network_message(&mut rendered);
        }
        rendered
    }

    fn email_message(&self, campaign: &Campaign, email: &str, rendered: &ChannelTemplate) -> OutboundEmail {
        let subject = rendered
            .get_str("subject")
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Message from {}", campaign.name));
        let body = rendered.get_str("body").unwrap_or_default();
        let cta = rendered
            .get_str("cta_link")
            .filter(|l| !l.trim().is_empty())
            .or(campaign.product_link.as_deref());

        OutboundEmail {
            to: email.to_string(),
            subject,
            html_body: render_html(body, cta),
            text_body: render_text(body, cta),
            campaign_id: campaign.id,
        }
    }

    /// `None` when the contact has no usable phone number.
    fn call_request(
        &self,
        campaign: &Campaign,
        email: &str,
        contact: Option<&Contact>,
        rendered: &ChannelTemplate,
    ) -> Option<CallRequest> {
        let raw_phone = contact.and_then(|c| c.phone.as_deref())?;
        let to_number = normalize_phone(raw_phone, &self.settings.default_country_code)?;
        Some(CallRequest {
            to_number,
            script: call_script(rendered),
            contact_email: email.to_string(),
            campaign_id: campaign.id,
        })
    }

    async fn send_email(
        &self,
        campaign: &Campaign,
        email: &str,
        rendered: &ChannelTemplate,
        payload: Value,
    ) -> Attempt {
        let Some(mailer) = &self.providers.mail else {
            return Attempt::failed(payload, ProviderError::NotConfigured { channel: "email".into() });
        };

        let outbound = self.email_message(campaign, email, rendered);
        info!(contact = %email, subject = %outbound.subject, provider = mailer.name(), "Sending email");
        match mailer.send(&outbound).await {
            Ok(id) => Attempt::sent(payload, id),
            Err(e) => {
                error!(contact = %email, error = %e, "Email send failed");
                Attempt::failed(payload, e)
            }
        }
    }

    async fn place_call(
        &self,
        campaign: &Campaign,
        email: &str,
        contact: Option<&Contact>,
        rendered: &ChannelTemplate,
        payload: Value,
    ) -> Attempt {
        let Some(request) = self.call_request(campaign, email, contact, rendered) else {
            warn!(contact = %email, "No phone number, skipping call");
            return Attempt::skipped(payload, "no phone number");
        };
        let Some(voice) = &self.providers.voice else {
            return Attempt::failed(payload, ProviderError::NotConfigured { channel: "call".into() });
        };

        info!(contact = %email, to = %request.to_number, provider = voice.name(), "Placing call");
        match voice.place_call(&request).await {
            Ok(sid) => Attempt::sent(json_with(payload, "to_number", &request.to_number), sid),
            Err(e) => {
                error!(contact = %email, error = %e, "Call failed");
                Attempt::failed(payload, e)
            }
        }
    }
}

fn json_with(mut payload: Value, key: &str, value: &str) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    payload
}

/// Strip spaces and dashes, prefix the country code when `+` is missing.
pub fn normalize_phone(raw: &str, country_code: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| !c.is_whitespace() && *c != '-').collect();
    if digits.is_empty() {
        return None;
    }
    if digits.starts_with('+') {
        Some(digits)
    } else {
        Some(format!("{country_code}{digits}"))
    }
}

/// `key: value | key: value` over the text fields, without the link.
pub fn call_script(template: &ChannelTemplate) -> String {
    template
        .fields()
        .iter()
        .filter(|(k, _)| k.as_str() != "cta_link")
        .filter_map(|(k, v)| v.as_str().map(|v| format!("{k}: {v}")))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One `<p>` per non-empty line, then the link if any.
pub fn render_html(body: &str, cta: Option<&str>) -> String {
    let mut html: String = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| format!("<p>{}</p>", escape_html(l)))
        .collect();
    if let Some(link) = cta {
        let link = escape_html(link);
        html.push_str(&format!("<br><p><a href=\"{link}\">{link}</a></p>"));
    }
    html
}

fn render_text(body: &str, cta: Option<&str>) -> String {
    match cta {
        Some(link) => format!("{}\n\n{link}", body.trim_end()),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::campaign::ContentBundle;
    use crate::providers::testing::{RecordingMail, RecordingVoice};
    use crate::store::LibSqlBackend;
    use std::collections::BTreeMap;

    fn template(value: Value) -> ChannelTemplate {
        ChannelTemplate::from_value(value).unwrap()
    }

    fn bundle(contacts: &[(&str, Channel)]) -> ContentBundle {
        ContentBundle {
            templates: BTreeMap::from([
                (
                    Channel::Email,
                    template(json!({"subject": "Hi [CONTACT_NAME]", "body": "Hello [CONTACT_NAME]\n\nSee [PRODUCT_LINK]", "cta_link": "[PRODUCT_LINK]"})),
                ),
                (
                    Channel::ProfessionalNetwork,
                    template(json!({"message": "Hey [CONTACT_NAME]"})),
                ),
                (
                    Channel::Call,
                    template(json!({"greeting": "Hi [CONTACT_NAME]", "closing": "Bye", "cta_link": "[PRODUCT_LINK]"})),
                ),
            ]),
            contacts: contacts.iter().map(|(e, c)| (e.to_string(), *c)).collect(),
        }
    }

    struct Harness {
        db: Arc<LibSqlBackend>,
        mail: Arc<RecordingMail>,
        voice: Arc<RecordingVoice>,
        dispatcher: Dispatcher,
    }

    async fn harness(mail: RecordingMail) -> Harness {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let mail = Arc::new(mail);
        let voice = Arc::new(RecordingVoice::default());
        let providers = Providers::log_only()
            .with_mail(mail.clone())
            .with_voice(voice.clone());
        let dispatcher = Dispatcher::new(db.clone(), providers, DispatchSettings::default());
        Harness {
            db,
            mail,
            voice,
            dispatcher,
        }
    }

    /// Insert a campaign and walk it to `approved` with the given bundle.
    async fn approved_campaign(db: &LibSqlBackend, bundle: ContentBundle) -> Campaign {
        let mut campaign = Campaign::new("Launch", Some("https://x.io".into()), false);
        campaign.pipeline_state = PipelineState::Approved;
        campaign.content = Some(bundle);
        db.insert_campaign(&campaign).await.unwrap();
        campaign
    }

    #[test]
    fn phone_normalization() {
        assert_eq!(normalize_phone("555 123-4567", "+1").as_deref(), Some("+15551234567"));
        assert_eq!(normalize_phone("+44 20 7946 0000", "+1").as_deref(), Some("+442079460000"));
        assert_eq!(normalize_phone("  - ", "+1"), None);
    }

    #[test]
    fn script_excludes_link() {
        let t = template(json!({"greeting": "Hi", "closing": "Bye", "cta_link": "https://x.io", "n": 3}));
        assert_eq!(call_script(&t), "closing: Bye | greeting: Hi");
    }

    #[test]
    fn html_wraps_lines_and_appends_link() {
        assert_eq!(
            render_html("Hello Ann\n\nBuy <now>", Some("https://x.io")),
            "<p>Hello Ann</p><p>Buy &lt;now&gt;</p><br><p><a href=\"https://x.io\">https://x.io</a></p>"
        );
        assert_eq!(render_html("", None), "");
    }

    #[tokio::test]
    async fn dispatches_each_channel_and_completes() {
        let h = harness(RecordingMail::default()).await;
        h.db
            .upsert_contact(&Contact::new("ann@y.io").with_name("Ann"))
            .await
            .unwrap();
        h.db
            .upsert_contact(&Contact::new("bo@y.io").with_name("Bo").with_phone("555 000-1111"))
            .await
            .unwrap();
        let campaign = approved_campaign(
            &h.db,
            bundle(&[
                ("ann@y.io", Channel::Email),
                ("bo@y.io", Channel::Call),
                ("cy@y.io", Channel::ProfessionalNetwork),
                ("not-an-address", Channel::Email),
            ]),
        )
        .await;

        let report = h.dispatcher.dispatch(campaign.id).await.unwrap();
        assert!(report.performed);
        assert_eq!(report.sent, 3);
        assert_eq!(report.final_state, Some(PipelineState::Completed));

        let mails = h.mail.sent();
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0].subject, "Hi Ann");
        assert!(mails[0].html_body.contains("<p>See https://x.io</p>"));

        let calls = h.voice.calls();
        assert_eq!(calls[0].to_number, "+15550001111");
        assert!(calls[0].script.contains("greeting: Hi Bo"));
        assert!(!calls[0].script.contains("cta_link"));

        let rows = h.db.list_outbound(campaign.id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.send_status == SendStatus::Sent));
        let network = rows.iter().find(|r| r.channel == Channel::ProfessionalNetwork).unwrap();
        assert!(network.provider_message_id.as_deref().unwrap().starts_with("log-"));
        assert_eq!(network.payload["message"], "Hey [CONTACT_NAME]");

        let events = h.db.list_engagement_events(campaign.id).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.event_type == "SENT"));
    }

    #[tokio::test]
    async fn second_dispatch_sends_nothing_new() {
        let h = harness(RecordingMail::default()).await;
        let campaign = approved_campaign(&h.db, bundle(&[("ann@y.io", Channel::Email)])).await;

        h.dispatcher.dispatch(campaign.id).await.unwrap();
        // Force the campaign back to approved to exercise the ledger check.
        h.db
            .advance_campaign_state(campaign.id, PipelineState::Completed, PipelineState::Approved)
            .await
            .unwrap();
        let second = h.dispatcher.dispatch(campaign.id).await.unwrap();

        assert_eq!(second.sent, 0);
        assert_eq!(second.already_handled, 1);
        assert_eq!(h.mail.sent().len(), 1);
        assert_eq!(h.db.list_outbound(campaign.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn not_approved_is_a_noop() {
        let h = harness(RecordingMail::default()).await;
        let mut campaign = Campaign::new("p", None, true);
        campaign.pipeline_state = PipelineState::AwaitingApproval;
        campaign.content = Some(bundle(&[("ann@y.io", Channel::Email)]));
        h.db.insert_campaign(&campaign).await.unwrap();

        let report = h.dispatcher.dispatch(campaign.id).await.unwrap();
        assert!(!report.performed);
        assert!(h.mail.sent().is_empty());
        let stored = h.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::AwaitingApproval);
    }

    #[tokio::test]
    async fn unknown_campaign_is_not_found() {
        let h = harness(RecordingMail::default()).await;
        let err = h.dispatcher.dispatch(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn failures_are_recorded_and_do_not_abort() {
        let h = harness(RecordingMail::rejecting("bad@y.io")).await;
        let campaign = approved_campaign(
            &h.db,
            bundle(&[
                ("bad@y.io", Channel::Email),
                ("good@y.io", Channel::Email),
                ("nophone@y.io", Channel::Call),
            ]),
        )
        .await;

        let report = h.dispatcher.dispatch(campaign.id).await.unwrap();
        assert_eq!((report.sent, report.failed, report.skipped), (1, 1, 1));
        assert_eq!(report.final_state, Some(PipelineState::Completed));

        let rows = h.db.list_outbound(campaign.id).await.unwrap();
        let status = |email: &str| rows.iter().find(|r| r.contact_email == email).unwrap().send_status;
        assert_eq!(status("bad@y.io"), SendStatus::Failed);
        assert_eq!(status("good@y.io"), SendStatus::Sent);
        assert_eq!(status("nophone@y.io"), SendStatus::Skipped);

        let events = h.db.list_engagement_events(campaign.id).await.unwrap();
        let mut types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        types.sort();
        assert_eq!(types, vec!["FAILED", "SENT", "SKIPPED"]);
    }

    #[tokio::test]
    async fn network_message_is_capped_after_substitution() {
        let h = harness(RecordingMail::default()).await;
        h.db
            .upsert_contact(&Contact::new("cy@y.io").with_name("Bartholomew Fitzgerald"))
            .await
            .unwrap();
        let mut content = bundle(&[("cy@y.io", Channel::ProfessionalNetwork)]);
        let long = format!("{}[CONTACT_NAME]", "x".repeat(280));
        content
            .templates
            .insert(Channel::ProfessionalNetwork, template(json!({"message": long})));
        let campaign = approved_campaign(&h.db, content).await;

        h.dispatcher.dispatch(campaign.id).await.unwrap();

        let rows = h.db.list_outbound(campaign.id).await.unwrap();
        let message = rows[0].payload["message"].as_str().unwrap();
        assert_eq!(message.chars().count(), 299);
        assert!(message.ends_with("Bartholomew Fitzger"));
    }

    #[tokio::test]
    async fn preview_renders_without_sending() {
        let h = harness(RecordingMail::default()).await;
        h.db
            .upsert_contact(&Contact::new("ann@y.io").with_name("Ann"))
            .await
            .unwrap();
        let campaign = approved_campaign(
            &h.db,
            bundle(&[("ann@y.io", Channel::Email), ("cy@y.io", Channel::ProfessionalNetwork)]),
        )
        .await;

        let preview = h.dispatcher.preview(campaign.id, "ann@y.io").await.unwrap();
        assert_eq!(preview.channel, Channel::Email);
        let email = preview.email.unwrap();
        assert_eq!(email.subject, "Hi Ann");
        assert!(email.text_body.ends_with("https://x.io"));
        assert!(preview.call.is_none());

        let network = h.dispatcher.preview(campaign.id, "cy@y.io").await.unwrap();
        assert_eq!(network.content.get_str("message"), Some("Hey [CONTACT_NAME]"));
        assert!(network.email.is_none());

        let unknown = h.dispatcher.preview(campaign.id, "zed@y.io").await;
        assert!(matches!(unknown, Err(DispatchError::UnknownContact { .. })));
        let missing = h.dispatcher.preview(Uuid::new_v4(), "ann@y.io").await;
        assert!(matches!(missing, Err(DispatchError::NotFound(_))));

        assert!(h.mail.sent().is_empty());
        assert!(h.db.list_outbound(campaign.id).await.unwrap().is_empty());
        let stored = h.db.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.pipeline_state, PipelineState::Approved);
    }
}
