//! SendGrid v3 mail provider.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{info, warn};

use super::{MailProvider, OutboundEmail};
use crate::error::ProviderError;

const PROVIDER: &str = "sendgrid";
const DEFAULT_API_BASE: &str = "https://api.sendgrid.com/v3";

#[derive(Debug, Clone)]
pub struct SendGridConfig {
    pub api_key: SecretString,
    pub from_email: String,
    pub from_name: String,
    pub api_base: String,
}

impl SendGridConfig {
    /// Returns `None` unless both `SENDGRID_API_KEY` and
    /// `SENDGRID_FROM_EMAIL` are set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("SENDGRID_API_KEY").ok().filter(|k| !k.is_empty())?;
        let from_email = std::env::var("SENDGRID_FROM_EMAIL").ok().filter(|e| !e.is_empty())?;
        let from_name = std::env::var("SENDGRID_FROM_NAME").unwrap_or_else(|_| "Campaign Team".to_string());

        Some(Self {
            api_key: SecretString::from(api_key),
            from_email,
            from_name,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }
}

pub struct SendGridMailer {
    client: reqwest::Client,
    config: SendGridConfig,
}

impl SendGridMailer {
    pub fn new(config: SendGridConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::SendFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    fn request_body(&self, email: &OutboundEmail) -> serde_json::Value {
        let campaign_id = email.campaign_id.to_string();
        let mut content = Vec::new();
        if !email.text_body.is_empty() {
            content.push(json!({"type": "text/plain", "value": email.text_body}));
        }
        content.push(json!({"type": "text/html", "value": email.html_body}));

        json!({
            "personalizations": [{
                "to": [{"email": email.to}],
                "custom_args": {"campaign_id": campaign_id},
            }],
            "from": {"email": self.config.from_email, "name": self.config.from_name},
            "reply_to": {"email": self.config.from_email, "name": self.config.from_name},
            "subject": email.subject,
            "content": content,
            "headers": {
                "List-Unsubscribe": format!("<mailto:{}?subject=Unsubscribe>", self.config.from_email),
                "X-Entity-Ref-ID": campaign_id,
            },
            "tracking_settings": {
                "click_tracking": {"enable": true},
                "open_tracking": {"enable": true},
            },
            "categories": [campaign_id],
        })
    }
}

#[async_trait]
impl MailProvider for SendGridMailer {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn send(&self, email: &OutboundEmail) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/mail/send", self.config.api_base.trim_end_matches('/')))
            .bearer_auth(self.config.api_key.expose_secret())
            .json(&self.request_body(email))
            .send()
            .await
            .map_err(|e| ProviderError::SendFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(to = %email.to, status = status.as_u16(), "SendGrid rejected message");
            return Err(ProviderError::Rejected {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body,
            });
        }

        let message_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::SendFailed {
                provider: PROVIDER.into(),
                reason: "response carried no X-Message-Id".into(),
            })?;

        info!(to = %email.to, message_id = %message_id, "Email sent via SendGrid");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn mailer() -> SendGridMailer {
        SendGridMailer::new(SendGridConfig {
            api_key: SecretString::from("SG.test".to_string()),
            from_email: "team@x.io".into(),
            from_name: "Team".into(),
            api_base: DEFAULT_API_BASE.into(),
        })
        .unwrap()
    }

    #[test]
    fn body_carries_campaign_correlation() {
        let campaign_id = Uuid::new_v4();
        let email = OutboundEmail {
            to: "a@y.io".into(),
            subject: "Hello".into(),
            html_body: "<p>Hi</p>".into(),
            text_body: "Hi".into(),
            campaign_id,
        };
        let body = mailer().request_body(&email);
        assert_eq!(body["personalizations"][0]["to"][0]["email"], "a@y.io");
        assert_eq!(body["personalizations"][0]["custom_args"]["campaign_id"], campaign_id.to_string());
        assert_eq!(body["content"][0]["type"], "text/plain");
        assert_eq!(body["content"][1]["type"], "text/html");
        assert_eq!(body["from"]["email"], "team@x.io");
    }

    #[test]
    fn html_only_when_no_plain_text() {
        let email = OutboundEmail {
            to: "a@y.io".into(),
            subject: "Hello".into(),
            html_body: "<p>Hi</p>".into(),
            text_body: String::new(),
            campaign_id: Uuid::new_v4(),
        };
        let body = mailer().request_body(&email);
        assert_eq!(body["content"].as_array().unwrap().len(), 1);
    }
}
