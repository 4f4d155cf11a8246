//! Twilio voice provider over the REST API.
//!
//! Calls speak the rendered script through inline TwiML. When a public base
//! URL is configured, Twilio posts the terminal call status back to
//! `/api/voice/status`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use super::{CallRequest, VoiceProvider};
use crate::error::ProviderError;

const PROVIDER: &str = "twilio";
const DEFAULT_API_BASE: &str = "https://api.twilio.com/2010-04-01";

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    pub from_number: String,
    /// Public URL of this service, for status callbacks.
    pub public_base_url: Option<String>,
    pub api_base: String,
}

impl TwilioConfig {
    /// Returns `None` unless the account SID, auth token and from-number
    /// are all set.
    pub fn from_env() -> Option<Self> {
        let account_sid = std::env::var("TWILIO_ACCOUNT_SID").ok().filter(|s| !s.is_empty())?;
        let auth_token = std::env::var("TWILIO_AUTH_TOKEN").ok().filter(|s| !s.is_empty())?;
        let from_number = std::env::var("TWILIO_FROM_NUMBER").ok().filter(|s| !s.is_empty())?;
        let public_base_url = std::env::var("CAMPAIGN_PUBLIC_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty());

        Some(Self {
            account_sid,
            auth_token: SecretString::from(auth_token),
            from_number,
            public_base_url,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct CallResource {
    sid: String,
}

pub struct TwilioVoice {
    client: reqwest::Client,
    config: TwilioConfig,
}

impl TwilioVoice {
    pub fn new(config: TwilioConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::SendFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    fn form(&self, request: &CallRequest) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("To", request.to_number.clone()),
            ("From", self.config.from_number.clone()),
            ("Twiml", twiml_say(&request.script)),
        ];
        if let Some(base) = &self.config.public_base_url {
            form.push(("StatusCallback", format!("{}/api/voice/status", base.trim_end_matches('/'))));
            form.push(("StatusCallbackMethod", "POST".to_string()));
            for event in ["initiated", "answered", "completed"] {
                form.push(("StatusCallbackEvent", event.to_string()));
            }
        }
        form
    }
}

/// `<Response><Say>…</Say></Response>` with the script XML-escaped.
fn twiml_say(script: &str) -> String {
    let escaped = script
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;");
    format!("<Response><Say>{escaped}</Say></Response>")
}

#[async_trait]
impl VoiceProvider for TwilioVoice {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn place_call(&self, request: &CallRequest) -> Result<String, ProviderError> {
        let url = format!(
            "{}/Accounts/{}/Calls.json",
            self.config.api_base.trim_end_matches('/'),
            self.config.account_sid
        );

        let response = self
            .client
            .post(url)
            .basic_auth(&self.config.account_sid, Some(self.config.auth_token.expose_secret()))
            .form(&self.form(request))
            .send()
            .await
            .map_err(|e| ProviderError::SendFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                provider: PROVIDER.into(),
                status: status.as_u16(),
                body,
            });
        }

        let call: CallResource = response.json().await.map_err(|e| ProviderError::SendFailed {
            provider: PROVIDER.into(),
            reason: format!("Unreadable call resource: {e}"),
        })?;

        info!(to = %request.to_number, call_sid = %call.sid, "Call placed via Twilio");
        Ok(call.sid)
    }
}
