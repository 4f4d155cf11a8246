//! Delivery collaborators.
//!
//! Each channel talks to its provider through a narrow trait so the
//! dispatcher never depends on a concrete vendor. Optional providers are
//! built from the environment and absent when unconfigured.

pub mod network;
pub mod sendgrid;
pub mod smtp;
pub mod twilio;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ProviderError;

pub use network::LogOnlyNetwork;
pub use sendgrid::{SendGridConfig, SendGridMailer};
pub use smtp::{SmtpConfig, SmtpMailer};
pub use twilio::{TwilioConfig, TwilioVoice};

/// A rendered email ready for a mail provider.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub campaign_id: Uuid,
}

/// An outbound call request.
#[derive(Debug, Clone, Serialize)]
pub struct CallRequest {
    /// E.164 number.
    pub to_number: String,
    /// Flattened call script spoken to the callee.
    pub script: String,
    pub contact_email: String,
    pub campaign_id: Uuid,
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Send one email. Returns the provider message id.
    async fn send(&self, email: &OutboundEmail) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait VoiceProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Start a call. Returns the provider call id.
    async fn place_call(&self, request: &CallRequest) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait NetworkProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver a professional-network message. Returns a message id.
    async fn send_message(
        &self,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> Result<String, ProviderError>;
}

/// The set of delivery collaborators available to the dispatcher.
#[derive(Clone)]
pub struct Providers {
    pub mail: Option<Arc<dyn MailProvider>>,
    pub voice: Option<Arc<dyn VoiceProvider>>,
    pub network: Arc<dyn NetworkProvider>,
}

impl Providers {
    /// Only the log-only network stub. Email and calls fail as unconfigured.
    pub fn log_only() -> Self {
        Self {
            mail: None,
            voice: None,
            network: Arc::new(LogOnlyNetwork),
        }
    }

    pub fn with_mail(mut self, mail: Arc<dyn MailProvider>) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn with_voice(mut self, voice: Arc<dyn VoiceProvider>) -> Self {
        self.voice = Some(voice);
        self
    }

    /// Build providers from configuration. SendGrid wins over SMTP.
    pub fn from_config(
        sendgrid: Option<SendGridConfig>,
        smtp: Option<SmtpConfig>,
        twilio: Option<TwilioConfig>,
    ) -> Result<Self, ProviderError> {
        let mut providers = Self::log_only();

        if let Some(config) = sendgrid {
            tracing::info!(from = %config.from_email, "Mail provider: SendGrid");
            providers.mail = Some(Arc::new(SendGridMailer::new(config)?));
        } else if let Some(config) = smtp {
            tracing::info!(host = %config.host, port = config.port, "Mail provider: SMTP");
            providers.mail = Some(Arc::new(SmtpMailer::new(config)));
        } else {
            tracing::warn!("No mail provider configured; email sends will be recorded as failed");
        }

        if let Some(config) = twilio {
            tracing::info!(from = %config.from_number, "Voice provider: Twilio");
            providers.voice = Some(Arc::new(TwilioVoice::new(config)?));
        } else {
            tracing::warn!("No voice provider configured; calls will be recorded as failed");
        }

        Ok(providers)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Mail double that records every send; rejects one address on request.
    #[derive(Default)]
    pub(crate) struct RecordingMail {
        pub(crate) sent: Mutex<Vec<OutboundEmail>>,
        pub(crate) fail_for: Option<String>,
    }

    impl RecordingMail {
        pub(crate) fn rejecting(address: &str) -> Self {
            Self {
                fail_for: Some(address.to_string()),
                ..Default::default()
            }
        }

        pub(crate) fn sent(&self) -> Vec<OutboundEmail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailProvider for RecordingMail {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, email: &OutboundEmail) -> Result<String, ProviderError> {
            if self.fail_for.as_deref() == Some(email.to.as_str()) {
                return Err(ProviderError::Rejected {
                    provider: "recording".into(),
                    status: 400,
                    body: "bad address".into(),
                });
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(email.clone());
            Ok(format!("msg-{}", sent.len()))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingVoice {
        pub(crate) calls: Mutex<Vec<CallRequest>>,
    }

    impl RecordingVoice {
        pub(crate) fn calls(&self) -> Vec<CallRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VoiceProvider for RecordingVoice {
        fn name(&self) -> &str {
            "recording"
        }

        async fn place_call(&self, request: &CallRequest) -> Result<String, ProviderError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            Ok(format!("CA-{}", calls.len()))
        }
    }
}
