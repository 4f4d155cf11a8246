//! SMTP mail provider via lettre. Used when SendGrid is not configured.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use super::{MailProvider, OutboundEmail};
use crate::error::ProviderError;

const PROVIDER: &str = "smtp";

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from: String,
}

impl SmtpConfig {
    /// Returns `None` if `SMTP_HOST` is not set.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok().filter(|h| !h.is_empty())?;

        let port: u16 = std::env::var("SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("SMTP_USERNAME").ok().filter(|u| !u.is_empty());
        let password = std::env::var("SMTP_PASSWORD")
            .ok()
            .filter(|p| !p.is_empty())
            .map(SecretString::from);
        let from = std::env::var("SMTP_FROM")
            .ok()
            .or_else(|| username.clone())
            .unwrap_or_else(|| format!("campaigns@{host}"));

        Some(Self {
            host,
            port,
            username,
            password,
            from,
        })
    }

    /// Domain used for generated Message-ID headers.
    fn message_domain(&self) -> &str {
        self.from
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim_end_matches('>'))
            .unwrap_or(&self.host)
    }
}

pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn send_failed(reason: String) -> ProviderError {
        ProviderError::SendFailed {
            provider: PROVIDER.into(),
            reason,
        }
    }

    /// Build the MIME message. Returns it with its Message-ID.
    fn build_message(&self, email: &OutboundEmail) -> Result<(Message, String), ProviderError> {
        let from: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| Self::send_failed(format!("Invalid from address: {e}")))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| Self::send_failed(format!("Invalid to address: {e}")))?;

        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.config.message_domain());
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()))
            .multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                email.html_body.clone(),
            ))
            .map_err(|e| Self::send_failed(format!("Failed to build email: {e}")))?;

        Ok((message, message_id))
    }

    fn transport(&self) -> Result<SmtpTransport, ProviderError> {
        let builder = if self.config.port == 465 {
            SmtpTransport::relay(&self.config.host)
        } else {
            SmtpTransport::starttls_relay(&self.config.host)
        }
        .map_err(|e| Self::send_failed(format!("SMTP relay error: {e}")))?
        .port(self.config.port);

        let builder = match (&self.config.username, &self.config.password) {
            (Some(user), Some(password)) => builder.credentials(Credentials::new(
                user.clone(),
                password.expose_secret().to_string(),
            )),
            _ => builder,
        };
        Ok(builder.build())
    }
}

#[async_trait]
impl MailProvider for SmtpMailer {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn send(&self, email: &OutboundEmail) -> Result<String, ProviderError> {
        let (message, message_id) = self.build_message(email)?;
        let transport = self.transport()?;
        let to = email.to.clone();

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| Self::send_failed(format!("SMTP task failed: {e}")))?
            .map_err(|e| Self::send_failed(format!("SMTP send failed: {e}")))?;

        tracing::info!(to = %to, message_id = %message_id, "Email sent via SMTP");
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(from: &str) -> SmtpConfig {
        SmtpConfig {
            host: "smtp.x.io".into(),
            port: 587,
            username: None,
            password: None,
            from: from.into(),
        }
    }

    #[test]
    fn message_id_uses_sender_domain() {
        assert_eq!(config("Team <team@acme.io>").message_domain(), "acme.io");
        assert_eq!(config("team@acme.io").message_domain(), "acme.io");
        assert_eq!(config("nobody").message_domain(), "smtp.x.io");
    }

    #[test]
    fn builds_alternative_message() {
        let mailer = SmtpMailer::new(config("Team <team@acme.io>"));
        let email = OutboundEmail {
            to: "a@y.io".into(),
            subject: "Hello".into(),
            html_body: "<p>Hi</p>".into(),
            text_body: "Hi".into(),
            campaign_id: Uuid::new_v4(),
        };
        let (message, id) = mailer.build_message(&email).unwrap();
        assert!(id.ends_with("@acme.io>"));
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("Subject: Hello"));
    }

    #[test]
    fn rejects_bad_recipient() {
        let mailer = SmtpMailer::new(config("team@acme.io"));
        let email = OutboundEmail {
            to: "not an address".into(),
            subject: "s".into(),
            html_body: String::new(),
            text_body: String::new(),
            campaign_id: Uuid::new_v4(),
        };
        assert!(matches!(
            mailer.build_message(&email),
            Err(ProviderError::SendFailed { .. })
        ));
    }
}
