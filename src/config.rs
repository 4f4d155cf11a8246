//! Environment-driven configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::DispatchSettings;
use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::pipeline::orchestrator::PipelineSettings;
use crate::providers::{SendGridConfig, SmtpConfig, TwilioConfig};

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    /// Rolling daily log files are written here when set.
    pub log_dir: Option<PathBuf>,
    pub llm: LlmConfig,
    pub pipeline: PipelineSettings,
    pub dispatch: DispatchSettings,
    pub sendgrid: Option<SendGridConfig>,
    pub smtp: Option<SmtpConfig>,
    pub twilio: Option<TwilioConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm_defaults = LlmConfig::default();
        let pipeline_defaults = PipelineSettings::default();
        let dispatch_defaults = DispatchSettings::default();

        Ok(Self {
            bind: parse_var("CAMPAIGN_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            db_path: std::env::var("CAMPAIGN_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/campaign-engine.db")),
            log_dir: non_empty_var("CAMPAIGN_LOG_DIR").map(PathBuf::from),
            llm: LlmConfig {
                base_url: non_empty_var("OLLAMA_HOST").unwrap_or(llm_defaults.base_url),
                model: non_empty_var("OLLAMA_MODEL").unwrap_or(llm_defaults.model),
                timeout: Duration::from_secs(parse_var(
                    "OLLAMA_TIMEOUT_SECS",
                    llm_defaults.timeout.as_secs(),
                )?),
            },
            pipeline: PipelineSettings {
                grounding_ttl: Duration::from_secs(parse_var(
                    "CAMPAIGN_GROUNDING_TTL_SECS",
                    pipeline_defaults.grounding_ttl.as_secs(),
                )?),
                grounding_sample_limit: parse_var(
                    "CAMPAIGN_GROUNDING_SAMPLE_LIMIT",
                    pipeline_defaults.grounding_sample_limit,
                )?,
                fallback_limit: parse_var("CAMPAIGN_FALLBACK_LIMIT", pipeline_defaults.fallback_limit)?,
            },
            dispatch: DispatchSettings {
                sender_name: non_empty_var("CAMPAIGN_SENDER_NAME").unwrap_or(dispatch_defaults.sender_name),
                default_country_code: non_empty_var("CAMPAIGN_DEFAULT_COUNTRY_CODE")
                    .unwrap_or(dispatch_defaults.default_country_code),
            },
            sendgrid: SendGridConfig::from_env(),
            smtp: SmtpConfig::from_env(),
            twilio: TwilioConfig::from_env(),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a variable, falling back to `default` when unset. A set but
/// malformed value is an error rather than a silent default.
fn parse_var<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match non_empty_var(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
