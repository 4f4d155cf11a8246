//! Error types for the campaign engine.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Generator (LLM) errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Delivery provider errors (mail, voice, professional network).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("No {channel} provider configured")]
    NotConfigured { channel: String },

    #[error("Provider {provider} send failed: {reason}")]
    SendFailed { provider: String, reason: String },

    #[error("Provider {provider} rejected request with status {status}: {body}")]
    Rejected {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Missing recipient for {channel}")]
    MissingRecipient { channel: String },
}

/// Classification failures. Always recovered at the stage boundary.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("Generator failed: {0}")]
    Generator(#[from] LlmError),

    #[error("Malformed classification output: {0}")]
    MalformedOutput(String),

    #[error("Grounding sample failed: {0}")]
    Grounding(#[from] DatabaseError),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Campaign {0} not found")]
    NotFound(Uuid),

    #[error("Campaign {id} is in state {state}, expected {expected}")]
    InvalidState {
        id: Uuid,
        state: String,
        expected: String,
    },

    #[error("Campaign {id} cannot transition from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error("Stage {stage} failed: {reason}")]
    Stage { stage: String, reason: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Approval protocol errors. Each maps to a stable wire code.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Campaign {0} not found")]
    NotFound(Uuid),

    #[error("Campaign {id} is in state {state}, not awaiting approval")]
    InvalidState { id: Uuid, state: String },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}

impl ApprovalError {
    /// Machine-readable code sent to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Database(_) | Self::Llm(_) => "INTERNAL",
        }
    }
}

/// Dispatch errors. Wrong-state invocations are not errors; see `Dispatcher::dispatch`.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Campaign {0} not found")]
    NotFound(Uuid),

    #[error("Contact {contact} is not part of campaign {campaign_id}")]
    UnknownContact { campaign_id: Uuid, contact: String },

    #[error("Campaign {campaign_id} has no {channel} template")]
    MissingTemplate { campaign_id: Uuid, channel: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
