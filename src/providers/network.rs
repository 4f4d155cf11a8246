//! Professional-network delivery. There is no vendor integration yet, so
//! messages are logged and acknowledged with a synthetic id.

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::NetworkProvider;
use crate::error::ProviderError;

#[derive(Debug, Default, Clone, Copy)]
pub struct LogOnlyNetwork;

#[async_trait]
impl NetworkProvider for LogOnlyNetwork {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_message(
        &self,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> Result<String, ProviderError> {
        let message = payload.get("message").and_then(|m| m.as_str()).unwrap_or_default();
        info!(recipient, chars = message.chars().count(), "Professional-network message logged");
        Ok(format!("log-{}", Uuid::new_v4()))
    }
}
