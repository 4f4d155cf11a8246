//! Generator integration.
//!
//! The pipeline talks to inference through the `LlmProvider` trait; the
//! bundled implementation speaks the Ollama chat API. Every call site parses
//! a single JSON object out of the raw completion text.

pub mod ollama;
pub mod provider;

pub use ollama::OllamaProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

/// Configuration for creating the generator.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5:7b-instruct".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OllamaProvider::new(&config.base_url, &config.model, config.timeout)?;
    tracing::info!(model = %config.model, url = %config.base_url, "Using Ollama generator");
    Ok(Arc::new(provider))
}

/// Ask the generator for a JSON object and parse it.
pub async fn complete_json(
    llm: &dyn LlmProvider,
    system: impl Into<String>,
    user: impl Into<String>,
    temperature: f32,
) -> Result<serde_json::Map<String, serde_json::Value>, LlmError> {
    let request = CompletionRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
        .with_temperature(temperature)
        .with_json_output();

    let response = llm.complete(request).await?;
    parse_json_object(llm.model_name(), &response.content)
}

/// Parse the first JSON object embedded in a completion.
pub fn parse_json_object(
    provider: &str,
    text: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, LlmError> {
    let candidate = extract_json_object(text).ok_or_else(|| LlmError::InvalidResponse {
        provider: provider.to_string(),
        reason: "no JSON object in response".to_string(),
    })?;

    match serde_json::from_str::<serde_json::Value>(&candidate)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: format!("expected JSON object, got {other}"),
        }),
    }
}

/// Extract a JSON object from LLM output that may be wrapped in prose or
/// markdown fences.
pub fn extract_json_object(text: &str) -> Option<String> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return Some(inner.to_string());
            }
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return Some(inner.to_string());
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return Some(trimmed[start..=end].to_string());
    }

    None
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    type Responder = Box<dyn Fn(&str) -> Result<String, String> + Send + Sync>;

    /// Generator double: pops scripted replies, then defers to a responder.
    pub(crate) struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, String>>>,
        responder: Option<Responder>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub(crate) fn new(replies: Vec<Result<String, String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                responder: None,
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn responding(f: impl Fn(&str) -> Result<String, String> + Send + Sync + 'static) -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                responder: Some(Box::new(f)),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub(crate) fn last_user_prompt(&self) -> Option<String> {
            self.prompts.lock().unwrap().last().cloned()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let prompt = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            self.prompts.lock().unwrap().push(prompt.clone());

            let scripted = self.replies.lock().unwrap().pop_front();
            let reply = match (scripted, &self.responder) {
                (Some(reply), _) => reply,
                (None, Some(responder)) => responder(&prompt),
                (None, None) => Err("no scripted reply left".to_string()),
            };

            reply
                .map(|content| CompletionResponse {
                    content,
                    input_tokens: 0,
                    output_tokens: 0,
                    finish_reason: FinishReason::Stop,
                    response_id: None,
                })
                .map_err(|reason| LlmError::RequestFailed {
                    provider: "scripted".to_string(),
                    reason,
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_object() {
        assert_eq!(extract_json_object(r#" {"a":1} "#).as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn extracts_fenced_object() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nanything else?";
        assert_eq!(extract_json_object(text).as_deref(), Some("{\"a\": 1}"));

        let text = "```\n{\"b\": 2}\n```";
        assert_eq!(extract_json_object(text).as_deref(), Some("{\"b\": 2}"));
    }

    #[test]
    fn extracts_object_inside_prose() {
        let text = "Sure! {\"filters\": {\"role\": \"cto\"}} Hope that helps.";
        assert_eq!(
            extract_json_object(text).as_deref(),
            Some("{\"filters\": {\"role\": \"cto\"}}")
        );
    }

    #[test]
    fn no_object_is_none() {
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("} backwards {").is_none());
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(parse_json_object("m", "[1, 2]").is_err());
        assert!(parse_json_object("m", "{not json}").is_err());
        let map = parse_json_object("m", "ok {\"x\": true}").unwrap();
        assert_eq!(map["x"], true);
    }
}
