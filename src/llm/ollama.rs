//! Ollama-compatible chat provider over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};
use crate::error::LlmError;

const PROVIDER: &str = "ollama";

/// Calls `POST {base_url}/api/chat` with streaming disabled.
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(base_url: &str, model: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint: chat_endpoint(base_url),
            model: model.into(),
            timeout,
        })
    }
}

/// Accept a bare host or a full `/api/...` URL.
fn chat_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = base
        .strip_suffix("/api/generate")
        .or_else(|| base.strip_suffix("/api/chat"))
        .unwrap_or(base);
    format!("{base}/api/chat")
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct ChatReply {
    message: ReplyMessage,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = ChatBody {
            model: &self.model,
            messages: &request.messages,
            stream: false,
            format: request.json_output.then_some("json"),
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        provider: PROVIDER.to_string(),
                        timeout: self.timeout,
                    }
                } else {
                    LlmError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {status}: {text}"),
            });
        }

        let reply: ChatReply = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            model = %self.model,
            input_tokens = reply.prompt_eval_count.unwrap_or(0),
            output_tokens = reply.eval_count.unwrap_or(0),
            "Ollama completion finished"
        );

        Ok(CompletionResponse {
            content: reply.message.content,
            input_tokens: reply.prompt_eval_count.unwrap_or(0),
            output_tokens: reply.eval_count.unwrap_or(0),
            finish_reason: match reply.done_reason.as_deref() {
                Some("stop") => FinishReason::Stop,
                Some("length") => FinishReason::Length,
                _ => FinishReason::Unknown,
            },
            response_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_normalization() {
        assert_eq!(chat_endpoint("http://localhost:11434"), "http://localhost:11434/api/chat");
        assert_eq!(chat_endpoint("http://localhost:11434/"), "http://localhost:11434/api/chat");
        assert_eq!(
            chat_endpoint("http://localhost:11434/api/generate"),
            "http://localhost:11434/api/chat"
        );
    }

    #[test]
    fn body_includes_json_format_only_when_requested() {
        let messages = vec![ChatMessage::user("hi")];
        let body = ChatBody {
            model: "m",
            messages: &messages,
            stream: false,
            format: Some("json"),
            options: ChatOptions {
                temperature: Some(0.2),
                num_predict: None,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["format"], "json");
        assert_eq!(json["messages"][0]["role"], "user");
        assert!(json["options"].get("num_predict").is_none());

        let plain = ChatBody { format: None, ..body };
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json.get("format").is_none());
    }
}
