//! Chat-completions provider
//!
//! Talks to an OpenAI-compatible `chat/completions` endpoint such as the
//! BigModel GLM API. Each prompt is sent as a fresh two-turn conversation: the
//! style instruction followed by the prompt.

use crate::config::LlmSection;
use crate::llm::provider::{LlmError, LlmProvider, Message};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Chat-completions provider configuration
#[derive(Debug, Clone)]
pub struct ChatCompletionsConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub style_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl ChatCompletionsConfig {
    /// Combine the `[llm]` section with a key resolved from the environment
    pub fn from_section(section: &LlmSection, api_key: String) -> Self {
        Self {
            endpoint: section.endpoint.clone(),
            api_key,
            model: section.model.clone(),
            style_prompt: section.style_prompt.clone(),
            max_tokens: section.max_tokens,
            temperature: section.temperature,
            timeout: Duration::from_secs(section.timeout_secs),
        }
    }
}

/// Chat-completions provider implementation
pub struct ChatCompletionsProvider {
    config: ChatCompletionsConfig,
    client: Client,
}

impl ChatCompletionsProvider {
    /// Create a new provider
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::NotConfigured(
                "chat-completions API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Build the request body for a prompt (pure function)
    fn build_request(config: &ChatCompletionsConfig, prompt: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: config.model.clone(),
            messages: vec![
                Message::user(config.style_prompt.clone()),
                Message::user(prompt),
            ],
            thinking: ThinkingMode {
                mode: "disabled".to_string(),
            },
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    /// Pull `choices[0].message.content` out of a response body (pure function)
    fn extract_reply(body: &serde_json::Value) -> Result<String, LlmError> {
        let choices = body
            .get("choices")
            .and_then(|c| c.as_array())
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        let first = choices
            .first()
            .ok_or_else(|| LlmError::InvalidResponse("choices is empty".to_string()))?;

        first
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                LlmError::InvalidResponse("choices[0].message.content is not a string".to_string())
            })
    }

    /// Make single API request (impure I/O)
    async fn make_api_request(&self, request: &ChatCompletionRequest) -> Result<String, LlmError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| LlmError::InvalidRequest(format!("serialization failed: {e}")))?;

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                let error_msg = format!(
                    "HTTP request failed: {} (is_connect: {}, is_timeout: {})",
                    e,
                    e.is_connect(),
                    e.is_timeout()
                );
                warn!("Chat-completions network error: {}", error_msg);
                LlmError::NetworkError(error_msg)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!(
                "chat-completions API error: {status} - {error_text}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| LlmError::NetworkError(format!("failed to read response body: {e}")))
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "chat_completions"
    }

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = Self::build_request(&self.config, prompt);
        debug!(
            model = %request.model,
            prompt_bytes = prompt.len(),
            "Sending chat-completions request"
        );

        let raw = self.make_api_request(&request).await?;
        let body: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| LlmError::InvalidResponse(format!("response is not JSON: {e}")))?;

        let reply = Self::extract_reply(&body)?;
        debug!(reply_bytes = reply.len(), "Chat-completions reply received");
        Ok(reply)
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    thinking: ThinkingMode,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ThinkingMode {
    #[serde(rename = "type")]
    mode: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_config() -> ChatCompletionsConfig {
        ChatCompletionsConfig {
            endpoint: "http://localhost:9/api/paas/v4/chat/completions".to_string(),
            api_key: "test-key".to_string(),
            model: "glm-4.6".to_string(),
            style_prompt: "Reply briefly.".to_string(),
            max_tokens: 128,
            temperature: 1.0,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_provider_creation_without_api_key() {
        let mut config = test_config();
        config.api_key = String::new();
        assert!(matches!(
            ChatCompletionsProvider::new(config),
            Err(LlmError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatCompletionsProvider::build_request(&test_config(), "tell me a joke");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json,
            json!({
                "model": "glm-4.6",
                "messages": [
                    {"role": "user", "content": "Reply briefly."},
                    {"role": "user", "content": "tell me a joke"}
                ],
                "thinking": {"type": "disabled"},
                "max_tokens": 128,
                "temperature": 1.0
            })
        );
    }

    #[test]
    fn test_extract_reply() {
        let body = json!({"choices": [{"message": {"content": "hello"}}]});
        assert_eq!(ChatCompletionsProvider::extract_reply(&body).unwrap(), "hello");
    }

    #[test]
    fn test_extract_reply_failures() {
        let cases = vec![
            json!({"error": "nope"}),
            json!({"choices": []}),
            json!({"choices": [{"message": {}}]}),
            json!({"choices": [{"message": {"content": 42}}]}),
        ];

        for body in cases {
            assert!(matches!(
                ChatCompletionsProvider::extract_reply(&body),
                Err(LlmError::InvalidResponse(_))
            ));
        }
    }

    #[test]
    fn test_from_section() {
        let section = crate::config::RelayConfig::test_config().llm;
        let config = ChatCompletionsConfig::from_section(&section, "k".to_string());
        assert_eq!(config.model, "glm-4.6");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_tokens, 128);
    }
}
