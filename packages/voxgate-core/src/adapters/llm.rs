//! HTTP LLM adapter, talking to a chat-completions-style endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::memory::{Role, Turn};

use super::LlmAdapter;

/// Response-length hint appended to the system directive on every request,
/// keeping spoken replies short enough to stay conversational.
const RESPONSE_LENGTH_HINT: &str = "Respond in at most two short sentences.";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorDetail,
}

#[derive(Deserialize)]
struct ProviderErrorDetail {
    message: String,
}

/// LLM adapter backed by a chat-completions-compatible endpoint.
pub struct HttpLlmAdapter {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl HttpLlmAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            model,
            temperature,
            max_tokens,
            timeout,
        }
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[async_trait]
impl LlmAdapter for HttpLlmAdapter {
    async fn complete(&self, turns: &[Turn]) -> GatewayResult<String> {
        let mut messages: Vec<ChatMessage> = turns
            .iter()
            .map(|t| ChatMessage {
                role: Self::role_str(t.role),
                content: &t.content,
            })
            .collect();
        messages.push(ChatMessage {
            role: "system",
            content: RESPONSE_LENGTH_HINT,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::ProviderUnavailable(format!("response read failed: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(GatewayError::ProviderRejected(format!(
                "llm provider returned {status}: {message}"
            )));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| GatewayError::ProviderRejected(format!("malformed response: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::ProviderRejected("empty choices array".into()))?;

        Ok(text.trim().to_string())
    }
}

fn map_request_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::ProviderTimeout("llm request timed out".into())
    } else {
        GatewayError::ProviderUnavailable(format!("llm request failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_str_matches_chat_convention() {
        assert_eq!(HttpLlmAdapter::role_str(Role::System), "system");
        assert_eq!(HttpLlmAdapter::role_str(Role::User), "user");
        assert_eq!(HttpLlmAdapter::role_str(Role::Assistant), "assistant");
    }
}
