//! Reply generation through an OpenAI-compatible chat-completions API.

use crate::config::SpeechConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use kindred_types::TurnRole;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One prior exchange entry handed to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Produces a persona reply from a system prompt and a bounded context of
/// prior turns. The last entry in `turns` is the message being replied to.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, system_prompt: &str, turns: &[ChatTurn]) -> Result<String, VoiceError>;
}

/// `ReplyGenerator` backed by a chat-completions HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpReplyGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl HttpReplyGenerator {
    pub fn from_config(config: &SpeechConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            url: config.llm_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        })
    }
}

#[async_trait]
impl ReplyGenerator for HttpReplyGenerator {
    async fn generate(&self, system_prompt: &str, turns: &[ChatTurn]) -> Result<String, VoiceError> {
        if self.url.is_empty() {
            return Err(VoiceError::Config(
                "llm_url is not configured; set [speech].llm_url or KINDRED_LLM_URL".to_string(),
            ));
        }

        let mut messages = Vec::with_capacity(turns.len() + 1);
        messages.push(ChatMessage {
            role: "system",
            content: system_prompt,
        });
        for turn in turns {
            messages.push(ChatMessage {
                role: turn.role.as_str(),
                content: &turn.content,
            });
        }

        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
        };

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Generation(format!("chat completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(VoiceError::Generation(format!(
                "chat completion returned {status}: {body_text}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Generation(format!("failed to parse completion: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| VoiceError::Generation("completion contained no content".to_string()))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
