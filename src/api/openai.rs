//! Chat-completions client used by the analysis agents
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::TextGenerator;
use crate::config::LlmSettings;
use crate::{Result, TradeError};

const PROMPT_LOG_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        Self::with_timeout(settings, settings.timeout())
    }

    pub fn with_timeout(settings: &LlmSettings, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TradeError::Upstream(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            max_tokens: settings.max_tokens,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, model: &str, prompt: &str) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| TradeError::Unconfigured("OpenAI API key".to_string()))?;

        let preview: String = prompt.chars().take(PROMPT_LOG_CHARS).collect();
        tracing::debug!(model = %model, "Sending prompt: {}...", preview);

        let request = ChatRequest {
            model,
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TradeError::Upstream(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| TradeError::Upstream(format!("failed to decode OpenAI response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| TradeError::Upstream("no response from OpenAI".to_string()))?;

        tracing::debug!(model = %model, "Received {} chars", content.len());
        Ok(content)
    }
}
