//! LLM API backend
//!
//! Supports both the Anthropic Messages API and OpenAI-compatible chat
//! completion APIs (GLM, etc.). The template's instructions become the system
//! prompt; the task, input, and context become a single user message.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use super::{Invoker, render_prompt};
use crate::config::{LlmConfig, LlmProvider};
use crate::templates::BehaviorTemplate;
use crate::{Error, Result};

/// Text-generation client used as a task backend
#[derive(Clone)]
pub struct LlmInvoker {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    provider: LlmProvider,
}

impl LlmInvoker {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        // Per-task deadlines are enforced by the worker pool, not here
        let client = Client::builder().build().map_err(Error::Http)?;

        let base_url = match &config.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => match config.provider {
                LlmProvider::Claude => "https://api.anthropic.com/v1".to_string(),
                LlmProvider::OpenAi => "https://api.openai.com/v1".to_string(),
            },
        };

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url,
            provider: config.provider.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    fn model_for<'a>(&'a self, template: &'a BehaviorTemplate) -> &'a str {
        template.model.as_deref().unwrap_or(&self.model)
    }

    async fn send_claude_request(&self, request: &MessagesRequest) -> Result<String> {
        let url = format!("{}/messages", self.base_url);
        debug!("Sending request to Claude API: {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("Claude API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            Error::LlmApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        info!(
            "Claude API response: stop_reason={:?}, tokens={}/{}",
            parsed.stop_reason,
            parsed.usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
            parsed.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0)
        );

        Ok(parsed.text())
    }

    async fn send_openai_request(&self, request: &ChatCompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!("Sending request to OpenAI-compatible API: {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(Error::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(Error::Http)?;

        if !status.is_success() {
            warn!("OpenAI API error: {} - {}", status, body);
            return Err(Error::LlmApi(format!("{}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
            Error::LlmApi(format!("Failed to parse response: {} - {}", e, body))
        })?;

        parsed
            .text()
            .ok_or_else(|| Error::LlmApi("Response contained no choices".to_string()))
    }
}

#[async_trait]
impl Invoker for LlmInvoker {
    fn name(&self) -> &str {
        "llm"
    }

    async fn invoke(
        &self,
        template: &BehaviorTemplate,
        task: &str,
        input: Option<&str>,
        context: Option<&JsonValue>,
    ) -> Result<String> {
        let prompt = render_prompt(task, input, context);
        let model = self.model_for(template).to_string();

        match self.provider {
            LlmProvider::Claude => {
                let request = MessagesRequest::new(model, template, prompt);
                self.send_claude_request(&request).await
            }
            LlmProvider::OpenAi => {
                let request = ChatCompletionRequest::new(model, template, prompt);
                self.send_openai_request(&request).await
            }
        }
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl MessagesRequest {
    fn new(model: String, template: &BehaviorTemplate, prompt: String) -> Self {
        Self {
            model,
            max_tokens: template.max_tokens,
            system: Some(template.instructions.clone()).filter(|s| !s.is_empty()),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            temperature: template.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

impl MessagesResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    max_tokens: u64,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl ChatCompletionRequest {
    fn new(model: String, template: &BehaviorTemplate, prompt: String) -> Self {
        let mut messages = Vec::with_capacity(2);
        if !template.instructions.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: template.instructions.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt,
        });

        Self {
            model,
            max_tokens: template.max_tokens,
            messages,
            temperature: template.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    fn text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
    }
}
