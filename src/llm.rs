//! Chat-completion capability.
//!
//! [`ChatModel`] takes an ordered list of [`ChatMessage`]s and streams the
//! reply token by token through a callback, returning the full text once
//! the stream ends. [`OpenAIChat`] implements it over the OpenAI
//! `chat/completions` endpoint with server-sent events.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Serialize;
use std::time::Duration;

use crate::config::ChatConfig;
use crate::embedding::openai_base_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Receives streamed tokens as they arrive.
pub type TokenSink<'a> = &'a mut (dyn FnMut(&str) + Send);

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Stream a completion for `messages`, calling `on_token` for every
    /// token. Tokens already delivered stay delivered if the stream fails
    /// part-way.
    async fn complete(&self, messages: &[ChatMessage], on_token: TokenSink<'_>) -> Result<String>;
}

/// A chat model that always fails.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ChatMessage], _on_token: TokenSink<'_>) -> Result<String> {
        bail!("Chat provider is disabled. Set [chat] provider in config.")
    }
}

/// Streaming chat over the OpenAI `POST /v1/chat/completions` endpoint.
pub struct OpenAIChat {
    model: String,
    temperature: f32,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            base_url: openai_base_url(),
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], on_token: TokenSink<'_>) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "stream": true,
            "messages": messages,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to connect to chat provider")?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("OpenAI chat error {}: {}", status, body_text);
        }

        let mut stream = Box::pin(response.bytes_stream().eventsource());
        let mut answer = String::new();

        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| anyhow::anyhow!("chat stream error: {}", e))?;
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            match parse_stream_data(data)? {
                StreamData::Done => break,
                StreamData::Token(token) => {
                    on_token(&token);
                    answer.push_str(&token);
                }
                StreamData::Empty => {}
            }
        }

        Ok(answer)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum StreamData {
    Token(String),
    Empty,
    Done,
}

fn parse_stream_data(data: &str) -> Result<StreamData> {
    if data == "[DONE]" {
        return Ok(StreamData::Done);
    }
    let json: serde_json::Value =
        serde_json::from_str(data).with_context(|| format!("Invalid chat stream chunk: {}", data))?;
    if let Some(err) = json.get("error") {
        bail!("chat stream returned an error: {}", err);
    }
    let token = json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default();
    if token.is_empty() {
        Ok(StreamData::Empty)
    } else {
        Ok(StreamData::Token(token.to_string()))
    }
}

/// Create the [`ChatModel`] named by the configuration.
pub fn create_chat_model(config: &ChatConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChat)),
        "openai" => Ok(Box::new(OpenAIChat::new(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}
