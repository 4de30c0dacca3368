use std::sync::Arc;

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use ollama_rs::generation::completion::request::GenerationRequest;
use ollama_rs::Ollama;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{AppConfig, LlmProvider};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, Error>;

    fn model_name(&self) -> &str;
}

/// Groq's OpenAI-compatible chat completions endpoint.
pub struct GroqModel {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GroqModel {
    pub fn new(base_url: &str, api_key: &str, model: &str, temperature: f32) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
            temperature,
        }
    }
}

#[async_trait]
impl ChatModel for GroqModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, Error> {
        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        tracing::debug!(model = %self.model, messages = messages.len(), "sending chat completion");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(300).collect();
            return Err(anyhow!("Groq API returned {status}: {truncated}"));
        }

        let data: serde_json::Value = response.json().await?;
        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Groq response had no message content"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// A local Ollama server. The transcript is flattened into one prompt.
pub struct OllamaModel {
    client: Ollama,
    model: String,
}

impl OllamaModel {
    pub fn new(host: &str, port: u16, model: &str) -> Result<Self, AppError> {
        let (host, port) = ollama_endpoint(host, port)?;
        Ok(Self {
            client: Ollama::new(host, port),
            model: model.to_string(),
        })
    }
}

/// Normalizes `OLLAMA_HOST` into the scheme+host and port `ollama-rs` wants.
/// Accepts `localhost`, `127.0.0.1:11434` or `https://box:8443`; a port in
/// the host wins over `default_port`.
fn ollama_endpoint(host: &str, default_port: u16) -> Result<(String, u16), AppError> {
    let invalid = |reason: String| AppError::Validation(format!("Invalid Ollama host {host:?}: {reason}"));

    let host = host.trim();
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };

    let url = reqwest::Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    let name = url
        .host_str()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| invalid("missing host name".to_string()))?;

    Ok((
        format!("{}://{}", url.scheme(), name),
        url.port().unwrap_or(default_port),
    ))
}

pub fn render_transcript(messages: &[ChatMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let label = match message.role {
            ChatRole::System => "System",
            ChatRole::User => "User",
            ChatRole::Assistant => "Assistant",
        };
        prompt.push_str(&format!("{}: {}\n\n", label, message.content));
    }
    prompt.push_str("Assistant:");
    prompt
}

#[async_trait]
impl ChatModel for OllamaModel {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, Error> {
        let request = GenerationRequest::new(self.model.clone(), render_transcript(messages));
        let response = self.client.generate(request).await?;
        Ok(response.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Builds the model selected in config, using the form's key for Groq.
pub fn build_model(config: &AppConfig, api_key: &str) -> Result<Arc<dyn ChatModel>, AppError> {
    let model: Arc<dyn ChatModel> = match config.provider {
        LlmProvider::Groq => Arc::new(GroqModel::new(
            &config.groq_base_url,
            api_key,
            &config.model,
            config.temperature,
        )),
        LlmProvider::Ollama => Arc::new(OllamaModel::new(
            &config.ollama_host,
            config.ollama_port,
            &config.model,
        )?),
    };
    Ok(model)
}

/// Sends a one-word greeting to prove the key and model work.
pub async fn verify(model: &dyn ChatModel) -> Result<(), AppError> {
    match model.complete(&[ChatMessage::user("Hello")]).await {
        Ok(_) => Ok(()),
        Err(e) => {
            tracing::warn!(model = model.model_name(), error = %e, "model verification failed");
            Err(AppError::InvalidApiKey)
        }
    }
}
