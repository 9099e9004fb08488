//! LLM and media capabilities consumed by the agents.
//!
//! - [`LlmProvider`]: "given a prompt, return a JSON document" (analysis).
//! - [`MediaTranscriber`]: audio to text and image to description
//!   (extraction of audio and image uploads).
//!
//! [`OpenAiLlm`] implements both against any OpenAI-compatible API; the
//! disabled variants fail every call so a misconfigured pipeline surfaces a
//! stage error instead of silently skipping work.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use crate::config::LlmConfig;
use crate::http;
use crate::models::FileFormat;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

const IMAGE_PROMPT: &str = "Describe this marketing image in detail. Transcribe all visible \
text verbatim (headlines, body copy, calls to action, prices, offers), then describe the \
layout, imagery and any advertising techniques it uses.";

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Run one chat completion that must answer with a JSON object.
    /// Returns the raw message content.
    async fn complete_json(&self, system: &str, user: &str) -> Result<String>;
}

#[async_trait]
pub trait MediaTranscriber: Send + Sync {
    async fn transcribe_audio(&self, bytes: &[u8], format: FileFormat) -> Result<String>;
    async fn describe_image(&self, bytes: &[u8], format: FileFormat) -> Result<String>;
}

/// Build the configured LLM provider.
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlm)),
        "openai" => Ok(Arc::new(OpenAiLlm::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// Build the configured media transcriber. Shares the LLM settings.
pub fn create_transcriber(config: &LlmConfig) -> Result<Arc<dyn MediaTranscriber>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledLlm)),
        "openai" => Ok(Arc::new(OpenAiLlm::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledLlm;

#[async_trait]
impl LlmProvider for DisabledLlm {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete_json(&self, _system: &str, _user: &str) -> Result<String> {
        bail!("LLM provider is disabled")
    }
}

#[async_trait]
impl MediaTranscriber for DisabledLlm {
    async fn transcribe_audio(&self, _bytes: &[u8], _format: FileFormat) -> Result<String> {
        bail!("Audio transcription requires an LLM provider (llm.provider is disabled)")
    }
    async fn describe_image(&self, _bytes: &[u8], _format: FileFormat) -> Result<String> {
        bail!("Image description requires an LLM provider (llm.provider is disabled)")
    }
}

// ============ OpenAI ============

pub struct OpenAiLlm {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    transcription_model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiLlm {
    /// Reads the key from `OPENAI_API_KEY`.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            model,
            transcription_model: config.transcription_model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn chat(&self, body: serde_json::Value) -> Result<String> {
        let endpoint = http::join_url(&self.url, "chat/completions");
        let response = http::send_with_retry("OpenAI chat", self.max_retries, || {
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("OpenAI chat returned no content"))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl LlmProvider for OpenAiLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_json(&self, system: &str, user: &str) -> Result<String> {
        self.chat(serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        }))
        .await
    }
}

#[async_trait]
impl MediaTranscriber for OpenAiLlm {
    async fn transcribe_audio(&self, bytes: &[u8], format: FileFormat) -> Result<String> {
        if !format.is_audio() {
            bail!("{} is not an audio format", format);
        }
        let endpoint = http::join_url(&self.url, "audio/transcriptions");
        let filename = format!("upload.{}", format.as_str());

        // Multipart forms are consumed by `send`, so each attempt rebuilds one.
        let response = http::send_with_retry("OpenAI transcription", self.max_retries, || {
            let part = reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename.clone());
            let form = reqwest::multipart::Form::new()
                .text("model", self.transcription_model.clone())
                .part("file", part);
            self.client
                .post(&endpoint)
                .bearer_auth(&self.api_key)
                .multipart(form)
        })
        .await?;

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text)
    }

    async fn describe_image(&self, bytes: &[u8], format: FileFormat) -> Result<String> {
        if !format.is_image() {
            bail!("{} is not an image format", format);
        }
        let data_uri = format!(
            "data:{};base64,{}",
            format.mime_type(),
            base64::engine::general_purpose::STANDARD.encode(bytes)
        );

        self.chat(serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": IMAGE_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_uri } },
                ],
            }],
        }))
        .await
    }
}
