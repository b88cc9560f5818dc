//! OpenAI-compatible chat completion adapter.
//!
//! [`OpenAiChatGenerator`] implements [`TextGenerator`] by calling
//! `POST {url}/chat/completions` with a `[system, user]` message pair.
//! A non-2xx response becomes [`KbError::GenerationProvider`] carrying the
//! status and body; there are no retries.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use opskb_core::answer::{Generation, GenerationRequest, TextGenerator, TokenUsage};
use opskb_core::KbError;

use crate::config::GenerationConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiChatGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiChatGenerator {
    pub fn new(
        url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, KbError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| KbError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn provider_error(&self, status: u16, body: impl Into<String>) -> KbError {
        KbError::GenerationProvider {
            provider: self.name().to_string(),
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAiChatGenerator {
    fn name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        // Status 0 marks a transport failure with no HTTP response.
        let response = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.provider_error(0, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.provider_error(status.as_u16(), text).into());
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            self.provider_error(status.as_u16(), format!("malformed response: {}", e))
        })?;

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "generation usage"
            );
        }

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| self.provider_error(status.as_u16(), "response had no choices"))?;

        Ok(Generation {
            text,
            usage: parsed.usage,
        })
    }
}

/// Text generation turned off in configuration.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _request: &GenerationRequest) -> Result<Generation> {
        Err(KbError::Configuration(
            "generation provider is disabled; set [generation].provider".to_string(),
        )
        .into())
    }
}

/// Build the configured generator. Fails with [`KbError::Configuration`]
/// when the API key variable is unset.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>, KbError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| {
                    KbError::Configuration(format!(
                        "{} environment variable not set",
                        config.api_key_env
                    ))
                })?;
            let url = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
            Ok(Arc::new(OpenAiChatGenerator::new(
                url,
                api_key,
                config.model.clone(),
                config.timeout_secs,
            )?))
        }
        other => Err(KbError::Configuration(format!(
            "Unknown generation provider: {}",
            other
        ))),
    }
}
