//! Language-model client.
//!
//! The pipeline talks to the model through the [`LanguageModel`] trait, one
//! `(system, prompt) → text` completion per call. [`ChatCompletionsClient`]
//! implements it against any OpenAI-compatible `/chat/completions` endpoint
//! (Groq by default), with the same 429/5xx backoff the embedding providers
//! use.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

/// A single-turn text completion backend.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

// ============ Wire types ============

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

// ============ Client ============

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl ChatCompletionsClient {
    /// Build a client, reading the API key from the environment (and `.env`).
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key()?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl LanguageModel for ChatCompletionsClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
        };

        let start = std::time::Instant::now();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(attempt, ?delay, "retrying chat completion");
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .http
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(anyhow!("LLM connection error ({}): {}", self.url, e));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let body: ChatResponse = response
                    .json()
                    .await
                    .map_err(|e| anyhow!("Invalid chat completion response: {}", e))?;
                tracing::debug!(
                    model = %self.model,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "chat completion"
                );
                return extract_content(body);
            }

            let body_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 || status.is_server_error() {
                last_err = Some(anyhow!("LLM API error {}: {}", status, body_text));
                continue;
            }
            bail!("LLM API error {}: {}", status, body_text);
        }

        Err(last_err.unwrap_or_else(|| anyhow!("chat completion failed after retries")))
    }
}

fn extract_content(body: ChatResponse) -> Result<String> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow!("No content in chat completion response"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_as_chat_completion() {
        let req = ChatRequest {
            model: "llama-3.3-70b-versatile",
            messages: vec![
                Message {
                    role: "system",
                    content: "be terse",
                },
                Message {
                    role: "user",
                    content: "hi",
                },
            ],
            temperature: 0.0,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "llama-3.3-70b-versatile");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["temperature"], 0.0);
    }

    #[test]
    fn content_taken_from_first_choice() {
        let body: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [
                {"message": {"role": "assistant", "content": "DENIED"}},
                {"message": {"role": "assistant", "content": "ignored"}}
            ]
        }))
        .unwrap();
        assert_eq!(extract_content(body).unwrap(), "DENIED");
    }

    #[test]
    fn missing_content_is_error() {
        let body: ChatResponse =
            serde_json::from_value(serde_json::json!({"choices": []})).unwrap();
        assert!(extract_content(body).is_err());

        let body: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        }))
        .unwrap();
        assert!(extract_content(body).is_err());
    }

    #[test]
    fn url_joins_base() {
        let cfg = LlmConfig {
            base_url: "http://localhost:8080/v1/".into(),
            ..Default::default()
        };
        let client = ChatCompletionsClient::with_api_key(&cfg, "k").unwrap();
        assert_eq!(client.url, "http://localhost:8080/v1/chat/completions");
        assert_eq!(client.model_name(), "llama-3.3-70b-versatile");
    }
}
