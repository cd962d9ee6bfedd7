//! Chat-completion transport for the LLM-backed oracles.

use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::OracleError;

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const USER_AGENT: &str = concat!("cml-reconcile/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
const TEMPERATURE: f64 = 0.1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Sends a conversation and returns the assistant's text.
pub trait ChatTransport: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError>;
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: ChatMessage,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiChat {
    http_client: reqwest::blocking::Client,
    settings: ChatSettings,
}

impl OpenAiChat {
    pub fn new(settings: ChatSettings) -> Result<Self, OracleError> {
        let http_client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| OracleError::Network(e.to_string()))?;
        Ok(Self {
            http_client,
            settings,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.api_base.trim_end_matches('/'))
    }
}

impl ChatTransport for OpenAiChat {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, OracleError> {
        let request = CompletionRequest {
            model: &self.settings.model,
            temperature: TEMPERATURE,
            messages,
        };
        debug!(
            "Sending {} message(s) to {} ({})",
            messages.len(),
            self.endpoint(),
            self.settings.model
        );
        let response = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&request)
            .send()
            .map_err(|e| OracleError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(OracleError::Api(status.as_u16(), body));
        }

        let parsed: CompletionResponse = response
            .json()
            .map_err(|e| OracleError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(OracleError::EmptyResponse)
    }
}
