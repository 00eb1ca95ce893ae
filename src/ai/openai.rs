use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{read_success_body, CompletionClient, CompletionRequest};
use crate::error::SentinelError;

/// Chat-completions client; also serves OpenAI-compatible providers such as DeepSeek.
#[derive(Clone)]
pub struct OpenAiClient {
    label: &'static str,
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("label", &self.label)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiClient {
    pub fn new(
        label: &'static str,
        base_url: Url,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("repo-sentinel/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build completion http client")?;
        Ok(Self {
            label,
            http,
            base_url,
            api_key,
            model,
        })
    }

    pub fn build_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        })
    }

    pub fn build_request(&self, request: &CompletionRequest) -> Result<reqwest::Request, SentinelError> {
        let endpoint = self
            .base_url
            .join("chat/completions")
            .map_err(|e| SentinelError::Validation(format!("invalid completion URL: {e}")))?;
        self.http
            .post(endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.build_body(request))
            .build()
            .map_err(SentinelError::from)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
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

pub(crate) fn extract_text(body: &str) -> Result<String, SentinelError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| SentinelError::Transient(format!("invalid completion response: {e}")))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| SentinelError::Transient("completion returned no text".into()))
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &'static str {
        self.label
    }

    #[instrument(skip_all)]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, SentinelError> {
        let req = self.build_request(request)?;
        debug!(provider = self.label, url = %req.url(), max_tokens = request.max_tokens, "completion request");
        let res = self.http.execute(req).await?;
        let body = read_success_body(res, self.label).await?;
        extract_text(&body)
    }
}
