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

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    base_url: Url,
    api_key: String,
    model: String,
}

impl fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    pub fn new(base_url: Url, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent("repo-sentinel/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build completion http client")?;
        Ok(Self {
            http,
            base_url,
            api_key,
            model,
        })
    }

    pub fn build_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.model,
            "system": request.system,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [
                { "role": "user", "content": request.user },
            ],
        })
    }

    pub fn build_request(&self, request: &CompletionRequest) -> Result<reqwest::Request, SentinelError> {
        let endpoint = self
            .base_url
            .join("messages")
            .map_err(|e| SentinelError::Validation(format!("invalid completion URL: {e}")))?;
        self.http
            .post(endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_body(request))
            .build()
            .map_err(SentinelError::from)
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    text: Option<String>,
}

/// Concatenates the text blocks of a Messages API response.
pub(crate) fn extract_text(body: &str) -> Result<String, SentinelError> {
    let parsed: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| SentinelError::Transient(format!("invalid completion response: {e}")))?;
    let text: String = parsed
        .content
        .into_iter()
        .filter(|b| b.typ == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(SentinelError::Transient("completion returned no text".into()));
    }
    Ok(text)
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    #[instrument(skip_all, fields(provider = "anthropic"))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, SentinelError> {
        let req = self.build_request(request)?;
        debug!(url = %req.url(), max_tokens = request.max_tokens, "completion request");
        let res = self.http.execute(req).await?;
        let body = read_success_body(res, "anthropic").await?;
        extract_text(&body)
    }
}
