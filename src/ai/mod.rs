//! Language-model completion capability.
//!
//! One implementation per wire protocol; the provider is chosen once, in
//! [`from_config`], and callers only ever see `Arc<dyn CompletionClient>`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{self, Provider};
use crate::error::SentinelError;

pub mod anthropic;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use openai::OpenAiClient;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1/";
const DEEPSEEK_API_BASE: &str = "https://api.deepseek.com/v1/";
const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/";

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider label for logs.
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, SentinelError>;
}

/// Builds the configured client, or `None` when `provider: none`.
pub fn from_config(cfg: &config::Ai) -> Result<Option<Arc<dyn CompletionClient>>> {
    let timeout = Duration::from_secs(cfg.timeout_seconds);
    let base = |default: &str| -> Result<Url> {
        let raw = cfg.base_url.as_deref().unwrap_or(default);
        let mut url = Url::parse(raw).with_context(|| format!("invalid ai.base_url {raw}"))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    };

    let client: Arc<dyn CompletionClient> = match cfg.provider {
        Provider::None => {
            info!("no AI provider configured; reports use the built-in template");
            return Ok(None);
        }
        Provider::OpenAi => Arc::new(OpenAiClient::new(
            "openai",
            base(OPENAI_API_BASE)?,
            cfg.api_key.clone(),
            cfg.model.clone(),
            timeout,
        )?),
        Provider::DeepSeek => Arc::new(OpenAiClient::new(
            "deepseek",
            base(DEEPSEEK_API_BASE)?,
            cfg.api_key.clone(),
            cfg.model.clone(),
            timeout,
        )?),
        Provider::Anthropic => Arc::new(AnthropicClient::new(
            base(ANTHROPIC_API_BASE)?,
            cfg.api_key.clone(),
            cfg.model.clone(),
            timeout,
        )?),
    };
    info!(provider = client.name(), model = %cfg.model, "AI provider configured");
    Ok(Some(client))
}

/// Shared status handling for provider responses.
pub(crate) async fn read_success_body(res: reqwest::Response, provider: &str) -> Result<String, SentinelError> {
    let status = res.status();
    let body = res.text().await?;
    if !status.is_success() {
        let snippet: String = body.chars().take(200).collect();
        return Err(SentinelError::Transient(format!(
            "{provider} returned {status}: {snippet}"
        )));
    }
    Ok(body)
}
