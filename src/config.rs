//! Configuration loader and validator for the repository sentinel.
use lettre::message::Mailbox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub github: GitHub,
    #[serde(default)]
    pub ai: Ai,
    #[serde(default)]
    pub notification: Notification,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Code-hosting API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitHub {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_github_api")]
    pub api_base: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

impl Default for GitHub {
    fn default() -> Self {
        Self {
            token: String::new(),
            api_base: default_github_api(),
            timeout_seconds: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    None,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    #[serde(rename = "deepseek")]
    DeepSeek,
}

/// Tone of the AI summary; formal reports sample at a lower temperature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStyle {
    #[default]
    Formal,
    Casual,
}

impl ReportStyle {
    pub fn temperature(&self) -> f32 {
        match self {
            ReportStyle::Formal => 0.3,
            ReportStyle::Casual => 0.7,
        }
    }
}

/// Language-model settings. `provider: none` disables the AI path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ai {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub style: ReportStyle,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_ai_timeout")]
    pub timeout_seconds: u64,
}

impl Default for Ai {
    fn default() -> Self {
        Self {
            provider: Provider::None,
            api_key: String::new(),
            model: String::new(),
            base_url: None,
            language: default_language(),
            style: ReportStyle::Formal,
            temperature: None,
            max_tokens: default_max_tokens(),
            timeout_seconds: default_ai_timeout(),
        }
    }
}

impl Ai {
    pub fn effective_temperature(&self) -> f32 {
        self.temperature.unwrap_or_else(|| self.style.temperature())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Notification {
    #[serde(default)]
    pub webhook: Webhook,
    #[serde(default)]
    pub file: FileExport,
    #[serde(default)]
    pub email: Email,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Webhook {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

impl Default for Webhook {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            headers: BTreeMap::new(),
            timeout_seconds: default_http_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FileExport {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub dir: String,
}

/// SMTP delivery. STARTTLS on `smtp_port`; credentials are optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

impl Default for Email {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: String::new(),
            to: Vec::new(),
            timeout_seconds: default_http_timeout(),
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}
fn default_window_days() -> u32 {
    7
}
fn default_interval_minutes() -> u64 {
    24 * 60
}
fn default_concurrency() -> usize {
    1
}
fn default_github_api() -> String {
    "https://api.github.com/".into()
}
fn default_http_timeout() -> u64 {
    30
}
fn default_language() -> String {
    "English".into()
}
fn default_max_tokens() -> u32 {
    2000
}
fn default_ai_timeout() -> u64 {
    60
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}/{}", home.trim_end_matches('/'), rest);
            }
        }
        self.data_dir.clone()
    }
}

impl Config {
    /// Ensure required directories exist (`app.data_dir` and the export dir if enabled).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if !self.app.data_dir.trim().is_empty() {
            fs::create_dir_all(self.app.resolved_data_dir())?;
        }
        if self.notification.file.enabled && !self.notification.file.dir.trim().is_empty() {
            fs::create_dir_all(&self.notification.file.dir)?;
        }
        Ok(())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/sentinel.db", self.app.resolved_data_dir()))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.window_days == 0 {
        return Err(ConfigError::Invalid("app.window_days must be > 0"));
    }
    if cfg.app.interval_minutes == 0 {
        return Err(ConfigError::Invalid("app.interval_minutes must be > 0"));
    }
    if cfg.app.concurrency == 0 {
        return Err(ConfigError::Invalid("app.concurrency must be > 0"));
    }

    if cfg.github.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("github.timeout_seconds must be > 0"));
    }

    if cfg.ai.provider != Provider::None {
        if cfg.ai.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("ai.api_key must be non-empty when a provider is set"));
        }
        if cfg.ai.model.trim().is_empty() {
            return Err(ConfigError::Invalid("ai.model must be non-empty when a provider is set"));
        }
    }
    if cfg.ai.max_tokens == 0 {
        return Err(ConfigError::Invalid("ai.max_tokens must be > 0"));
    }
    if cfg.ai.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("ai.timeout_seconds must be > 0"));
    }
    if let Some(t) = cfg.ai.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(ConfigError::Invalid("ai.temperature must be within [0, 2]"));
        }
    }

    let webhook = &cfg.notification.webhook;
    if webhook.enabled && webhook.url.trim().is_empty() {
        return Err(ConfigError::Invalid("notification.webhook.url must be non-empty when enabled"));
    }
    let file = &cfg.notification.file;
    if file.enabled && file.dir.trim().is_empty() {
        return Err(ConfigError::Invalid("notification.file.dir must be non-empty when enabled"));
    }
    let email = &cfg.notification.email;
    if email.enabled {
        if email.smtp_host.trim().is_empty() {
            return Err(ConfigError::Invalid("notification.email.smtp_host must be non-empty when enabled"));
        }
        if email.from.parse::<Mailbox>().is_err() {
            return Err(ConfigError::Invalid("notification.email.from must be a valid address"));
        }
        if email.to.is_empty() {
            return Err(ConfigError::Invalid("notification.email.to must list at least one recipient"));
        }
        if email.to.iter().any(|addr| addr.parse::<Mailbox>().is_err()) {
            return Err(ConfigError::Invalid("notification.email.to must contain valid addresses"));
        }
        if email.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("notification.email.timeout_seconds must be > 0"));
        }
    }

    Ok(())
}

/// Returns the example YAML written by `repo-sentinel init`.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  window_days: 7
  interval_minutes: 1440
  concurrency: 1

github:
  token: ""
  api_base: "https://api.github.com/"
  timeout_seconds: 30

ai:
  provider: none          # none | openai | anthropic | deepseek
  api_key: ""
  model: "gpt-4o-mini"
  language: "English"
  style: formal           # formal | casual
  max_tokens: 2000
  timeout_seconds: 60

notification:
  webhook:
    enabled: false
    url: "https://hooks.example.com/sentinel"
    headers:
      X-Source: "repo-sentinel"
  file:
    enabled: false
    dir: "./data/reports"
  email:
    enabled: false
    smtp_host: "smtp.example.com"
    smtp_port: 587
    username: ""
    password: ""
    from: "Repo Sentinel <sentinel@example.com>"
    to:
      - "team@example.com"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.ai.provider, Provider::None);
        assert_eq!(cfg.app.concurrency, 1);
        assert_eq!(cfg.notification.webhook.headers["X-Source"], "repo-sentinel");
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("app:\n  data_dir: ./d\n").unwrap();
        assert_eq!(cfg.app.window_days, 7);
        assert_eq!(cfg.app.interval_minutes, 1440);
        assert_eq!(cfg.github.api_base, "https://api.github.com/");
        assert_eq!(cfg.ai.max_tokens, 2000);
        assert!(!cfg.notification.webhook.enabled);
    }

    #[test]
    fn invalid_app_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("app.data_dir")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.concurrency = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.window_days = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn provider_requires_key_and_model() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ai.provider = Provider::Anthropic;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("ai.api_key")), _ => panic!("wrong error") }

        cfg.ai.api_key = "sk-test".into();
        cfg.ai.model = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("ai.model")), _ => panic!("wrong error") }
    }

    #[test]
    fn style_drives_temperature() {
        let mut ai = Ai::default();
        assert_eq!(ai.effective_temperature(), 0.3);
        ai.style = ReportStyle::Casual;
        assert_eq!(ai.effective_temperature(), 0.7);
        ai.temperature = Some(1.1);
        assert_eq!(ai.effective_temperature(), 1.1);
    }

    #[test]
    fn provider_names_parse() {
        let p: Provider = serde_yaml::from_str("deepseek").unwrap();
        assert_eq!(p, Provider::DeepSeek);
        let p: Provider = serde_yaml::from_str("openai").unwrap();
        assert_eq!(p, Provider::OpenAi);
        assert!(serde_yaml::from_str::<Provider>("gemini").is_err());
    }

    #[test]
    fn enabled_sinks_need_targets() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.notification.webhook.enabled = true;
        cfg.notification.webhook.url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("webhook.url")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.notification.file.enabled = true;
        cfg.notification.file.dir = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn email_settings_are_checked_when_enabled() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        assert_eq!(cfg.notification.email.smtp_port, 587);
        cfg.notification.email.enabled = true;
        validate(&cfg).unwrap();

        cfg.notification.email.to.push("not an address".into());
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("email.to")), _ => panic!("wrong error") }

        cfg.notification.email.to.clear();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.notification.email.enabled = true;
        cfg.notification.email.smtp_host = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("smtp_host")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.notification.email.enabled = true;
        cfg.notification.email.from = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("email.from")), _ => panic!("wrong error") }
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        let mut f = fs::File::create(&p).unwrap();
        f.write_all(example().as_bytes()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.window_days, 7);
    }
}
