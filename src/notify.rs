//! Notification sinks. Delivery failures are reported to the caller but never
//! abort a cycle.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use reqwest::{Client, Url};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config;
use crate::model::RepoId;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, repo: &RepoId, report: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub repo_name: &'a str,
    pub report: &'a str,
    pub timestamp: DateTime<Utc>,
    pub delivery_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct WebhookSink {
    http: Client,
    url: Url,
    headers: BTreeMap<String, String>,
}

impl WebhookSink {
    pub fn new(url: &str, headers: BTreeMap<String, String>, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid webhook url {url:?}"))?;
        let http = Client::builder()
            .user_agent("repo-sentinel/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build webhook http client")?;
        Ok(Self { http, url, headers })
    }

    pub fn build_request(&self, payload: &WebhookPayload<'_>) -> Result<reqwest::Request> {
        let mut builder = self.http.post(self.url.clone()).json(payload);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        Ok(builder.build()?)
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip_all, fields(repo = %repo))]
    async fn send(&self, repo: &RepoId, report: &str) -> Result<()> {
        let payload = WebhookPayload {
            repo_name: repo.as_str(),
            report,
            timestamp: Utc::now(),
            delivery_id: Uuid::new_v4(),
        };
        let req = self.build_request(&payload)?;
        let res = self.http.execute(req).await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("webhook responded {status}: {body}"));
        }
        debug!(delivery_id = %payload.delivery_id, "webhook delivered");
        Ok(())
    }
}

/// Writes each report to `{dir}/{owner}__{name}-{timestamp}-{id}.md`.
/// The timestamp has millisecond precision and `id` is the first eight hex
/// digits of a fresh v4 uuid, so repeated exports never overwrite each other.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, repo: &RepoId, at: DateTime<Utc>, id: Uuid) -> PathBuf {
        let mut short = id.simple().to_string();
        short.truncate(8);
        self.dir.join(format!(
            "{}__{}-{}-{}.md",
            repo.owner(),
            repo.name(),
            at.format("%Y%m%dT%H%M%S%.3fZ"),
            short
        ))
    }
}

#[async_trait]
impl NotificationSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn send(&self, repo: &RepoId, report: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let path = self.path_for(repo, Utc::now(), Uuid::new_v4());
        tokio::fs::write(&path, report)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "report exported");
        Ok(())
    }
}

/// Mails the report as plain text over SMTP with STARTTLS.
pub struct EmailSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailSink {
    pub fn new(cfg: &config::Email) -> Result<Self> {
        let from: Mailbox = cfg
            .from
            .parse()
            .with_context(|| format!("invalid sender address {:?}", cfg.from))?;
        let to = cfg
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .with_context(|| format!("invalid recipient address {addr:?}"))
            })
            .collect::<Result<Vec<_>>>()?;
        if to.is_empty() {
            return Err(anyhow!("email sink needs at least one recipient"));
        }

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)
            .with_context(|| format!("invalid smtp host {:?}", cfg.smtp_host))?
            .port(cfg.smtp_port)
            .timeout(Some(Duration::from_secs(cfg.timeout_seconds)));
        if !cfg.username.is_empty() {
            builder = builder.credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from,
            to,
        })
    }

    pub fn build_message(&self, repo: &RepoId, report: &str) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(format!("[repo-sentinel] {repo} update"))
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder.body(report.to_string()).context("failed to build email")
    }
}

#[async_trait]
impl NotificationSink for EmailSink {
    fn name(&self) -> &str {
        "email"
    }

    #[instrument(skip_all, fields(repo = %repo))]
    async fn send(&self, repo: &RepoId, report: &str) -> Result<()> {
        let message = self.build_message(repo, report)?;
        self.transport
            .send(message)
            .await
            .context("smtp delivery failed")?;
        info!(recipients = self.to.len(), "report emailed");
        Ok(())
    }
}

pub fn sinks_from_config(cfg: &config::Notification) -> Result<Vec<Arc<dyn NotificationSink>>> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = Vec::new();
    if cfg.webhook.enabled {
        sinks.push(Arc::new(WebhookSink::new(
            &cfg.webhook.url,
            cfg.webhook.headers.clone(),
            Duration::from_secs(cfg.webhook.timeout_seconds),
        )?));
    }
    if cfg.file.enabled {
        sinks.push(Arc::new(FileSink::new(&cfg.file.dir)));
    }
    if cfg.email.enabled {
        sinks.push(Arc::new(EmailSink::new(&cfg.email)?));
    }
    Ok(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn repo() -> RepoId {
        RepoId::parse("acme/widgets").unwrap()
    }

    #[test]
    fn webhook_request_carries_payload_and_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("X-Token".to_string(), "abc".to_string());
        let sink = WebhookSink::new("https://hooks.example.com/in", headers, Duration::from_secs(5)).unwrap();

        let payload = WebhookPayload {
            repo_name: "acme/widgets",
            report: "# hi",
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap(),
            delivery_id: Uuid::nil(),
        };
        let req = sink.build_request(&payload).unwrap();
        assert_eq!(req.method(), reqwest::Method::POST);
        assert_eq!(req.url().as_str(), "https://hooks.example.com/in");
        assert_eq!(req.headers().get("X-Token").and_then(|h| h.to_str().ok()), Some("abc"));

        let body = req.body().and_then(|b| b.as_bytes()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(body).unwrap();
        assert_eq!(json["repo_name"], "acme/widgets");
        assert_eq!(json["report"], "# hi");
        assert_eq!(json["delivery_id"], Uuid::nil().to_string());
    }

    #[test]
    fn webhook_rejects_bad_url() {
        assert!(WebhookSink::new("not a url", BTreeMap::new(), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn file_sink_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("reports"));
        sink.send(&repo(), "# report body").await.unwrap();

        let mut entries = std::fs::read_dir(dir.path().join("reports")).unwrap();
        let entry = entries.next().unwrap().unwrap();
        let name = entry.file_name().into_string().unwrap();
        assert!(name.starts_with("acme__widgets-"));
        assert!(name.ends_with(".md"));
        assert_eq!(std::fs::read_to_string(entry.path()).unwrap(), "# report body");
    }

    #[test]
    fn file_name_layout() {
        let sink = FileSink::new("/tmp/out");
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 7).unwrap() + chrono::Duration::milliseconds(250);
        let id = Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000000").unwrap();
        assert_eq!(
            sink.path_for(&repo(), at, id),
            PathBuf::from("/tmp/out/acme__widgets-20260309T140507.250Z-1a2b3c4d.md")
        );
    }

    #[tokio::test]
    async fn back_to_back_exports_keep_both_reports() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path());
        sink.send(&repo(), "first").await.unwrap();
        sink.send(&repo(), "second").await.unwrap();

        let mut bodies: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| std::fs::read_to_string(e.unwrap().path()).unwrap())
            .collect();
        bodies.sort();
        assert_eq!(bodies, vec!["first", "second"]);
    }

    fn email_config() -> config::Email {
        config::Email {
            enabled: true,
            smtp_host: "smtp.example.com".into(),
            from: "Repo Sentinel <sentinel@example.com>".into(),
            to: vec!["dev@example.com".into(), "ops@example.com".into()],
            ..Default::default()
        }
    }

    #[test]
    fn email_message_is_plain_text_report() {
        let sink = EmailSink::new(&email_config()).unwrap();
        let msg = sink.build_message(&repo(), "Weekly digest for acme/widgets").unwrap();

        assert_eq!(
            msg.headers().get_raw("Subject"),
            Some("[repo-sentinel] acme/widgets update")
        );
        let to: Vec<String> = msg.envelope().to().iter().map(|a| a.to_string()).collect();
        assert_eq!(to, vec!["dev@example.com", "ops@example.com"]);
        assert_eq!(
            msg.envelope().from().map(|a| a.to_string()),
            Some("sentinel@example.com".to_string())
        );

        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Content-Type: text/plain; charset=utf-8"));
        assert!(raw.contains("Weekly digest for acme/widgets"));
    }

    #[test]
    fn email_sink_rejects_bad_addresses() {
        let mut cfg = email_config();
        cfg.to = vec!["nobody".into()];
        assert!(EmailSink::new(&cfg).is_err());

        let mut cfg = email_config();
        cfg.to.clear();
        assert!(EmailSink::new(&cfg).is_err());
    }

    #[test]
    fn sinks_follow_enabled_flags() {
        let mut cfg = config::Notification::default();
        assert!(sinks_from_config(&cfg).unwrap().is_empty());
        cfg.file.enabled = true;
        cfg.file.dir = "/tmp/out".into();
        cfg.webhook.enabled = true;
        cfg.webhook.url = "https://hooks.example.com/in".into();
        cfg.email = email_config();
        let names: Vec<String> = sinks_from_config(&cfg)
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["webhook", "file", "email"]);
    }
}
