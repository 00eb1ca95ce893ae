//! Report rendering: AI summary first, deterministic template as fallback.
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::ai::{CompletionClient, CompletionRequest};
use crate::config;
use crate::error::SentinelError;
use crate::model::{RepoId, RepositoryUpdate};

pub mod fallback;
pub mod prompt;

#[derive(Debug, Clone, PartialEq)]
pub struct ReportSettings {
    pub language: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound for the whole completion call, independent of the client's own timeout.
    pub timeout: Duration,
}

impl ReportSettings {
    pub fn from_config(cfg: &config::Ai) -> Self {
        Self {
            language: cfg.language.clone(),
            max_tokens: cfg.max_tokens,
            temperature: cfg.effective_temperature(),
            timeout: Duration::from_secs(cfg.timeout_seconds),
        }
    }
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self::from_config(&config::Ai::default())
    }
}

#[derive(Clone)]
pub struct ReportRenderer {
    ai: Option<Arc<dyn CompletionClient>>,
    settings: ReportSettings,
}

impl ReportRenderer {
    pub fn new(ai: Option<Arc<dyn CompletionClient>>, settings: ReportSettings) -> Self {
        Self { ai, settings }
    }

    pub fn template_only() -> Self {
        Self::new(None, ReportSettings::default())
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai.is_some()
    }

    pub fn completion_request(&self, repo: &RepoId, update: &RepositoryUpdate) -> CompletionRequest {
        CompletionRequest {
            system: prompt::system_prompt(&self.settings.language),
            user: prompt::user_prompt(repo, update),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }

    /// Never fails: any AI error degrades to [`fallback::render`].
    #[instrument(skip_all, fields(repo = %repo))]
    pub async fn render(&self, repo: &RepoId, update: &RepositoryUpdate) -> String {
        if let Some(ai) = &self.ai {
            match self.render_with_ai(ai.as_ref(), repo, update).await {
                Ok(text) => {
                    info!(provider = ai.name(), "AI report generated");
                    return text;
                }
                Err(err) => {
                    warn!(provider = ai.name(), error = %err, "AI report failed; using template");
                }
            }
        }
        fallback::render(repo, update, Utc::now())
    }

    async fn render_with_ai(
        &self,
        ai: &dyn CompletionClient,
        repo: &RepoId,
        update: &RepositoryUpdate,
    ) -> Result<String, SentinelError> {
        let request = self.completion_request(repo, update);
        let text = tokio::time::timeout(self.settings.timeout, ai.complete(&request)).await??;
        if text.trim().is_empty() {
            return Err(SentinelError::Transient("completion returned no text".into()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RepoMetadata;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct ScriptedAi {
        reply: Result<String, SentinelError>,
        delay: Option<Duration>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedAi {
        fn new(reply: Result<String, SentinelError>) -> Self {
            Self {
                reply,
                delay: None,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedAi {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<String, SentinelError> {
            self.seen.lock().unwrap().push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone()
        }
    }

    fn update() -> RepositoryUpdate {
        let t = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        RepositoryUpdate::empty(
            RepoId::parse("acme/widgets").unwrap(),
            RepoMetadata::default(),
            t,
            t,
        )
    }

    fn renderer(ai: Arc<ScriptedAi>, timeout: Duration) -> ReportRenderer {
        ReportRenderer::new(
            Some(ai as Arc<dyn CompletionClient>),
            ReportSettings {
                language: "English".into(),
                max_tokens: 1500,
                temperature: 0.3,
                timeout,
            },
        )
    }

    #[tokio::test]
    async fn ai_text_is_returned_unmodified() {
        let ai = Arc::new(ScriptedAi::new(Ok("  # Custom summary\n".into())));
        let r = renderer(ai.clone(), Duration::from_secs(5));
        let u = update();
        assert_eq!(r.render(&u.repo, &u).await, "  # Custom summary\n");

        let seen = ai.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].max_tokens, 1500);
        assert_eq!(seen[0].temperature, 0.3);
        assert!(seen[0].system.contains("English"));
        assert!(seen[0].user.contains("acme/widgets"));
    }

    #[tokio::test]
    async fn ai_error_falls_back_to_template() {
        let ai = Arc::new(ScriptedAi::new(Err(SentinelError::Transient("request timed out".into()))));
        let r = renderer(ai, Duration::from_secs(5));
        let u = update();
        let report = r.render(&u.repo, &u).await;
        assert!(report.starts_with("# 📊 acme/widgets Update Report"));
        assert!(report.contains("## 📈 Activity Statistics"));
    }

    #[tokio::test]
    async fn blank_completion_falls_back() {
        let ai = Arc::new(ScriptedAi::new(Ok("   \n".into())));
        let r = renderer(ai, Duration::from_secs(5));
        let u = update();
        assert!(r.render(&u.repo, &u).await.contains("_no new Commits_"));
    }

    #[tokio::test]
    async fn slow_completion_is_cut_off() {
        let mut ai = ScriptedAi::new(Ok("late".into()));
        ai.delay = Some(Duration::from_millis(500));
        let r = renderer(Arc::new(ai), Duration::from_millis(20));
        let u = update();
        let report = r.render(&u.repo, &u).await;
        assert_ne!(report, "late");
        assert!(report.contains("## 🐛 Issues (0)"));
    }

    #[tokio::test]
    async fn template_only_never_calls_out() {
        let r = ReportRenderer::template_only();
        assert!(!r.ai_enabled());
        let u = update();
        assert!(r.render(&u.repo, &u).await.contains("_no new Pull Requests_"));
    }
}
