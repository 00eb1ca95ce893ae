//! Per-repository update pipeline: fetch → render → persist → notify.
//!
//! Each repository is an isolated unit of work. Errors inside one unit are
//! logged and counted; they never abort the rest of the cycle.
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::digest::DigestBuilder;
use crate::error::SentinelError;
use crate::model::{RepoId, Subscription};
use crate::notify::NotificationSink;
use crate::report::ReportRenderer;
use crate::store::SubscriptionStore;

pub const DEFAULT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Never started because the cycle was cancelled.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    Skipped,
}

pub struct Orchestrator {
    builder: DigestBuilder,
    renderer: ReportRenderer,
    store: Arc<dyn SubscriptionStore>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    window: Duration,
    concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        builder: DigestBuilder,
        renderer: ReportRenderer,
        store: Arc<dyn SubscriptionStore>,
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self {
            builder,
            renderer,
            store,
            sinks,
            window: Duration::days(DEFAULT_WINDOW_DAYS),
            concurrency: 1,
        }
    }

    /// Lookback for never-checked subscriptions and ad-hoc checks.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// `[last_updated, end)` when the subscription has been checked before,
    /// otherwise `[end - window, end)`.
    pub fn window_for(&self, sub: &Subscription, end: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = sub.last_updated.unwrap_or(end - self.window).min(end);
        (start, end)
    }

    pub async fn run_cycle(&self, subscriptions: &[Subscription]) -> CycleSummary {
        let (_tx, rx) = watch::channel(false);
        self.run_cycle_until(subscriptions, &rx).await
    }

    /// Like [`run_cycle`](Self::run_cycle), but stops starting new repositories
    /// once `shutdown` reads `true`. Work already started runs to completion.
    pub async fn run_cycle_until(
        &self,
        subscriptions: &[Subscription],
        shutdown: &watch::Receiver<bool>,
    ) -> CycleSummary {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("cycle", %cycle_id, repos = subscriptions.len());
        async move {
            let outcomes: Vec<Outcome> = stream::iter(subscriptions)
                .map(|sub| async move {
                    if *shutdown.borrow() {
                        return Outcome::Skipped;
                    }
                    match self.process_subscription(sub).await {
                        Ok(_) => Outcome::Succeeded,
                        Err(err) => {
                            error!(repo = %sub.repo, kind = err.kind(), error = %err, "repository update failed");
                            Outcome::Failed
                        }
                    }
                })
                .buffered(self.concurrency)
                .collect()
                .await;

            let mut summary = CycleSummary::default();
            for outcome in outcomes {
                match outcome {
                    Outcome::Succeeded => summary.succeeded += 1,
                    Outcome::Failed => summary.failed += 1,
                    Outcome::Skipped => summary.skipped += 1,
                }
            }
            info!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                skipped = summary.skipped,
                "cycle finished"
            );
            summary
        }
        .instrument(span)
        .await
    }

    /// Ad-hoc check. Subscribed repositories go through the full pipeline;
    /// unsubscribed ones are fetched and rendered only. Errors propagate.
    pub async fn run_single(&self, repo: &RepoId) -> Result<String, SentinelError> {
        self.run_single_with_lookback(repo, None).await
    }

    /// With an explicit `lookback` the check is a preview of `[now - lookback, now)`:
    /// nothing is recorded and no sink is notified, subscribed or not, so the
    /// subscription's `last_updated` keeps tiling. Without one this is [`run_single`](Self::run_single).
    #[instrument(skip_all, fields(repo = %repo))]
    pub async fn run_single_with_lookback(
        &self,
        repo: &RepoId,
        lookback: Option<Duration>,
    ) -> Result<String, SentinelError> {
        if lookback.is_none() {
            if let Some(sub) = self.store.get(repo).await? {
                return self.process_subscription(&sub).await;
            }
        }
        let end = Utc::now();
        let start = end - lookback.unwrap_or(self.window);
        let update = self.builder.build(repo, start, end).await?;
        Ok(self.renderer.render(repo, &update).await)
    }

    #[instrument(skip_all, fields(repo = %sub.repo, subscription_id = sub.id))]
    async fn process_subscription(&self, sub: &Subscription) -> Result<String, SentinelError> {
        let (start, end) = self.window_for(sub, Utc::now());
        let update = self.builder.build(&sub.repo, start, end).await?;
        let report = self.renderer.render(&sub.repo, &update).await;

        self.store.commit_update(sub.id, &update, end).await?;
        info!(items = update.items().count(), "update recorded");

        self.notify(&sub.repo, &report).await;
        Ok(report)
    }

    async fn notify(&self, repo: &RepoId, report: &str) {
        for sink in &self.sinks {
            if let Err(err) = sink.send(repo, report).await {
                warn!(sink = sink.name(), error = %format!("{err:#}"), "notification failed");
            }
        }
    }
}
