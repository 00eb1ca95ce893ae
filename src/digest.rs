//! Turns raw fetched activity into a windowed [`RepositoryUpdate`].
//!
//! Every comparison uses the half-open window `[start, end)`. Issues and pull
//! requests qualify through their creation time (`Freshness::New`) or, failing
//! that, their last-update time (`Freshness::Updated`). Each sequence is then
//! ordered most-recently-touched first and truncated to its cap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::error::SentinelError;
use crate::fetch::{ActivityFetcher, FetchedActivity};
use crate::model::{Commit, Freshness, Issue, PullRequest, Release, RepoId, RepositoryUpdate};

pub const MAX_COMMITS: usize = 50;
pub const MAX_PULL_REQUESTS: usize = 30;
pub const MAX_ISSUES: usize = 30;
pub const MAX_RELEASES: usize = 10;

const SHORT_SHA_LEN: usize = 7;

#[derive(Clone)]
pub struct DigestBuilder {
    fetcher: Arc<dyn ActivityFetcher>,
}

impl DigestBuilder {
    pub fn new(fetcher: Arc<dyn ActivityFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Arc<dyn ActivityFetcher> {
        &self.fetcher
    }

    #[instrument(skip_all, fields(repo = %repo))]
    pub async fn build(
        &self,
        repo: &RepoId,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<RepositoryUpdate, SentinelError> {
        let fetched = self.fetcher.fetch(repo, window_start, window_end).await?;
        let update = digest(repo.clone(), fetched, window_start, window_end);
        debug!(
            commits = update.commits.len(),
            pull_requests = update.pull_requests.len(),
            issues = update.issues.len(),
            releases = update.releases.len(),
            "digest built"
        );
        Ok(update)
    }
}

fn in_window(ts: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    start <= ts && ts < end
}

/// `None` when neither timestamp falls inside the window.
pub fn classify(
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<Freshness> {
    if in_window(created_at, start, end) {
        Some(Freshness::New)
    } else if in_window(updated_at, start, end) {
        Some(Freshness::Updated)
    } else {
        None
    }
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().trim_end().to_string()
}

fn short_sha(sha: &str) -> String {
    sha.chars().take(SHORT_SHA_LEN).collect()
}

fn dedup_labels(labels: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        if !out.contains(&label) {
            out.push(label);
        }
    }
    out
}

/// Newest first, stable for equal timestamps, then cap.
fn newest_first<T>(mut items: Vec<T>, touched: impl Fn(&T) -> DateTime<Utc>, cap: usize) -> Vec<T> {
    items.sort_by(|a, b| touched(b).cmp(&touched(a)));
    items.truncate(cap);
    items
}

/// Pure part of [`DigestBuilder::build`].
pub fn digest(
    repo: RepoId,
    fetched: FetchedActivity,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> RepositoryUpdate {
    let (start, end) = (window_start, window_end);

    let commits: Vec<Commit> = fetched
        .commits
        .into_iter()
        .filter(|c| in_window(c.date, start, end))
        .map(|c| Commit {
            sha: short_sha(&c.sha),
            message: first_line(&c.message),
            author: c.author,
            timestamp: c.date,
            url: c.url,
        })
        .collect();

    let pull_requests: Vec<PullRequest> = fetched
        .pull_requests
        .into_iter()
        .filter_map(|p| {
            let freshness = classify(p.created_at, p.updated_at, start, end)?;
            Some(PullRequest {
                number: p.number,
                title: p.title,
                author: p.author,
                state: p.state,
                merged: p.merged,
                freshness,
                created_at: p.created_at,
                updated_at: p.updated_at,
                url: p.url,
            })
        })
        .collect();

    let issues: Vec<Issue> = fetched
        .issues
        .into_iter()
        .filter(|i| !i.is_pull_request)
        .filter_map(|i| {
            let freshness = classify(i.created_at, i.updated_at, start, end)?;
            Some(Issue {
                number: i.number,
                title: i.title,
                author: i.author,
                state: i.state,
                labels: dedup_labels(i.labels),
                comments: i.comments,
                freshness,
                created_at: i.created_at,
                updated_at: i.updated_at,
                url: i.url,
            })
        })
        .collect();

    let releases: Vec<Release> = fetched
        .releases
        .into_iter()
        .filter(|r| in_window(r.created_at, start, end))
        .map(|r| Release {
            name: r.name.unwrap_or_else(|| r.tag.clone()),
            tag: r.tag,
            author: r.author.unwrap_or_else(|| "unknown".into()),
            prerelease: r.prerelease,
            body: r.body.unwrap_or_default(),
            timestamp: r.created_at,
            url: r.url,
        })
        .collect();

    RepositoryUpdate {
        repo,
        metadata: fetched.metadata,
        commits: newest_first(commits, |c| c.timestamp, MAX_COMMITS),
        pull_requests: newest_first(pull_requests, |p| p.updated_at, MAX_PULL_REQUESTS),
        issues: newest_first(issues, |i| i.updated_at, MAX_ISSUES),
        releases: newest_first(releases, |r| r.timestamp, MAX_RELEASES),
        window_start,
        window_end,
    }
}
