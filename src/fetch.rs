//! Capability boundary towards the code-hosting API.
//!
//! Implementations return raw, un-windowed activity. Windowing, classification
//! and truncation happen in [`crate::digest`].

use crate::error::SentinelError;
use crate::model::{ItemState, RepoId, RepoMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommit {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub date: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPullRequest {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub state: ItemState,
    pub merged: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawIssue {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub state: ItemState,
    pub labels: Vec<String>,
    pub comments: u64,
    /// The issues endpoint also lists pull requests.
    pub is_pull_request: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRelease {
    pub tag: String,
    pub name: Option<String>,
    pub author: Option<String>,
    pub prerelease: bool,
    pub body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedActivity {
    pub metadata: RepoMetadata,
    pub commits: Vec<RawCommit>,
    pub pull_requests: Vec<RawPullRequest>,
    pub issues: Vec<RawIssue>,
    pub releases: Vec<RawRelease>,
}

#[async_trait]
pub trait ActivityFetcher: Send + Sync {
    /// Activity touched around `[since, until)`. Implementations may return
    /// items outside the window; callers filter.
    async fn fetch(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<FetchedActivity, SentinelError>;

    async fn repository_exists(&self, repo: &RepoId) -> Result<bool, SentinelError>;
}
