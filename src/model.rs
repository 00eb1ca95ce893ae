use crate::error::SentinelError;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

static REPO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,38}/[A-Za-z0-9._-]{1,100}$").expect("valid repo regex")
});

/// `owner/name` identifier of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoId(String);

impl RepoId {
    pub fn parse(raw: &str) -> Result<Self, SentinelError> {
        let trimmed = raw.trim();
        if !REPO_RE.is_match(trimmed) {
            return Err(SentinelError::Validation(format!(
                "repository name must look like owner/name, got {raw:?}"
            )));
        }
        let name = trimmed.split_once('/').map(|(_, n)| n).unwrap_or_default();
        if name == "." || name == ".." {
            return Err(SentinelError::Validation(format!(
                "repository name {raw:?} is not valid"
            )));
        }
        Ok(RepoId(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn owner(&self) -> &str {
        self.0.split_once('/').map(|(o, _)| o).unwrap_or(&self.0)
    }

    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or(&self.0)
    }

    pub fn html_url(&self) -> String {
        format!("https://github.com/{}", self.0)
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RepoId {
    type Error = SentinelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RepoId::parse(&value)
    }
}

impl From<RepoId> for String {
    fn from(value: RepoId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Open,
    Closed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Open => "open",
            ItemState::Closed => "closed",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "open" => Some(ItemState::Open),
            "closed" => Some(ItemState::Closed),
            _ => None,
        }
    }
}

/// Whether a windowed issue/PR was created inside the window or only touched in it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    New,
    Updated,
}

impl Freshness {
    pub fn is_new(&self) -> bool {
        matches!(self, Freshness::New)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub state: ItemState,
    /// Orthogonal to `state`: closed and not merged means abandoned.
    pub merged: bool,
    pub freshness: Freshness,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub author: String,
    pub state: ItemState,
    pub labels: Vec<String>,
    pub comments: u64,
    pub freshness: Freshness,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Release {
    pub tag: String,
    pub name: String,
    pub author: String,
    pub prerelease: bool,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
}

/// One windowed activity record, borrowed from a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityItem<'a> {
    Commit(&'a Commit),
    PullRequest(&'a PullRequest),
    Issue(&'a Issue),
    Release(&'a Release),
}

impl ActivityItem<'_> {
    /// Short hash, `#number` or tag.
    pub fn id(&self) -> String {
        match self {
            ActivityItem::Commit(c) => c.sha.clone(),
            ActivityItem::PullRequest(p) => format!("#{}", p.number),
            ActivityItem::Issue(i) => format!("#{}", i.number),
            ActivityItem::Release(r) => r.tag.clone(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            ActivityItem::Commit(c) => &c.message,
            ActivityItem::PullRequest(p) => &p.title,
            ActivityItem::Issue(i) => &i.title,
            ActivityItem::Release(r) => &r.name,
        }
    }

    pub fn author(&self) -> &str {
        match self {
            ActivityItem::Commit(c) => &c.author,
            ActivityItem::PullRequest(p) => &p.author,
            ActivityItem::Issue(i) => &i.author,
            ActivityItem::Release(r) => &r.author,
        }
    }

    /// Last time the item was touched.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ActivityItem::Commit(c) => c.timestamp,
            ActivityItem::PullRequest(p) => p.updated_at,
            ActivityItem::Issue(i) => i.updated_at,
            ActivityItem::Release(r) => r.timestamp,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            ActivityItem::Commit(c) => &c.url,
            ActivityItem::PullRequest(p) => &p.url,
            ActivityItem::Issue(i) => &i.url,
            ActivityItem::Release(r) => &r.url,
        }
    }
}

/// Point-in-time repository facts; not windowed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoMetadata {
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Digest of one repository's activity inside `[window_start, window_end)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepositoryUpdate {
    pub repo: RepoId,
    pub metadata: RepoMetadata,
    #[serde(default)]
    pub commits: Vec<Commit>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequest>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub releases: Vec<Release>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl RepositoryUpdate {
    pub fn empty(
        repo: RepoId,
        metadata: RepoMetadata,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Self {
        Self {
            repo,
            metadata,
            commits: Vec::new(),
            pull_requests: Vec::new(),
            issues: Vec::new(),
            releases: Vec::new(),
            window_start,
            window_end,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.commits.is_empty()
            && self.pull_requests.is_empty()
            && self.issues.is_empty()
            && self.releases.is_empty()
    }

    /// All items in section order: commits, pull requests, issues, releases.
    pub fn items(&self) -> impl Iterator<Item = ActivityItem<'_>> {
        self.commits
            .iter()
            .map(ActivityItem::Commit)
            .chain(self.pull_requests.iter().map(ActivityItem::PullRequest))
            .chain(self.issues.iter().map(ActivityItem::Issue))
            .chain(self.releases.iter().map(ActivityItem::Release))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub id: i64,
    pub repo: RepoId,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// `None` until the first successful update cycle.
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateRecord {
    pub id: i64,
    pub subscription_id: i64,
    pub update: RepositoryUpdate,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_valid_repo_ids() {
        let id = RepoId::parse(" rust-lang/rust ").unwrap();
        assert_eq!(id.as_str(), "rust-lang/rust");
        assert_eq!(id.owner(), "rust-lang");
        assert_eq!(id.name(), "rust");
        assert_eq!(id.html_url(), "https://github.com/rust-lang/rust");
        assert!(RepoId::parse("a/b.c_d-e").is_ok());
    }

    #[test]
    fn rejects_malformed_repo_ids() {
        for raw in ["", "rust", "/rust", "rust/", "a/b/c", "-owner/x", "owner/..", "own er/x"] {
            let err = RepoId::parse(raw).unwrap_err();
            assert!(matches!(err, SentinelError::Validation(_)), "{raw}");
        }
    }

    #[test]
    fn repo_id_deserialization_validates() {
        let ok: RepoId = serde_json::from_str("\"tokio-rs/tokio\"").unwrap();
        assert_eq!(ok.as_str(), "tokio-rs/tokio");
        assert!(serde_json::from_str::<RepoId>("\"not a repo\"").is_err());
    }

    #[test]
    fn missing_sequences_deserialize_as_empty() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let json = serde_json::json!({
            "repo": "a/b",
            "metadata": RepoMetadata::default(),
            "window_start": t,
            "window_end": t,
        });
        let update: RepositoryUpdate = serde_json::from_value(json).unwrap();
        assert!(update.is_quiet());
        assert_eq!(update.items().count(), 0);
    }

    #[test]
    fn activity_item_accessors() {
        let t = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let issue = Issue {
            number: 7,
            title: "crash".into(),
            author: "bob".into(),
            state: ItemState::Open,
            labels: vec!["bug".into()],
            comments: 2,
            freshness: Freshness::New,
            created_at: t,
            updated_at: t,
            url: "https://github.com/a/b/issues/7".into(),
        };
        let item = ActivityItem::Issue(&issue);
        assert_eq!(item.id(), "#7");
        assert_eq!(item.title(), "crash");
        assert_eq!(item.author(), "bob");
        assert_eq!(item.timestamp(), t);
        assert!(item.url().ends_with("/issues/7"));
    }
}
