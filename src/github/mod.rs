use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config;
use crate::error::SentinelError;
use crate::fetch::{
    ActivityFetcher, FetchedActivity, RawCommit, RawIssue, RawPullRequest, RawRelease,
};
use crate::digest::MAX_ISSUES;
use crate::github::model::{ApiCommit, ApiIssue, ApiPull, ApiRelease, ApiRepo};
use crate::model::{ItemState, RepoId, RepoMetadata};

pub mod model;

const GITHUB_API_BASE: &str = "https://api.github.com/";
const API_VERSION: &str = "2022-11-28";
const PER_PAGE: &str = "100";
/// Upper bound on issue pages read while skipping pull requests.
const MAX_ISSUE_PAGES: usize = 5;

#[derive(Clone)]
pub struct GitHubClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    pub fn from_config(cfg: &config::GitHub) -> Result<Self> {
        let base = if cfg.api_base.trim().is_empty() {
            GITHUB_API_BASE
        } else {
            cfg.api_base.trim()
        };
        let base_url = Url::parse(base).context("invalid github.api_base")?;
        let token = Some(cfg.token.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        if token.is_none() {
            warn!("no GitHub token configured; using anonymous access with stricter rate limits");
        }
        Self::with_base_url(token, base_url, Duration::from_secs(cfg.timeout_seconds))
    }

    pub fn with_base_url(token: Option<String>, mut base_url: Url, timeout: Duration) -> Result<Self> {
        // `Url::join` drops the last segment unless the base ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let http = Client::builder()
            .user_agent("repo-sentinel/0.1")
            .timeout(timeout)
            .build()
            .context("failed to build GitHub http client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn build_request(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Request, SentinelError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| SentinelError::Validation(format!("invalid GitHub path {path}: {e}")))?;
        self.build_url_request(url, query)
    }

    /// Same headers as [`build_request`](Self::build_request), for absolute URLs
    /// such as `Link: rel="next"` targets.
    pub fn build_url_request(&self, url: Url, query: &[(&str, String)]) -> Result<reqwest::Request, SentinelError> {
        let mut req = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .query(query);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req.build().map_err(SentinelError::from)
    }

    /// Executes and maps the status. `Ok(None)` means 409 Conflict, which GitHub
    /// returns for list endpoints of an empty repository.
    async fn execute(
        &self,
        repo: &RepoId,
        request: reqwest::Request,
        path: &str,
    ) -> Result<Option<reqwest::Response>, SentinelError> {
        debug!(url = %request.url(), "github request");
        let res = self.http.execute(request).await?;
        let status = res.status();

        if status == StatusCode::NOT_FOUND {
            return Err(SentinelError::NotFound(repo.to_string()));
        }
        if status == StatusCode::CONFLICT {
            return Ok(None);
        }
        if status == StatusCode::FORBIDDEN || status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(%repo, %status, "GitHub refused the request (rate limit or permissions)");
            return Err(SentinelError::Transient(format!(
                "GitHub returned {status} for {path}: {}",
                snippet(&body)
            )));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(SentinelError::Transient(format!(
                "GitHub error {status} for {path}: {}",
                snippet(&body)
            )));
        }
        Ok(Some(res))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        repo: &RepoId,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, SentinelError> {
        let request = self.build_request(path, query)?;
        let Some(res) = self.execute(repo, request, path).await? else {
            return Ok(None);
        };
        decode(res, path).await.map(Some)
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        repo: &RepoId,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, SentinelError> {
        Ok(self.get_json::<Vec<T>>(repo, path, query).await?.unwrap_or_default())
    }

    pub async fn metadata(&self, repo: &RepoId) -> Result<RepoMetadata, SentinelError> {
        let api: ApiRepo = self
            .get_json(repo, &format!("repos/{repo}"), &[])
            .await?
            .ok_or_else(|| SentinelError::Transient(format!("unexpected conflict reading {repo}")))?;
        Ok(convert_repo(api))
    }

    async fn commits(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<RawCommit>, SentinelError> {
        let query = [
            ("since", iso(since)),
            ("until", iso(until)),
            ("per_page", PER_PAGE.to_string()),
        ];
        let api: Vec<ApiCommit> = self
            .get_list(repo, &format!("repos/{repo}/commits"), &query)
            .await?;
        Ok(api.into_iter().filter_map(convert_commit).collect())
    }

    async fn pull_requests(&self, repo: &RepoId) -> Result<Vec<RawPullRequest>, SentinelError> {
        let query = [
            ("state", "all".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", PER_PAGE.to_string()),
        ];
        let api: Vec<ApiPull> = self
            .get_list(repo, &format!("repos/{repo}/pulls"), &query)
            .await?;
        Ok(api.into_iter().map(convert_pull).collect())
    }

    /// One page of the issues endpoint plus its `rel="next"` link.
    async fn issue_page(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
        cursor: Option<Url>,
    ) -> Result<(Vec<RawIssue>, Option<Url>), SentinelError> {
        let path = format!("repos/{repo}/issues");
        let request = match cursor {
            Some(url) => self.build_url_request(url, &[])?,
            None => {
                let query = [
                    ("state", "all".to_string()),
                    ("sort", "updated".to_string()),
                    ("direction", "desc".to_string()),
                    ("since", iso(since)),
                    ("per_page", PER_PAGE.to_string()),
                ];
                self.build_request(&path, &query)?
            }
        };
        let Some(res) = self.execute(repo, request, &path).await? else {
            return Ok((Vec::new(), None));
        };
        let next = res
            .headers()
            .get(header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(|link| parse_rel_url(link, "next"))
            .and_then(|url| Url::parse(&url).ok());
        let api: Vec<ApiIssue> = decode(res, &path).await?;
        Ok((api.into_iter().map(convert_issue).collect(), next))
    }

    async fn issues(&self, repo: &RepoId, since: DateTime<Utc>) -> Result<Vec<RawIssue>, SentinelError> {
        collect_issues(MAX_ISSUES, MAX_ISSUE_PAGES, |cursor| {
            self.issue_page(repo, since, cursor)
        })
        .await
    }

    async fn releases(&self, repo: &RepoId) -> Result<Vec<RawRelease>, SentinelError> {
        let query = [("per_page", "30".to_string())];
        let api: Vec<ApiRelease> = self
            .get_list(repo, &format!("repos/{repo}/releases"), &query)
            .await?;
        Ok(api.into_iter().filter_map(convert_release).collect())
    }
}

#[async_trait]
impl ActivityFetcher for GitHubClient {
    #[instrument(skip_all, fields(repo = %repo))]
    async fn fetch(
        &self,
        repo: &RepoId,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<FetchedActivity, SentinelError> {
        let metadata = self.metadata(repo).await?;
        let (commits, pull_requests, issues, releases) = tokio::try_join!(
            self.commits(repo, since, until),
            self.pull_requests(repo),
            self.issues(repo, since),
            self.releases(repo),
        )?;
        info!(
            commits = commits.len(),
            pull_requests = pull_requests.len(),
            issues = issues.len(),
            releases = releases.len(),
            "fetched repository activity"
        );
        Ok(FetchedActivity {
            metadata,
            commits,
            pull_requests,
            issues,
            releases,
        })
    }

    #[instrument(skip_all, fields(repo = %repo))]
    async fn repository_exists(&self, repo: &RepoId) -> Result<bool, SentinelError> {
        match self.metadata(repo).await {
            Ok(_) => Ok(true),
            Err(SentinelError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// The issues endpoint interleaves pull requests with issues; a page full of
/// pull requests must not starve the issue list. Follows `next` links until
/// `wanted` real issues are collected, the links run out, or `max_pages` is hit.
pub(crate) async fn collect_issues<F, Fut>(
    wanted: usize,
    max_pages: usize,
    mut fetch_page: F,
) -> Result<Vec<RawIssue>, SentinelError>
where
    F: FnMut(Option<Url>) -> Fut,
    Fut: Future<Output = Result<(Vec<RawIssue>, Option<Url>), SentinelError>>,
{
    let mut issues = Vec::new();
    let mut cursor = None;
    for page in 1..=max_pages {
        let (items, next) = fetch_page(cursor.take()).await?;
        issues.extend(items.into_iter().filter(|i| !i.is_pull_request));
        if issues.len() >= wanted {
            break;
        }
        match next {
            Some(url) => cursor = Some(url),
            None => break,
        }
        if page == max_pages {
            debug!(collected = issues.len(), "issue page limit reached");
        }
    }
    Ok(issues)
}

/// URL of the `Link` header entry with the given `rel`, e.g. `next`.
fn parse_rel_url(link_header: &str, rel: &str) -> Option<String> {
    let wanted = format!("rel=\"{rel}\"");
    link_header.split(',').find_map(|part| {
        let part = part.trim();
        if !part.split(';').skip(1).any(|p| p.trim() == wanted) {
            return None;
        }
        let start = part.find('<')?;
        let end = part.find('>')?;
        Some(part[start + 1..end].to_string())
    })
}

async fn decode<T: DeserializeOwned>(res: reqwest::Response, path: &str) -> Result<T, SentinelError> {
    res.json::<T>()
        .await
        .map_err(|e| SentinelError::Transient(format!("invalid GitHub response for {path}: {e}")))
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn snippet(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn login_or_unknown(user: Option<model::ApiUser>) -> String {
    user.map(|u| u.login).unwrap_or_else(|| "unknown".into())
}

fn parse_state(raw: &str) -> ItemState {
    ItemState::parse_state(raw).unwrap_or(ItemState::Closed)
}

pub(crate) fn convert_repo(api: ApiRepo) -> RepoMetadata {
    RepoMetadata {
        description: api.description.filter(|d| !d.trim().is_empty()),
        language: api.language,
        stars: api.stargazers_count,
        forks: api.forks_count,
        open_issues: api.open_issues_count,
        updated_at: api.updated_at,
    }
}

/// Commits without any signature date cannot be windowed and are dropped.
pub(crate) fn convert_commit(api: ApiCommit) -> Option<RawCommit> {
    let detail = api.commit;
    let date = detail
        .author
        .as_ref()
        .and_then(|a| a.date)
        .or_else(|| detail.committer.as_ref().and_then(|c| c.date))?;
    let author = api
        .author
        .map(|u| u.login)
        .or_else(|| detail.author.and_then(|a| a.name))
        .unwrap_or_else(|| "unknown".into());
    Some(RawCommit {
        sha: api.sha,
        message: detail.message,
        author,
        date,
        url: api.html_url,
    })
}

pub(crate) fn convert_pull(api: ApiPull) -> RawPullRequest {
    RawPullRequest {
        number: api.number,
        title: api.title,
        author: login_or_unknown(api.user),
        state: parse_state(&api.state),
        merged: api.merged_at.is_some(),
        created_at: api.created_at,
        updated_at: api.updated_at,
        url: api.html_url,
    }
}

pub(crate) fn convert_issue(api: ApiIssue) -> RawIssue {
    RawIssue {
        number: api.number,
        title: api.title,
        author: login_or_unknown(api.user),
        state: parse_state(&api.state),
        labels: api.labels.into_iter().map(|l| l.name).collect(),
        comments: api.comments,
        is_pull_request: api.pull_request.is_some(),
        created_at: api.created_at,
        updated_at: api.updated_at,
        url: api.html_url,
    }
}

/// Drafts are unpublished and never reported.
pub(crate) fn convert_release(api: ApiRelease) -> Option<RawRelease> {
    if api.draft {
        return None;
    }
    Some(RawRelease {
        tag: api.tag_name,
        name: api.name.filter(|n| !n.trim().is_empty()),
        author: api.author.map(|u| u.login),
        prerelease: api.prerelease,
        body: api.body,
        created_at: api.published_at.unwrap_or(api.created_at),
        url: api.html_url,
    })
}
