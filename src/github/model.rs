use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Debug)]
pub struct ApiUser {
    pub login: String,
}

#[derive(Deserialize, Debug)]
pub struct ApiRepo {
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug)]
pub struct ApiGitSignature {
    pub name: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Debug)]
pub struct ApiCommitDetail {
    pub message: String,
    pub author: Option<ApiGitSignature>,
    pub committer: Option<ApiGitSignature>,
}

#[derive(Deserialize, Debug)]
pub struct ApiCommit {
    pub sha: String,
    pub html_url: String,
    pub commit: ApiCommitDetail,
    pub author: Option<ApiUser>,
}

#[derive(Deserialize, Debug)]
pub struct ApiPull {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: Option<ApiUser>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub html_url: String,
}

#[derive(Deserialize, Debug)]
pub struct ApiLabel {
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct ApiIssue {
    pub number: u64,
    pub title: String,
    pub state: String,
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub labels: Vec<ApiLabel>,
    #[serde(default)]
    pub comments: u64,
    /// Present only when the "issue" is a pull request.
    pub pull_request: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub html_url: String,
}

#[derive(Deserialize, Debug)]
pub struct ApiRelease {
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    pub author: Option<ApiUser>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub html_url: String,
}
