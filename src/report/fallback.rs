//! Deterministic Markdown report, used whenever the AI path is unavailable.
//!
//! Output depends only on the digest and `generated_at`. The five sections
//! (commits, pull requests, issues, releases, statistics) always appear, in
//! that order; empty sequences render a placeholder line.

use chrono::{DateTime, Utc};

use crate::model::{Issue, ItemState, PullRequest, Release, RepoId, RepositoryUpdate};
use crate::report::prompt::listing;

pub const COMMIT_DISPLAY_CAP: usize = 15;
pub const ITEM_DISPLAY_CAP: usize = 10;

fn pull_glyph(pr: &PullRequest) -> &'static str {
    if pr.merged {
        "✅"
    } else {
        match pr.state {
            ItemState::Open => "🟢",
            ItemState::Closed => "🔴",
        }
    }
}

fn issue_glyph(issue: &Issue) -> &'static str {
    match issue.state {
        ItemState::Open => "🟢",
        ItemState::Closed => "🔴",
    }
}

fn issue_line(issue: &Issue) -> String {
    let labels = if issue.labels.is_empty() {
        String::new()
    } else {
        format!(" [{}]", issue.labels.join(", "))
    };
    format!(
        "- {} **#{}**: {}{} - *{}*",
        issue_glyph(issue),
        issue.number,
        issue.title,
        labels,
        issue.author
    )
}

fn release_line(release: &Release) -> String {
    let pre = if release.prerelease { " (pre-release)" } else { "" };
    format!("- **{}**: {}{} - *{}*", release.tag, release.name, pre, release.author)
}

fn section(out: &mut Vec<String>, title: &str, count: usize, body: String) {
    out.push(format!("## {title} ({count})"));
    out.push(String::new());
    out.push(body);
    out.push(String::new());
}

pub fn render(repo: &RepoId, update: &RepositoryUpdate, generated_at: DateTime<Utc>) -> String {
    let meta = &update.metadata;
    let mut out: Vec<String> = vec![
        format!("# 📊 {repo} Update Report"),
        String::new(),
        format!("**Repository**: [{repo}]({})", repo.html_url()),
        format!(
            "**Description**: {}",
            meta.description.as_deref().unwrap_or("N/A")
        ),
        format!(
            "**Stars**: ⭐ {} | **Forks**: 🍴 {} | **Language**: {}",
            meta.stars,
            meta.forks,
            meta.language.as_deref().unwrap_or("N/A")
        ),
        format!(
            "**Window**: {} → {}",
            update.window_start.format("%Y-%m-%d %H:%M UTC"),
            update.window_end.format("%Y-%m-%d %H:%M UTC")
        ),
        String::new(),
        "---".into(),
        String::new(),
    ];

    section(
        &mut out,
        "📝 Commits",
        update.commits.len(),
        listing(&update.commits, COMMIT_DISPLAY_CAP, "_no new Commits_", |c| {
            format!(
                "- **{}**: {} - *{}* - {}",
                c.sha,
                c.message,
                c.author,
                c.timestamp.format("%Y-%m-%d")
            )
        }),
    );
    section(
        &mut out,
        "🔀 Pull Requests",
        update.pull_requests.len(),
        listing(&update.pull_requests, ITEM_DISPLAY_CAP, "_no new Pull Requests_", |p| {
            format!("- {} **#{}**: {} - *{}*", pull_glyph(p), p.number, p.title, p.author)
        }),
    );
    section(
        &mut out,
        "🐛 Issues",
        update.issues.len(),
        listing(&update.issues, ITEM_DISPLAY_CAP, "_no new Issues_", issue_line),
    );
    section(
        &mut out,
        "🚀 Releases",
        update.releases.len(),
        listing(&update.releases, ITEM_DISPLAY_CAP, "_no new Releases_", release_line),
    );

    let new_pulls = update.pull_requests.iter().filter(|p| p.freshness.is_new()).count();
    let merged = update.pull_requests.iter().filter(|p| p.merged).count();
    let new_issues = update.issues.iter().filter(|i| i.freshness.is_new()).count();

    out.extend([
        "---".to_string(),
        String::new(),
        "## 📈 Activity Statistics".to_string(),
        String::new(),
        format!("- 📝 Commits: {}", update.commits.len()),
        format!(
            "- 🔀 Pull Requests: {} (new: {}, updated: {}, merged: {})",
            update.pull_requests.len(),
            new_pulls,
            update.pull_requests.len() - new_pulls,
            merged
        ),
        format!(
            "- 🐛 Issues: {} (new: {}, updated: {})",
            update.issues.len(),
            new_issues,
            update.issues.len() - new_issues
        ),
        format!("- 🚀 Releases: {}", update.releases.len()),
        String::new(),
        format!(
            "*Report generated at: {}*",
            generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    ]);

    out.join("\n")
}
