//! Prompt construction for the AI report path.

use crate::model::{Freshness, ItemState, RepoId, RepositoryUpdate};

/// Items listed per activity sequence in the user prompt.
pub const PROMPT_ITEM_CAP: usize = 10;

pub fn system_prompt(language: &str) -> String {
    format!(
        "You are a professional technical analyst who summarizes GitHub repository activity \
         into formal project update reports. Write the report in {language}."
    )
}

/// Bounded listing: at most `cap` lines, then a literal `...and N more` trailer.
pub(crate) fn listing<T>(items: &[T], cap: usize, empty: &str, line: impl Fn(&T) -> String) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    let mut lines: Vec<String> = items.iter().take(cap).map(line).collect();
    if items.len() > cap {
        lines.push(format!("...and {} more", items.len() - cap));
    }
    lines.join("\n")
}

fn state_label(state: ItemState, merged: bool) -> &'static str {
    if merged {
        "merged"
    } else {
        state.as_str()
    }
}

fn freshness_label(freshness: Freshness) -> &'static str {
    match freshness {
        Freshness::New => "new",
        Freshness::Updated => "updated",
    }
}

pub fn user_prompt(repo: &RepoId, update: &RepositoryUpdate) -> String {
    let meta = &update.metadata;

    let commits = listing(&update.commits, PROMPT_ITEM_CAP, "No new commits", |c| {
        format!("- {}: {} by {}", c.sha, c.message, c.author)
    });
    let pulls = listing(&update.pull_requests, PROMPT_ITEM_CAP, "No new pull requests", |p| {
        format!(
            "- #{}: {} ({}, {}) by {}",
            p.number,
            p.title,
            state_label(p.state, p.merged),
            freshness_label(p.freshness),
            p.author
        )
    });
    let issues = listing(&update.issues, PROMPT_ITEM_CAP, "No new issues", |i| {
        let labels = if i.labels.is_empty() {
            String::new()
        } else {
            format!(" [{}]", i.labels.join(", "))
        };
        format!(
            "- #{}: {}{} ({}, {}) by {}",
            i.number,
            i.title,
            labels,
            i.state.as_str(),
            freshness_label(i.freshness),
            i.author
        )
    });
    let releases = listing(&update.releases, PROMPT_ITEM_CAP, "No new releases", |r| {
        let pre = if r.prerelease { " (pre-release)" } else { "" };
        format!("- {}: {}{} by {}", r.tag, r.name, pre, r.author)
    });

    format!(
        "Produce an update report for the GitHub repository `{repo}`.

Repository information:
- Description: {description}
- Stars: {stars}
- Forks: {forks}
- Primary language: {language}
- Window: {start} to {end}

Recent activity:

## Commits
{commit_count} commits
{commits}

## Pull Requests
{pull_count} pull requests
{pulls}

## Issues
{issue_count} issues
{issues}

## Releases
{release_count} releases
{releases}

Structure the report as:
1. 📊 Overview
2. 🔥 Highlights
3. 📝 Detailed changes
4. 📈 Activity analysis
5. 💡 Recommendations and outlook

Keep it professional, concise and easy to read. Format it as Markdown.
",
        description = meta.description.as_deref().unwrap_or("N/A"),
        stars = meta.stars,
        forks = meta.forks,
        language = meta.language.as_deref().unwrap_or("N/A"),
        start = update.window_start.format("%Y-%m-%d %H:%M UTC"),
        end = update.window_end.format("%Y-%m-%d %H:%M UTC"),
        commit_count = update.commits.len(),
        pull_count = update.pull_requests.len(),
        issue_count = update.issues.len(),
        release_count = update.releases.len(),
    )
}
