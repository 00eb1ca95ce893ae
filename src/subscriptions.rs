//! User-facing subscription actions. Validation errors propagate without side effects.
use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::SentinelError;
use crate::fetch::ActivityFetcher;
use crate::model::{RepoId, Subscription, UpdateRecord};
use crate::store::SubscriptionStore;

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn SubscriptionStore>,
    fetcher: Arc<dyn ActivityFetcher>,
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

impl Registry {
    pub fn new(store: Arc<dyn SubscriptionStore>, fetcher: Arc<dyn ActivityFetcher>) -> Self {
        Self { store, fetcher }
    }

    #[instrument(skip_all, fields(repo = raw))]
    pub async fn subscribe(&self, raw: &str, tags: &[String]) -> Result<Subscription, SentinelError> {
        let repo = RepoId::parse(raw)?;
        if self.store.get(&repo).await?.is_some() {
            return Err(SentinelError::Validation(format!("{repo} is already subscribed")));
        }
        if !self.fetcher.repository_exists(&repo).await? {
            return Err(SentinelError::NotFound(repo.to_string()));
        }
        let sub = self.store.add(&repo, &normalize_tags(tags)).await?;
        info!(id = sub.id, "subscribed");
        Ok(sub)
    }

    #[instrument(skip_all, fields(repo = raw))]
    pub async fn unsubscribe(&self, raw: &str) -> Result<(), SentinelError> {
        let repo = RepoId::parse(raw)?;
        self.store.remove(&repo).await
    }

    pub async fn list(&self) -> Result<Vec<Subscription>, SentinelError> {
        self.store.list().await
    }

    /// Most recent first. `Validation` when the repository is not subscribed.
    pub async fn history(&self, raw: &str, limit: u32) -> Result<Vec<UpdateRecord>, SentinelError> {
        let repo = RepoId::parse(raw)?;
        let sub = self
            .store
            .get(&repo)
            .await?
            .ok_or_else(|| SentinelError::Validation(format!("{repo} is not subscribed")))?;
        self.store.history(sub.id, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let tags = vec![" core ".to_string(), "".into(), "core".into(), "infra".into()];
        assert_eq!(normalize_tags(&tags), vec!["core".to_string(), "infra".to_string()]);
    }
}
