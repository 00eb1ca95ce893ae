use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use repo_sentinel::db;
use repo_sentinel::error::SentinelError;
use repo_sentinel::fetch::{ActivityFetcher, FetchedActivity};
use repo_sentinel::model::{RepoId, RepoMetadata, RepositoryUpdate};
use repo_sentinel::store::{SqliteStore, SubscriptionStore};
use repo_sentinel::subscriptions::Registry;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct KnownRepos {
    existing: Arc<Mutex<HashSet<String>>>,
    lookups: Arc<Mutex<Vec<String>>>,
}

impl KnownRepos {
    fn with(names: &[&str]) -> Self {
        Self {
            existing: Arc::new(Mutex::new(names.iter().map(|n| n.to_string()).collect())),
            ..Default::default()
        }
    }

    async fn lookups(&self) -> Vec<String> {
        self.lookups.lock().await.clone()
    }
}

#[async_trait]
impl ActivityFetcher for KnownRepos {
    async fn fetch(
        &self,
        _repo: &RepoId,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<FetchedActivity, SentinelError> {
        Ok(FetchedActivity::default())
    }

    async fn repository_exists(&self, repo: &RepoId) -> Result<bool, SentinelError> {
        self.lookups.lock().await.push(repo.to_string());
        Ok(self.existing.lock().await.contains(repo.as_str()))
    }
}

async fn setup() -> (SqliteStore, KnownRepos, Registry) {
    let store = SqliteStore::open("sqlite::memory:").await.unwrap();
    let fetcher = KnownRepos::with(&["acme/widgets", "acme/gadgets"]);
    let registry = Registry::new(Arc::new(store.clone()), Arc::new(fetcher.clone()));
    (store, fetcher, registry)
}

fn update(repo: &RepoId) -> RepositoryUpdate {
    let end = Utc::now();
    RepositoryUpdate::empty(repo.clone(), RepoMetadata::default(), end - Duration::days(7), end)
}

#[tokio::test]
async fn unsubscribe_cascades_history() {
    let (store, _fetcher, registry) = setup().await;
    let sub = registry.subscribe("acme/widgets", &[]).await.unwrap();
    let other = registry.subscribe("acme/gadgets", &[]).await.unwrap();
    store.record_update(sub.id, &update(&sub.repo)).await.unwrap();
    store.record_update(sub.id, &update(&sub.repo)).await.unwrap();
    store.record_update(other.id, &update(&other.repo)).await.unwrap();
    assert_eq!(db::count_update_records(store.pool(), sub.id).await.unwrap(), 2);

    registry.unsubscribe("acme/widgets").await.unwrap();

    assert_eq!(db::count_update_records(store.pool(), sub.id).await.unwrap(), 0);
    assert_eq!(db::count_update_records(store.pool(), other.id).await.unwrap(), 1);
    let remaining: Vec<String> = registry
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.repo.to_string())
        .collect();
    assert_eq!(remaining, vec!["acme/gadgets"]);
}

#[tokio::test]
async fn unsubscribing_unknown_repo_is_validation_without_side_effects() {
    let (store, _fetcher, registry) = setup().await;
    let sub = registry.subscribe("acme/widgets", &[]).await.unwrap();
    store.record_update(sub.id, &update(&sub.repo)).await.unwrap();

    let err = registry.unsubscribe("acme/gadgets").await.unwrap_err();

    assert!(matches!(err, SentinelError::Validation(_)));
    assert_eq!(registry.list().await.unwrap().len(), 1);
    assert_eq!(db::count_update_records(store.pool(), sub.id).await.unwrap(), 1);
}

#[tokio::test]
async fn subscribe_validates_name_before_any_lookup() {
    let (_store, fetcher, registry) = setup().await;
    for bad in ["", "widgets", "acme/", "-acme/widgets", "acme/..", "a/b/c"] {
        let err = registry.subscribe(bad, &[]).await.unwrap_err();
        assert!(matches!(err, SentinelError::Validation(_)), "{bad:?}");
    }
    assert!(fetcher.lookups().await.is_empty());
    assert!(registry.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn subscribe_rejects_missing_and_duplicate_repos() {
    let (_store, fetcher, registry) = setup().await;

    let err = registry.subscribe("acme/vanished", &[]).await.unwrap_err();
    assert!(matches!(err, SentinelError::NotFound(_)));

    registry
        .subscribe("acme/widgets", &["core".into(), " core ".into()])
        .await
        .unwrap();
    let err = registry.subscribe("acme/widgets", &[]).await.unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));
    assert_eq!(fetcher.lookups().await, vec!["acme/vanished", "acme/widgets"]);

    let subs = registry.list().await.unwrap();
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].tags, vec!["core".to_string()]);
    assert!(subs[0].last_updated.is_none());
}

#[tokio::test]
async fn history_is_newest_first_and_limited() {
    let (store, _fetcher, registry) = setup().await;
    let sub = registry.subscribe("acme/widgets", &[]).await.unwrap();
    for stars in 1..=3u64 {
        let mut u = update(&sub.repo);
        u.metadata.stars = stars;
        store.record_update(sub.id, &u).await.unwrap();
    }

    let history = registry.history("acme/widgets", 2).await.unwrap();
    let stars: Vec<u64> = history.iter().map(|r| r.update.metadata.stars).collect();
    assert_eq!(stars, vec![3, 2]);

    let err = registry.history("acme/gadgets", 5).await.unwrap_err();
    assert!(matches!(err, SentinelError::Validation(_)));
}
