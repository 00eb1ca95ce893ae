//! Durable subscription registry and update history.
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::db::{self, Pool, SubscriptionRow, UpdateRecordRow};
use crate::error::SentinelError;
use crate::model::{RepoId, RepositoryUpdate, Subscription, UpdateRecord};

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// `Validation` when the repository is already subscribed.
    async fn add(&self, repo: &RepoId, tags: &[String]) -> Result<Subscription, SentinelError>;
    /// Removes the subscription and every update record it owns.
    /// `Validation` when the repository is not subscribed.
    async fn remove(&self, repo: &RepoId) -> Result<(), SentinelError>;
    async fn list(&self) -> Result<Vec<Subscription>, SentinelError>;
    async fn get(&self, repo: &RepoId) -> Result<Option<Subscription>, SentinelError>;
    async fn record_update(
        &self,
        subscription_id: i64,
        update: &RepositoryUpdate,
    ) -> Result<i64, SentinelError>;
    async fn touch_last_updated(&self, subscription_id: i64, at: DateTime<Utc>) -> Result<(), SentinelError>;
    /// Records `update` and advances `last_updated` to `window_end` atomically:
    /// either both writes land or neither does.
    async fn commit_update(
        &self,
        subscription_id: i64,
        update: &RepositoryUpdate,
        window_end: DateTime<Utc>,
    ) -> Result<i64, SentinelError>;
    /// Newest first, at most `limit` records.
    async fn history(&self, subscription_id: i64, limit: u32) -> Result<Vec<UpdateRecord>, SentinelError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `database_url` and applies migrations.
    pub async fn open(database_url: &str) -> anyhow::Result<Self> {
        let pool = db::init_pool(database_url).await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

fn subscription_from_row(row: SubscriptionRow) -> Result<Subscription, SentinelError> {
    let repo = RepoId::parse(&row.repo_name)?;
    let tags: Vec<String> = serde_json::from_str(&row.tags)
        .with_context(|| format!("corrupt tags for {}", row.repo_name))
        .map_err(SentinelError::persistence)?;
    Ok(Subscription {
        id: row.id,
        repo,
        tags,
        created_at: row.created_at,
        last_updated: row.last_updated,
    })
}

fn record_from_row(row: UpdateRecordRow) -> Result<UpdateRecord, SentinelError> {
    let update: RepositoryUpdate = serde_json::from_str(&row.update_data)
        .with_context(|| format!("corrupt update record {}", row.id))
        .map_err(SentinelError::persistence)?;
    Ok(UpdateRecord {
        id: row.id,
        subscription_id: row.subscription_id,
        update,
        created_at: row.created_at,
    })
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    #[instrument(skip_all, fields(repo = %repo))]
    async fn add(&self, repo: &RepoId, tags: &[String]) -> Result<Subscription, SentinelError> {
        let tags_json = serde_json::to_string(tags)
            .context("failed to encode tags")
            .map_err(SentinelError::persistence)?;
        let created_at = Utc::now();
        let id = db::insert_subscription(&self.pool, repo.as_str(), &tags_json, created_at)
            .await
            .map_err(SentinelError::persistence)?
            .ok_or_else(|| SentinelError::Validation(format!("{repo} is already subscribed")))?;
        info!(id, "subscription added");
        Ok(Subscription {
            id,
            repo: repo.clone(),
            tags: tags.to_vec(),
            created_at,
            last_updated: None,
        })
    }

    #[instrument(skip_all, fields(repo = %repo))]
    async fn remove(&self, repo: &RepoId) -> Result<(), SentinelError> {
        let removed = db::delete_subscription(&self.pool, repo.as_str())
            .await
            .map_err(SentinelError::persistence)?;
        if !removed {
            return Err(SentinelError::Validation(format!("{repo} is not subscribed")));
        }
        info!("subscription removed");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Subscription>, SentinelError> {
        db::list_subscriptions(&self.pool)
            .await
            .map_err(SentinelError::persistence)?
            .into_iter()
            .map(subscription_from_row)
            .collect()
    }

    async fn get(&self, repo: &RepoId) -> Result<Option<Subscription>, SentinelError> {
        db::find_subscription(&self.pool, repo.as_str())
            .await
            .map_err(SentinelError::persistence)?
            .map(subscription_from_row)
            .transpose()
    }

    #[instrument(skip_all)]
    async fn record_update(
        &self,
        subscription_id: i64,
        update: &RepositoryUpdate,
    ) -> Result<i64, SentinelError> {
        let data = serde_json::to_string(update)
            .context("failed to encode update")
            .map_err(SentinelError::persistence)?;
        db::insert_update_record(&self.pool, subscription_id, &data, Utc::now())
            .await
            .map_err(SentinelError::persistence)
    }

    async fn touch_last_updated(&self, subscription_id: i64, at: DateTime<Utc>) -> Result<(), SentinelError> {
        let touched = db::set_last_updated(&self.pool, subscription_id, at)
            .await
            .map_err(SentinelError::persistence)?;
        if touched == 0 {
            return Err(SentinelError::Persistence(format!(
                "subscription {subscription_id} vanished before last_updated could be set"
            )));
        }
        Ok(())
    }

    #[instrument(skip_all)]
    async fn commit_update(
        &self,
        subscription_id: i64,
        update: &RepositoryUpdate,
        window_end: DateTime<Utc>,
    ) -> Result<i64, SentinelError> {
        let data = serde_json::to_string(update)
            .context("failed to encode update")
            .map_err(SentinelError::persistence)?;
        db::commit_update(&self.pool, subscription_id, &data, window_end, Utc::now())
            .await
            .map_err(SentinelError::persistence)?
            .ok_or_else(|| {
                SentinelError::Persistence(format!(
                    "subscription {subscription_id} vanished before the update was committed"
                ))
            })
    }

    async fn history(&self, subscription_id: i64, limit: u32) -> Result<Vec<UpdateRecord>, SentinelError> {
        db::recent_update_records(&self.pool, subscription_id, i64::from(limit))
            .await
            .map_err(SentinelError::persistence)?
            .into_iter()
            .map(record_from_row)
            .collect()
    }
}
