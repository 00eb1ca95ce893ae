use super::model::{SubscriptionRow, UpdateRecordRow};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let mut options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url {normalized:?}"))?
        .create_if_missing(true)
        .foreign_keys(true);
    if normalized.starts_with("sqlite::memory") {
        // Each connection would otherwise see its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        return Ok(pool);
    }
    options = options
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn subscription_from_row(row: &SqliteRow) -> Result<SubscriptionRow> {
    Ok(SubscriptionRow {
        id: row.try_get("id")?,
        repo_name: row.try_get("repo_name")?,
        tags: row.try_get("tags")?,
        created_at: row.try_get("created_at")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<UpdateRecordRow> {
    Ok(UpdateRecordRow {
        id: row.try_get("id")?,
        subscription_id: row.try_get("subscription_id")?,
        update_data: row.try_get("update_data")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Returns `None` when `repo_name` is already subscribed.
#[instrument(skip_all)]
pub async fn insert_subscription(
    pool: &Pool,
    repo_name: &str,
    tags_json: &str,
    created_at: DateTime<Utc>,
) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO subscriptions (repo_name, tags, created_at) VALUES (?, ?, ?) \
         ON CONFLICT(repo_name) DO NOTHING RETURNING id",
    )
    .bind(repo_name)
    .bind(tags_json)
    .bind(created_at)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

#[instrument(skip_all)]
pub async fn find_subscription(pool: &Pool, repo_name: &str) -> Result<Option<SubscriptionRow>> {
    let row = sqlx::query(
        "SELECT id, repo_name, tags, created_at, last_updated FROM subscriptions WHERE repo_name = ?",
    )
    .bind(repo_name)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(subscription_from_row).transpose()
}

#[instrument(skip_all)]
pub async fn list_subscriptions(pool: &Pool) -> Result<Vec<SubscriptionRow>> {
    let rows = sqlx::query(
        "SELECT id, repo_name, tags, created_at, last_updated FROM subscriptions ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter().map(subscription_from_row).collect()
}

/// Deletes the subscription and all its update records in one transaction.
/// Returns `false` (and touches nothing) when `repo_name` is not subscribed.
#[instrument(skip_all)]
pub async fn delete_subscription(pool: &Pool, repo_name: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let id = sqlx::query_scalar::<_, i64>("SELECT id FROM subscriptions WHERE repo_name = ?")
        .bind(repo_name)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(id) = id else {
        return Ok(false);
    };
    sqlx::query("DELETE FROM update_records WHERE subscription_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM subscriptions WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

#[instrument(skip_all)]
pub async fn insert_update_record(
    pool: &Pool,
    subscription_id: i64,
    update_data: &str,
    created_at: DateTime<Utc>,
) -> Result<i64> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO update_records (subscription_id, update_data, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(subscription_id)
    .bind(update_data)
    .bind(created_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Appends an update record and advances `last_updated` in one transaction.
/// Returns `None` (and writes nothing) when the subscription is gone.
#[instrument(skip_all)]
pub async fn commit_update(
    pool: &Pool,
    subscription_id: i64,
    update_data: &str,
    window_end: DateTime<Utc>,
    created_at: DateTime<Utc>,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;
    let touched = sqlx::query("UPDATE subscriptions SET last_updated = ? WHERE id = ?")
        .bind(window_end)
        .bind(subscription_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if touched == 0 {
        return Ok(None);
    }
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO update_records (subscription_id, update_data, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(subscription_id)
    .bind(update_data)
    .bind(created_at)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(Some(id))
}

/// Returns the number of rows touched (0 when the subscription is gone).
#[instrument(skip_all)]
pub async fn set_last_updated(pool: &Pool, subscription_id: i64, at: DateTime<Utc>) -> Result<u64> {
    let res = sqlx::query("UPDATE subscriptions SET last_updated = ? WHERE id = ?")
        .bind(at)
        .bind(subscription_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Newest first.
#[instrument(skip_all)]
pub async fn recent_update_records(
    pool: &Pool,
    subscription_id: i64,
    limit: i64,
) -> Result<Vec<UpdateRecordRow>> {
    let rows = sqlx::query(
        "SELECT id, subscription_id, update_data, created_at FROM update_records \
         WHERE subscription_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(subscription_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(record_from_row).collect()
}

pub async fn count_update_records(pool: &Pool, subscription_id: i64) -> Result<i64> {
    let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM update_records WHERE subscription_id = ?")
        .bind(subscription_id)
        .fetch_one(pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn setup_pool() -> Pool {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}/nested/db.sqlite?mode=rwc", dir.path().display());
        let prepared = prepare_sqlite_url(&url);
        assert!(prepared.starts_with("sqlite://"));
        assert!(prepared.ends_with("/nested/db.sqlite?mode=rwc"));
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn file_backed_pool_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}/data/sentinel.db", dir.path().display());
        let pool = init_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        assert!(dir.path().join("data/sentinel.db").exists());
    }

    #[tokio::test]
    async fn commit_update_is_all_or_nothing() {
        let pool = setup_pool().await;
        let id = insert_subscription(&pool, "acme/widgets", "[]", t(1))
            .await
            .unwrap()
            .unwrap();

        let record = commit_update(&pool, id, "{}", t(2), t(2)).await.unwrap();
        assert!(record.is_some());
        assert_eq!(count_update_records(&pool, id).await.unwrap(), 1);

        assert!(commit_update(&pool, id + 100, "{}", t(3), t(3)).await.unwrap().is_none());
        assert_eq!(count_update_records(&pool, id + 100).await.unwrap(), 0);

        sqlx::query(
            "CREATE TRIGGER reject_insert BEFORE INSERT ON update_records \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        )
        .execute(&pool)
        .await
        .unwrap();
        assert!(commit_update(&pool, id, "{}", t(4), t(4)).await.is_err());
        let row = find_subscription(&pool, "acme/widgets").await.unwrap().unwrap();
        assert_eq!(row.last_updated, Some(t(2)));
        assert_eq!(count_update_records(&pool, id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn subscription_lifecycle() {
        let pool = setup_pool().await;
        let id = insert_subscription(&pool, "acme/widgets", "[\"core\"]", t(1))
            .await
            .unwrap()
            .unwrap();
        assert!(insert_subscription(&pool, "acme/widgets", "[]", t(2))
            .await
            .unwrap()
            .is_none());

        let row = find_subscription(&pool, "acme/widgets").await.unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.tags, "[\"core\"]");
        assert_eq!(row.created_at, t(1));
        assert!(row.last_updated.is_none());

        assert_eq!(set_last_updated(&pool, id, t(3)).await.unwrap(), 1);
        let row = find_subscription(&pool, "acme/widgets").await.unwrap().unwrap();
        assert_eq!(row.last_updated, Some(t(3)));

        insert_update_record(&pool, id, "{}", t(3)).await.unwrap();
        let second = insert_update_record(&pool, id, "{\"n\":2}", t(3)).await.unwrap();
        let recent = recent_update_records(&pool, id, 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, second);

        assert!(delete_subscription(&pool, "acme/widgets").await.unwrap());
        assert_eq!(count_update_records(&pool, id).await.unwrap(), 0);
        assert!(list_subscriptions(&pool).await.unwrap().is_empty());
        assert!(!delete_subscription(&pool, "acme/widgets").await.unwrap());
    }
}
