//! Row models returned by repositories.
//!
//! Columns are kept as stored (JSON text for tags and digests); decoding into
//! domain types lives in the store layer.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct SubscriptionRow {
    pub id: i64,
    pub repo_name: String,
    /// JSON array of strings.
    pub tags: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct UpdateRecordRow {
    pub id: i64,
    pub subscription_id: i64,
    /// Serialized `RepositoryUpdate`.
    pub update_data: String,
    pub created_at: DateTime<Utc>,
}
