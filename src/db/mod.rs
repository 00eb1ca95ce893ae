//! Database module: row models and SQL repositories.
//!
//! - `model`: plain row structs returned by queries.
//! - `repo`: SQL-only functions; domain conversion happens in `crate::store`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{SubscriptionRow, UpdateRecordRow};
