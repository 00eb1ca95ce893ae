pub mod ai;
pub mod config;
pub mod db;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod github;
pub mod model;
pub mod notify;
pub mod orchestrator;
pub mod report;
pub mod store;
pub mod subscriptions;
