//! PostgreSQL persistence for the scheduler's collaborators.
//!
//! - [`PgEventCatalog`]: `events` table, read side plus deactivation
//! - [`PgWebhookStore`]: `webhooks` table
//! - [`PgJobStore`]: forward-only upserts into `jobs`
//! - [`PgLedger`]: the shared `occurrence_ledger` used when several
//!   scheduler instances run against one database

pub mod db;
pub mod error;
pub mod events;
pub mod jobs;
pub mod ledger;
pub mod webhooks;

pub use db::init_pg_pool;
pub use error::StoreError;
pub use events::PgEventCatalog;
pub use jobs::PgJobStore;
pub use ledger::PgLedger;
pub use webhooks::PgWebhookStore;
