use eventbell_core::PortError;
use eventbell_ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    /// Connection-level failures a caller may retry.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::Database(
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            )
        )
    }
}

impl From<StoreError> for PortError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Corrupt { id, reason } => PortError::Corrupt { id, reason },
            other => PortError::Unavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        if e.is_connectivity() {
            LedgerError::Unavailable(e.to_string())
        } else {
            LedgerError::Backend(e.to_string())
        }
    }
}
