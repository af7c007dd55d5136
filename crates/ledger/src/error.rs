use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The backing store could not be reached. Callers may retry.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The store answered but the operation failed.
    #[error("ledger backend error: {0}")]
    Backend(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}
