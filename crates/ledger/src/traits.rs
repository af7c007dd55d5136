use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventbell_core::OccurrenceKey;

use crate::error::LedgerError;

/// A key-value store with per-key expiry and atomic check-and-set.
///
/// Implementations shared between scheduler instances must make
/// `mark_if_absent` atomic across processes, not just within one.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Record `key` unless a live record exists. Returns `true` when this call
    /// created the record; only then may the caller dispatch.
    ///
    /// An expired record counts as absent and is replaced.
    async fn mark_if_absent(
        &self,
        key: &OccurrenceKey,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError>;

    /// Drop expired records. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, LedgerError>;

    /// Short backend name for logs.
    fn name(&self) -> &str;
}
