//! Shared occurrence ledger in PostgreSQL.
//!
//! The check-and-set is a single statement: a row is inserted, or an
//! expired row for the same key is taken over. A live row makes the
//! statement return nothing, so at most one caller wins per live key even
//! across scheduler instances.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventbell_core::OccurrenceKey;
use eventbell_ledger::{LedgerError, LedgerStore};
use sqlx::PgPool;

use crate::error::StoreError;

const MARK_IF_ABSENT: &str = "\
    INSERT INTO occurrence_ledger (event_id, occurrence_at, expires_at) \
    VALUES ($1, $2, $3) \
    ON CONFLICT (event_id, occurrence_at) DO UPDATE SET \
        expires_at = EXCLUDED.expires_at, \
        recorded_at = now() \
    WHERE occurrence_ledger.expires_at <= now() \
    RETURNING event_id";

const PURGE_EXPIRED: &str = "DELETE FROM occurrence_ledger WHERE expires_at <= now()";

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn mark_if_absent(
        &self,
        key: &OccurrenceKey,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let won = sqlx::query_scalar::<_, uuid::Uuid>(MARK_IF_ABSENT)
            .bind(key.event_id)
            .bind(key.occurrence_at)
            .bind(expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(won.is_some())
    }

    async fn purge_expired(&self) -> Result<usize, LedgerError> {
        let result = sqlx::query(PURGE_EXPIRED)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(result.rows_affected() as usize)
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
