//! Audit trail in the `jobs` table.

use async_trait::async_trait;
use eventbell_core::ports::JobRecorder;
use eventbell_core::{NotificationJob, PortError};
use sqlx::PgPool;

use crate::error::StoreError;

/// Insert or advance a job. The `WHERE` clause drops writes that would move
/// a job out of a terminal state (3, 4) or backwards.
const UPSERT_JOB: &str = "\
    INSERT INTO jobs (id, event_id, occurrence_at, execution_date, status, detail) \
    VALUES ($1, $2, $3, $4, $5, $6) \
    ON CONFLICT (id) DO UPDATE SET \
        status = EXCLUDED.status, \
        execution_date = EXCLUDED.execution_date, \
        detail = COALESCE(EXCLUDED.detail, jobs.detail) \
    WHERE jobs.status < 3 AND EXCLUDED.status > jobs.status";

/// [`JobRecorder`] over the `jobs` table.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRecorder for PgJobStore {
    async fn record(&self, job: &NotificationJob) -> Result<(), PortError> {
        sqlx::query(UPSERT_JOB)
            .bind(job.id)
            .bind(job.event_id)
            .bind(job.occurrence_at)
            .bind(job.execution_date)
            .bind(job.status.as_i16())
            .bind(job.detail.as_deref())
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}
