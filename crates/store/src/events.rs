//! Read side of the `events` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventbell_core::ports::EventCatalog;
use eventbell_core::{Event, EventTiming, PortError};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;

const EVENT_COLUMNS: &str = "id, title, description, rrule, start_at, end_at, duration, \
                             is_active, webhook_id, tags, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct EventRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub rrule: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub duration: String,
    pub is_active: bool,
    pub webhook_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let timing = match (row.rrule, row.start_at, row.end_at) {
            (Some(rrule), _, _) if !rrule.trim().is_empty() => EventTiming::Recurring { rrule },
            (_, Some(start), Some(end)) => EventTiming::Once { start, end },
            _ => {
                return Err(StoreError::Corrupt {
                    id: row.id.to_string(),
                    reason: "event has neither an rrule nor a start/end pair".into(),
                })
            }
        };

        Ok(Event {
            id: row.id,
            title: row.title,
            description: row.description,
            timing,
            duration: row.duration,
            is_active: row.is_active,
            webhook_id: row.webhook_id,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// [`EventCatalog`] over the `events` table.
#[derive(Clone)]
pub struct PgEventCatalog {
    pool: PgPool,
}

impl PgEventCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventCatalog for PgEventCatalog {
    async fn list_active(&self) -> Result<Vec<Event>, PortError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE is_active ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        // One corrupt row must not hide every other event.
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            match Event::try_from(row) {
                Ok(event) => events.push(event),
                Err(e) => tracing::error!(error = %e, "skipping unreadable event row"),
            }
        }
        Ok(events)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Event>, PortError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(Some(Event::try_from(row)?)),
            None => Ok(None),
        }
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), PortError> {
        sqlx::query("UPDATE events SET is_active = FALSE, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> EventRow {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        EventRow {
            id: Uuid::new_v4(),
            title: "Standup".into(),
            description: "Daily".into(),
            rrule: Some("FREQ=DAILY".into()),
            start_at: None,
            end_at: None,
            duration: "PT15M".into(),
            is_active: true,
            webhook_id: None,
            tags: vec!["team".into()],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn recurring_row_converts() {
        let event = Event::try_from(row()).unwrap();
        assert_eq!(
            event.timing,
            EventTiming::Recurring {
                rrule: "FREQ=DAILY".into()
            }
        );
        assert_eq!(event.tags, vec!["team".to_string()]);
    }

    #[test]
    fn one_shot_row_converts() {
        let mut r = row();
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 18, 0, 0).unwrap();
        r.rrule = None;
        r.start_at = Some(start);
        r.end_at = Some(start + chrono::TimeDelta::hours(1));
        let event = Event::try_from(r).unwrap();
        assert!(matches!(event.timing, EventTiming::Once { .. }));
    }

    #[test]
    fn row_without_timing_is_corrupt() {
        let mut r = row();
        r.rrule = Some("  ".into());
        assert!(matches!(
            Event::try_from(r),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
