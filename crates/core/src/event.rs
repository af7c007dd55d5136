use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use eventbell_recurrence::{parse_iso8601_duration, Recurrence, RecurrenceError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// When an event happens: a recurrence rule, or one explicit start/end pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventTiming {
    Recurring { rrule: String },
    Once { start: DateTime<Utc>, end: DateTime<Utc> },
}

/// An event as read from the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub timing: EventTiming,
    /// ISO 8601 duration of each occurrence (e.g. `PT1H`).
    pub duration: String,
    pub is_active: bool,
    pub webhook_id: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    /// Resolver input for this event. Rules without DTSTART are anchored at
    /// `created_at`.
    pub fn recurrence(&self) -> Result<Recurrence, RecurrenceError> {
        match &self.timing {
            EventTiming::Recurring { rrule } => Recurrence::parse(rrule, self.created_at),
            EventTiming::Once { start, .. } => Ok(Recurrence::once(*start)),
        }
    }

    /// How long one occurrence lasts.
    pub fn occurrence_length(&self) -> Result<TimeDelta, RecurrenceError> {
        match &self.timing {
            EventTiming::Once { start, end } => Ok(*end - *start),
            EventTiming::Recurring { .. } => parse_iso8601_duration(&self.duration),
        }
    }

    pub fn occurrence_key(&self, occurrence_at: DateTime<Utc>) -> OccurrenceKey {
        OccurrenceKey::new(self.id, occurrence_at)
    }
}

/// Identity of one occurrence, used as the dedup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OccurrenceKey {
    pub event_id: Uuid,
    pub occurrence_at: DateTime<Utc>,
}

impl OccurrenceKey {
    pub fn new(event_id: Uuid, occurrence_at: DateTime<Utc>) -> Self {
        Self {
            event_id,
            occurrence_at,
        }
    }
}

/// `<uuid>@<rfc3339>`, e.g. `6f1c...@2025-01-06T09:00:00Z`.
impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.event_id,
            self.occurrence_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        )
    }
}

impl FromStr for OccurrenceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, at) = s
            .split_once('@')
            .ok_or_else(|| format!("occurrence key '{s}' has no '@'"))?;
        let event_id = Uuid::parse_str(id).map_err(|e| format!("bad event id '{id}': {e}"))?;
        let occurrence_at = DateTime::parse_from_rfc3339(at)
            .map_err(|e| format!("bad occurrence time '{at}': {e}"))?
            .with_timezone(&Utc);
        Ok(Self::new(event_id, occurrence_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(timing: EventTiming) -> Event {
        let created = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        Event {
            id: Uuid::new_v4(),
            title: "Standup".into(),
            description: "Daily sync".into(),
            timing,
            duration: "PT15M".into(),
            is_active: true,
            webhook_id: None,
            tags: vec![],
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn recurring_event_anchors_at_creation() {
        let e = event(EventTiming::Recurring {
            rrule: "FREQ=DAILY".into(),
        });
        let r = e.recurrence().unwrap();
        assert_eq!(r.start(), e.created_at);
        assert_eq!(e.occurrence_length().unwrap(), TimeDelta::minutes(15));
    }

    #[test]
    fn one_shot_length_is_end_minus_start() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();
        let e = event(EventTiming::Once {
            start,
            end: start + TimeDelta::hours(2),
        });
        assert_eq!(e.occurrence_length().unwrap(), TimeDelta::hours(2));
        assert_eq!(e.recurrence().unwrap(), Recurrence::once(start));
    }

    #[test]
    fn occurrence_key_string_form() {
        let id = Uuid::parse_str("6f1c2c1e-8a0b-4a55-9d7c-0c3f6a1b2d3e").unwrap();
        let at = Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
        let key = OccurrenceKey::new(id, at);
        let s = key.to_string();
        assert_eq!(s, "6f1c2c1e-8a0b-4a55-9d7c-0c3f6a1b2d3e@2025-01-06T09:00:00Z");
        assert_eq!(s.parse::<OccurrenceKey>().unwrap(), key);
        assert!("nope".parse::<OccurrenceKey>().is_err());
    }

    #[test]
    fn timing_serializes_with_kind_tag() {
        let json = serde_json::to_value(EventTiming::Recurring {
            rrule: "FREQ=WEEKLY".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "recurring");
        assert_eq!(json["rrule"], "FREQ=WEEKLY");
    }
}
