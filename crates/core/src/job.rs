//! Notification job audit records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a notification job. Stored as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Unknown = 0,
    Pending = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
}

impl JobStatus {
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Self {
        match v {
            1 => Self::Pending,
            2 => Self::Running,
            3 => Self::Completed,
            4 => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Completed and Failed share the last step.
    fn step(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Pending => 1,
            Self::Running => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    /// Whether moving from `self` to `next` goes forward.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        !self.is_terminal() && next.step() > self.step()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One fire of one occurrence, kept for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: Uuid,
    pub event_id: Uuid,
    pub occurrence_at: DateTime<Utc>,
    /// Time of the last status change.
    pub execution_date: DateTime<Utc>,
    pub status: JobStatus,
    pub detail: Option<String>,
}

impl NotificationJob {
    pub fn pending(event_id: Uuid, occurrence_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            occurrence_at,
            execution_date: now,
            status: JobStatus::Pending,
            detail: None,
        }
    }

    /// Move to `next` if that goes forward. Returns whether the job changed.
    pub fn advance(&mut self, next: JobStatus, detail: Option<String>, now: DateTime<Utc>) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        self.execution_date = now;
        if detail.is_some() {
            self.detail = detail;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_i16() {
        for s in [
            JobStatus::Unknown,
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::from_i16(s.as_i16()), s);
        }
        assert_eq!(JobStatus::from_i16(42), JobStatus::Unknown);
    }

    #[test]
    fn status_only_moves_forward() {
        assert!(JobStatus::Pending.can_advance_to(JobStatus::Running));
        assert!(JobStatus::Pending.can_advance_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_advance_to(JobStatus::Completed));
        assert!(!JobStatus::Running.can_advance_to(JobStatus::Pending));
        assert!(!JobStatus::Completed.can_advance_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_advance_to(JobStatus::Completed));
    }

    #[test]
    fn late_write_does_not_regress_job() {
        let now = Utc::now();
        let mut job = NotificationJob::pending(Uuid::new_v4(), now, now);
        assert!(job.advance(JobStatus::Running, None, now));
        assert!(job.advance(JobStatus::Completed, Some("204".into()), now));
        assert!(!job.advance(JobStatus::Running, None, now));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.detail.as_deref(), Some("204"));
    }
}
