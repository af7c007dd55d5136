use chrono::{DateTime, Utc};
use eventbell_notify::{DeliveryOutcome, FailureKind};
use serde::Serialize;

/// Coordinator counters. Shared behind `Arc<RwLock<_>>`; read a copy with
/// [`Coordinator::metrics`](crate::Coordinator::metrics).
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SchedulerMetrics {
    /// Occurrences that came due and were handed to a fire task.
    pub fires: u64,
    /// Fires that reached the dispatcher.
    pub dispatches: u64,
    pub delivered: u64,
    pub transient_failures: u64,
    pub permanent_failures: u64,
    /// Fires that lost the ledger check-and-set to an earlier claim.
    pub duplicates_skipped: u64,
    /// Fires whose entry was changed or removed while they were in flight.
    pub stale_fires: u64,
    /// Occurrences dropped because the ledger stayed unavailable.
    pub ledger_drops: u64,
    /// Occurrences passed over by catch-up after the coordinator fell behind.
    pub missed_occurrences: u64,
    /// Entries currently scheduled.
    pub active_entries: usize,
    pub last_fire_at: Option<DateTime<Utc>>,
}

impl SchedulerMetrics {
    pub fn record_fire(&mut self, occurrence_at: DateTime<Utc>) {
        self.fires += 1;
        self.last_fire_at = Some(occurrence_at);
    }

    pub fn record_outcome(&mut self, outcome: &DeliveryOutcome) {
        self.dispatches += 1;
        match outcome.failure_kind() {
            None => self.delivered += 1,
            Some(kind) => self.record_failure(kind),
        }
    }

    /// A failed fire, whether or not it reached the dispatcher.
    pub fn record_failure(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::Transient => self.transient_failures += 1,
            FailureKind::Permanent => self.permanent_failures += 1,
        }
    }

    pub fn record_missed(&mut self, count: u64) {
        self.missed_occurrences = self.missed_occurrences.saturating_add(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_in_their_counters() {
        let mut m = SchedulerMetrics::default();
        m.record_outcome(&DeliveryOutcome::Delivered);
        m.record_outcome(&DeliveryOutcome::Failed {
            kind: FailureKind::Transient,
            reason: "500".into(),
        });
        m.record_outcome(&DeliveryOutcome::Failed {
            kind: FailureKind::Permanent,
            reason: "404".into(),
        });

        assert_eq!(m.dispatches, 3);
        assert_eq!(m.delivered, 1);
        assert_eq!(m.transient_failures, 1);
        assert_eq!(m.permanent_failures, 1);
    }

    #[test]
    fn record_fire_tracks_latest_occurrence() {
        let mut m = SchedulerMetrics::default();
        let at = Utc::now();
        m.record_fire(at);
        m.record_missed(3);
        m.record_missed(u64::MAX);

        assert_eq!(m.fires, 1);
        assert_eq!(m.last_fire_at, Some(at));
        assert_eq!(m.missed_occurrences, u64::MAX);
    }
}
