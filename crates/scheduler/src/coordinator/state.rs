//! Schedule state owned by the coordinator task.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use eventbell_core::Event;
use eventbell_recurrence::Recurrence;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{RegisterOutcome, ScheduleEntry, SyncReport};

/// Generation of an entry that was changed or removed.
pub(crate) const CANCELLED: u64 = 0;

/// The heap is rebuilt when it holds this many times more items than there
/// are live entries.
const COMPACT_FACTOR: usize = 2;
const COMPACT_MIN_LEN: usize = 64;

type HeapItem = Reverse<(DateTime<Utc>, Uuid, u64)>;

struct Slot {
    event: Arc<Event>,
    recurrence: Recurrence,
    next_fire: DateTime<Utc>,
    version: u64,
    generation: Arc<AtomicU64>,
}

/// A due occurrence handed to a fire task.
pub(crate) struct DueFire {
    pub event: Arc<Event>,
    pub occurrence_at: DateTime<Utc>,
    pub version: u64,
    pub generation: Arc<AtomicU64>,
}

impl DueFire {
    /// Whether the entry this fire was taken from is still the live one.
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.version
    }
}

pub(crate) struct ScheduleState {
    slots: HashMap<Uuid, Slot>,
    /// Min-heap of `(fire_at, event_id, version)`. Items whose version or
    /// time no longer match their slot are skipped when they surface.
    heap: BinaryHeap<HeapItem>,
    /// Events seen but not scheduled (inactive, invalid, exhausted), keyed to
    /// the `updated_at` they were seen with.
    dormant: HashMap<Uuid, DateTime<Utc>>,
    last_version: u64,
}

impl ScheduleState {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            heap: BinaryHeap::new(),
            dormant: HashMap::new(),
            last_version: CANCELLED,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Schedule `event` from its first occurrence after `now`, replacing any
    /// existing entry under a new version.
    pub fn register(&mut self, event: Event, now: DateTime<Utc>) -> RegisterOutcome {
        let id = event.id;
        self.cancel(id);

        if !event.is_active {
            debug!(event_id = %id, "event inactive, not scheduling");
            self.dormant.insert(id, event.updated_at);
            return RegisterOutcome::Inactive;
        }

        let recurrence = match event.recurrence() {
            Ok(r) => r,
            Err(e) => {
                warn!(event_id = %id, error = %e, "invalid recurrence, not scheduling");
                self.dormant.insert(id, event.updated_at);
                return RegisterOutcome::Invalid(e.to_string());
            }
        };
        if let Err(e) = event.occurrence_length() {
            warn!(event_id = %id, error = %e, "invalid duration, not scheduling");
            self.dormant.insert(id, event.updated_at);
            return RegisterOutcome::Invalid(e.to_string());
        }

        let Some(next_fire) = recurrence.next_after(now) else {
            info!(event_id = %id, "recurrence exhausted, not scheduling");
            self.dormant.insert(id, event.updated_at);
            return RegisterOutcome::Exhausted;
        };

        self.last_version += 1;
        let version = self.last_version;
        self.heap.push(Reverse((next_fire, id, version)));
        self.slots.insert(
            id,
            Slot {
                event: Arc::new(event),
                recurrence,
                next_fire,
                version,
                generation: Arc::new(AtomicU64::new(version)),
            },
        );
        debug!(event_id = %id, %next_fire, version, "event scheduled");

        RegisterOutcome::Scheduled { next_fire, version }
    }

    /// Remove the entry for `id` and cancel its in-flight fires.
    pub fn cancel(&mut self, id: Uuid) -> bool {
        self.dormant.remove(&id);
        match self.slots.remove(&id) {
            Some(slot) => {
                slot.generation.store(CANCELLED, Ordering::Release);
                self.maybe_compact();
                true
            }
            None => false,
        }
    }

    /// Cancel the entry only if it still carries `version`.
    pub fn cancel_version(&mut self, id: Uuid, version: u64) -> bool {
        if self.slots.get(&id).is_some_and(|s| s.version == version) {
            self.cancel(id)
        } else {
            false
        }
    }

    /// Take every fire due at `now`. Each entry is advanced to its first
    /// occurrence after `now`; occurrences passed over on the way are counted
    /// in the returned total, never fired.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> (Vec<DueFire>, u64) {
        let mut due = Vec::new();
        let mut missed = 0u64;

        while let Some(&Reverse((fire_at, id, version))) = self.heap.peek() {
            if fire_at > now {
                break;
            }
            self.heap.pop();
            if !self.is_live(fire_at, id, version) {
                continue;
            }
            let Some(slot) = self.slots.get_mut(&id) else {
                continue;
            };

            due.push(DueFire {
                event: Arc::clone(&slot.event),
                occurrence_at: fire_at,
                version,
                generation: Arc::clone(&slot.generation),
            });

            let catch_up = slot.recurrence.next_future(fire_at, now);
            if catch_up.skipped > 0 {
                warn!(
                    event_id = %id,
                    skipped = catch_up.skipped,
                    "missed occurrences skipped"
                );
                missed = missed.saturating_add(catch_up.skipped);
            }

            match catch_up.next {
                Some(next) => {
                    slot.next_fire = next;
                    self.heap.push(Reverse((next, id, version)));
                }
                None => {
                    // The generation stays put: the final fire is legitimate.
                    let updated_at = slot.event.updated_at;
                    self.slots.remove(&id);
                    self.dormant.insert(id, updated_at);
                    info!(event_id = %id, "recurrence exhausted, entry removed");
                }
            }
        }

        self.maybe_compact();
        (due, missed)
    }

    /// Nearest pending fire, discarding stale heap items on the way.
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        while let Some(&Reverse((fire_at, id, version))) = self.heap.peek() {
            if self.is_live(fire_at, id, version) {
                return Some(fire_at);
            }
            self.heap.pop();
        }
        None
    }

    /// Entries ordered by next fire.
    pub fn snapshot(&self) -> Vec<ScheduleEntry> {
        let mut entries: Vec<ScheduleEntry> = self
            .slots
            .iter()
            .map(|(id, slot)| ScheduleEntry {
                event_id: *id,
                title: slot.event.title.clone(),
                next_fire: slot.next_fire,
                version: slot.version,
            })
            .collect();
        entries.sort_by(|a, b| (a.next_fire, a.event_id).cmp(&(b.next_fire, b.event_id)));
        entries
    }

    /// Pending occurrences of a scheduled event, from its next fire up to
    /// `now + window` (exclusive).
    pub fn upcoming(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        window: TimeDelta,
        limit: usize,
    ) -> Option<Vec<DateTime<Utc>>> {
        let slot = self.slots.get(&id)?;
        let end = now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Some(slot.recurrence.between(slot.next_fire, end, limit))
    }

    /// Reconcile with the full list of catalogue events.
    ///
    /// - Drops entries for events no longer listed.
    /// - Re-registers events whose `updated_at` changed.
    /// - Registers events seen for the first time.
    pub fn sync(&mut self, events: Vec<Event>, now: DateTime<Utc>) -> SyncReport {
        let mut report = SyncReport::default();
        let listed: HashSet<Uuid> = events.iter().map(|e| e.id).collect();

        let gone: Vec<Uuid> = self
            .slots
            .keys()
            .filter(|id| !listed.contains(id))
            .copied()
            .collect();
        for id in gone {
            self.cancel(id);
            report.removed += 1;
        }
        self.dormant.retain(|id, _| listed.contains(id));

        for event in events {
            let id = event.id;
            let was_scheduled = self.slots.contains_key(&id);
            let seen_at = self
                .slots
                .get(&id)
                .map(|s| s.event.updated_at)
                .or_else(|| self.dormant.get(&id).copied());

            if seen_at == Some(event.updated_at) {
                report.unchanged += 1;
                continue;
            }

            let scheduled = self.register(event, now).is_scheduled();
            match (was_scheduled, scheduled) {
                (true, true) => report.updated += 1,
                (true, false) => report.removed += 1,
                (false, true) => report.registered += 1,
                (false, false) if seen_at.is_some() => report.unchanged += 1,
                (false, false) => report.not_scheduled += 1,
            }
        }

        report
    }

    fn is_live(&self, fire_at: DateTime<Utc>, id: Uuid, version: u64) -> bool {
        self.slots
            .get(&id)
            .is_some_and(|s| s.version == version && s.next_fire == fire_at)
    }

    fn maybe_compact(&mut self) {
        let live = self.slots.len();
        if self.heap.len() < COMPACT_MIN_LEN || self.heap.len() <= live * COMPACT_FACTOR {
            return;
        }
        let before = self.heap.len();
        self.heap = self
            .slots
            .iter()
            .map(|(id, slot)| Reverse((slot.next_fire, *id, slot.version)))
            .collect();
        debug!(before, after = self.heap.len(), "compacted fire heap");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use eventbell_core::EventTiming;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap()
    }

    fn daily() -> Event {
        Event {
            id: Uuid::new_v4(),
            title: "Standup".into(),
            description: "Daily sync".into(),
            timing: EventTiming::Recurring {
                rrule: "FREQ=DAILY".into(),
            },
            duration: "PT15M".into(),
            is_active: true,
            webhook_id: None,
            tags: vec![],
            created_at: base(),
            updated_at: base(),
        }
    }

    #[test]
    fn register_arms_first_occurrence_after_now() {
        let mut state = ScheduleState::new();
        let outcome = state.register(daily(), base());
        assert_eq!(outcome.next_fire(), Some(base() + TimeDelta::days(1)));
        assert_eq!(state.next_deadline(), Some(base() + TimeDelta::days(1)));
    }

    #[test]
    fn inactive_and_invalid_events_are_not_scheduled() {
        let mut state = ScheduleState::new();
        let mut off = daily();
        off.is_active = false;
        assert_eq!(state.register(off, base()), RegisterOutcome::Inactive);

        let mut bad = daily();
        bad.timing = EventTiming::Recurring {
            rrule: "FREQ=FORTNIGHTLY".into(),
        };
        assert!(matches!(state.register(bad, base()), RegisterOutcome::Invalid(_)));

        let mut past = daily();
        past.timing = EventTiming::Once {
            start: base() - TimeDelta::hours(1),
            end: base(),
        };
        assert_eq!(state.register(past, base()), RegisterOutcome::Exhausted);
        assert_eq!(state.len(), 0);
        assert_eq!(state.next_deadline(), None);
    }

    #[test]
    fn reregistering_bumps_version_and_cancels_old_generation() {
        let mut state = ScheduleState::new();
        let event = daily();
        state.register(event.clone(), base());
        let (due, _) = state.take_due(base() + TimeDelta::days(1));
        assert_eq!(due.len(), 1);
        assert!(due[0].is_current());

        let outcome = state.register(event, base() + TimeDelta::days(1));
        assert!(matches!(outcome, RegisterOutcome::Scheduled { version: 2, .. }));
        assert!(!due[0].is_current());
    }

    #[test]
    fn take_due_advances_strictly_forward() {
        let mut state = ScheduleState::new();
        state.register(daily(), base());
        let mut last = base();
        for day in 1..=5 {
            let now = base() + TimeDelta::days(day);
            let (due, missed) = state.take_due(now);
            assert_eq!(due.len(), 1);
            assert_eq!(missed, 0);
            assert!(due[0].occurrence_at > last);
            last = due[0].occurrence_at;
            assert!(state.next_deadline().unwrap() > now);
        }
    }

    #[test]
    fn late_wakeup_fires_once_and_counts_missed() {
        let mut state = ScheduleState::new();
        let event = daily();
        let id = event.id;
        state.register(event, base());

        let now = base() + TimeDelta::days(3) + TimeDelta::hours(1);
        let (due, missed) = state.take_due(now);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].occurrence_at, base() + TimeDelta::days(1));
        assert_eq!(missed, 2);
        let entry = &state.snapshot()[0];
        assert_eq!(entry.event_id, id);
        assert_eq!(entry.next_fire, base() + TimeDelta::days(4));
    }

    #[test]
    fn final_occurrence_removes_entry_but_keeps_fire_current() {
        let mut state = ScheduleState::new();
        let mut event = daily();
        event.timing = EventTiming::Recurring {
            rrule: "FREQ=DAILY;COUNT=2".into(),
        };
        state.register(event, base());

        let (due, _) = state.take_due(base() + TimeDelta::days(1));
        assert_eq!(due.len(), 1);
        assert_eq!(state.len(), 0);
        assert!(due[0].is_current());
    }

    #[test]
    fn cancel_is_idempotent_and_skips_stale_heap_items() {
        let mut state = ScheduleState::new();
        let event = daily();
        let id = event.id;
        state.register(event, base());
        assert!(state.cancel(id));
        assert!(!state.cancel(id));
        assert_eq!(state.next_deadline(), None);
        let (due, _) = state.take_due(base() + TimeDelta::days(2));
        assert!(due.is_empty());
    }

    #[test]
    fn heap_is_compacted_after_many_changes() {
        let mut state = ScheduleState::new();
        let event = daily();
        for _ in 0..200 {
            state.register(event.clone(), base());
        }
        assert!(state.heap.len() <= COMPACT_MIN_LEN);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn sync_reconciles_by_updated_at() {
        let mut state = ScheduleState::new();
        let kept = daily();
        let changed = daily();
        let dropped = daily();
        let report = state.sync(vec![kept.clone(), changed.clone(), dropped.clone()], base());
        assert_eq!(report.registered, 3);

        let mut changed2 = changed.clone();
        changed2.updated_at = base() + TimeDelta::minutes(5);
        changed2.timing = EventTiming::Recurring {
            rrule: "FREQ=WEEKLY".into(),
        };
        let report = state.sync(vec![kept.clone(), changed2], base());
        assert_eq!(
            report,
            SyncReport {
                registered: 0,
                updated: 1,
                removed: 1,
                unchanged: 1,
                not_scheduled: 0,
            }
        );
        let changed_entry = state
            .snapshot()
            .into_iter()
            .find(|e| e.event_id == changed.id)
            .unwrap();
        assert_eq!(changed_entry.next_fire, base() + TimeDelta::weeks(1));
    }

    #[test]
    fn sync_does_not_retry_dormant_events_until_they_change() {
        let mut state = ScheduleState::new();
        let mut event = daily();
        event.is_active = false;
        let report = state.sync(vec![event.clone()], base());
        assert_eq!(report.not_scheduled, 1);

        let report = state.sync(vec![event.clone()], base());
        assert_eq!(report.unchanged, 1);

        event.is_active = true;
        event.updated_at = base() + TimeDelta::minutes(1);
        let report = state.sync(vec![event], base());
        assert_eq!(report.registered, 1);
    }
}
