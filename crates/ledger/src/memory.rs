//! In-process expiring ledger.
//!
//! A `std::sync::Mutex` guards the map; the critical section never awaits, so
//! it is safe to call from any tokio task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventbell_core::{Clock, OccurrenceKey, SystemClock};
use tracing::debug;

use crate::error::LedgerError;
use crate::traits::LedgerStore;

pub struct MemoryLedger {
    records: Mutex<HashMap<OccurrenceKey, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of records, live or not yet purged.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live record exists for `key`.
    pub fn contains(&self, key: &OccurrenceKey) -> bool {
        let now = self.clock.now();
        self.records
            .lock()
            .map(|r| r.get(key).is_some_and(|exp| *exp > now))
            .unwrap_or(false)
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn mark_if_absent(
        &self,
        key: &OccurrenceKey,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let now = self.clock.now();
        let mut records = self
            .records
            .lock()
            .map_err(|e| LedgerError::Backend(format!("ledger lock poisoned: {e}")))?;

        if records.get(key).is_some_and(|exp| *exp > now) {
            debug!(%key, "occurrence already recorded");
            return Ok(false);
        }
        records.insert(*key, expires_at);
        Ok(true)
    }

    async fn purge_expired(&self) -> Result<usize, LedgerError> {
        let now = self.clock.now();
        let mut records = self
            .records
            .lock()
            .map_err(|e| LedgerError::Backend(format!("ledger lock poisoned: {e}")))?;
        let before = records.len();
        records.retain(|_, exp| *exp > now);
        Ok(before - records.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
