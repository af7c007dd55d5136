//! Background purge of expired ledger records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::traits::LedgerStore;

/// Purge expired records every `interval` until `shutdown` is notified.
pub fn spawn_sweeper(
    ledger: Arc<dyn LedgerStore>,
    interval: Duration,
    shutdown: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing can have expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!(backend = ledger.name(), "Ledger sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    match ledger.purge_expired().await {
                        Ok(0) => {}
                        Ok(n) => debug!(backend = ledger.name(), purged = n, "purged expired ledger records"),
                        Err(e) => warn!(backend = ledger.name(), error = %e, "ledger purge failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use eventbell_core::OccurrenceKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLedger {
        purges: AtomicUsize,
    }

    #[async_trait]
    impl LedgerStore for CountingLedger {
        async fn mark_if_absent(
            &self,
            _key: &OccurrenceKey,
            _expires_at: DateTime<Utc>,
        ) -> Result<bool, LedgerError> {
            Ok(true)
        }

        async fn purge_expired(&self) -> Result<usize, LedgerError> {
            self.purges.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_on_interval_and_stops_on_shutdown() {
        let ledger = Arc::new(CountingLedger {
            purges: AtomicUsize::new(0),
        });
        let shutdown = Arc::new(Notify::new());
        let handle = spawn_sweeper(ledger.clone(), Duration::from_secs(60), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(60 * 3 + 1)).await;
        assert_eq!(ledger.purges.load(Ordering::SeqCst), 3);

        shutdown.notify_one();
        handle.await.unwrap();
    }
}
