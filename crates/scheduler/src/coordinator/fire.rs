//! Handling of one due occurrence, off the coordinator task.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use eventbell_core::config::PermanentFailurePolicy;
use eventbell_core::ports::{EventCatalog, JobRecorder, WebhookStore};
use eventbell_core::{Clock, Event, JobStatus, NotificationJob, PortError, Webhook};
use eventbell_ledger::{LedgerError, LedgerStore};
use eventbell_notify::{DeliveryOutcome, Dispatcher, FailureKind};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::DueFire;
use super::CoordinatorOptions;
use crate::metrics::SchedulerMetrics;
use crate::retry::{retry_with_backoff, RetryResult};

/// Messages from fire tasks back to the coordinator task.
#[derive(Debug)]
pub(crate) enum Feedback {
    /// The permanent-failure policy deactivated this event.
    Deactivated { event_id: Uuid, version: u64 },
}

/// Everything a fire task needs, shared by all of them.
pub(crate) struct FireContext {
    pub catalog: Arc<dyn EventCatalog>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub jobs: Arc<dyn JobRecorder>,
    pub clock: Arc<dyn Clock>,
    pub options: CoordinatorOptions,
    pub metrics: Arc<RwLock<SchedulerMetrics>>,
    pub permits: Arc<Semaphore>,
    pub feedback: mpsc::UnboundedSender<Feedback>,
}

impl FireContext {
    pub fn bump(&self, f: impl FnOnce(&mut SchedulerMetrics)) {
        if let Ok(mut m) = self.metrics.write() {
            f(&mut m);
        }
    }

    pub async fn run(self: Arc<Self>, fire: DueFire) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };

        let event = Arc::clone(&fire.event);
        let occurrence = fire.occurrence_at;
        let mut job = NotificationJob::pending(event.id, occurrence, self.clock.now());
        self.record(&job).await;

        // Claim the occurrence before anything else. Without a record there is
        // no dispatch.
        let key = event.occurrence_key(occurrence);
        let expires_at = self.ledger_expiry(&event, occurrence);
        let ledger = &self.ledger;
        let claim = retry_with_backoff(self.options.ledger_retry, LedgerError::is_retryable, || {
            ledger.mark_if_absent(&key, expires_at)
        })
        .await;

        let claimed = match claim {
            RetryResult::Success(claimed) => claimed,
            RetryResult::ExhaustedRetries {
                last_error,
                attempts,
            } => {
                error!(
                    event_id = %event.id,
                    %occurrence,
                    attempts,
                    error = %last_error,
                    "ledger unavailable, dropped occurrence"
                );
                self.bump(|m| m.ledger_drops += 1);
                self.finish(&mut job, JobStatus::Failed, format!("dropped: {last_error}"))
                    .await;
                return;
            }
            RetryResult::PermanentError(e) => {
                error!(event_id = %event.id, %occurrence, error = %e, "ledger rejected claim, dropped occurrence");
                self.bump(|m| m.ledger_drops += 1);
                self.finish(&mut job, JobStatus::Failed, format!("dropped: {e}"))
                    .await;
                return;
            }
        };

        if !claimed {
            debug!(event_id = %event.id, %occurrence, "occurrence already claimed, skipping dispatch");
            self.bump(|m| m.duplicates_skipped += 1);
            self.finish(&mut job, JobStatus::Completed, "skipped: already notified".into())
                .await;
            return;
        }

        if !fire.is_current() {
            self.cancel_stale(&fire, &mut job).await;
            return;
        }

        let outcome = match self.resolve_webhook(&event).await {
            Ok(webhook) => {
                // Webhook lookup awaited; the entry may have changed meanwhile.
                if !fire.is_current() {
                    self.cancel_stale(&fire, &mut job).await;
                    return;
                }
                job.advance(JobStatus::Running, None, self.clock.now());
                self.record(&job).await;

                let outcome = self.dispatcher.dispatch(&event, &webhook, occurrence).await;
                self.bump(|m| m.record_outcome(&outcome));
                outcome
            }
            Err(outcome) => {
                if let Some(kind) = outcome.failure_kind() {
                    self.bump(|m| m.record_failure(kind));
                }
                outcome
            }
        };

        match &outcome {
            DeliveryOutcome::Delivered => {
                self.finish(&mut job, JobStatus::Completed, "delivered".into())
                    .await;
            }
            DeliveryOutcome::Failed { kind, reason } => {
                self.finish(&mut job, JobStatus::Failed, format!("{kind}: {reason}"))
                    .await;
                if *kind == FailureKind::Permanent {
                    self.apply_failure_policy(&fire, reason).await;
                }
            }
        }
    }

    async fn cancel_stale(&self, fire: &DueFire, job: &mut NotificationJob) {
        info!(
            event_id = %fire.event.id,
            occurrence = %fire.occurrence_at,
            version = fire.version,
            "entry changed or removed while firing, dispatch cancelled"
        );
        self.bump(|m| m.stale_fires += 1);
        self.finish(job, JobStatus::Failed, "cancelled: event changed or removed".into())
            .await;
    }

    /// The event's own webhook, else the configured default.
    async fn resolve_webhook(&self, event: &Event) -> Result<Webhook, DeliveryOutcome> {
        let fallback = |missing: String| {
            self.options
                .default_webhook
                .clone()
                .ok_or(DeliveryOutcome::Failed {
                    kind: FailureKind::Permanent,
                    reason: missing,
                })
        };

        let Some(webhook_id) = event.webhook_id else {
            return fallback("no webhook configured".to_string());
        };

        match self.webhooks.resolve(webhook_id).await {
            Ok(Some(webhook)) => Ok(webhook),
            Ok(None) => {
                warn!(event_id = %event.id, %webhook_id, "webhook not found");
                fallback(format!("webhook {webhook_id} not found"))
            }
            Err(e) => {
                let kind = match e {
                    PortError::Unavailable(_) => FailureKind::Transient,
                    PortError::Corrupt { .. } => FailureKind::Permanent,
                };
                warn!(event_id = %event.id, %webhook_id, error = %e, "webhook lookup failed");
                Err(DeliveryOutcome::Failed {
                    kind,
                    reason: format!("webhook lookup failed: {e}"),
                })
            }
        }
    }

    async fn apply_failure_policy(&self, fire: &DueFire, reason: &str) {
        let event_id = fire.event.id;
        match self.options.permanent_failure_policy {
            PermanentFailurePolicy::Alert => {
                error!(
                    alert = true,
                    %event_id,
                    occurrence = %fire.occurrence_at,
                    reason,
                    "permanent delivery failure, operator action needed"
                );
            }
            PermanentFailurePolicy::DeactivateEvent => {
                error!(
                    alert = true,
                    %event_id,
                    occurrence = %fire.occurrence_at,
                    reason,
                    "permanent delivery failure, deactivating event"
                );
                if let Err(e) = self.catalog.deactivate(event_id).await {
                    warn!(%event_id, error = %e, "failed to deactivate event in catalogue");
                }
                let sent = self.feedback.send(Feedback::Deactivated {
                    event_id,
                    version: fire.version,
                });
                if sent.is_err() {
                    debug!(%event_id, "coordinator stopped before deactivation");
                }
            }
        }
    }

    /// Ledger records live until the occurrence ends plus the grace window.
    fn ledger_expiry(&self, event: &Event, occurrence: DateTime<Utc>) -> DateTime<Utc> {
        let length = event
            .occurrence_length()
            .unwrap_or_else(|_| TimeDelta::zero())
            .max(TimeDelta::zero());
        length
            .checked_add(&self.options.ledger_grace)
            .and_then(|ttl| occurrence.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    async fn finish(&self, job: &mut NotificationJob, status: JobStatus, detail: String) {
        job.advance(status, Some(detail), self.clock.now());
        self.record(job).await;
    }

    async fn record(&self, job: &NotificationJob) {
        if let Err(e) = self.jobs.record(job).await {
            warn!(job_id = %job.id, status = %job.status, error = %e, "failed to record job");
        }
    }
}
