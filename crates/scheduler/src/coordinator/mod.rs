//! The schedule coordinator.
//!
//! One tokio task owns every [`ScheduleEntry`] and a single time-ordered heap
//! of pending fires. It sleeps until the nearest fire (or a command, or the
//! idle cap) and hands each due occurrence to a fire task:
//!
//! 1. claim the occurrence in the ledger (retried while the ledger is down)
//! 2. drop the fire if its entry was changed or removed meanwhile
//! 3. resolve the webhook and dispatch
//! 4. record the job status and apply the permanent-failure policy
//!
//! Cancellation is cooperative. Every entry shares a generation cell with the
//! fire tasks spawned for it; changing or removing the entry moves the cell
//! away from the version a task captured, and the task takes no dispatch
//! action when it notices.

mod actor;
mod fire;
mod handle;
mod state;


use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use eventbell_core::config::{Config, PermanentFailurePolicy};
use eventbell_core::ports::{EventCatalog, JobRecorder, WebhookStore};
use eventbell_core::validation::check_http_url;
use eventbell_core::{Clock, Webhook};
use eventbell_ledger::LedgerStore;
use eventbell_notify::{resolve_env_vars, Dispatcher};
use serde::Serialize;
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::retry::RetryConfig;

pub use self::handle::Coordinator;

/// The services a coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn EventCatalog>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub jobs: Arc<dyn JobRecorder>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub max_concurrent_dispatches: usize,
    /// Longest sleep between clock reads, so wall-clock jumps are noticed.
    pub max_idle_wait: Duration,
    pub permanent_failure_policy: PermanentFailurePolicy,
    /// How long a ledger record outlives the end of its occurrence.
    pub ledger_grace: TimeDelta,
    pub ledger_retry: RetryConfig,
    /// Target for events without a webhook of their own.
    pub default_webhook: Option<Webhook>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: 16,
            max_idle_wait: Duration::from_secs(60),
            permanent_failure_policy: PermanentFailurePolicy::Alert,
            ledger_grace: TimeDelta::minutes(10),
            ledger_retry: RetryConfig::DEFAULT,
            default_webhook: None,
        }
    }
}

impl CoordinatorOptions {
    /// Build options from the loaded config. `${VAR}` references in the
    /// default webhook URL are resolved here.
    pub fn from_config(config: &Config) -> Result<Self, SchedulerError> {
        let default_webhook = match &config.notify.default_webhook_url {
            Some(raw) => {
                let url = resolve_env_vars(raw)
                    .map_err(|e| SchedulerError::Config(format!("WEBHOOK_URL: {e}")))?;
                check_http_url(&url)
                    .map_err(|e| SchedulerError::Config(format!("WEBHOOK_URL: {e}")))?;
                Some(Webhook {
                    id: Uuid::nil(),
                    name: "default".to_string(),
                    url,
                })
            }
            None => None,
        };

        Ok(Self {
            max_concurrent_dispatches: config.scheduler.max_concurrent_dispatches.max(1),
            max_idle_wait: config.scheduler.max_idle_wait(),
            permanent_failure_policy: config.scheduler.permanent_failure_policy,
            ledger_grace: config.ledger.grace(),
            ledger_retry: RetryConfig::from_ledger_config(&config.ledger),
            default_webhook,
        })
    }
}

/// Result of registering (or re-registering) an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Scheduled {
        next_fire: DateTime<Utc>,
        version: u64,
    },
    /// The event is inactive; nothing is scheduled.
    Inactive,
    /// The recurrence has no occurrence after now.
    Exhausted,
    /// The recurrence or duration could not be parsed.
    Invalid(String),
}

impl RegisterOutcome {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, RegisterOutcome::Scheduled { .. })
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        match self {
            RegisterOutcome::Scheduled { next_fire, .. } => Some(*next_fire),
            _ => None,
        }
    }
}

/// Public view of one scheduled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub event_id: Uuid,
    pub title: String,
    pub next_fire: DateTime<Utc>,
    pub version: u64,
}

/// What a [`Coordinator::sync`] pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Newly scheduled events.
    pub registered: usize,
    /// Scheduled events whose definition changed.
    pub updated: usize,
    /// Entries dropped because the event vanished, went inactive or ran out.
    pub removed: usize,
    pub unchanged: usize,
    /// Events seen for the first time that could not be scheduled.
    pub not_scheduled: usize,
}
