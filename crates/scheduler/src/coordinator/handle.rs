use std::sync::{Arc, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use eventbell_core::Event;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::actor::{Actor, Command};
use super::fire::FireContext;
use super::{Collaborators, CoordinatorOptions, RegisterOutcome, ScheduleEntry, SyncReport};
use crate::error::SchedulerError;
use crate::metrics::SchedulerMetrics;

const COMMAND_BUFFER: usize = 256;

/// Cloneable handle to a running coordinator task.
///
/// The task stops on [`shutdown`](Coordinator::shutdown) or once every handle
/// has been dropped.
#[derive(Clone)]
pub struct Coordinator {
    commands: mpsc::Sender<Command>,
    metrics: Arc<RwLock<SchedulerMetrics>>,
}

impl Coordinator {
    /// Start the coordinator task on the current runtime.
    pub fn spawn(collaborators: Collaborators, options: CoordinatorOptions) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (feedback, feedback_rx) = mpsc::unbounded_channel();
        let metrics = Arc::new(RwLock::new(SchedulerMetrics::default()));

        let ctx = Arc::new(FireContext {
            catalog: collaborators.catalog,
            webhooks: collaborators.webhooks,
            ledger: collaborators.ledger,
            dispatcher: collaborators.dispatcher,
            jobs: collaborators.jobs,
            clock: collaborators.clock,
            permits: Arc::new(Semaphore::new(options.max_concurrent_dispatches.max(1))),
            options,
            metrics: Arc::clone(&metrics),
            feedback,
        });

        let task = tokio::spawn(Actor::new(command_rx, feedback_rx, ctx).run());
        (Self { commands, metrics }, task)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SchedulerError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(make(reply)).await?;
        Ok(response.await?)
    }

    /// Schedule an event from its first occurrence after now.
    pub async fn register(&self, event: Event) -> Result<RegisterOutcome, SchedulerError> {
        self.request(|reply| Command::Register { event, reply }).await
    }

    /// Remove an event's entry. Returns whether one existed.
    pub async fn unregister(&self, event_id: Uuid) -> Result<bool, SchedulerError> {
        self.request(|reply| Command::Unregister { event_id, reply })
            .await
    }

    /// Replace an event's entry under a new version. Fires already in flight
    /// for the old definition complete their ledger write but do not dispatch.
    pub async fn on_event_changed(&self, event: Event) -> Result<RegisterOutcome, SchedulerError> {
        debug!(event_id = %event.id, "event changed, rescheduling");
        self.request(|reply| Command::Register { event, reply }).await
    }

    /// Reconcile with the catalogue's current list of events.
    pub async fn sync(&self, events: Vec<Event>) -> Result<SyncReport, SchedulerError> {
        self.request(|reply| Command::Sync { events, reply }).await
    }

    pub async fn snapshot(&self) -> Result<Vec<ScheduleEntry>, SchedulerError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Occurrences of a scheduled event within `window` from now. `None` when
    /// the event is not scheduled.
    pub async fn upcoming(
        &self,
        event_id: Uuid,
        window: TimeDelta,
        limit: usize,
    ) -> Result<Option<Vec<DateTime<Utc>>>, SchedulerError> {
        self.request(|reply| Command::Upcoming {
            event_id,
            window,
            limit,
            reply,
        })
        .await
    }

    /// Stop the coordinator after in-flight fires finish.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}
