//! The coordinator task loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use eventbell_core::Event;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::fire::{Feedback, FireContext};
use super::state::ScheduleState;
use super::{RegisterOutcome, ScheduleEntry, SyncReport};

pub(crate) enum Command {
    Register {
        event: Event,
        reply: oneshot::Sender<RegisterOutcome>,
    },
    Unregister {
        event_id: Uuid,
        reply: oneshot::Sender<bool>,
    },
    Sync {
        events: Vec<Event>,
        reply: oneshot::Sender<SyncReport>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ScheduleEntry>>,
    },
    Upcoming {
        event_id: Uuid,
        window: TimeDelta,
        limit: usize,
        reply: oneshot::Sender<Option<Vec<DateTime<Utc>>>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct Actor {
    state: ScheduleState,
    commands: mpsc::Receiver<Command>,
    feedback: mpsc::UnboundedReceiver<Feedback>,
    ctx: Arc<FireContext>,
    fires: JoinSet<()>,
    max_idle_wait: Duration,
}

impl Actor {
    pub fn new(
        commands: mpsc::Receiver<Command>,
        feedback: mpsc::UnboundedReceiver<Feedback>,
        ctx: Arc<FireContext>,
    ) -> Self {
        let max_idle_wait = ctx.options.max_idle_wait.max(Duration::from_millis(1));
        Self {
            state: ScheduleState::new(),
            commands,
            feedback,
            ctx,
            fires: JoinSet::new(),
            max_idle_wait,
        }
    }

    pub async fn run(mut self) {
        info!(
            max_dispatches = self.ctx.options.max_concurrent_dispatches,
            policy = %self.ctx.options.permanent_failure_policy,
            ledger = self.ctx.ledger.name(),
            "Schedule coordinator started"
        );

        loop {
            let now = self.ctx.clock.now();
            self.fire_due(now);
            let wait = self.wait_for(now);

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.drain().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle(cmd),
                    None => {
                        self.drain().await;
                        break;
                    }
                },
                Some(feedback) = self.feedback.recv() => self.apply_feedback(feedback),
                Some(joined) = self.fires.join_next(), if !self.fires.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "fire task failed");
                    }
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Schedule coordinator stopped");
    }

    fn handle(&mut self, cmd: Command) {
        let now = self.ctx.clock.now();
        match cmd {
            Command::Register { event, reply } => {
                let outcome = self.state.register(event, now);
                self.update_gauge();
                let _ = reply.send(outcome);
            }
            Command::Unregister { event_id, reply } => {
                let removed = self.state.cancel(event_id);
                if removed {
                    info!(%event_id, "event unscheduled");
                }
                self.update_gauge();
                let _ = reply.send(removed);
            }
            Command::Sync { events, reply } => {
                let report = self.state.sync(events, now);
                if report != SyncReport::default() {
                    info!(
                        registered = report.registered,
                        updated = report.updated,
                        removed = report.removed,
                        unchanged = report.unchanged,
                        not_scheduled = report.not_scheduled,
                        "catalogue synced"
                    );
                }
                self.update_gauge();
                let _ = reply.send(report);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
            Command::Upcoming {
                event_id,
                window,
                limit,
                reply,
            } => {
                let _ = reply.send(self.state.upcoming(event_id, now, window, limit));
            }
            // Handled by the loop.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn apply_feedback(&mut self, feedback: Feedback) {
        match feedback {
            Feedback::Deactivated { event_id, version } => {
                if self.state.cancel_version(event_id, version) {
                    info!(%event_id, version, "event unscheduled after deactivation");
                    self.update_gauge();
                }
            }
        }
    }

    /// Spawn a fire task for everything due at `now`.
    fn fire_due(&mut self, now: DateTime<Utc>) {
        let (due, missed) = self.state.take_due(now);
        if due.is_empty() && missed == 0 {
            return;
        }

        let active = self.state.len();
        self.ctx.bump(|m| {
            m.record_missed(missed);
            m.active_entries = active;
            for fire in &due {
                m.record_fire(fire.occurrence_at);
            }
        });

        for fire in due {
            debug!(
                event_id = %fire.event.id,
                occurrence = %fire.occurrence_at,
                version = fire.version,
                "occurrence due"
            );
            self.fires.spawn(Arc::clone(&self.ctx).run(fire));
        }
    }

    /// Time until the nearest fire, capped at the idle wait.
    fn wait_for(&mut self, now: DateTime<Utc>) -> Duration {
        match self.state.next_deadline() {
            Some(deadline) => (deadline - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.max_idle_wait),
            None => self.max_idle_wait,
        }
    }

    fn update_gauge(&self) {
        let active = self.state.len();
        self.ctx.bump(|m| m.active_entries = active);
    }

    /// Wait for in-flight fires so their ledger and audit writes land.
    async fn drain(&mut self) {
        let in_flight = self.fires.len();
        if in_flight > 0 {
            info!(in_flight, "waiting for in-flight fires");
        }
        while let Some(joined) = self.fires.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "fire task failed");
            }
        }
    }
}
