//! scheduler-worker: runs the schedule coordinator against PostgreSQL.
//!
//! Loads all active events from the catalogue on startup, then re-syncs on a
//! fixed interval (the catalogue has no change feed). Ctrl-C stops the
//! coordinator after in-flight fires finish.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use eventbell_core::config::{load_dotenv, LedgerBackend};
use eventbell_core::ports::EventCatalog;
use eventbell_core::{Config, SystemClock};
use eventbell_ledger::{spawn_sweeper, LedgerStore, MemoryLedger};
use eventbell_notify::{Dispatcher, WebhookNotifier};
use eventbell_scheduler::{Collaborators, Coordinator, CoordinatorOptions, JobLog};
use eventbell_store::{init_pg_pool, PgEventCatalog, PgJobStore, PgLedger, PgWebhookStore};

// ── CLI ─────────────────────────────────────────────────────────────

/// Eventbell scheduler worker. Fires event webhooks on their recurrence.
#[derive(Parser, Debug)]
#[command(name = "scheduler-worker", version, about)]
struct Cli {
    /// Config profile; keys are looked up as {PROFILE}_{KEY} first.
    #[arg(long, env = "EVENTBELL_PROFILE", default_value = "")]
    profile: String,

    /// Catalogue refresh interval in seconds (defaults to SCHEDULER_CATALOG_REFRESH_SECS).
    #[arg(long)]
    refresh_secs: Option<u64>,

    /// Sync once, print the resulting schedule as JSON and exit.
    #[arg(long)]
    dry_run: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::for_profile(&cli.profile);
    config.log_summary();

    if !config.postgres.is_configured() {
        anyhow::bail!("PostgreSQL is not configured: set DATABASE_URL or PG_USERNAME");
    }
    let pool = init_pg_pool(&config.postgres).await?;

    let catalog = Arc::new(PgEventCatalog::new(pool.clone()));
    let jobs = JobLog::default().with_sink(Arc::new(PgJobStore::new(pool.clone())));
    let ledger: Arc<dyn LedgerStore> = match config.ledger.backend {
        LedgerBackend::Memory => Arc::new(MemoryLedger::new()),
        LedgerBackend::Postgres => Arc::new(PgLedger::new(pool.clone())),
    };
    let notifier = Arc::new(WebhookNotifier::new(config.notify.timeout())?);
    let dispatcher = Dispatcher::from_config(notifier, &config.notify)?;

    let shutdown = Arc::new(Notify::new());
    let sweeper = spawn_sweeper(
        Arc::clone(&ledger),
        config.ledger.sweep_interval(),
        Arc::clone(&shutdown),
    );

    let (coordinator, task) = Coordinator::spawn(
        Collaborators {
            catalog: catalog.clone(),
            webhooks: Arc::new(PgWebhookStore::new(pool)),
            ledger,
            dispatcher: Arc::new(dispatcher),
            jobs: Arc::new(jobs),
            clock: Arc::new(SystemClock),
        },
        CoordinatorOptions::from_config(&config)?,
    );

    sync_catalog(&coordinator, catalog.as_ref()).await;

    if cli.dry_run {
        let snapshot = coordinator.snapshot().await?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        let refresh = Duration::from_secs(
            cli.refresh_secs
                .unwrap_or(config.scheduler.catalog_refresh_secs)
                .max(1),
        );
        let mut ticker = tokio::time::interval(refresh);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick is immediate and the initial sync already ran.
        ticker.tick().await;

        info!(refresh_secs = refresh.as_secs(), "scheduler worker running");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = ticker.tick() => sync_catalog(&coordinator, catalog.as_ref()).await,
            }
        }
    }

    shutdown.notify_one();
    coordinator.shutdown().await?;
    task.await?;
    sweeper.await?;

    let metrics = coordinator.metrics();
    info!(
        fires = metrics.fires,
        delivered = metrics.delivered,
        transient_failures = metrics.transient_failures,
        permanent_failures = metrics.permanent_failures,
        duplicates_skipped = metrics.duplicates_skipped,
        ledger_drops = metrics.ledger_drops,
        "scheduler worker stopped"
    );
    Ok(())
}

/// Reconcile the coordinator with the catalogue. Failures are logged and the
/// previous schedule stays in place until the next attempt.
async fn sync_catalog(coordinator: &Coordinator, catalog: &dyn EventCatalog) {
    let events = match catalog.list_active().await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, "failed to list active events, keeping current schedule");
            return;
        }
    };
    if let Err(e) = coordinator.sync(events).await {
        warn!(error = %e, "catalogue sync rejected");
    }
}
