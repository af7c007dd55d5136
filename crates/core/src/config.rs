use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: FromStr>(profile: &str, key: &str, default: T) -> T {
    match profiled_env_opt(profile, key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable config value, using default");
            default
        }),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub postgres: PostgresConfig,
    pub scheduler: SchedulerConfig,
    pub ledger: LedgerConfig,
    pub notify: NotifyConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `EVENTBELL_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("EVENTBELL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            postgres: PostgresConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
            ledger: LedgerConfig::from_env_profiled(p),
            notify: NotifyConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  postgres:    host={}, db={}, configured={}",
            self.postgres.host,
            self.postgres.database,
            self.postgres.is_configured()
        );
        tracing::info!(
            "  scheduler:   max_dispatches={}, idle_wait={}s, refresh={}s, on_permanent={}",
            self.scheduler.max_concurrent_dispatches,
            self.scheduler.max_idle_wait_secs,
            self.scheduler.catalog_refresh_secs,
            self.scheduler.permanent_failure_policy
        );
        tracing::info!(
            "  ledger:      backend={}, grace={}s, sweep={}s, retries={}",
            self.ledger.backend,
            self.ledger.grace_secs,
            self.ledger.sweep_secs,
            self.ledger.retry_attempts
        );
        tracing::info!(
            "  notify:      default_webhook={}, timeout={}s",
            if self.notify.default_webhook_url.is_some() { "set" } else { "(none)" },
            self.notify.timeout_secs
        );
    }

    /// Return a redacted view safe for status output (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "scheduler": self.scheduler,
            "ledger": self.ledger,
            "notify": {
                "default_webhook": self.notify.default_webhook_url.is_some(),
                "embed_color": self.notify.embed_color,
                "timeout_secs": self.notify.timeout_secs,
            },
        })
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full URL; takes precedence over the individual fields.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "DATABASE_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "eventbell"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

// ── Scheduler ─────────────────────────────────────────────────

/// What to do after a delivery fails permanently (4xx, bad URL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentFailurePolicy {
    /// Log an operator-visible alert and keep the event scheduled.
    #[default]
    Alert,
    /// Alert, deactivate the event in the catalogue and unschedule it.
    DeactivateEvent,
}

impl FromStr for PermanentFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alert" => Ok(Self::Alert),
            "deactivate_event" | "deactivate" => Ok(Self::DeactivateEvent),
            other => Err(format!("unknown permanent failure policy '{other}'")),
        }
    }
}

impl fmt::Display for PermanentFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Alert => "alert",
            Self::DeactivateEvent => "deactivate_event",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub max_concurrent_dispatches: usize,
    /// Longest the coordinator sleeps without re-reading the clock.
    pub max_idle_wait_secs: u64,
    /// How often the worker re-syncs with the catalogue.
    pub catalog_refresh_secs: u64,
    pub permanent_failure_policy: PermanentFailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: 16,
            max_idle_wait_secs: 60,
            catalog_refresh_secs: 30,
            permanent_failure_policy: PermanentFailurePolicy::Alert,
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_concurrent_dispatches: profiled_env_parse(
                p,
                "SCHEDULER_MAX_CONCURRENT_DISPATCHES",
                d.max_concurrent_dispatches,
            )
            .max(1),
            max_idle_wait_secs: profiled_env_parse(p, "SCHEDULER_MAX_IDLE_WAIT_SECS", d.max_idle_wait_secs)
                .max(1),
            catalog_refresh_secs: profiled_env_parse(
                p,
                "SCHEDULER_CATALOG_REFRESH_SECS",
                d.catalog_refresh_secs,
            )
            .max(1),
            permanent_failure_policy: profiled_env_parse(
                p,
                "SCHEDULER_PERMANENT_FAILURE_POLICY",
                d.permanent_failure_policy,
            ),
        }
    }

    pub fn max_idle_wait(&self) -> Duration {
        Duration::from_secs(self.max_idle_wait_secs)
    }

    pub fn catalog_refresh(&self) -> Duration {
        Duration::from_secs(self.catalog_refresh_secs)
    }
}

// ── Ledger ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerBackend {
    /// In-process map. Only safe with a single scheduler instance.
    #[default]
    Memory,
    /// Shared table in PostgreSQL.
    Postgres,
}

impl FromStr for LedgerBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "pg" => Ok(Self::Postgres),
            other => Err(format!("unknown ledger backend '{other}'")),
        }
    }
}

impl fmt::Display for LedgerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// Extra time a dedup record lives past the occurrence's end.
    pub grace_secs: u64,
    pub sweep_secs: u64,
    pub retry_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Memory,
            grace_secs: 600,
            sweep_secs: 60,
            retry_attempts: 5,
            retry_base_ms: 200,
            retry_max_ms: 5_000,
        }
    }
}

impl LedgerConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            backend: profiled_env_parse(p, "LEDGER_BACKEND", d.backend),
            grace_secs: profiled_env_parse(p, "LEDGER_GRACE_SECS", d.grace_secs),
            sweep_secs: profiled_env_parse(p, "LEDGER_SWEEP_SECS", d.sweep_secs).max(1),
            retry_attempts: profiled_env_parse(p, "LEDGER_RETRY_ATTEMPTS", d.retry_attempts),
            retry_base_ms: profiled_env_parse(p, "LEDGER_RETRY_BASE_MS", d.retry_base_ms),
            retry_max_ms: profiled_env_parse(p, "LEDGER_RETRY_MAX_MS", d.retry_max_ms),
        }
    }

    pub fn grace(&self) -> chrono::TimeDelta {
        i64::try_from(self.grace_secs)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .unwrap_or_else(|| chrono::TimeDelta::days(3_650))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

// ── Notify ────────────────────────────────────────────────────

pub const DEFAULT_CONTENT_TEMPLATE: &str = "{{ event.title }}";
pub const DEFAULT_EMBED_COLOR: u32 = 15_105_570;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Used when an event has no webhook of its own. May contain `${VAR}`.
    pub default_webhook_url: Option<String>,
    pub content_template: String,
    pub embed_color: u32,
    pub timeout_secs: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            default_webhook_url: None,
            content_template: DEFAULT_CONTENT_TEMPLATE.to_string(),
            embed_color: DEFAULT_EMBED_COLOR,
            timeout_secs: 10,
        }
    }
}

impl NotifyConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            default_webhook_url: profiled_env_opt(p, "WEBHOOK_URL"),
            content_template: profiled_env_or(p, "NOTIFY_CONTENT_TEMPLATE", &d.content_template),
            embed_color: profiled_env_parse(p, "NOTIFY_EMBED_COLOR", d.embed_color),
            timeout_secs: profiled_env_parse(p, "NOTIFY_TIMEOUT_SECS", d.timeout_secs).max(1),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        let cfg = Config::for_profile("EBTEST_EMPTY_PROFILE");
        assert_eq!(cfg.profile_label(), "EBTEST_EMPTY_PROFILE");
        assert!(cfg.scheduler.max_concurrent_dispatches >= 1);
        assert_eq!(cfg.notify.embed_color, DEFAULT_EMBED_COLOR);
    }

    #[test]
    fn profiled_keys_win() {
        env::set_var("EBTEST_PROF_SCHEDULER_MAX_IDLE_WAIT_SECS", "5");
        env::set_var("EBTEST_PROF_LEDGER_BACKEND", "postgres");
        env::set_var("EBTEST_PROF_SCHEDULER_PERMANENT_FAILURE_POLICY", "deactivate_event");
        env::set_var("EBTEST_PROF_NOTIFY_EMBED_COLOR", "not-a-number");

        let cfg = Config::for_profile("ebtest_prof");
        assert_eq!(cfg.scheduler.max_idle_wait(), Duration::from_secs(5));
        assert_eq!(cfg.ledger.backend, LedgerBackend::Postgres);
        assert_eq!(
            cfg.scheduler.permanent_failure_policy,
            PermanentFailurePolicy::DeactivateEvent
        );
        assert_eq!(cfg.notify.embed_color, DEFAULT_EMBED_COLOR);
    }

    #[test]
    fn database_url_overrides_fields() {
        let pg = PostgresConfig {
            url: Some("postgres://u:p@db:5432/x".into()),
            host: "localhost".into(),
            port: 5432,
            database: "eventbell".into(),
            username: None,
            password: None,
            ssl_mode: "prefer".into(),
            max_connections: 10,
        };
        assert!(pg.is_configured());
        assert_eq!(pg.connection_string(), "postgres://u:p@db:5432/x");
    }

    #[test]
    fn policy_parsing() {
        assert_eq!("Alert".parse::<PermanentFailurePolicy>(), Ok(PermanentFailurePolicy::Alert));
        assert!("explode".parse::<PermanentFailurePolicy>().is_err());
        assert_eq!(PermanentFailurePolicy::DeactivateEvent.to_string(), "deactivate_event");
    }
}
