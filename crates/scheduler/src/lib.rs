//! Schedule coordination for eventbell.
//!
//! The [`Coordinator`] owns every pending fire. It asks the recurrence
//! resolver for the next occurrence, claims each due occurrence in the ledger
//! and hands it to the notification dispatcher on a bounded pool of tasks.

pub mod coordinator;
pub mod error;
pub mod job_log;
pub mod metrics;
pub mod retry;

pub use coordinator::{
    Collaborators, Coordinator, CoordinatorOptions, RegisterOutcome, ScheduleEntry, SyncReport,
};
pub use error::SchedulerError;
pub use job_log::JobLog;
pub use metrics::SchedulerMetrics;
pub use retry::{retry_with_backoff, RetryConfig, RetryResult};
