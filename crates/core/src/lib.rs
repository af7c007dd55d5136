pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod job;
pub mod ports;
pub mod validation;
pub mod webhook;

pub use clock::{Clock, SystemClock, TokioClock};
pub use config::Config;
pub use error::*;
pub use event::{Event, EventTiming, OccurrenceKey};
pub use job::{JobStatus, NotificationJob};
pub use webhook::Webhook;
