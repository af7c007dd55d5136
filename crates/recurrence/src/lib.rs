//! Recurrence resolution for scheduled events.
//!
//! This crate provides:
//! - [`RRule`]: an RFC 5545 RRULE parser (UTC only, no BYYEARDAY/BYWEEKNO)
//! - [`Recurrence`]: the resolver that turns a rule plus an anchor into
//!   concrete occurrence timestamps
//! - [`parse_iso8601_duration`]: ISO 8601 duration parsing for event lengths
//!
//! Everything here is a pure function of its inputs: no clocks, no I/O.

pub mod duration;
pub mod error;
mod expand;
pub mod resolver;
pub mod rrule;

pub use duration::parse_iso8601_duration;
pub use error::RecurrenceError;
pub use resolver::{CatchUp, Recurrence};
pub use rrule::{ByDay, Frequency, RRule};
