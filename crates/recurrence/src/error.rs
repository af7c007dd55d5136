use thiserror::Error;

/// Errors raised while validating recurrence input.
///
/// Exhaustion of a finite rule is not an error; the resolver reports it
/// as `None`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),

    #[error("invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },
}

pub(crate) fn invalid(msg: impl Into<String>) -> RecurrenceError {
    RecurrenceError::InvalidRecurrence(msg.into())
}
