use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The coordinator task has stopped and no longer accepts commands.
    #[error("coordinator is not running")]
    Closed,

    #[error("invalid scheduler configuration: {0}")]
    Config(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SchedulerError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SchedulerError::Closed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SchedulerError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        SchedulerError::Closed
    }
}
