//! Notifier trait definition and shared error types.

use std::fmt;

use crate::payload::WebhookPayload;

/// How a failed delivery should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Network trouble, timeouts, 5xx, 408, 429. A later cycle may succeed.
    Transient,
    /// Rejected request or broken configuration. Needs an operator.
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
        })
    }
}

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid webhook URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NotifyError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            NotifyError::Http(e) => {
                if e.is_builder() {
                    FailureKind::Permanent
                } else if let Some(status) = e.status() {
                    classify_status(status.as_u16())
                } else {
                    FailureKind::Transient
                }
            }
            NotifyError::Status { status, .. } => classify_status(*status),
            NotifyError::InvalidUrl { .. }
            | NotifyError::Template(_)
            | NotifyError::Config(_) => FailureKind::Permanent,
        }
    }
}

/// Classify a non-204 response status.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        408 | 429 => FailureKind::Transient,
        500..=599 => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}

/// Transport for webhook payloads.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Make one delivery attempt. `Ok` only when the endpoint acknowledged
    /// with 204 No Content.
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<(), NotifyError>;

    /// Human-readable name for this transport (e.g., "webhook").
    fn channel_name(&self) -> &str;
}
