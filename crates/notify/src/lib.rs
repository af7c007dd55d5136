//! Webhook notification delivery for event occurrences.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable delivery transports
//! - `WebhookNotifier`: HTTP POST delivery with status classification
//! - Minijinja template rendering for the message content
//! - `Dispatcher`: builds the payload for one occurrence, delivers it once
//!   and reports a classified `DeliveryOutcome`

pub mod dispatcher;
pub mod payload;
pub mod templating;
pub mod traits;
pub mod webhook;

pub use dispatcher::{DeliveryOutcome, Dispatcher};
pub use payload::{Embed, WebhookPayload};
pub use traits::{FailureKind, Notifier, NotifyError};
pub use webhook::{resolve_env_vars, WebhookNotifier};
