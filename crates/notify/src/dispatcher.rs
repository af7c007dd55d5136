//! Builds and delivers the notification for one occurrence.
//!
//! The dispatcher never returns an error: every failure is folded into a
//! [`DeliveryOutcome`] so the caller can keep scheduling.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, Utc};
use eventbell_core::config::{NotifyConfig, DEFAULT_CONTENT_TEMPLATE, DEFAULT_EMBED_COLOR};
use eventbell_core::{Clock, Event, SystemClock, Webhook};

use crate::payload::{Embed, WebhookPayload};
use crate::templating::{EventContext, TemplateContext, TemplateRenderer, WebhookContext};
use crate::traits::{FailureKind, Notifier, NotifyError};

/// Result of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed { kind: FailureKind, reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            DeliveryOutcome::Delivered => None,
            DeliveryOutcome::Failed { kind, .. } => Some(*kind),
        }
    }

    fn from_error(e: &NotifyError) -> Self {
        DeliveryOutcome::Failed {
            kind: e.failure_kind(),
            reason: e.to_string(),
        }
    }
}

pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    renderer: TemplateRenderer,
    content_template: String,
    embed_color: u32,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            renderer: TemplateRenderer::new(),
            content_template: DEFAULT_CONTENT_TEMPLATE.to_string(),
            embed_color: DEFAULT_EMBED_COLOR,
            clock: Arc::new(SystemClock),
        }
    }

    /// Apply content template and color from config. The template is checked
    /// up front so a typo fails at startup rather than on every fire.
    pub fn from_config(notifier: Arc<dyn Notifier>, config: &NotifyConfig) -> Result<Self, NotifyError> {
        Self::new(notifier)
            .with_content_template(config.content_template.clone())
            .map(|d| d.with_embed_color(config.embed_color))
    }

    pub fn with_content_template(mut self, template: String) -> Result<Self, NotifyError> {
        self.renderer
            .validate(&template)
            .map_err(|e| NotifyError::Config(format!("invalid content template: {e}")))?;
        self.content_template = template;
        Ok(self)
    }

    pub fn with_embed_color(mut self, color: u32) -> Self {
        self.embed_color = color;
        self
    }

    /// Clock behind the `now` template variable.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Render the payload for one occurrence.
    pub fn build_payload(
        &self,
        event: &Event,
        webhook: &Webhook,
        occurrence_at: DateTime<Utc>,
    ) -> Result<WebhookPayload, NotifyError> {
        let timestamp = occurrence_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let ctx = TemplateContext {
            event: EventContext {
                id: event.id.to_string(),
                title: event.title.clone(),
                description: event.description.clone(),
                tags: event.tags.clone(),
            },
            webhook: WebhookContext {
                name: webhook.name.clone(),
            },
            occurrence: timestamp.clone(),
            now: self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        let content = self.renderer.render(&self.content_template, &ctx)?;

        Ok(WebhookPayload {
            content,
            embeds: vec![Embed {
                color: self.embed_color,
                title: event.title.clone(),
                description: event.description.clone(),
                timestamp,
            }],
        })
    }

    /// Deliver the notification for `occurrence_at` with a single attempt.
    pub async fn dispatch(
        &self,
        event: &Event,
        webhook: &Webhook,
        occurrence_at: DateTime<Utc>,
    ) -> DeliveryOutcome {
        let payload = match self.build_payload(event, webhook, occurrence_at) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    occurrence = %occurrence_at,
                    error = %e,
                    "failed to build notification payload"
                );
                return DeliveryOutcome::from_error(&e);
            }
        };

        let start = Instant::now();
        let result = self.notifier.post(&webhook.url, &payload).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                tracing::info!(
                    event_id = %event.id,
                    occurrence = %occurrence_at,
                    webhook = %webhook.name,
                    channel = self.notifier.channel_name(),
                    duration_ms,
                    "Notification delivered"
                );
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                let outcome = DeliveryOutcome::from_error(&e);
                tracing::warn!(
                    event_id = %event.id,
                    occurrence = %occurrence_at,
                    webhook = %webhook.name,
                    channel = self.notifier.channel_name(),
                    kind = %e.failure_kind(),
                    error = %e,
                    duration_ms,
                    "Notification delivery failed"
                );
                outcome
            }
        }
    }
}
