//! Record validation, applied before an event or webhook is accepted.
//!
//! All problems are collected so callers can report every bad field at once.

use eventbell_recurrence::{parse_iso8601_duration, RRule};

use crate::error::ValidationErrors;
use crate::event::{Event, EventTiming};
use crate::webhook::Webhook;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_WEBHOOK_NAME_LEN: usize = 100;
pub const MAX_WEBHOOK_URL_LEN: usize = 255;

pub fn validate_event(event: &Event) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if event.title.trim().is_empty() {
        errors.add("title", "is required");
    } else if event.title.len() > MAX_TITLE_LEN {
        errors.add("title", format!("must be at most {MAX_TITLE_LEN} bytes"));
    }

    if event.description.trim().is_empty() {
        errors.add("description", "is required");
    }

    match &event.timing {
        EventTiming::Recurring { rrule } => {
            if let Err(e) = parse_iso8601_duration(&event.duration) {
                errors.add("duration", e.to_string());
            }
            if let Err(e) = rrule.parse::<RRule>() {
                errors.add("rrule", e.to_string());
            }
        }
        EventTiming::Once { start, end } => {
            if end < start {
                errors.add("end", "must not be before start");
            }
        }
    }

    errors.into_result()
}

pub fn validate_webhook(webhook: &Webhook) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if webhook.name.trim().is_empty() {
        errors.add("name", "is required");
    } else if webhook.name.len() > MAX_WEBHOOK_NAME_LEN {
        errors.add("name", format!("must be at most {MAX_WEBHOOK_NAME_LEN} bytes"));
    }

    if webhook.url.trim().is_empty() {
        errors.add("url", "is required");
    } else if webhook.url.len() > MAX_WEBHOOK_URL_LEN {
        errors.add("url", format!("must be at most {MAX_WEBHOOK_URL_LEN} bytes"));
    } else if let Err(reason) = check_http_url(&webhook.url) {
        errors.add("url", reason);
    }

    errors.into_result()
}

/// Accept absolute `http`/`https` URLs only.
pub fn check_http_url(raw: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(raw).map_err(|e| format!("is not a valid URL: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(format!("scheme '{other}' is not http(s)")),
    }
}
