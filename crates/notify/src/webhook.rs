//! HTTP webhook notifier.
//!
//! POSTs the JSON payload to the webhook URL. The endpoint must answer with
//! `204 No Content`; any other status is a failed delivery.

use std::time::Duration;

use crate::payload::WebhookPayload;
use crate::traits::{Notifier, NotifyError};

/// Longest response body kept in error messages.
const MAX_ERROR_BODY: usize = 512;

/// Delivers payloads as JSON over HTTP.
///
/// One shared `reqwest::Client` (connection pooling) with a per-request
/// timeout. Each call makes exactly one attempt.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<(), NotifyError> {
        let target = parse_target(url)?;

        let response = self.client.post(target).json(payload).send().await?;
        let status = response.status();

        if status != reqwest::StatusCode::NO_CONTENT {
            let mut body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            truncate_utf8(&mut body_text, MAX_ERROR_BODY);
            tracing::warn!(
                %status,
                body = %body_text,
                "webhook did not acknowledge with 204"
            );
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body: body_text,
            });
        }

        tracing::debug!(status = %status, "webhook notification delivered");
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

/// Only absolute http(s) URLs are deliverable.
fn parse_target(raw: &str) -> Result<url::Url, NotifyError> {
    let invalid = |reason: String| NotifyError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let parsed = url::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

/// Resolve `${VAR_NAME}` patterns in a string using `std::env::var`.
///
/// Returns an error if a referenced variable is not set.
pub fn resolve_env_vars(input: &str) -> Result<String, NotifyError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(NotifyError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name).map_err(|_| {
                NotifyError::Config(format!("env var not found: {var_name}"))
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Embed;
    use crate::traits::FailureKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> WebhookPayload {
        WebhookPayload {
            content: "@everyone Raid Night".to_string(),
            embeds: vec![Embed {
                color: 15_105_570,
                title: "Raid Night".to_string(),
                description: "Bring potions".to_string(),
                timestamp: "2025-01-10T20:00:00Z".to_string(),
            }],
        }
    }

    fn notifier() -> WebhookNotifier {
        WebhookNotifier::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn delivers_on_204() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "content": "@everyone Raid Night",
                "embeds": [{ "color": 15105570, "title": "Raid Night" }]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/hook", server.uri());
        notifier().post(&url, &payload()).await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = notifier()
            .post(&format!("{}/hook", server.uri()), &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 500, .. }));
        assert_eq!(err.failure_kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn not_found_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = notifier()
            .post(&format!("{}/hook", server.uri()), &payload())
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Permanent);
    }

    #[tokio::test]
    async fn ok_without_no_content_is_not_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let err = notifier()
            .post(&format!("{}/hook", server.uri()), &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 200, .. }));
        assert_eq!(err.failure_kind(), FailureKind::Permanent);
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = notifier()
            .post(&format!("{}/hook", server.uri()), &payload())
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let fast = WebhookNotifier::new(Duration::from_millis(100)).unwrap();
        let err = fast
            .post(&format!("{}/hook", server.uri()), &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Http(_)));
        assert_eq!(err.failure_kind(), FailureKind::Transient);
    }

    #[tokio::test]
    async fn invalid_url_is_permanent() {
        for bad in ["not a url", "ftp://example.com/hook"] {
            let err = notifier().post(bad, &payload()).await.unwrap_err();
            assert!(matches!(err, NotifyError::InvalidUrl { .. }), "{bad}: {err:?}");
            assert_eq!(err.failure_kind(), FailureKind::Permanent);
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let mut s = "ééééé".to_string();
        truncate_utf8(&mut s, 3);
        assert_eq!(s, "é");
    }

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("EVENTBELL_WEBHOOK_TEST_HOST", "example.com");
        let result = resolve_env_vars("https://${EVENTBELL_WEBHOOK_TEST_HOST}/hook").unwrap();
        assert_eq!(result, "https://example.com/hook");
        std::env::remove_var("EVENTBELL_WEBHOOK_TEST_HOST");
    }

    #[test]
    fn resolve_env_vars_missing() {
        match resolve_env_vars("https://${ABSOLUTELY_NOT_SET_12345}/hook") {
            Err(NotifyError::Config(msg)) => assert!(msg.contains("ABSOLUTELY_NOT_SET_12345")),
            other => panic!("expected Config error, got: {other:?}"),
        }
    }

    #[test]
    fn resolve_env_vars_unclosed() {
        match resolve_env_vars("https://${UNCLOSED/hook") {
            Err(NotifyError::Config(msg)) => assert!(msg.contains("unclosed")),
            other => panic!("expected Config error, got: {other:?}"),
        }
    }

    #[test]
    fn resolve_env_vars_no_vars() {
        let result = resolve_env_vars("https://plain.example.com/hook").unwrap();
        assert_eq!(result, "https://plain.example.com/hook");
    }
}
