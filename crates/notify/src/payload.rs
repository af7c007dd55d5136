use serde::{Deserialize, Serialize};

/// Body POSTed to the webhook endpoint (Discord-compatible).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub content: String,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub color: u32,
    pub title: String,
    pub description: String,
    /// Occurrence instant, RFC 3339.
    pub timestamp: String,
}
