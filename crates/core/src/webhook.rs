use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A notification endpoint. Read-only from the scheduler's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: Uuid,
    pub name: String,
    pub url: String,
}
