use async_trait::async_trait;
use eventbell_core::ports::WebhookStore;
use eventbell_core::{PortError, Webhook};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, sqlx::FromRow)]
struct WebhookRow {
    id: Uuid,
    name: String,
    url: String,
}

/// [`WebhookStore`] over the `webhooks` table.
#[derive(Clone)]
pub struct PgWebhookStore {
    pool: PgPool,
}

impl PgWebhookStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn resolve(&self, id: Uuid) -> Result<Option<Webhook>, PortError> {
        let row = sqlx::query_as::<_, WebhookRow>("SELECT id, name, url FROM webhooks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;

        Ok(row.map(|r| Webhook {
            id: r.id,
            name: r.name,
            url: r.url,
        }))
    }
}
