//! Interfaces to the collaborators the scheduler reads from and writes to.
//!
//! Production implementations live in `eventbell-store`. [`MemoryCatalog`]
//! backs tests and single-process setups.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PortError;
use crate::event::Event;
use crate::job::NotificationJob;
use crate::webhook::Webhook;

/// Read access to the event catalogue.
#[async_trait]
pub trait EventCatalog: Send + Sync {
    async fn list_active(&self) -> Result<Vec<Event>, PortError>;

    async fn get(&self, id: Uuid) -> Result<Option<Event>, PortError>;

    /// Mark an event inactive (used by the permanent-failure policy).
    async fn deactivate(&self, id: Uuid) -> Result<(), PortError>;
}

#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn resolve(&self, id: Uuid) -> Result<Option<Webhook>, PortError>;
}

/// Sink for job audit records. Implementations must ignore writes that would
/// move a job's status backwards.
#[async_trait]
pub trait JobRecorder: Send + Sync {
    async fn record(&self, job: &NotificationJob) -> Result<(), PortError>;
}

/// In-process catalogue and webhook store.
#[derive(Default)]
pub struct MemoryCatalog {
    events: RwLock<HashMap<Uuid, Event>>,
    webhooks: RwLock<HashMap<Uuid, Webhook>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_event(&self, event: Event) {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.id, event);
    }

    pub fn remove_event(&self, id: Uuid) -> Option<Event> {
        self.events
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    pub fn upsert_webhook(&self, webhook: Webhook) {
        self.webhooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(webhook.id, webhook);
    }
}

#[async_trait]
impl EventCatalog for MemoryCatalog {
    async fn list_active(&self) -> Result<Vec<Event>, PortError> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let mut active: Vec<Event> = events.values().filter(|e| e.is_active).cloned().collect();
        active.sort_by_key(|e| e.created_at);
        Ok(active)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Event>, PortError> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        Ok(events.get(&id).cloned())
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), PortError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        if let Some(event) = events.get_mut(&id) {
            event.is_active = false;
            event.updated_at = chrono::Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookStore for MemoryCatalog {
    async fn resolve(&self, id: Uuid) -> Result<Option<Webhook>, PortError> {
        let webhooks = self.webhooks.read().unwrap_or_else(|e| e.into_inner());
        Ok(webhooks.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventTiming;
    use chrono::Utc;

    fn event(active: bool) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: "d".into(),
            timing: EventTiming::Recurring {
                rrule: "FREQ=DAILY".into(),
            },
            duration: "PT1H".into(),
            is_active: active,
            webhook_id: None,
            tags: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn list_active_filters_inactive() {
        let catalog = MemoryCatalog::new();
        let on = event(true);
        catalog.upsert_event(on.clone());
        catalog.upsert_event(event(false));

        let active = catalog.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, on.id);
    }

    #[tokio::test]
    async fn deactivate_flips_flag() {
        let catalog = MemoryCatalog::new();
        let e = event(true);
        catalog.upsert_event(e.clone());
        catalog.deactivate(e.id).await.unwrap();

        assert!(!catalog.get(e.id).await.unwrap().unwrap().is_active);
        assert!(catalog.list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolves_webhooks() {
        let catalog = MemoryCatalog::new();
        let hook = Webhook {
            id: Uuid::new_v4(),
            name: "ops".into(),
            url: "http://localhost/hook".into(),
        };
        catalog.upsert_webhook(hook.clone());
        assert_eq!(catalog.resolve(hook.id).await.unwrap(), Some(hook));
        assert_eq!(catalog.resolve(Uuid::new_v4()).await.unwrap(), None);
    }
}
