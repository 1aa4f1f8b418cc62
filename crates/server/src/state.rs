//! Application state shared across request handlers.

use std::sync::Arc;

use kinderlink_shared::{EntityAction, FrameEnvelope};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, Mutex};

use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::store::EntityStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<EntityStore>,
    pub hub: Arc<Hub>,
    /// Held across a store write and its publish, and across a snapshot and
    /// its subscribe, so no change falls between the two.
    changes: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(EntityStore::new()),
            hub: Arc::new(Hub::new()),
            changes: Arc::new(Mutex::new(())),
        }
    }

    /// Current entities of a type plus a receiver for every change after them.
    pub async fn snapshot_and_subscribe(
        &self,
        entity_type: &str,
    ) -> (Vec<Value>, broadcast::Receiver<FrameEnvelope>) {
        let _changes = self.changes.lock().await;
        let receiver = self.hub.channel(entity_type).await.subscribe();
        (self.store.list(entity_type).await, receiver)
    }

    /// Store a new entity and announce it.
    pub async fn create(&self, entity_type: &str, fields: Map<String, Value>) -> Option<Value> {
        let _changes = self.changes.lock().await;
        let entity = self.store.insert(entity_type, fields).await?;
        self.hub
            .publish(entity_type, EntityAction::Created, entity.clone())
            .await;
        Some(entity)
    }

    pub async fn update(
        &self,
        entity_type: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Option<Value> {
        let _changes = self.changes.lock().await;
        let entity = self.store.update(entity_type, id, fields).await?;
        self.hub
            .publish(entity_type, EntityAction::Updated, entity.clone())
            .await;
        Some(entity)
    }

    /// Remove an entity and announce `{ "id": .. }`.
    pub async fn delete(&self, entity_type: &str, id: &str) -> Option<Value> {
        let _changes = self.changes.lock().await;
        let entity = self.store.remove(entity_type, id).await?;
        let key = entity.get("id").cloned().unwrap_or(Value::Null);
        self.hub
            .publish(entity_type, EntityAction::Deleted, serde_json::json!({ "id": key }))
            .await;
        Some(entity)
    }
}
