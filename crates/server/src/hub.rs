//! Per-entity-type broadcast channels.

use std::collections::HashMap;

use kinderlink_shared::{EntityAction, EventName, Frame, FrameEnvelope, WsEnvelope};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

const CHANNEL_CAPACITY: usize = 100;

#[derive(Default)]
pub struct Hub {
    channels: RwLock<HashMap<String, broadcast::Sender<FrameEnvelope>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the broadcast channel for `entity_type`.
    pub async fn channel(&self, entity_type: &str) -> broadcast::Sender<FrameEnvelope> {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(entity_type) {
                return sender.clone();
            }
        }

        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(entity_type) {
            return sender.clone();
        }

        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(entity_type.to_string(), tx.clone());
        tx
    }

    /// Push `{entity_type}:{action}` to every socket subscribed to the type.
    /// Returns how many sockets it reached.
    pub async fn publish(&self, entity_type: &str, action: EntityAction, payload: Value) -> usize {
        let name = EventName::entity(entity_type, action);
        let envelope = WsEnvelope::new(Frame::event(name.to_string(), payload));
        let reached = self.channel(entity_type).await.send(envelope).unwrap_or(0);
        tracing::debug!(%name, reached, "published");
        reached
    }
}
