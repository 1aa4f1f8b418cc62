//! Offline action queue layered over fire-and-forget emits.

use std::collections::VecDeque;
use std::sync::Arc;

use kinderlink_shared::EventName;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::connection::RealtimeClient;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub name: EventName,
    pub payload: Value,
}

/// Queues events while the connection is down and sends them, in order, as
/// soon as it is back.
///
/// Delivery is at-least-handed-to-the-socket: an event emitted right before a
/// drop can still be lost.
pub struct Outbox {
    client: RealtimeClient,
    queue: Arc<Mutex<VecDeque<QueuedEvent>>>,
    flusher: JoinHandle<()>,
}

impl Outbox {
    /// Must be called from within a tokio runtime.
    pub fn new(client: RealtimeClient) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let flusher = tokio::spawn(flush_on_connect(client.clone(), queue.clone()));
        Self {
            client,
            queue,
            flusher,
        }
    }

    /// Send now if possible, otherwise queue. Returns `true` when the event
    /// (and everything queued before it) went out immediately.
    pub fn send(&self, name: impl Into<EventName>, payload: Value) -> bool {
        let mut queue = self.queue.lock();
        queue.push_back(QueuedEvent {
            name: name.into(),
            payload,
        });
        drain(&self.client, &mut queue);
        if !queue.is_empty() {
            tracing::debug!(queued = queue.len(), "offline, event queued");
        }
        queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    pub fn pending(&self) -> Vec<QueuedEvent> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Drop everything queued, returning it.
    pub fn clear(&self) -> Vec<QueuedEvent> {
        self.queue.lock().drain(..).collect()
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.flusher.abort();
    }
}

fn drain(client: &RealtimeClient, queue: &mut VecDeque<QueuedEvent>) -> usize {
    let mut sent = 0;
    while let Some(event) = queue.front() {
        if !client.emit(event.name.clone(), event.payload.clone()) {
            break;
        }
        queue.pop_front();
        sent += 1;
    }
    sent
}

async fn flush_on_connect(client: RealtimeClient, queue: Arc<Mutex<VecDeque<QueuedEvent>>>) {
    let mut connection = client.watch_state();
    loop {
        let connected = connection.borrow_and_update().is_connected();
        if connected {
            let sent = drain(&client, &mut queue.lock());
            if sent > 0 {
                tracing::info!(sent, "flushed queued events");
            }
        }
        if connection.changed().await.is_err() {
            return;
        }
    }
}
