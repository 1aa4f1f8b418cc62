//! Live entity collections bound to the realtime connection.
//!
//! A [`RealtimeData`] listens for `{type}:created`, `{type}:updated` and
//! `{type}:deleted`, and every time the connection becomes live it asks the
//! server for a fresh snapshot with `{type}:subscribe`. Dropping it releases
//! the listeners and tells the server `{type}:unsubscribe`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use kinderlink_shared::{EntityAction, EventName, SnapshotAck};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::collection::{Collection, Entity};
use crate::ws::{RealtimeClient, Subscription};

/// A collection together with its change counter.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked<T> {
    /// Bumped on every change: snapshot, pushed event, optimistic write or
    /// rollback.
    pub revision: u64,
    pub items: Collection<T>,
}

struct BinderState<T> {
    collection: watch::Sender<Tracked<T>>,
    /// Activation generation; callbacks and snapshot waits from an older
    /// activation are ignored.
    generation: AtomicU64,
}

impl<T: Entity> BinderState<T> {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn apply(&self, generation: u64, entity_type: &str, action: EntityAction, payload: &Value) {
        self.collection.send_if_modified(|tracked| {
            if !self.is_current(generation) {
                return false;
            }
            match tracked.items.apply(action, payload) {
                Ok(true) => {
                    tracked.revision += 1;
                    true
                }
                Ok(false) => {
                    tracing::debug!(entity_type, %action, "change matched nothing");
                    false
                }
                Err(e) => {
                    tracing::warn!(entity_type, %action, error = %e, "skipping malformed change");
                    false
                }
            }
        });
    }

    fn replace(&self, generation: u64, items: Collection<T>) -> bool {
        self.collection.send_if_modified(|tracked| {
            if !self.is_current(generation) {
                return false;
            }
            tracked.items = items;
            tracked.revision += 1;
            true
        })
    }
}

struct Activation {
    _listeners: Vec<Subscription>,
    resync: JoinHandle<()>,
}

/// A live-updated local copy of one entity type.
pub struct RealtimeData<T: Entity> {
    client: RealtimeClient,
    entity_type: String,
    params: Value,
    state: Arc<BinderState<T>>,
    activation: Option<Activation>,
}

impl<T: Entity> RealtimeData<T> {
    /// Bind `entity_type`, starting from `initial` until the first snapshot.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(client: RealtimeClient, entity_type: impl Into<String>, initial: Collection<T>) -> Self {
        Self::bind_with(client, entity_type, initial, json!({}))
    }

    /// Like [`RealtimeData::bind`], sending `params` with every subscribe
    /// request (filters such as a group id).
    pub fn bind_with(
        client: RealtimeClient,
        entity_type: impl Into<String>,
        initial: Collection<T>,
        params: Value,
    ) -> Self {
        let (collection, _) = watch::channel(Tracked {
            revision: 0,
            items: initial,
        });
        let mut data = Self {
            client,
            entity_type: entity_type.into(),
            params,
            state: Arc::new(BinderState {
                collection,
                generation: AtomicU64::new(0),
            }),
            activation: None,
        };
        data.activate();
        data
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn collection(&self) -> Collection<T> {
        self.state.collection.borrow().items.clone()
    }

    pub fn revision(&self) -> u64 {
        self.state.collection.borrow().revision
    }

    pub fn watch(&self) -> watch::Receiver<Tracked<T>> {
        self.state.collection.subscribe()
    }

    /// Switch to another entity type: the old binding is torn down and the
    /// collection starts over empty, keeping its shape.
    pub fn retarget(&mut self, entity_type: impl Into<String>) {
        let entity_type = entity_type.into();
        if entity_type == self.entity_type {
            return;
        }
        self.deactivate();
        self.entity_type = entity_type;
        self.state.collection.send_modify(|tracked| {
            tracked.items = tracked.items.emptied();
            tracked.revision += 1;
        });
        self.activate();
    }

    /// Apply a local-only change ahead of server confirmation.
    ///
    /// Nothing is rolled back automatically; the next pushed event or
    /// snapshot simply lands on top. Keep the returned [`Rollback`] to undo
    /// the change if the server rejects the mutation.
    pub fn optimistic_update(&self, update: impl FnOnce(&mut Collection<T>)) -> Rollback<T> {
        let mut previous = None;
        let mut revision = 0;
        self.state.collection.send_modify(|tracked| {
            previous = Some(tracked.items.clone());
            update(&mut tracked.items);
            tracked.revision += 1;
            revision = tracked.revision;
        });
        Rollback {
            state: Arc::downgrade(&self.state),
            previous,
            revision,
        }
    }

    fn activate(&mut self) {
        let generation = self.state.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let listeners = EntityAction::CHANGES
            .iter()
            .map(|&action| {
                let state = self.state.clone();
                let entity_type = self.entity_type.clone();
                self.client.subscribe(
                    EventName::entity(&self.entity_type, action),
                    move |payload| state.apply(generation, &entity_type, action, payload),
                )
            })
            .collect();

        let resync = tokio::spawn(resync_on_connect(
            self.client.clone(),
            self.entity_type.clone(),
            self.params.clone(),
            Arc::downgrade(&self.state),
            generation,
        ));

        self.activation = Some(Activation {
            _listeners: listeners,
            resync,
        });
        tracing::debug!(entity_type = %self.entity_type, "realtime binding active");
    }

    fn deactivate(&mut self) {
        let Some(activation) = self.activation.take() else {
            return;
        };
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        activation.resync.abort();
        drop(activation);

        // Best effort; not retried
        let unsubscribe = EventName::entity(&self.entity_type, EntityAction::Unsubscribe);
        if !self.client.emit(unsubscribe, self.params.clone()) {
            tracing::debug!(entity_type = %self.entity_type, "offline, unsubscribe not sent");
        }
    }
}

impl<T: Entity> Drop for RealtimeData<T> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

/// Request a snapshot each time the connection becomes live.
async fn resync_on_connect<T: Entity>(
    client: RealtimeClient,
    entity_type: String,
    params: Value,
    state: Weak<BinderState<T>>,
    generation: u64,
) {
    let mut connection = client.watch_state();
    let timeout = client.config().ack_timeout;
    loop {
        let connected = connection.borrow_and_update().is_connected();
        if connected {
            let request = EventName::entity(&entity_type, EntityAction::Subscribe);
            match client.emit_with_ack(request, params.clone(), timeout).await {
                Ok(payload) => {
                    let Some(state) = state.upgrade() else {
                        return;
                    };
                    let snapshot = serde_json::from_value::<SnapshotAck>(payload)
                        .map_err(|e| e.to_string())
                        .and_then(|ack| {
                            let current = state.collection.borrow().items.emptied();
                            current.from_snapshot(&ack.data).map_err(|e| e.to_string())
                        });
                    match snapshot {
                        Ok(items) => {
                            if state.replace(generation, items) {
                                tracing::debug!(%entity_type, "snapshot applied");
                            }
                        }
                        Err(e) => tracing::warn!(%entity_type, error = %e, "bad snapshot"),
                    }
                }
                Err(e) => tracing::warn!(%entity_type, error = %e, "subscribe failed"),
            }
        }
        if connection.changed().await.is_err() {
            return;
        }
    }
}

/// Undo token for an optimistic update. Dropping it keeps the change.
pub struct Rollback<T> {
    state: Weak<BinderState<T>>,
    previous: Option<Collection<T>>,
    revision: u64,
}

impl<T: Entity> Rollback<T> {
    /// Revision produced by the optimistic write.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Restore the collection as it was before the optimistic write. Refused
    /// (returns `false`) once anything else has changed the collection, since
    /// the server's view has already replaced it.
    pub fn rollback(mut self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let previous = self.previous.take();
        let revision = self.revision;
        state.collection.send_if_modified(|tracked| {
            match previous {
                Some(previous) if tracked.revision == revision => {
                    tracked.items = previous;
                    tracked.revision += 1;
                    true
                }
                _ => false,
            }
        })
    }
}
