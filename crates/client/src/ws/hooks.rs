//! Dioxus hooks over the realtime client (feature `dioxus`).
//!
//! Components read plain signals; the hooks keep them in step with the
//! client's watch channels.

use std::cell::RefCell;
use std::rc::Rc;

use dioxus::prelude::*;

use super::connection::{ConnectionState, RealtimeClient};
use crate::stores::{Collection, Entity, RealtimeData, Rollback};

/// Hook exposing the connection state as a signal.
///
/// # Arguments
/// * `client` - The connection to observe
///
/// # Returns
/// The current connection state (reactive - updates when state changes)
pub fn use_connection_state(client: &RealtimeClient) -> Signal<ConnectionState> {
    let client = client.clone();
    let mut state = use_signal(|| client.state());

    use_future(move || {
        let mut updates = client.watch_state();
        async move {
            while updates.changed().await.is_ok() {
                let next = updates.borrow_and_update().clone();
                state.set(next);
            }
        }
    });

    state
}

/// A bound collection as seen by a component.
#[derive(Clone)]
pub struct UseRealtimeData<T: Entity> {
    pub collection: Signal<Collection<T>>,
    binder: Rc<RefCell<RealtimeData<T>>>,
}

impl<T: Entity> UseRealtimeData<T> {
    pub fn optimistic_update(&self, update: impl FnOnce(&mut Collection<T>)) -> Rollback<T> {
        self.binder.borrow().optimistic_update(update)
    }
}

/// Hook binding `entity_type` for the lifetime of the component.
///
/// Rendering with a different `entity_type` retargets the binding. Unmounting
/// drops the binder, which unsubscribes.
pub fn use_realtime_data<T: Entity>(
    client: &RealtimeClient,
    entity_type: &str,
    initial: impl FnOnce() -> Collection<T>,
) -> UseRealtimeData<T> {
    let binder = use_hook(|| {
        Rc::new(RefCell::new(RealtimeData::bind(
            client.clone(),
            entity_type,
            initial(),
        )))
    });
    if binder.borrow().entity_type() != entity_type {
        binder.borrow_mut().retarget(entity_type);
    }
    let mut collection = use_signal(|| binder.borrow().collection());

    // Retargeting keeps the same channel, so one watcher serves every type
    let watched = binder.clone();
    use_future(move || {
        let mut updates = watched.borrow().watch();
        async move {
            while updates.changed().await.is_ok() {
                let next = updates.borrow_and_update().items.clone();
                collection.set(next);
            }
        }
    });

    UseRealtimeData { collection, binder }
}
