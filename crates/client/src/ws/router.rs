//! Exact-name event routing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use kinderlink_shared::EventName;
use parking_lot::Mutex;
use serde_json::Value;

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Routes {
    next_id: u64,
    by_name: HashMap<EventName, Vec<(u64, Callback)>>,
}

/// Maps event names to their listeners.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventRouter {
    routes: Arc<Mutex<Routes>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `name`. The listener lives until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe(
        &self,
        name: impl Into<EventName>,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let name = name.into();
        let mut routes = self.routes.lock();
        routes.next_id += 1;
        let id = routes.next_id;
        routes
            .by_name
            .entry(name.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            routes: Arc::downgrade(&self.routes),
            name,
            id,
            attached: true,
        }
    }

    /// Invoke every listener of `name`, in registration order. Returns how
    /// many were called.
    ///
    /// The registry lock is released before any callback runs, so callbacks
    /// may subscribe or unsubscribe.
    pub fn dispatch(&self, name: &EventName, payload: &Value) -> usize {
        let callbacks: Vec<Callback> = match self.routes.lock().by_name.get(name) {
            Some(listeners) => listeners.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return 0,
        };
        for callback in &callbacks {
            callback(payload);
        }
        callbacks.len()
    }

    pub fn listener_count(&self, name: &EventName) -> usize {
        self.routes
            .lock()
            .by_name
            .get(name)
            .map_or(0, |listeners| listeners.len())
    }

    /// Names with at least one listener.
    pub fn event_names(&self) -> Vec<EventName> {
        self.routes.lock().by_name.keys().cloned().collect()
    }
}

fn remove(routes: &Mutex<Routes>, name: &EventName, id: u64) {
    let mut routes = routes.lock();
    if let Some(listeners) = routes.by_name.get_mut(name) {
        listeners.retain(|(listener_id, _)| *listener_id != id);
        if listeners.is_empty() {
            routes.by_name.remove(name);
        }
    }
}

/// Handle for one registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription removes the listener immediately"]
pub struct Subscription {
    routes: Weak<Mutex<Routes>>,
    name: EventName,
    id: u64,
    attached: bool,
}

impl Subscription {
    pub fn event_name(&self) -> &EventName {
        &self.name
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the listener registered for the lifetime of the router.
    pub fn detach(mut self) {
        self.attached = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.attached {
            return;
        }
        if let Some(routes) = self.routes.upgrade() {
            remove(&routes, &self.name, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish()
    }
}
