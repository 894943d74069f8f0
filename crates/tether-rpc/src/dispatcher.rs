//! Named event subscriptions.
//!
//! Persistent (`on`) and one-shot (`once`) subscriptions live side by side.
//! One-shot entries are removed under the lock before their handler runs, so
//! a handler that re-emits its own event cannot fire itself twice. Handlers
//! always run outside the lock.

use std::collections::HashMap;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

/// Shared event callback.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

struct Subscription {
    id: u64,
    once: bool,
    handler: EventHandler,
}

#[derive(Default)]
struct Subscriptions {
    next_id: u64,
    by_name: HashMap<String, Vec<Subscription>>,
}

impl Subscriptions {
    fn remove_id(&mut self, name: &str, id: u64) -> bool {
        let Some(subs) = self.by_name.get_mut(name) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            let _ = self.by_name.remove(name);
        }
        removed
    }
}

/// Cancels exactly one subscription.
///
/// Dropping the token leaves the subscription in place.
#[derive(Clone, Debug)]
pub struct SubscriptionToken {
    name: String,
    id: u64,
    subs: Weak<Mutex<Subscriptions>>,
}

impl SubscriptionToken {
    /// Event name this token belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the subscription. Returns `false` if it was already gone.
    pub fn cancel(&self) -> bool {
        self.subs
            .upgrade()
            .is_some_and(|subs| subs.lock().remove_id(&self.name, self.id))
    }
}

/// Per-connection event subscription registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    subs: Arc<Mutex<Subscriptions>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe persistently.
    pub fn on<F>(&self, name: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(name, Arc::new(handler), false)
    }

    /// Subscribe for the next event only.
    pub fn once<F>(&self, name: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe(name, Arc::new(handler), true)
    }

    /// Subscribe persistently with a shared handler that can later be passed
    /// to [`EventDispatcher::off_handler`].
    pub fn on_shared(&self, name: &str, handler: EventHandler) -> SubscriptionToken {
        self.subscribe(name, handler, false)
    }

    /// One-shot variant of [`EventDispatcher::on_shared`].
    pub fn once_shared(&self, name: &str, handler: EventHandler) -> SubscriptionToken {
        self.subscribe(name, handler, true)
    }

    /// Resolve with the payload of the next `name` event.
    ///
    /// The subscription is registered before this returns. The future yields
    /// `None` if the subscription is removed before the event arrives.
    pub fn one(&self, name: &str) -> impl Future<Output = Option<Value>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let _token = self.once(name, move |data| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(data.clone());
            }
        });
        async move { rx.await.ok() }
    }

    /// Remove every subscription for `name`. Returns how many were removed.
    pub fn off(&self, name: &str) -> usize {
        self.subs
            .lock()
            .by_name
            .remove(name)
            .map_or(0, |subs| subs.len())
    }

    /// Remove the subscriptions for `name` whose handler is `handler`.
    pub fn off_handler(&self, name: &str, handler: &EventHandler) -> usize {
        let mut subs = self.subs.lock();
        let Some(list) = subs.by_name.get_mut(name) else {
            return 0;
        };
        let before = list.len();
        list.retain(|s| !Arc::ptr_eq(&s.handler, handler));
        let removed = before - list.len();
        if list.is_empty() {
            let _ = subs.by_name.remove(name);
        }
        removed
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.subs.lock().by_name.clear();
    }

    /// Invoke every subscription for `name` once. Returns the number of
    /// handlers invoked.
    ///
    /// A panicking handler is logged and does not stop the others.
    pub fn dispatch(&self, name: &str, data: &Value) -> usize {
        let handlers: Vec<EventHandler> = {
            let mut subs = self.subs.lock();
            let Some(list) = subs.by_name.get_mut(name) else {
                return 0;
            };
            let handlers = list.iter().map(|s| s.handler.clone()).collect();
            list.retain(|s| !s.once);
            if list.is_empty() {
                let _ = subs.by_name.remove(name);
            }
            handlers
        };

        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
                warn!(event = name, "event handler panicked");
            }
        }

        counter!("events_dispatched_total").increment(handlers.len() as u64);
        handlers.len()
    }

    /// Number of live subscriptions for `name`.
    pub fn subscription_count(&self, name: &str) -> usize {
        self.subs.lock().by_name.get(name).map_or(0, Vec::len)
    }

    /// Whether there are no subscriptions at all.
    pub fn is_empty(&self) -> bool {
        self.subs.lock().by_name.is_empty()
    }

    fn subscribe(&self, name: &str, handler: EventHandler, once: bool) -> SubscriptionToken {
        let mut subs = self.subs.lock();
        subs.next_id += 1;
        let id = subs.next_id;
        subs.by_name
            .entry(name.to_owned())
            .or_default()
            .push(Subscription { id, once, handler });
        SubscriptionToken {
            name: name.to_owned(),
            id,
            subs: Arc::downgrade(&self.subs),
        }
    }
}
