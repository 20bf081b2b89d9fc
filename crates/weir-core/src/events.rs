//! Typed publish/subscribe for component events.
//!
//! Each component owns an [`EventBus`] over its own event enum. Listeners are
//! registered per event kind and called synchronously, outside the registry
//! lock, in registration order.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// An event that can be published on an [`EventBus`].
pub trait Event: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E: Event> {
    next_id: u64,
    listeners: HashMap<E::Kind, Vec<(u64, Listener<E>)>>,
}

pub struct EventBus<E: Event> {
    registry: Arc<Mutex<Registry<E>>>,
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    /// Register `handler` for events of `kind`.
    pub fn subscribe<F>(&self, kind: E::Kind, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry
                .listeners
                .entry(kind)
                .or_default()
                .push((id, Arc::new(handler)));
            id
        };

        let registry: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.registry);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    if let Some(listeners) = registry.lock().listeners.get_mut(&kind) {
                        listeners.retain(|(listener_id, _)| *listener_id != id);
                    }
                }
            })),
        }
    }

    pub fn emit(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .registry
            .lock()
            .listeners
            .get(&event.kind())
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.registry
            .lock()
            .listeners
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        let total: usize = registry.listeners.values().map(Vec::len).sum();
        f.debug_struct("EventBus").field("listeners", &total).finish()
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle keeps the listener registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    enum TestEvent {
        Ping(u32),
        Pong,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestKind {
        Ping,
        Pong,
    }

    impl Event for TestEvent {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            match self {
                TestEvent::Ping(_) => TestKind::Ping,
                TestEvent::Pong => TestKind::Pong,
            }
        }
    }

    #[test]
    fn test_listeners_receive_only_their_kind() {
        let bus = EventBus::<TestEvent>::new();
        let pings = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&pings);
        let _sub = bus.subscribe(TestKind::Ping, move |event| {
            if let TestEvent::Ping(n) = event {
                counter.fetch_add(*n as usize, Ordering::SeqCst);
            }
        });

        bus.emit(&TestEvent::Ping(2));
        bus.emit(&TestEvent::Pong);
        bus.emit(&TestEvent::Ping(3));

        assert_eq!(pings.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_unsubscribe_removes_listener() {
        let bus = EventBus::<TestEvent>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let sub = bus.subscribe(TestKind::Pong, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(bus.listener_count(TestKind::Pong), 1);

        bus.emit(&TestEvent::Pong);
        sub.unsubscribe();
        bus.emit(&TestEvent::Pong);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(TestKind::Pong), 0);
    }

    #[test]
    fn test_listener_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::<TestEvent>::new());
        let inner_bus = Arc::clone(&bus);
        let _sub = bus.subscribe(TestKind::Ping, move |_| {
            let _ = inner_bus.subscribe(TestKind::Pong, |_| {});
        });

        bus.emit(&TestEvent::Ping(1));
        assert_eq!(bus.listener_count(TestKind::Pong), 1);
    }
}
