//! Topic-keyed event dispatcher.
//!
//! Handlers register for one event type tag or for the wildcard and are
//! invoked synchronously, type-specific handlers first, each group in
//! registration order. The registry lock is never held while a handler
//! runs, so handlers may subscribe or unsubscribe from inside a dispatch.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error};

use cr_core::constants::WILDCARD_TOPIC;

use crate::events::{Envelope, EventKind};

/// A registered event handler.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// What a handler subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Frames whose `type` tag equals this string.
    Event(String),
    /// Every parsed frame, tagged or not.
    Wildcard,
}

impl Topic {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Event(tag) => tag.as_str(),
            Self::Wildcard => WILDCARD_TOPIC,
        }
    }
}

impl From<&str> for Topic {
    fn from(tag: &str) -> Self {
        if tag == WILDCARD_TOPIC {
            Self::Wildcard
        } else {
            Self::Event(tag.to_string())
        }
    }
}

impl From<String> for Topic {
    fn from(tag: String) -> Self {
        if tag == WILDCARD_TOPIC {
            Self::Wildcard
        } else {
            Self::Event(tag)
        }
    }
}

impl From<EventKind> for Topic {
    fn from(kind: EventKind) -> Self {
        Self::Event(kind.as_str().to_string())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Entry {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<Topic, Vec<Entry>>,
}

impl Registry {
    fn snapshot(&self, topic: &Topic) -> Vec<(u64, Handler)> {
        self.topics
            .get(topic)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| (e.id, Arc::clone(&e.handler)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn contains(&self, topic: &Topic, id: u64) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|entries| entries.iter().any(|e| e.id == id))
    }

    fn remove(&mut self, topic: &Topic, id: u64) -> bool {
        let Some(entries) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }
}

/// Counts from one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Handlers that ran to completion.
    pub delivered: usize,
    /// Handlers that panicked.
    pub failed: usize,
}

/// Registry of handlers keyed by topic, shared by every clone.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `topic`.
    ///
    /// The returned [`Subscription`] removes the handler when
    /// [`Subscription::unsubscribe`] is called. Dropping it does not.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.subscribe_shared(topic, Arc::new(handler))
    }

    /// Register an already shared handler for `topic`.
    ///
    /// Registering the same `Arc` twice under one topic keeps a single
    /// registration; both subscriptions then refer to it.
    pub fn subscribe_shared(&self, topic: impl Into<Topic>, handler: Handler) -> Subscription {
        let topic = topic.into();
        let mut registry = self.lock();

        let existing = registry.topics.get(&topic).and_then(|entries| {
            entries
                .iter()
                .find(|e| same_handler(&e.handler, &handler))
                .map(|e| e.id)
        });
        let id = match existing {
            Some(id) => id,
            None => {
                registry.next_id += 1;
                let id = registry.next_id;
                registry
                    .topics
                    .entry(topic.clone())
                    .or_default()
                    .push(Entry { id, handler });
                id
            }
        };
        drop(registry);

        debug!("subscribed handler {id} to {topic}");
        Subscription {
            registry: Arc::downgrade(&self.registry),
            topic,
            id,
        }
    }

    /// Fan `envelope` out to the handlers of its type, then to wildcard handlers.
    pub fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if let Some(tag) = envelope.event_type() {
            self.fan_out(&Topic::Event(tag.to_string()), envelope, &mut outcome);
        }
        self.fan_out(&Topic::Wildcard, envelope, &mut outcome);

        debug!(
            "dispatched {} to {} handler(s), {} failed",
            envelope.event_type().unwrap_or("untagged frame"),
            outcome.delivered,
            outcome.failed
        );
        outcome
    }

    fn fan_out(&self, topic: &Topic, envelope: &Envelope, outcome: &mut DispatchOutcome) {
        let snapshot = self.lock().snapshot(topic);
        for (id, handler) in snapshot {
            // Skip handlers unsubscribed by an earlier handler in this fan-out.
            if !self.lock().contains(topic, id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                Ok(()) => outcome.delivered += 1,
                Err(panic) => {
                    outcome.failed += 1;
                    error!(
                        "handler {id} for {topic} panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
    }

    /// Number of handlers registered for `topic`.
    pub fn handler_count(&self, topic: impl Into<Topic>) -> usize {
        self.lock()
            .topics
            .get(&topic.into())
            .map_or(0, Vec::len)
    }

    /// Number of handlers registered across all topics.
    pub fn subscriber_count(&self) -> usize {
        self.lock().topics.values().map(Vec::len).sum()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Capability to remove one registration.
#[must_use = "a subscription only ends when `unsubscribe` is called"]
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// Remove the handler. Returns false when it was already removed;
    /// repeated calls are harmless.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.topic, self.id);
        if removed {
            debug!("unsubscribed handler {} from {}", self.id, self.topic);
        }
        removed
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
