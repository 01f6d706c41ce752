//! In-process topic bus with wildcard fan-out.
//!
//! Subscribers are registered per topic and invoked synchronously, in
//! registration order, by [`TopicBus::publish`]. A message published on an
//! ordinary topic is also delivered to [`topics::ANY`] subscribers; the
//! reserved lifecycle topics reach only their own subscribers.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, warn};

use crate::error::panic_message;
use crate::message::Message;
use crate::topics;

/// Callback invoked for every message delivered on a subscribed topic.
pub type Subscriber = Arc<dyn Fn(&Message) + Send + Sync>;

/// Identifies one registration on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    topics: HashMap<String, Vec<(SubscriptionId, Subscriber)>>,
    next_id: u64,
}

impl Registry {
    fn remove(&mut self, topic: &str, id: SubscriptionId) -> bool {
        let Some(subscribers) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Topic → subscriber-list registry. Cloning yields another handle to the
/// same registry.
#[derive(Clone, Default)]
pub struct TopicBus {
    registry: Arc<Mutex<Registry>>,
}

impl TopicBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `topic`.
    ///
    /// Returns `None` (and registers nothing) when `topic` is empty.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> Option<Subscription>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.subscribe_arc(topic, Arc::new(callback))
    }

    /// Register an already shared subscriber under `topic`.
    pub fn subscribe_arc(&self, topic: &str, callback: Subscriber) -> Option<Subscription> {
        if topic.is_empty() {
            debug!("ignoring subscription to empty topic");
            return None;
        }
        let mut registry = lock(&self.registry);
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry
            .topics
            .entry(topic.to_string())
            .or_default()
            .push((id, callback));
        debug!(topic = %topic, id = id.0, "subscribed");

        Some(Subscription {
            registry: Arc::downgrade(&self.registry),
            topic: topic.to_string(),
            id,
        })
    }

    /// Remove a registration. Returns whether anything was removed.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        if topic.is_empty() {
            return false;
        }
        lock(&self.registry).remove(topic, id)
    }

    /// Number of callbacks currently registered under `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.registry)
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Deliver `message` to the subscribers of `topic` (defaulting to the
    /// message's own topic), then to [`topics::ANY`] when the target topic
    /// is ordinary.
    pub fn publish(&self, message: &Message, topic: Option<&str>) {
        let target = topic.unwrap_or(&message.topic);
        self.deliver(target, message);
        if !topics::is_reserved(target) {
            self.deliver(topics::ANY, message);
        }
    }

    fn deliver(&self, topic: &str, message: &Message) {
        // Snapshot so callbacks may subscribe/unsubscribe/publish re-entrantly.
        let subscribers: Vec<Subscriber> = match lock(&self.registry).topics.get(topic) {
            Some(subs) => subs.iter().map(|(_, sub)| sub.clone()).collect(),
            None => return,
        };
        debug!(topic = %topic, subscribers = subscribers.len(), "publishing message");

        for subscriber in subscribers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber(message)));
            if let Err(payload) = outcome {
                warn!(
                    topic = %topic,
                    panic = %panic_message(payload.as_ref()),
                    "subscriber panicked"
                );
            }
        }
    }
}

/// Handle returned by [`TopicBus::subscribe`]; calling
/// [`unsubscribe`](Subscription::unsubscribe) removes the registration.
///
/// Dropping the handle does *not* unsubscribe.
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    topic: String,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Remove the registration. Returns `false` if it was already removed
    /// or the bus no longer exists.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => lock(&registry).remove(&self.topic, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(bus: &TopicBus, topic: &str) -> (Arc<AtomicUsize>, Subscription) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = bus
            .subscribe(topic, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .expect("topic is not empty");
        (count, sub)
    }

    #[test]
    fn ordinary_topic_fans_out_to_wildcard() {
        let bus = TopicBus::new();
        let (orders, _) = counter(&bus, "orders");
        let (any, _) = counter(&bus, topics::ANY);

        bus.publish(&Message::new("orders", 1), None);
        bus.publish(&Message::new("invoices", 2), None);

        assert_eq!(orders.load(Ordering::SeqCst), 1);
        assert_eq!(any.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reserved_topics_do_not_fan_out() {
        let bus = TopicBus::new();
        let (any, _) = counter(&bus, topics::ANY);
        let (errors, _) = counter(&bus, topics::ERROR);

        bus.publish(&Message::new(topics::ERROR, "boom"), None);
        bus.publish(&Message::new(topics::FINISHED, 0), None);

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(any.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn explicit_wildcard_publish_delivers_once() {
        let bus = TopicBus::new();
        let (any, _) = counter(&bus, topics::ANY);

        bus.publish(&Message::new("orders", 1), Some(topics::ANY));
        assert_eq!(any.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn topic_override_wins() {
        let bus = TopicBus::new();
        let (audit, _) = counter(&bus, "audit");
        let (orders, _) = counter(&bus, "orders");

        bus.publish(&Message::new("orders", 1), Some("audit"));
        assert_eq!(audit.load(Ordering::SeqCst), 1);
        assert_eq!(orders.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = TopicBus::new();
        let (count, sub) = counter(&bus, "orders");

        bus.publish(&Message::new("orders", 1), None);
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe(), "second removal is a no-op");
        bus.publish(&Message::new("orders", 2), None);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count("orders"), 0);
    }

    #[test]
    fn unsubscribe_by_id_only_removes_matching_topic() {
        let bus = TopicBus::new();
        let (_, sub) = counter(&bus, "orders");

        assert!(!bus.unsubscribe("invoices", sub.id()));
        assert!(!bus.unsubscribe("", sub.id()));
        assert!(bus.unsubscribe("orders", sub.id()));
    }

    #[test]
    fn empty_topic_is_rejected() {
        let bus = TopicBus::new();
        assert!(bus.subscribe("", |_| {}).is_none());
    }

    #[test]
    fn delivery_follows_registration_order() {
        let bus = TopicBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe("orders", move |_| seen.lock().unwrap().push(label));
        }

        bus.publish(&Message::new("orders", 1), None);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = TopicBus::new();
        bus.subscribe("orders", |_| panic!("subscriber failure"));
        let (count, _) = counter(&bus, "orders");

        bus.publish(&Message::new("orders", 1), None);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_may_publish_reentrantly() {
        let bus = TopicBus::new();
        let (audit, _) = counter(&bus, "audit");
        let inner = bus.clone();
        bus.subscribe("orders", move |msg| inner.publish(msg, Some("audit")));

        bus.publish(&Message::new("orders", 1), None);
        assert_eq!(audit.load(Ordering::SeqCst), 1);
    }
}
