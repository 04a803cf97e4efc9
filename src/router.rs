//! In-process fan-out of inbound events to filtered subscribers.
//!
//! Every event the bridge receives is published to an [`EventRouter`]. Each
//! subscriber registers a predicate and a handler; on publish the handler of
//! every subscriber whose predicate matches is invoked synchronously, in
//! subscription order, before `publish` returns. Since the bridge publishes
//! from a single receive loop, all subscribers see events in arrival order
//! and the handlers for one event finish before the next one is dispatched.
//!
//! Subscriptions are tied to a [`Subscription`] handle and removed when it
//! is dropped, unless explicitly detached.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use futures::channel::mpsc::{UnboundedReceiver, unbounded};
use log::trace;
use uuid::Uuid;

use crate::event::InboundEvent;
use crate::types::MessageType;

type Predicate = Box<dyn Fn(&InboundEvent) -> bool + Send + Sync + 'static>;
type Handler = Box<dyn Fn(&InboundEvent) + Send + Sync + 'static>;

/// Locks a std mutex, recovering the data if a handler panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Matches events by device mac and message type.
///
/// Unset criteria match anything; with both set this is the
/// `mac == device AND msgType == expected` filter accessory adapters use.
///
/// # Examples
///
/// ```
/// use connector_bridge_rs::{EventFilter, InboundEvent, MessageType};
/// use serde_json::json;
///
/// let filter = EventFilter::device("AA:BB", MessageType::ReadDeviceAck);
/// let event = InboundEvent::from_value(json!({"mac": "AA:BB", "msgType": "ReadDeviceAck"})).unwrap();
/// assert!(filter.matches(&event));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    mac: Option<String>,
    msg_type: Option<MessageType>,
}

impl EventFilter {
    /// A filter that matches every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of one type for one device.
    pub fn device(mac: &str, msg_type: MessageType) -> Self {
        EventFilter {
            mac: Some(mac.to_string()),
            msg_type: Some(msg_type),
        }
    }

    pub fn mac(mut self, mac: &str) -> Self {
        self.mac = Some(mac.to_string());
        self
    }

    pub fn msg_type(mut self, msg_type: MessageType) -> Self {
        self.msg_type = Some(msg_type);
        self
    }

    /// Mac comparison is exact, as the bridge echoes the mac it was sent.
    pub fn matches(&self, event: &InboundEvent) -> bool {
        let mac_ok = self
            .mac
            .as_deref()
            .is_none_or(|mac| event.mac() == Some(mac));
        let type_ok = self
            .msg_type
            .as_ref()
            .is_none_or(|msg_type| event.is_type(msg_type));
        mac_ok && type_ok
    }
}

struct Subscriber {
    id: Uuid,
    predicate: Predicate,
    handler: Handler,
}

#[derive(Default)]
struct RouterInner {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    published: AtomicU64,
    delivered: AtomicU64,
}

impl RouterInner {
    /// The removed subscriber is dropped after the lock is released, as its
    /// handler may own further subscriptions.
    fn remove(&self, id: Uuid) -> bool {
        let removed = {
            let mut subscribers = lock(&self.subscribers);
            subscribers
                .iter()
                .position(|s| s.id == id)
                .map(|index| subscribers.remove(index))
        };
        removed.is_some()
    }
}

/// Multicast channel for [`InboundEvent`]s.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone, Default)]
pub struct EventRouter {
    inner: Arc<RouterInner>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to events matching `filter`.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.subscribe_with(move |event| filter.matches(event), handler)
    }

    /// Subscribes `handler` to events accepted by an arbitrary predicate.
    pub fn subscribe_with<P, F>(&self, predicate: P, handler: F) -> Subscription
    where
        P: Fn(&InboundEvent) -> bool + Send + Sync + 'static,
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        lock(&self.inner.subscribers).push(Arc::new(Subscriber {
            id,
            predicate: Box::new(predicate),
            handler: Box::new(handler),
        }));
        trace!("Subscriber {id} added");
        Subscription {
            id,
            router: Arc::downgrade(&self.inner),
            detached: false,
        }
    }

    /// Subscribes an unbounded stream to events matching `filter`.
    ///
    /// The subscription ends when the stream is dropped.
    pub fn subscribe_stream(&self, filter: EventFilter) -> EventStream {
        let (tx, receiver) = unbounded();
        let subscription = self.subscribe(filter, move |event| {
            // A closed receiver means the stream is being dropped.
            let _ = tx.unbounded_send(event.clone());
        });
        EventStream {
            receiver,
            _subscription: subscription,
        }
    }

    /// Delivers `event` to every matching subscriber and returns how many
    /// handlers ran.
    ///
    /// Subscribers are snapshotted before dispatch, so handlers may
    /// subscribe or unsubscribe without deadlocking; such changes take
    /// effect from the next event.
    pub fn publish(&self, event: &InboundEvent) -> usize {
        let snapshot: Vec<Arc<Subscriber>> = lock(&self.inner.subscribers).clone();
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        for subscriber in snapshot {
            if (subscriber.predicate)(event) {
                (subscriber.handler)(event);
                delivered += 1;
            }
        }

        self.inner
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        if delivered == 0 {
            trace!("No subscriber for {:?} from {:?}", event.msg_type(), event.mac());
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    /// Ids of the live subscriptions, oldest first.
    pub fn subscriber_ids(&self) -> Vec<Uuid> {
        lock(&self.inner.subscribers).iter().map(|s| s.id).collect()
    }

    /// Number of events published so far.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Number of handler invocations so far.
    pub fn delivered_count(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published_count())
            .finish()
    }
}

/// Handle to a router subscription; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    router: Weak<RouterInner>,
    detached: bool,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the subscriber is still registered.
    pub fn is_active(&self) -> bool {
        let Some(inner) = self.router.upgrade() else {
            return false;
        };
        let subscribers = lock(&inner.subscribers);
        subscribers.iter().any(|s| s.id == self.id)
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    /// Keeps the subscriber registered for the router's whole lifetime.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        let removed = self
            .router
            .upgrade()
            .is_some_and(|inner| inner.remove(self.id));
        if removed {
            trace!("Subscriber {} removed", self.id);
        }
    }
}

/// Stream of events matching a filter, see [`EventRouter::subscribe_stream`].
pub struct EventStream {
    receiver: UnboundedReceiver<InboundEvent>,
    _subscription: Subscription,
}

impl Stream for EventStream {
    type Item = InboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn event(mac: &str, msg_type: &str) -> InboundEvent {
        InboundEvent::from_value(json!({"mac": mac, "msgType": msg_type})).unwrap()
    }

    fn recorder(router: &EventRouter, filter: EventFilter) -> (Subscription, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = router.subscribe(filter, move |e| {
            sink.lock()
                .unwrap()
                .push(format!("{}/{}", e.mac().unwrap_or("-"), e.msg_type().unwrap()));
        });
        (sub, seen)
    }

    #[test]
    fn test_filter_by_mac_and_type() {
        let router = EventRouter::new();
        let (_sub, seen) = recorder(
            &router,
            EventFilter::device("AA:BB", MessageType::ReadDeviceAck),
        );

        router.publish(&event("AA:BB", "ReadDeviceAck"));
        router.publish(&event("CC:DD", "ReadDeviceAck"));
        router.publish(&event("AA:BB", "WriteDeviceAck"));

        assert_eq!(*seen.lock().unwrap(), vec!["AA:BB/ReadDeviceAck"]);
    }

    #[test]
    fn test_every_subscriber_sees_events_in_order() {
        let router = EventRouter::new();
        let (_a, seen_a) = recorder(&router, EventFilter::new());
        let (_b, seen_b) = recorder(&router, EventFilter::new().msg_type(MessageType::ReadDeviceAck));

        router.publish(&event("AA:BB", "ReadDeviceAck"));
        router.publish(&event("CC:DD", "Heartbeat"));
        router.publish(&event("CC:DD", "ReadDeviceAck"));

        assert_eq!(
            *seen_a.lock().unwrap(),
            vec!["AA:BB/ReadDeviceAck", "CC:DD/Heartbeat", "CC:DD/ReadDeviceAck"]
        );
        assert_eq!(
            *seen_b.lock().unwrap(),
            vec!["AA:BB/ReadDeviceAck", "CC:DD/ReadDeviceAck"]
        );
        assert_eq!(router.published_count(), 3);
        assert_eq!(router.delivered_count(), 5);
    }

    #[test]
    fn test_late_subscriber_gets_no_replay() {
        let router = EventRouter::new();
        router.publish(&event("AA:BB", "ReadDeviceAck"));
        let (_sub, seen) = recorder(&router, EventFilter::new());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes_and_detach_keeps() {
        let router = EventRouter::new();
        let (sub, _) = recorder(&router, EventFilter::new());
        assert!(sub.is_active());
        assert_eq!(router.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(router.subscriber_count(), 0);

        let (sub, seen) = recorder(&router, EventFilter::new());
        sub.detach();
        router.publish(&event("AA:BB", "ReadDeviceAck"));
        assert_eq!(router.subscriber_count(), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let router = EventRouter::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicU64::new(0));

        let slot_in = Arc::clone(&slot);
        let hits_in = Arc::clone(&hits);
        let sub = router.subscribe(EventFilter::new(), move |_| {
            hits_in.fetch_add(1, Ordering::SeqCst);
            slot_in.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(sub);

        router.publish(&event("AA:BB", "ReadDeviceAck"));
        router.publish(&event("AA:BB", "ReadDeviceAck"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(router.subscriber_count(), 0);
    }

    #[test]
    fn test_stream_subscription() {
        let router = EventRouter::new();
        let mut stream = router.subscribe_stream(EventFilter::new().mac("AA:BB"));
        router.publish(&event("CC:DD", "ReadDeviceAck"));
        router.publish(&event("AA:BB", "WriteDeviceAck"));

        let next = futures::executor::block_on(stream.next()).unwrap();
        assert!(next.is_type(&MessageType::WriteDeviceAck));

        drop(stream);
        assert_eq!(router.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribe_concurrently_with_publish() {
        let router = EventRouter::new();
        let seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&seen);
        let _steady = router.subscribe(EventFilter::new(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::scope(|s| {
            let publisher = s.spawn(|| {
                for _ in 0..2000 {
                    router.publish(&event("AA:BB", "ReadDeviceAck"));
                }
            });
            for _ in 0..4 {
                s.spawn(|| {
                    for i in 0..250 {
                        let sub = router.subscribe(EventFilter::new().mac("AA:BB"), |_| {});
                        if i % 2 == 0 {
                            drop(sub);
                        } else {
                            sub.unsubscribe();
                        }
                        drop(router.subscribe_stream(EventFilter::new()));
                    }
                });
            }
            publisher.join().unwrap();
        });

        assert_eq!(seen.load(Ordering::SeqCst), 2000);
        assert_eq!(router.published_count(), 2000);
        assert_eq!(router.subscriber_count(), 1);
        assert_eq!(router.subscriber_ids(), vec![_steady.id()]);
    }
}
