//! The event bus: a namespaced publish/subscribe runtime over a
//! fixed-capacity queue.
//!
//! The bus owns no domain knowledge. It moves size-bounded events
//! between services and drives their periodic work through the
//! recurring [`EVENT_SYSTICK`](crate::events::EVENT_SYSTICK) event.
//!
//! Scheduling model: single-threaded and cooperative. [`EventBus::process`]
//! is the only scheduling point and dispatches exactly the events that
//! were queued when it was called (one *generation*); events published
//! by handlers during that call land in the next generation. Callers
//! invoke `process` in a tight loop (or use [`EventBus::drain`]) so
//! multi-hop cascades settle across consecutive calls.
//!
//! No bus operation blocks, sleeps, or panics: a full subscription
//! table is a configuration error reported as [`BusError`], a full
//! queue drops the published event and counts it, and an oversized
//! payload is rejected with a logged error.

use std::cell::RefCell;
use std::rc::Rc;

use heapless::{Deque, Vec};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::events::{encode_payload, Event, EventId, MAX_EVENT_PAYLOAD};

/// Queue capacity used by the flight configuration.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Subscription table capacity used by the flight configuration.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

/// Anything a handler can publish into. Implemented by the bus itself
/// and by the per-dispatch sink handed to handlers.
pub trait EventSink {
    /// Enqueue a copy of the event for the next generation.
    ///
    /// Returns `false` (and drops the event) when the queue is at
    /// capacity or the payload exceeds [`MAX_EVENT_PAYLOAD`]. Never
    /// blocks.
    fn publish(&mut self, id: EventId, payload: &[u8]) -> bool;
}

/// Encode `msg` with postcard and publish it. Returns `false` when the
/// payload does not fit or the queue is full.
pub fn publish_msg<T: Serialize>(sink: &mut dyn EventSink, id: EventId, msg: &T) -> bool {
    match encode_payload(msg) {
        Some(bytes) => sink.publish(id, &bytes),
        None => {
            error!(event = %id, "event payload failed to encode");
            false
        }
    }
}

/// The capability a service exposes to the bus: handle one event to
/// completion. Handlers run sequentially within a generation and may
/// publish follow-up events through `sink`.
pub trait EventHandler {
    fn handle_event(&mut self, event: &Event, sink: &mut dyn EventSink);
}

/// Shared handle to a subscribed service. `Rc<RefCell<_>>` is
/// deliberate: the runtime is single-threaded and handlers run to
/// completion, so no handler can be re-entered while borrowed.
pub type HandlerRef = Rc<RefCell<dyn EventHandler>>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The subscription table is full. Capacities are fixed at build
    /// time, so this indicates a configuration error, not a transient
    /// condition.
    #[error("subscriber table full")]
    SubscriberTableFull,
}

struct Subscription {
    id: EventId,
    handler: HandlerRef,
}

/// Bus counters, readable at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events accepted into the queue.
    pub published: u32,
    /// Handler deliveries performed by `process`.
    pub dispatched: u32,
    /// Events dropped because the queue was full.
    pub dropped: u32,
}

/// The event dispatcher. `QUEUE_CAP` bounds the pending-event queue,
/// `SUB_CAP` the subscription table; both are compile-time constants so
/// the bus never allocates.
pub struct EventBus<
    const QUEUE_CAP: usize = DEFAULT_QUEUE_CAPACITY,
    const SUB_CAP: usize = DEFAULT_SUBSCRIBER_CAPACITY,
> {
    queue: Deque<Event, QUEUE_CAP>,
    subscriptions: Vec<Subscription, SUB_CAP>,
    stats: BusStats,
}

fn enqueue<const QUEUE_CAP: usize>(
    queue: &mut Deque<Event, QUEUE_CAP>,
    stats: &mut BusStats,
    id: EventId,
    payload: &[u8],
) -> bool {
    if payload.len() > MAX_EVENT_PAYLOAD {
        error!(
            event = %id,
            len = payload.len(),
            max = MAX_EVENT_PAYLOAD,
            "oversized event payload rejected"
        );
        return false;
    }

    let Some(event) = Event::with_payload(id, payload) else {
        return false;
    };

    if queue.push_back(event).is_err() {
        stats.dropped = stats.dropped.saturating_add(1);
        warn!(event = %id, "event queue full, event dropped");
        return false;
    }

    stats.published = stats.published.saturating_add(1);
    true
}

impl<const QUEUE_CAP: usize, const SUB_CAP: usize> EventBus<QUEUE_CAP, SUB_CAP> {
    pub fn new() -> Self {
        Self {
            queue: Deque::new(),
            subscriptions: Vec::new(),
            stats: BusStats::default(),
        }
    }

    /// Register `handler` for `event_id`. Multiple handlers may share
    /// one id; they are dispatched in registration order. There is no
    /// unsubscribe; subscriptions live for the process lifetime.
    pub fn subscribe(&mut self, event_id: EventId, handler: HandlerRef) -> Result<(), BusError> {
        self.subscriptions
            .push(Subscription {
                id: event_id,
                handler,
            })
            .map_err(|_| {
                error!(event = %event_id, "subscriber table full");
                BusError::SubscriberTableFull
            })
    }

    /// Dispatch every event queued at the moment of the call, then
    /// return the number of handler deliveries performed. Events
    /// published by handlers during this call are not dispatched until
    /// the next call.
    pub fn process(&mut self) -> usize {
        let generation = self.queue.len();
        let mut delivered = 0;

        for _ in 0..generation {
            let Some(event) = self.queue.pop_front() else {
                break;
            };

            for sub in &self.subscriptions {
                if sub.id != event.id {
                    continue;
                }

                let mut sink = QueueSink {
                    queue: &mut self.queue,
                    stats: &mut self.stats,
                };
                sub.handler.borrow_mut().handle_event(&event, &mut sink);
                delivered += 1;
            }
        }

        self.stats.dispatched = self.stats.dispatched.saturating_add(delivered as u32);
        delivered
    }

    /// Run `process` until the queue is empty. Handler cascades settle
    /// within a bounded number of generations as long as no handler
    /// publishes unconditionally in response to its own output.
    pub fn drain(&mut self) -> usize {
        let mut total = 0;
        while !self.queue.is_empty() {
            total += self.process();
        }
        total
    }

    /// Number of events waiting for the next generation.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }
}

impl<const QUEUE_CAP: usize, const SUB_CAP: usize> Default for EventBus<QUEUE_CAP, SUB_CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const QUEUE_CAP: usize, const SUB_CAP: usize> EventSink for EventBus<QUEUE_CAP, SUB_CAP> {
    fn publish(&mut self, id: EventId, payload: &[u8]) -> bool {
        enqueue(&mut self.queue, &mut self.stats, id, payload)
    }
}

/// Sink handed to handlers during dispatch. Appends to the same queue
/// the bus owns, so handler publishes join the next generation.
struct QueueSink<'a, const QUEUE_CAP: usize> {
    queue: &'a mut Deque<Event, QUEUE_CAP>,
    stats: &'a mut BusStats,
}

impl<const QUEUE_CAP: usize> EventSink for QueueSink<'_, QUEUE_CAP> {
    fn publish(&mut self, id: EventId, payload: &[u8]) -> bool {
        enqueue(self.queue, self.stats, id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EVENT_SYSTICK;

    struct Counter {
        seen: u32,
    }

    impl EventHandler for Counter {
        fn handle_event(&mut self, _event: &Event, _sink: &mut dyn EventSink) {
            self.seen += 1;
        }
    }

    #[test]
    fn test_bus_creation() {
        let bus: EventBus = EventBus::new();
        assert_eq!(bus.pending(), 0);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.stats(), BusStats::default());
    }

    #[test]
    fn test_publish_and_process_counts() {
        let mut bus: EventBus = EventBus::new();
        let counter = Rc::new(RefCell::new(Counter { seen: 0 }));
        bus.subscribe(EVENT_SYSTICK, counter.clone()).unwrap();

        assert!(bus.publish(EVENT_SYSTICK, &[]));
        assert!(bus.publish(EVENT_SYSTICK, &[]));
        assert_eq!(bus.pending(), 2);

        let delivered = bus.process();
        assert_eq!(delivered, 2);
        assert_eq!(counter.borrow().seen, 2);
        assert_eq!(bus.pending(), 0);

        let stats = bus.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_event_without_subscribers_is_discarded() {
        let mut bus: EventBus = EventBus::new();
        assert!(bus.publish(EVENT_SYSTICK, &[1, 2, 3]));
        assert_eq!(bus.process(), 0);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut bus: EventBus = EventBus::new();
        let payload = [0u8; MAX_EVENT_PAYLOAD + 1];
        assert!(!bus.publish(EVENT_SYSTICK, &payload));
        assert_eq!(bus.pending(), 0);
        // Rejected before reaching the queue, so not counted as a drop.
        assert_eq!(bus.stats().dropped, 0);
    }

    #[test]
    fn test_subscriber_table_full() {
        let mut bus: EventBus<16, 2> = EventBus::new();
        let counter = Rc::new(RefCell::new(Counter { seen: 0 }));
        bus.subscribe(EVENT_SYSTICK, counter.clone()).unwrap();
        bus.subscribe(EVENT_SYSTICK, counter.clone()).unwrap();
        assert_eq!(
            bus.subscribe(EVENT_SYSTICK, counter),
            Err(BusError::SubscriberTableFull)
        );
        assert_eq!(bus.subscriber_count(), 2);
    }
}
