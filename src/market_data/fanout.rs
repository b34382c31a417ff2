// =============================================================================
// Market Fanout — typed subscriptions with bounded per-subscriber queues
// =============================================================================
//
// Each subscriber owns a bounded FIFO queue; the publisher never blocks on a
// slow consumer. On overflow the oldest event is dropped, so a stalled
// subscriber loses history but can never back-pressure the stream handler.
// Events for one symbol are enqueued in wire order.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::debug;

use super::{Funding, LiquidationTick, OrderBook, TradeTick};

/// Default per-subscriber queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A typed market event delivered to subscribers.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    OrderBook(OrderBook),
    Trade(TradeTick),
    Funding(Funding),
    Liquidation(LiquidationTick),
    /// The stream gave up reconnecting. Delivered to every subscriber.
    Disconnected,
}

/// Channel selector for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    OrderBook,
    Trade,
    Funding,
    Liquidation,
}

impl MarketEvent {
    fn kind(&self) -> Option<EventKind> {
        match self {
            Self::OrderBook(_) => Some(EventKind::OrderBook),
            Self::Trade(_) => Some(EventKind::Trade),
            Self::Funding(_) => Some(EventKind::Funding),
            Self::Liquidation(_) => Some(EventKind::Liquidation),
            Self::Disconnected => None,
        }
    }
}

struct SubscriberQueue {
    buf: Mutex<VecDeque<MarketEvent>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn push(&self, event: MarketEvent) {
        {
            let mut buf = self.buf.lock();
            if buf.len() == self.capacity {
                buf.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            buf.push_back(event);
        }
        self.notify.notify_one();
    }
}

struct Subscriber {
    id: u64,
    kind: EventKind,
    queue: Arc<SubscriberQueue>,
}

struct FanoutInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// The fan-out hub. Cheap to clone.
#[derive(Clone)]
pub struct MarketFanout {
    inner: Arc<FanoutInner>,
}

impl MarketFanout {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(FanoutInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                capacity,
            }),
        }
    }

    /// Register a subscriber for one event kind. The returned handle is the
    /// subscription: receive with [`SubscriptionHandle::recv`], end it with
    /// [`SubscriptionHandle::unsubscribe`] (or by dropping the handle).
    pub fn subscribe(&self, kind: EventKind) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            buf: Mutex::new(VecDeque::with_capacity(self.inner.capacity)),
            capacity: self.inner.capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        });
        self.inner.subscribers.write().push(Subscriber {
            id,
            kind,
            queue: queue.clone(),
        });
        debug!(id, ?kind, "market subscriber registered");
        SubscriptionHandle {
            inner: self.inner.clone(),
            queue,
            id,
        }
    }

    /// Enqueue `event` for every matching subscriber. `Disconnected` reaches
    /// all subscribers regardless of kind.
    pub fn publish(&self, event: MarketEvent) {
        let kind = event.kind();
        let subscribers = self.inner.subscribers.read();
        for sub in subscribers.iter() {
            if kind.is_none() || kind == Some(sub.kind) {
                sub.queue.push(event.clone());
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

impl Default for MarketFanout {
    fn default() -> Self {
        Self::new()
    }
}

/// One live subscription. Dropping the handle unsubscribes.
pub struct SubscriptionHandle {
    inner: Arc<FanoutInner>,
    queue: Arc<SubscriberQueue>,
    id: u64,
}

impl SubscriptionHandle {
    /// Await the next event. Returns in the order events were published.
    pub async fn recv(&self) -> MarketEvent {
        loop {
            if let Some(event) = self.queue.buf.lock().pop_front() {
                return event;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<MarketEvent> {
        self.queue.buf.lock().pop_front()
    }

    /// Events discarded because this subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Remove this subscriber from the hub.
    pub fn unsubscribe(self) {
        // Removal happens in Drop.
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.inner.subscribers.write().retain(|s| s.id != self.id);
        debug!(id = self.id, "market subscriber removed");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn trade_event(ts: i64) -> MarketEvent {
        MarketEvent::Trade(TradeTick {
            symbol: "BTC-PERP".into(),
            side: Side::Buy,
            price: dec!(50000),
            size: dec!(0.001),
            timestamp: ts,
        })
    }

    #[test]
    fn kind_filtering() {
        let fanout = MarketFanout::new();
        let trades = fanout.subscribe(EventKind::Trade);
        let books = fanout.subscribe(EventKind::OrderBook);

        fanout.publish(trade_event(1));

        assert!(matches!(trades.try_recv(), Some(MarketEvent::Trade(_))));
        assert!(books.try_recv().is_none());
    }

    #[test]
    fn disconnected_reaches_everyone() {
        let fanout = MarketFanout::new();
        let trades = fanout.subscribe(EventKind::Trade);
        let books = fanout.subscribe(EventKind::OrderBook);

        fanout.publish(MarketEvent::Disconnected);

        assert!(matches!(trades.try_recv(), Some(MarketEvent::Disconnected)));
        assert!(matches!(books.try_recv(), Some(MarketEvent::Disconnected)));
    }

    #[test]
    fn overflow_drops_oldest() {
        let fanout = MarketFanout::with_capacity(3);
        let sub = fanout.subscribe(EventKind::Trade);

        for ts in 0..5 {
            fanout.publish(trade_event(ts));
        }

        assert_eq!(sub.dropped(), 2);
        // Oldest surviving event is ts=2.
        match sub.try_recv() {
            Some(MarketEvent::Trade(t)) => assert_eq!(t.timestamp, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn delivery_preserves_publish_order() {
        let fanout = MarketFanout::new();
        let sub = fanout.subscribe(EventKind::Trade);
        for ts in 0..10 {
            fanout.publish(trade_event(ts));
        }
        for expected in 0..10 {
            match sub.try_recv() {
                Some(MarketEvent::Trade(t)) => assert_eq!(t.timestamp, expected),
                other => panic!("unexpected: {other:?}"),
            }
        }
    }

    #[test]
    fn drop_unsubscribes() {
        let fanout = MarketFanout::new();
        let sub = fanout.subscribe(EventKind::Trade);
        assert_eq!(fanout.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let fanout = MarketFanout::new();
        let sub = fanout.subscribe(EventKind::Trade);

        let publisher = fanout.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            publisher.publish(trade_event(7));
        });

        match sub.recv().await {
            MarketEvent::Trade(t) => assert_eq!(t.timestamp, 7),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
