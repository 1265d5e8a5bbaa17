use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::types::TickResult;

use super::ExecutionMode;

/// Multicast stream for one event kind.
///
/// Each subscriber gets its own queue and a dedicated consumer task, so
/// handlers run sequentially in event order and are never re-entered, and a
/// slow subscriber cannot block the publisher or its peers.
pub struct EventStream<T> {
    subscribers: Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<T>>>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler. The returned token unsubscribes it.
    pub fn subscribe<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().insert(id, tx);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        });

        self.subscription_token(id)
    }

    /// Register a handler that fires once for the first event matching
    /// `predicate`, then detaches itself.
    pub fn once<P, F>(&self, predicate: P, handler: F) -> Subscription
    where
        P: Fn(&T) -> bool + Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().insert(id, tx);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if predicate(&event) {
                    handler(event);
                    break;
                }
            }
        });

        self.subscription_token(id)
    }

    fn subscription_token(&self, id: u64) -> Subscription {
        let subscribers = Arc::downgrade(&self.subscribers);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(subscribers) = subscribers.upgrade() {
                    subscribers.lock().unwrap().remove(&id);
                }
            })),
        }
    }

    /// Restrict the stream through a predicate; `filter(p).once(h)` mirrors
    /// the one-shot listener idiom.
    pub fn filter<P>(&self, predicate: P) -> FilteredStream<'_, T, P>
    where
        P: Fn(&T) -> bool + Send + 'static,
    {
        FilteredStream {
            stream: self,
            predicate,
        }
    }

    /// Deliver an event to every live subscriber queue. Subscribers whose
    /// consumer task has ended are pruned here.
    pub fn emit(&self, event: T) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl<T: Clone + Send + 'static> Default for EventStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A predicate-restricted view over an [`EventStream`].
pub struct FilteredStream<'a, T, P> {
    stream: &'a EventStream<T>,
    predicate: P,
}

impl<'a, T, P> FilteredStream<'a, T, P>
where
    T: Clone + Send + 'static,
    P: Fn(&T) -> bool + Send + 'static,
{
    pub fn once<F>(self, handler: F) -> Subscription
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.stream.once(self.predicate, handler)
    }

    pub fn subscribe<F>(self, mut handler: F) -> Subscription
    where
        F: FnMut(T) + Send + 'static,
    {
        let predicate = self.predicate;
        self.stream.subscribe(move |event| {
            if predicate(&event) {
                handler(event);
            }
        })
    }
}

/// Token returned by `subscribe`/`once`; detaches the handler.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// Risk-gate rejection. Normal control flow, surfaced on its own stream.
#[derive(Debug, Clone, Serialize)]
pub struct RejectionEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub current_price: Decimal,
    pub timestamp: i64,
    pub message: String,
}

/// A recoverable failure that degraded a tick to idle.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub message: String,
}

/// Backtest progress heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub frame_name: String,
    pub processed: usize,
    pub total: usize,
}

/// Backtest completion marker.
#[derive(Debug, Clone, Serialize)]
pub struct DoneEvent {
    pub symbol: String,
    pub strategy_name: String,
    pub frame_name: String,
    pub closed_count: usize,
}

/// The engine's named event streams.
pub struct EventBus {
    pub signal: EventStream<TickResult>,
    pub signal_live: EventStream<TickResult>,
    pub signal_backtest: EventStream<TickResult>,
    pub rejection: EventStream<RejectionEvent>,
    pub error: EventStream<ErrorEvent>,
    pub progress: EventStream<ProgressEvent>,
    pub done: EventStream<DoneEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            signal: EventStream::new(),
            signal_live: EventStream::new(),
            signal_backtest: EventStream::new(),
            rejection: EventStream::new(),
            error: EventStream::new(),
            progress: EventStream::new(),
            done: EventStream::new(),
        }
    }

    /// Publish a tick result on `signal` and the mode-specific stream.
    pub fn publish_tick(&self, result: &TickResult, mode: ExecutionMode) {
        self.signal.emit(result.clone());
        match mode {
            ExecutionMode::Live => self.signal_live.emit(result.clone()),
            ExecutionMode::Backtest => self.signal_backtest.emit(result.clone()),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let stream: EventStream<u32> = EventStream::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count1);
        let _s1 = stream.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count2);
        let _s2 = stream.subscribe(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        stream.emit(1);
        stream.emit(2);
        settle().await;

        assert_eq!(count1.load(Ordering::SeqCst), 2);
        assert_eq!(count2.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delivery_preserves_order_per_subscriber() {
        let stream: EventStream<u32> = EventStream::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        let _sub = stream.subscribe(move |event| {
            seen_clone.lock().unwrap().push(event);
        });

        for i in 0..10 {
            stream.emit(i);
        }
        settle().await;

        assert_eq!(*seen.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_unsubscribe_detaches_handler() {
        let stream: EventStream<u32> = EventStream::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let sub = stream.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        stream.emit(1);
        settle().await;
        sub.unsubscribe();
        stream.emit(2);
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_filter_once_fires_on_first_match_only() {
        let stream: EventStream<u32> = EventStream::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        let _sub = stream.filter(|event: &u32| *event > 5).once(move |event| {
            seen_clone.lock().unwrap().push(event);
        });

        for i in [1, 3, 7, 9] {
            stream.emit(i);
        }
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_bus_routes_by_mode() {
        let bus = EventBus::new();
        let all = Arc::new(AtomicUsize::new(0));
        let backtest_only = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&all);
        let _s1 = bus.signal.subscribe(move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&backtest_only);
        let _s2 = bus.signal_backtest.subscribe(move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        let result = TickResult::Idle {
            symbol: "BTCUSDT".to_string(),
            strategy_name: "demo".to_string(),
            exchange_name: "replay".to_string(),
            current_price: Decimal::ZERO,
        };
        bus.publish_tick(&result, ExecutionMode::Backtest);
        bus.publish_tick(&result, ExecutionMode::Live);
        settle().await;

        assert_eq!(all.load(Ordering::SeqCst), 2);
        assert_eq!(backtest_only.load(Ordering::SeqCst), 1);
    }
}
