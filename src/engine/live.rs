use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::error::EngineError;

use super::lifecycle::SignalLifecycle;
use super::ExecutionMode;

/// Live firing cadence: candle granularity. Generation stays gated to the
/// strategy interval by the machine's throttle; every firing monitors held
/// signals against the real-time VWAP.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(60);

struct LiveTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Wall-clock scheduler: one task per (strategy, symbol) firing `tick`
/// repeatedly.
///
/// Ticks run to completion inside the task loop, so a machine is never
/// re-entered; firings that would overlap a slow tick coalesce. Stops are
/// soft: the in-flight tick finishes and positions are left open (live mode
/// persists them for the next start).
pub struct LiveDriver {
    tasks: Mutex<HashMap<(String, String), LiveTask>>,
}

impl LiveDriver {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(
        &self,
        mut lifecycle: SignalLifecycle,
        monitor_interval: Duration,
    ) -> Result<(), EngineError> {
        let key = (
            lifecycle.strategy_name().to_string(),
            lifecycle.symbol().to_string(),
        );
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&key) {
            return Err(EngineError::DuplicateName {
                kind: "live task",
                name: format!("{}/{}", key.0, key.1),
            });
        }

        // Crash recovery is best effort; a broken store must not keep the
        // driver from trading.
        if let Err(err) = lifecycle.restore().await {
            warn!(
                symbol = lifecycle.symbol(),
                strategy = lifecycle.strategy_name(),
                error = %err,
                "could not restore persisted signal state"
            );
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task_key = format!("{}/{}", key.0, key.1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Utc::now().timestamp_millis();
                        lifecycle.tick(now, ExecutionMode::Live).await;
                    }
                    _ = stop_rx.changed() => {
                        lifecycle.stop();
                        break;
                    }
                }
            }
            info!(task = %task_key, "live task stopped");
        });

        info!(
            strategy = %key.0,
            symbol = %key.1,
            interval_ms = monitor_interval.as_millis() as u64,
            "live task started"
        );
        tasks.insert(key, LiveTask { stop_tx, handle });
        Ok(())
    }

    /// Cancel one task. Returns whether it existed.
    pub async fn stop(&self, strategy_name: &str, symbol: &str) -> bool {
        let task = {
            let mut tasks = self.tasks.lock().await;
            tasks.remove(&(strategy_name.to_string(), symbol.to_string()))
        };
        match task {
            Some(task) => {
                let _ = task.stop_tx.send(true);
                let _ = task.handle.await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let drained: Vec<LiveTask> = {
            let mut tasks = self.tasks.lock().await;
            tasks.drain().map(|(_, task)| task).collect()
        };
        for task in drained {
            let _ = task.stop_tx.send(true);
            let _ = task.handle.await;
        }
    }

    pub async fn active_count(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

impl Default for LiveDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::events::EventBus;
    use crate::engine::ExecutionContext;
    use crate::exchange::{CandleSource, ExchangeAdapter};
    use crate::persistence::SignalStore;
    use crate::risk::RiskGate;
    use crate::strategies::FnStrategy;
    use crate::types::{Candle, Interval, SignalSpec, TradeSide};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    /// Serves flat candles for any requested window, so wall-clock ticks
    /// always find data.
    struct AnyTimeAdapter;

    #[async_trait]
    impl ExchangeAdapter for AnyTimeAdapter {
        async fn get_candles(
            &self,
            _symbol: &str,
            interval: Interval,
            since_aligned: i64,
            limit: usize,
        ) -> anyhow::Result<Vec<Candle>> {
            Ok((0..limit)
                .map(|i| Candle {
                    timestamp: since_aligned + i as i64 * interval.millis(),
                    open: dec!(50000),
                    high: dec!(50000),
                    low: dec!(50000),
                    close: dec!(50000),
                    volume: dec!(1),
                })
                .collect())
        }

        fn format_price(&self, _symbol: &str, value: Decimal) -> String {
            value.to_string()
        }

        fn format_quantity(&self, _symbol: &str, value: Decimal) -> String {
            value.to_string()
        }
    }

    fn lifecycle(
        strategy: Arc<dyn crate::strategies::SignalStrategy>,
        bus: Arc<EventBus>,
    ) -> SignalLifecycle {
        let source = CandleSource::new("replay", Arc::new(AnyTimeAdapter), 5);
        SignalLifecycle::new(
            "BTCUSDT",
            strategy,
            None,
            source,
            Arc::new(RiskGate::new()),
            bus,
            Arc::new(EngineConfig::default()),
        )
    }

    #[tokio::test]
    async fn test_live_task_ticks_and_stops() {
        let bus = Arc::new(EventBus::new());
        let tick_count = Arc::new(AtomicUsize::new(0));
        let tick_clone = Arc::clone(&tick_count);
        let _sub = bus.signal_live.subscribe(move |_| {
            tick_clone.fetch_add(1, Ordering::SeqCst);
        });

        let strategy = Arc::new(FnStrategy::new("idler", Interval::H1, |_: &ExecutionContext| {
            Ok(None)
        }));
        let driver = LiveDriver::new();
        driver
            .start(lifecycle(strategy, Arc::clone(&bus)), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(driver.active_count().await, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(driver.stop("idler", "BTCUSDT").await);
        assert_eq!(driver.active_count().await, 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(tick_count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_duplicate_task_rejected() {
        let bus = Arc::new(EventBus::new());
        let strategy = Arc::new(FnStrategy::new("idler", Interval::H1, |_: &ExecutionContext| {
            Ok(None)
        }));
        let driver = LiveDriver::new();
        driver
            .start(
                lifecycle(Arc::clone(&strategy) as _, Arc::clone(&bus)),
                Duration::from_millis(50),
            )
            .await
            .unwrap();
        assert!(driver
            .start(lifecycle(strategy, bus), Duration::from_millis(50))
            .await
            .is_err());

        driver.stop_all().await;
        assert_eq!(driver.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_live_open_is_persisted() {
        let bus = Arc::new(EventBus::new());
        let strategy = Arc::new(FnStrategy::new("opener", Interval::M1, |_: &ExecutionContext| {
            Ok(Some(SignalSpec {
                side: TradeSide::Long,
                price_open: None,
                price_take_profit: dec!(51000),
                price_stop_loss: dec!(49000),
                minute_estimated_time: 600,
                note: None,
            }))
        }));

        let store_dir = std::env::temp_dir().join(format!("live-store-{}", Uuid::new_v4()));
        let store = Arc::new(SignalStore::new(&store_dir));
        let machine = lifecycle(strategy, Arc::clone(&bus)).with_store(Arc::clone(&store));

        let driver = LiveDriver::new();
        driver.start(machine, Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.stop_all().await;

        let restored = store
            .load("opener", "BTCUSDT", "replay")
            .await
            .unwrap()
            .expect("pending signal should be persisted");
        assert_eq!(restored.side, TradeSide::Long);
        assert_eq!(restored.price_open, dec!(50000));
    }
}
