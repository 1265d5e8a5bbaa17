pub mod backtest;
pub mod events;
pub mod lifecycle;
pub mod live;
pub mod pnl;
pub mod validator;

pub use backtest::{BacktestReport, BacktestSummary, ClosedPosition};
pub use events::{
    DoneEvent, ErrorEvent, EventBus, EventStream, ProgressEvent, RejectionEvent, Subscription,
};
pub use lifecycle::SignalLifecycle;
pub use live::{LiveDriver, DEFAULT_MONITOR_INTERVAL};
pub use pnl::compute_pnl;
pub use validator::validate_signal;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::exchange::CandleSource;
use crate::persistence::SignalStore;
use crate::registry::Registry;
use crate::risk::RiskGate;

/// Whether the engine is replaying history or tracking the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Backtest,
    Live,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Backtest => "backtest",
            ExecutionMode::Live => "live",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Everything a core function needs to know about the current invocation,
/// passed explicitly instead of through ambient state.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    /// Tick timestamp, millisecond epoch.
    pub when: i64,
    pub mode: ExecutionMode,
}

/// Front door: owns the registry, configuration, event bus, risk gate and
/// drivers, and builds one state machine per (strategy, symbol) run.
pub struct Engine {
    registry: Arc<Registry>,
    config: Arc<EngineConfig>,
    bus: Arc<EventBus>,
    gate: Arc<RiskGate>,
    store: Option<Arc<SignalStore>>,
    live: LiveDriver,
    monitor_interval: Duration,
}

impl Engine {
    /// Fails fast with every configuration violation aggregated.
    pub fn new(registry: Arc<Registry>, config: EngineConfig) -> Result<Self, EngineError> {
        let config = config.validated()?;
        info!(
            slippage = %config.percent_slippage,
            fee = %config.percent_fee,
            "engine initialized"
        );
        Ok(Self {
            registry,
            config: Arc::new(config),
            bus: Arc::new(EventBus::new()),
            gate: Arc::new(RiskGate::new()),
            store: None,
            live: LiveDriver::new(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        })
    }

    /// Attach the live-mode crash-recovery store.
    pub fn with_store(mut self, store: SignalStore) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Live firing cadence override.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn risk_gate(&self) -> &Arc<RiskGate> {
        &self.gate
    }

    fn build_lifecycle(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        live: bool,
    ) -> Result<SignalLifecycle, EngineError> {
        let strategy = self.registry.strategy(strategy_name)?;
        let adapter = self.registry.exchange(exchange_name)?;
        let risk_schema = match strategy.risk_name() {
            Some(risk_name) => Some(self.registry.risk(risk_name)?),
            None => None,
        };
        let source = CandleSource::new(
            exchange_name,
            adapter,
            self.config.avg_price_candles_count,
        );

        let mut lifecycle = SignalLifecycle::new(
            symbol,
            strategy,
            risk_schema,
            source,
            Arc::clone(&self.gate),
            Arc::clone(&self.bus),
            Arc::clone(&self.config),
        );
        if live {
            if let Some(store) = &self.store {
                lifecycle = lifecycle.with_store(Arc::clone(store));
            }
        }
        Ok(lifecycle)
    }

    /// Replay the named frame and return the accumulated closures.
    pub async fn backtest(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        frame_name: &str,
    ) -> Result<BacktestReport, EngineError> {
        let frame = self.registry.frame(frame_name)?;
        let mut lifecycle = self.build_lifecycle(symbol, strategy_name, exchange_name, false)?;
        backtest::run_backtest(&mut lifecycle, &frame, &self.bus).await
    }

    /// Start the wall-clock task for one (strategy, symbol).
    pub async fn start_live(
        &self,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
    ) -> Result<(), EngineError> {
        let lifecycle = self.build_lifecycle(symbol, strategy_name, exchange_name, true)?;
        self.live.start(lifecycle, self.monitor_interval).await
    }

    /// Soft-cancel one live task. Positions are not force-closed.
    pub async fn stop_live(&self, strategy_name: &str, symbol: &str) -> bool {
        self.live.stop(strategy_name, symbol).await
    }

    pub async fn stop_all_live(&self) {
        self.live.stop_all().await;
    }

    pub async fn live_task_count(&self) -> usize {
        self.live.active_count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ReplayAdapter;
    use crate::strategies::FnStrategy;
    use crate::types::{Candle, Frame, Interval, SignalSpec, TradeSide, MINUTE_MS};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn flat_candles(start: i64, count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| Candle {
                timestamp: start + i as i64 * MINUTE_MS,
                open: dec!(50000),
                high: dec!(50000),
                low: dec!(50000),
                close: dec!(50000),
                volume: dec!(1),
            })
            .collect()
    }

    fn registry_with_data() -> Arc<Registry> {
        let registry = Registry::new();

        let t0 = 1_000 * MINUTE_MS;
        let mut adapter = ReplayAdapter::new();
        adapter.add_candles("BTCUSDT", Interval::M1, flat_candles(t0 - 4 * MINUTE_MS, 300));
        registry
            .register_exchange("replay", Arc::new(adapter))
            .unwrap();

        registry
            .register_strategy(Arc::new(FnStrategy::new(
                "demo",
                Interval::H1,
                |_: &ExecutionContext| {
                    Ok(Some(SignalSpec {
                        side: TradeSide::Long,
                        price_open: None,
                        price_take_profit: dec!(51000),
                        price_stop_loss: dec!(49000),
                        minute_estimated_time: 60,
                        note: None,
                    }))
                },
            )))
            .unwrap();

        registry
            .register_frame(Frame::new(
                "window",
                Interval::M1,
                Utc.timestamp_millis_opt(t0).unwrap(),
                Utc.timestamp_millis_opt(t0 + 120 * MINUTE_MS).unwrap(),
            ))
            .unwrap();

        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_engine_backtest_end_to_end() {
        let engine = Engine::new(registry_with_data(), EngineConfig::default()).unwrap();
        let report = engine
            .backtest("BTCUSDT", "demo", "replay", "window")
            .await
            .unwrap();

        // Flat prices: every signal expires without touching a level. The
        // hourly throttle admits one signal per hour across the two-hour
        // frame (t0, t0+60m, t0+120m).
        assert_eq!(report.closed.len(), 3);
        assert!(report
            .closed
            .iter()
            .all(|c| c.close_reason == crate::types::CloseReason::TimeExpired));
        assert_eq!(report.summary().time_expired, 3);
    }

    #[tokio::test]
    async fn test_unknown_names_fail_fast() {
        let engine = Engine::new(registry_with_data(), EngineConfig::default()).unwrap();
        assert!(engine
            .backtest("BTCUSDT", "missing", "replay", "window")
            .await
            .is_err());
        assert!(engine
            .backtest("BTCUSDT", "demo", "missing", "window")
            .await
            .is_err());
        assert!(engine
            .backtest("BTCUSDT", "demo", "replay", "missing")
            .await
            .is_err());
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let config = EngineConfig {
            avg_price_candles_count: 0,
            ..EngineConfig::default()
        };
        assert!(Engine::new(Arc::new(Registry::new()), config).is_err());
    }
}
