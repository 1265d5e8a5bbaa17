use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::exchange::{vwap, CandleSource};
use crate::persistence::SignalStore;
use crate::risk::{RiskDecision, RiskGate, RiskSchema};
use crate::strategies::SignalStrategy;
use crate::types::{Candle, CancelReason, CloseReason, SignalRow, TickResult, TradeSide};

use super::events::{ErrorEvent, EventBus, RejectionEvent};
use super::pnl::compute_pnl;
use super::validator::validate_signal;
use super::{ExecutionContext, ExecutionMode};

/// What scheduled monitoring decides for one tick or candle.
///
/// Stop-loss is probed before activation: a candle bracketing both levels
/// cancels the signal instead of opening it into an instant loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScheduledOutcome {
    Timeout,
    CancelStopLoss,
    Activate,
    Wait,
}

pub(crate) fn scheduled_outcome(
    row: &SignalRow,
    now: i64,
    low_probe: Decimal,
    high_probe: Decimal,
    await_minutes: u32,
) -> ScheduledOutcome {
    if now >= row.schedule_deadline(await_minutes) {
        return ScheduledOutcome::Timeout;
    }
    match row.side {
        TradeSide::Long => {
            if low_probe <= row.price_stop_loss {
                ScheduledOutcome::CancelStopLoss
            } else if low_probe <= row.price_open {
                ScheduledOutcome::Activate
            } else {
                ScheduledOutcome::Wait
            }
        }
        TradeSide::Short => {
            if high_probe >= row.price_stop_loss {
                ScheduledOutcome::CancelStopLoss
            } else if high_probe >= row.price_open {
                ScheduledOutcome::Activate
            } else {
                ScheduledOutcome::Wait
            }
        }
    }
}

/// What pending monitoring decides for one tick or candle.
///
/// Tie-break policy: expiry wins only when the deadline passed strictly
/// before this tick; on the boundary tick itself take-profit is checked
/// first, then stop-loss, then expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingOutcome {
    Close(CloseReason),
    Hold,
}

pub(crate) fn pending_outcome(row: &SignalRow, now: i64, current_vwap: Decimal) -> PendingOutcome {
    let deadline = row.expiry_deadline();
    if now > deadline {
        return PendingOutcome::Close(CloseReason::TimeExpired);
    }

    let (tp_hit, sl_hit) = match row.side {
        TradeSide::Long => (
            current_vwap >= row.price_take_profit,
            current_vwap <= row.price_stop_loss,
        ),
        TradeSide::Short => (
            current_vwap <= row.price_take_profit,
            current_vwap >= row.price_stop_loss,
        ),
    };

    if tp_hit {
        PendingOutcome::Close(CloseReason::TakeProfit)
    } else if sl_hit {
        PendingOutcome::Close(CloseReason::StopLoss)
    } else if now >= deadline {
        PendingOutcome::Close(CloseReason::TimeExpired)
    } else {
        PendingOutcome::Hold
    }
}

#[derive(Debug, Default)]
struct MachineState {
    stopped: bool,
    last_signal_ts: Option<i64>,
    scheduled: Option<SignalRow>,
    pending: Option<SignalRow>,
}

/// Per-(strategy, symbol) signal state machine.
///
/// `tick` drives one step at a timestamp; `batch` sweeps a pre-fetched
/// one-minute candle array in backtest mode. Both paths share the same
/// decision functions and VWAP, so a signal closes at the same minute with
/// the same reason either way. No error escapes `tick`: failures become
/// `error` events and the tick degrades to idle.
pub struct SignalLifecycle {
    symbol: String,
    strategy: Arc<dyn SignalStrategy>,
    risk_schema: Option<Arc<RiskSchema>>,
    source: CandleSource,
    gate: Arc<RiskGate>,
    bus: Arc<EventBus>,
    config: Arc<EngineConfig>,
    store: Option<Arc<SignalStore>>,
    state: MachineState,
}

impl SignalLifecycle {
    pub fn new(
        symbol: impl Into<String>,
        strategy: Arc<dyn SignalStrategy>,
        risk_schema: Option<Arc<RiskSchema>>,
        source: CandleSource,
        gate: Arc<RiskGate>,
        bus: Arc<EventBus>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            strategy,
            risk_schema,
            source,
            gate,
            bus,
            config,
            store: None,
            state: MachineState::default(),
        }
    }

    /// Attach the live-mode pending-signal store.
    pub fn with_store(mut self, store: Arc<SignalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub(crate) fn source(&self) -> &CandleSource {
        &self.source
    }

    /// Soft stop: no new signals; held signals run to their terminal state.
    pub fn stop(&mut self) {
        self.state.stopped = true;
        info!(symbol = %self.symbol, strategy = %self.strategy.name(), "lifecycle stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped
    }

    pub fn has_open_signal(&self) -> bool {
        self.state.scheduled.is_some() || self.state.pending.is_some()
    }

    /// Live startup: recover the persisted pending signal, if any, and
    /// re-admit it to the risk gate. Returns whether a signal was restored.
    pub async fn restore(&mut self) -> Result<bool, EngineError> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(false),
        };
        match store
            .load(self.strategy.name(), &self.symbol, self.source.exchange_name())
            .await?
        {
            Some(row) => {
                info!(
                    symbol = %self.symbol,
                    strategy = %self.strategy.name(),
                    signal_id = %row.id,
                    "restored pending signal"
                );
                self.gate
                    .add(self.strategy.name(), self.strategy.risk_name())
                    .await;
                self.state.pending = Some(row);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drive one step. Always returns a result; recoverable failures are
    /// reported on the `error` stream and yield an idle tick.
    pub async fn tick(&mut self, now: i64, mode: ExecutionMode) -> TickResult {
        let result = match self.tick_inner(now, mode).await {
            Ok(result) => result,
            Err(err) => {
                self.report_error(&err);
                self.idle(Decimal::ZERO)
            }
        };
        self.bus.publish_tick(&result, mode);
        self.notify_strategy(&result).await;
        result
    }

    async fn tick_inner(&mut self, now: i64, mode: ExecutionMode) -> Result<TickResult, EngineError> {
        let held = self.state.pending.is_some() || self.state.scheduled.is_some();

        if self.state.stopped {
            // No new signals; a held signal still runs to its terminal
            // state below.
            if !held {
                return Ok(self.idle(Decimal::ZERO));
            }
        } else {
            // Throttle: one generation attempt per strategy interval. The
            // clock advances even while a signal is held.
            let interval_ms = self.strategy.interval().millis();
            let throttled = self
                .state
                .last_signal_ts
                .is_some_and(|last| now - last < interval_ms);
            if !throttled {
                self.state.last_signal_ts = Some(now);
                if !held {
                    return self.try_generate(now, mode).await;
                }
            }
        }

        if self.state.pending.is_some() {
            let price = self.source.get_average_price(&self.symbol, now).await?;
            return self.monitor_pending_tick(now, price, mode).await;
        }
        if self.state.scheduled.is_some() {
            let price = self.source.get_average_price(&self.symbol, now).await?;
            return self.monitor_scheduled_tick(now, price, mode).await;
        }

        let price = self.source.get_average_price(&self.symbol, now).await?;
        Ok(self.idle(price))
    }

    async fn try_generate(&mut self, now: i64, mode: ExecutionMode) -> Result<TickResult, EngineError> {
        let current_price = self.source.get_average_price(&self.symbol, now).await?;

        let decision = self
            .gate
            .check(
                self.risk_schema.as_deref(),
                &self.symbol,
                self.strategy.name(),
                self.source.exchange_name(),
                current_price,
                now,
            )
            .await;
        if let RiskDecision::Rejected(message) = decision {
            self.bus.rejection.emit(RejectionEvent {
                symbol: self.symbol.clone(),
                strategy_name: self.strategy.name().to_string(),
                exchange_name: self.source.exchange_name().to_string(),
                current_price,
                timestamp: now,
                message,
            });
            return Ok(self.idle(current_price));
        }

        let ctx = ExecutionContext {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy.name().to_string(),
            exchange_name: self.source.exchange_name().to_string(),
            when: now,
            mode,
        };
        let spec = self
            .strategy
            .get_signal(&ctx, &self.source)
            .await
            .map_err(EngineError::Adapter)?;

        let spec = match spec {
            Some(spec) => spec,
            None => return Ok(self.idle(current_price)),
        };

        let market_entry = spec.price_open.is_none();
        let row = SignalRow {
            id: Uuid::new_v4().to_string(),
            symbol: self.symbol.clone(),
            strategy_name: self.strategy.name().to_string(),
            exchange_name: self.source.exchange_name().to_string(),
            side: spec.side,
            price_open: spec.price_open.unwrap_or(current_price),
            price_take_profit: spec.price_take_profit,
            price_stop_loss: spec.price_stop_loss,
            minute_estimated_time: spec.minute_estimated_time,
            note: spec.note,
            timestamp: now,
        };
        validate_signal(&row, &self.config)?;

        if market_entry {
            self.state.pending = Some(row.clone());
            self.gate
                .add(self.strategy.name(), self.strategy.risk_name())
                .await;
            self.persist_pending(mode).await;
            info!(
                symbol = %self.symbol,
                strategy = %self.strategy.name(),
                signal_id = %row.id,
                side = %row.side,
                price = %row.price_open,
                "signal opened at market"
            );
            Ok(TickResult::Opened {
                symbol: self.symbol.clone(),
                strategy_name: row.strategy_name.clone(),
                exchange_name: row.exchange_name.clone(),
                current_price: row.price_open,
                signal: row,
            })
        } else {
            self.state.scheduled = Some(row.clone());
            info!(
                symbol = %self.symbol,
                strategy = %self.strategy.name(),
                signal_id = %row.id,
                side = %row.side,
                price = %row.price_open,
                "signal scheduled"
            );
            Ok(TickResult::Scheduled {
                symbol: self.symbol.clone(),
                strategy_name: row.strategy_name.clone(),
                exchange_name: row.exchange_name.clone(),
                current_price,
                signal: row,
            })
        }
    }

    async fn monitor_scheduled_tick(
        &mut self,
        now: i64,
        current_price: Decimal,
        mode: ExecutionMode,
    ) -> Result<TickResult, EngineError> {
        let row = self
            .state
            .scheduled
            .clone()
            .ok_or(EngineError::NoActiveSignal)?;

        match scheduled_outcome(
            &row,
            now,
            current_price,
            current_price,
            self.config.schedule_await_minutes,
        ) {
            ScheduledOutcome::Timeout => {
                Ok(self.cancel_scheduled(row, now, current_price, CancelReason::Timeout))
            }
            ScheduledOutcome::CancelStopLoss => Ok(self.cancel_scheduled(
                row,
                now,
                current_price,
                CancelReason::StopLossBeforeActivation,
            )),
            ScheduledOutcome::Activate => Ok(self.activate_scheduled(row, mode).await),
            ScheduledOutcome::Wait => Ok(TickResult::Active {
                symbol: self.symbol.clone(),
                strategy_name: row.strategy_name.clone(),
                exchange_name: row.exchange_name.clone(),
                current_price,
                signal: row,
            }),
        }
    }

    async fn monitor_pending_tick(
        &mut self,
        now: i64,
        current_price: Decimal,
        mode: ExecutionMode,
    ) -> Result<TickResult, EngineError> {
        let row = self
            .state
            .pending
            .clone()
            .ok_or(EngineError::NoActiveSignal)?;

        match pending_outcome(&row, now, current_price) {
            PendingOutcome::Close(reason) => {
                Ok(self.close_pending(row, now, current_price, reason, mode).await)
            }
            PendingOutcome::Hold => Ok(TickResult::Active {
                symbol: self.symbol.clone(),
                strategy_name: row.strategy_name.clone(),
                exchange_name: row.exchange_name.clone(),
                current_price,
                signal: row,
            }),
        }
    }

    fn cancel_scheduled(
        &mut self,
        row: SignalRow,
        now: i64,
        current_price: Decimal,
        reason: CancelReason,
    ) -> TickResult {
        self.state.scheduled = None;
        info!(
            symbol = %self.symbol,
            strategy = %self.strategy.name(),
            signal_id = %row.id,
            %reason,
            "scheduled signal cancelled"
        );
        TickResult::Cancelled {
            symbol: self.symbol.clone(),
            strategy_name: row.strategy_name.clone(),
            exchange_name: row.exchange_name.clone(),
            current_price,
            signal: row,
            close_timestamp: now,
            reason,
        }
    }

    async fn activate_scheduled(&mut self, row: SignalRow, mode: ExecutionMode) -> TickResult {
        self.state.scheduled = None;
        self.state.pending = Some(row.clone());
        self.gate
            .add(self.strategy.name(), self.strategy.risk_name())
            .await;
        self.persist_pending(mode).await;
        info!(
            symbol = %self.symbol,
            strategy = %self.strategy.name(),
            signal_id = %row.id,
            price = %row.price_open,
            "scheduled signal activated"
        );
        TickResult::Opened {
            symbol: self.symbol.clone(),
            strategy_name: row.strategy_name.clone(),
            exchange_name: row.exchange_name.clone(),
            current_price: row.price_open,
            signal: row,
        }
    }

    async fn close_pending(
        &mut self,
        row: SignalRow,
        close_timestamp: i64,
        current_price: Decimal,
        reason: CloseReason,
        mode: ExecutionMode,
    ) -> TickResult {
        let pnl = compute_pnl(
            row.side,
            row.price_open,
            current_price,
            self.config.slippage_rate(),
            self.config.fee_rate(),
        );
        self.gate
            .remove(self.strategy.name(), self.strategy.risk_name())
            .await;
        self.state.pending = None;
        self.clear_persisted(mode).await;
        info!(
            symbol = %self.symbol,
            strategy = %self.strategy.name(),
            signal_id = %row.id,
            %reason,
            pnl = %pnl.pnl_percentage,
            "position closed"
        );
        TickResult::Closed {
            symbol: self.symbol.clone(),
            strategy_name: row.strategy_name.clone(),
            exchange_name: row.exchange_name.clone(),
            current_price,
            signal: row,
            close_timestamp,
            close_reason: reason,
            pnl,
        }
    }

    /// Backtest fast path: sweep a contiguous one-minute candle array in one
    /// call instead of one tick per minute. Requires a held signal; the
    /// result is always terminal (`Closed` or `Cancelled`).
    pub async fn batch(&mut self, candles: &[Candle]) -> Result<TickResult, EngineError> {
        if candles.is_empty() {
            return Err(EngineError::EmptyBatch);
        }
        if !self.has_open_signal() {
            return Err(EngineError::NoActiveSignal);
        }
        let mode = ExecutionMode::Backtest;
        let window = self.source.vwap_window();

        // Scheduled phase: cancel-before-activate, candle low/high probes.
        let mut monitor_from = window.saturating_sub(1);
        if let Some(row) = self.state.scheduled.clone() {
            let mut activated_at = None;
            for (i, candle) in candles.iter().enumerate() {
                match scheduled_outcome(
                    &row,
                    candle.timestamp,
                    candle.low,
                    candle.high,
                    self.config.schedule_await_minutes,
                ) {
                    ScheduledOutcome::Timeout => {
                        let result = self.cancel_scheduled(
                            row,
                            candle.timestamp,
                            candle.close,
                            CancelReason::Timeout,
                        );
                        return Ok(self.finish_batch(result, mode).await);
                    }
                    ScheduledOutcome::CancelStopLoss => {
                        let result = self.cancel_scheduled(
                            row,
                            candle.timestamp,
                            candle.close,
                            CancelReason::StopLossBeforeActivation,
                        );
                        return Ok(self.finish_batch(result, mode).await);
                    }
                    ScheduledOutcome::Activate => {
                        let opened = self.activate_scheduled(row.clone(), mode).await;
                        self.bus.publish_tick(&opened, mode);
                        self.notify_strategy(&opened).await;
                        activated_at = Some(i);
                        break;
                    }
                    ScheduledOutcome::Wait => {}
                }
            }
            let activated_at = match activated_at {
                Some(i) => i,
                None => {
                    let last = candles.last().expect("non-empty batch");
                    let result = self.cancel_scheduled(
                        row,
                        last.timestamp,
                        last.close,
                        CancelReason::NotActivated,
                    );
                    return Ok(self.finish_batch(result, mode).await);
                }
            };
            monitor_from = monitor_from.max(activated_at + 1);
        }

        // Pending phase: VWAP-based monitoring with a full window.
        let row = self
            .state
            .pending
            .clone()
            .ok_or(EngineError::NoActiveSignal)?;
        for i in monitor_from..candles.len() {
            let start = (i + 1).saturating_sub(window);
            let current_vwap = vwap(&candles[start..=i]);
            if let PendingOutcome::Close(reason) =
                pending_outcome(&row, candles[i].timestamp, current_vwap)
            {
                let result = self
                    .close_pending(row, candles[i].timestamp, current_vwap, reason, mode)
                    .await;
                return Ok(self.finish_batch(result, mode).await);
            }
        }

        // Array exhausted without a trigger: the estimated window is over.
        let last = candles.last().expect("non-empty batch");
        let tail_start = candles.len().saturating_sub(window);
        let final_vwap = vwap(&candles[tail_start..]);
        let result = self
            .close_pending(row, last.timestamp, final_vwap, CloseReason::TimeExpired, mode)
            .await;
        Ok(self.finish_batch(result, mode).await)
    }

    async fn finish_batch(&mut self, result: TickResult, mode: ExecutionMode) -> TickResult {
        self.bus.publish_tick(&result, mode);
        self.notify_strategy(&result).await;
        result
    }

    fn idle(&self, current_price: Decimal) -> TickResult {
        TickResult::Idle {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy.name().to_string(),
            exchange_name: self.source.exchange_name().to_string(),
            current_price,
        }
    }

    fn report_error(&self, err: &EngineError) {
        warn!(
            symbol = %self.symbol,
            strategy = %self.strategy.name(),
            error = %err,
            "tick degraded to idle"
        );
        self.bus.error.emit(ErrorEvent {
            symbol: self.symbol.clone(),
            strategy_name: self.strategy.name().to_string(),
            exchange_name: self.source.exchange_name().to_string(),
            message: err.to_string(),
        });
    }

    async fn persist_pending(&self, mode: ExecutionMode) {
        if mode != ExecutionMode::Live {
            return;
        }
        if let (Some(store), Some(row)) = (&self.store, &self.state.pending) {
            if let Err(err) = store.save(row).await {
                self.report_error(&err);
            }
        }
    }

    async fn clear_persisted(&self, mode: ExecutionMode) {
        if mode != ExecutionMode::Live {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(err) = store.delete(self.strategy.name(), &self.symbol).await {
                self.report_error(&err);
            }
        }
    }

    async fn notify_strategy(&self, result: &TickResult) {
        let state_callback = match result {
            TickResult::Opened { .. } => self.strategy.on_open(result).await,
            TickResult::Scheduled { .. } | TickResult::Active { .. } => {
                self.strategy.on_active(result).await
            }
            TickResult::Idle { .. } => self.strategy.on_idle(result).await,
            TickResult::Closed { .. } | TickResult::Cancelled { .. } => {
                self.strategy.on_close(result).await
            }
        };
        if let Err(err) = state_callback {
            debug!(strategy = %self.strategy.name(), error = %err, "strategy callback failed");
            self.report_error(&EngineError::Adapter(err));
        }
        if let Err(err) = self.strategy.on_tick(result).await {
            debug!(strategy = %self.strategy.name(), error = %err, "on_tick callback failed");
            self.report_error(&EngineError::Adapter(err));
        }
    }
}
