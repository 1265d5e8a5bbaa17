//! Backtesting and live-trading engine for single-leg directional signal
//! strategies.
//!
//! Users register exchange adapters, strategies, frames and risk profiles in
//! a [`Registry`], then drive an [`Engine`] either over a historical frame
//! (backtest, with a batched fast path) or against the wall clock (live).
//! Every signal runs through the same lifecycle:
//! idle, scheduled, opened, active, closed/cancelled.

pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod registry;
pub mod risk;
pub mod strategies;
pub mod types;

pub use config::EngineConfig;
pub use engine::{
    BacktestReport, BacktestSummary, Engine, EventBus, ExecutionContext, ExecutionMode,
};
pub use error::EngineError;
pub use exchange::{vwap, CandleSource, ExchangeAdapter, ReplayAdapter};
pub use persistence::SignalStore;
pub use registry::Registry;
pub use risk::{RiskCheckContext, RiskGate, RiskSchema};
pub use strategies::{FnStrategy, SignalStrategy};
pub use types::{
    Candle, CancelReason, CloseReason, Frame, Interval, PnlRecord, SignalRow, SignalSpec,
    TickResult, TradeSide,
};
