use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::interval::MINUTE_MS;

/// Direction of a single-leg position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Long => "long",
            TradeSide::Short => "short",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a strategy returns when it wants to trade.
///
/// A `price_open` of `None` requests a market entry at the current VWAP;
/// `Some(price)` schedules the signal until price reaches that level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSpec {
    pub side: TradeSide,
    pub price_open: Option<Decimal>,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    pub minute_estimated_time: u32,
    #[serde(default)]
    pub note: Option<String>,
}

/// Whether a stamped signal is waiting for activation or actively monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Scheduled,
    Pending,
}

/// A stamped signal: the strategy's specification plus the identity the
/// engine assigns when it accepts it. `price_open` is always resolved here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRow {
    pub id: String,
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub side: TradeSide,
    pub price_open: Decimal,
    pub price_take_profit: Decimal,
    pub price_stop_loss: Decimal,
    pub minute_estimated_time: u32,
    pub note: Option<String>,
    /// Creation time, millisecond epoch.
    pub timestamp: i64,
}

impl SignalRow {
    /// Millisecond timestamp after which the position is time-expired.
    pub fn expiry_deadline(&self) -> i64 {
        self.timestamp + i64::from(self.minute_estimated_time) * MINUTE_MS
    }

    /// Millisecond timestamp after which a still-scheduled signal is stale.
    pub fn schedule_deadline(&self, await_minutes: u32) -> i64 {
        self.timestamp + i64::from(await_minutes) * MINUTE_MS
    }
}

/// Why a scheduled signal was cancelled before ever becoming a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    Timeout,
    StopLossBeforeActivation,
    NotActivated,
}

impl CancelReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Timeout => "timeout",
            CancelReason::StopLossBeforeActivation => "stop_loss_before_activation",
            CancelReason::NotActivated => "not_activated",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a pending position closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    TimeExpired,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TakeProfit => "take_profit",
            CloseReason::StopLoss => "stop_loss",
            CloseReason::TimeExpired => "time_expired",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry/exit prices before and after slippage+fee adjustment, and the
/// resulting signed return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlRecord {
    pub price_open: Decimal,
    pub price_close: Decimal,
    pub price_open_with_costs: Decimal,
    pub price_close_with_costs: Decimal,
    pub pnl_percentage: Decimal,
}

/// Result of one state-machine tick. Each variant carries exactly the
/// fields that exist in that state; there are no optional payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickResult {
    Idle {
        symbol: String,
        strategy_name: String,
        exchange_name: String,
        current_price: Decimal,
    },
    Scheduled {
        symbol: String,
        strategy_name: String,
        exchange_name: String,
        current_price: Decimal,
        signal: SignalRow,
    },
    Opened {
        symbol: String,
        strategy_name: String,
        exchange_name: String,
        /// Equals `signal.price_open` by construction.
        current_price: Decimal,
        signal: SignalRow,
    },
    Active {
        symbol: String,
        strategy_name: String,
        exchange_name: String,
        current_price: Decimal,
        signal: SignalRow,
    },
    Cancelled {
        symbol: String,
        strategy_name: String,
        exchange_name: String,
        current_price: Decimal,
        signal: SignalRow,
        close_timestamp: i64,
        reason: CancelReason,
    },
    Closed {
        symbol: String,
        strategy_name: String,
        exchange_name: String,
        current_price: Decimal,
        signal: SignalRow,
        close_timestamp: i64,
        close_reason: CloseReason,
        pnl: PnlRecord,
    },
}

impl TickResult {
    pub fn status(&self) -> &'static str {
        match self {
            TickResult::Idle { .. } => "idle",
            TickResult::Scheduled { .. } => "scheduled",
            TickResult::Opened { .. } => "opened",
            TickResult::Active { .. } => "active",
            TickResult::Cancelled { .. } => "cancelled",
            TickResult::Closed { .. } => "closed",
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            TickResult::Idle { symbol, .. }
            | TickResult::Scheduled { symbol, .. }
            | TickResult::Opened { symbol, .. }
            | TickResult::Active { symbol, .. }
            | TickResult::Cancelled { symbol, .. }
            | TickResult::Closed { symbol, .. } => symbol,
        }
    }

    pub fn strategy_name(&self) -> &str {
        match self {
            TickResult::Idle { strategy_name, .. }
            | TickResult::Scheduled { strategy_name, .. }
            | TickResult::Opened { strategy_name, .. }
            | TickResult::Active { strategy_name, .. }
            | TickResult::Cancelled { strategy_name, .. }
            | TickResult::Closed { strategy_name, .. } => strategy_name,
        }
    }

    /// Terminal results end the signal's lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TickResult::Cancelled { .. } | TickResult::Closed { .. })
    }
}
