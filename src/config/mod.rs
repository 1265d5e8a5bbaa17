use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;

fn default_percent_slippage() -> Decimal {
    dec!(0.1)
}

fn default_percent_fee() -> Decimal {
    dec!(0.1)
}

fn default_schedule_await_minutes() -> u32 {
    120
}

fn default_avg_price_candles_count() -> usize {
    5
}

fn default_min_takeprofit_distance_percent() -> Decimal {
    dec!(0.5)
}

fn default_min_stoploss_distance_percent() -> Decimal {
    dec!(0.1)
}

fn default_max_stoploss_distance_percent() -> Decimal {
    dec!(20)
}

fn default_max_signal_lifetime_minutes() -> u32 {
    1440
}

/// Engine tuning knobs. Loaded from an optional `engine.toml` plus
/// environment variables (`PERCENT_SLIPPAGE=0.2` overrides the file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-side slippage applied to fills, in percent.
    #[serde(default = "default_percent_slippage")]
    pub percent_slippage: Decimal,

    /// Per-side fee applied to fills, in percent.
    #[serde(default = "default_percent_fee")]
    pub percent_fee: Decimal,

    /// Maximum age of a scheduled signal before auto-cancel.
    #[serde(default = "default_schedule_await_minutes")]
    pub schedule_await_minutes: u32,

    /// Window size for the volume-weighted average price.
    #[serde(default = "default_avg_price_candles_count")]
    pub avg_price_candles_count: usize,

    /// Validator floor on take-profit distance; must cover the round-trip
    /// costs `2 * (slippage + fee)`.
    #[serde(default = "default_min_takeprofit_distance_percent")]
    pub min_takeprofit_distance_percent: Decimal,

    #[serde(default = "default_min_stoploss_distance_percent")]
    pub min_stoploss_distance_percent: Decimal,

    #[serde(default = "default_max_stoploss_distance_percent")]
    pub max_stoploss_distance_percent: Decimal,

    #[serde(default = "default_max_signal_lifetime_minutes")]
    pub max_signal_lifetime_minutes: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            percent_slippage: default_percent_slippage(),
            percent_fee: default_percent_fee(),
            schedule_await_minutes: default_schedule_await_minutes(),
            avg_price_candles_count: default_avg_price_candles_count(),
            min_takeprofit_distance_percent: default_min_takeprofit_distance_percent(),
            min_stoploss_distance_percent: default_min_stoploss_distance_percent(),
            max_stoploss_distance_percent: default_max_stoploss_distance_percent(),
            max_signal_lifetime_minutes: default_max_signal_lifetime_minutes(),
        }
    }
}

impl EngineConfig {
    /// Layer `engine.toml` (optional) under environment variables and
    /// validate the result.
    pub fn load() -> Result<Self, EngineError> {
        Self::load_from("engine")
    }

    pub fn load_from(basename: &str) -> Result<Self, EngineError> {
        let raw = Config::builder()
            .add_source(File::with_name(basename).required(false))
            .add_source(Environment::default())
            .build()
            .map_err(|e| EngineError::Config(vec![e.to_string()]))?;

        let config: EngineConfig = raw
            .try_deserialize()
            .map_err(|e| EngineError::Config(vec![e.to_string()]))?;

        config.validated()
    }

    /// Fractional per-side slippage (`0.1%` becomes `0.001`).
    pub fn slippage_rate(&self) -> Decimal {
        self.percent_slippage / dec!(100)
    }

    /// Fractional per-side fee.
    pub fn fee_rate(&self) -> Decimal {
        self.percent_fee / dec!(100)
    }

    /// Collect every violation instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.percent_slippage < Decimal::ZERO {
            errors.push("percent_slippage must be >= 0".to_string());
        }
        if self.percent_fee < Decimal::ZERO {
            errors.push("percent_fee must be >= 0".to_string());
        }
        if self.schedule_await_minutes == 0 {
            errors.push("schedule_await_minutes must be > 0".to_string());
        }
        if self.avg_price_candles_count == 0 {
            errors.push("avg_price_candles_count must be > 0".to_string());
        }

        let round_trip_costs = dec!(2) * (self.percent_slippage + self.percent_fee);
        if self.min_takeprofit_distance_percent <= round_trip_costs {
            errors.push(format!(
                "min_takeprofit_distance_percent ({}) must exceed round-trip costs 2*(slippage+fee) ({})",
                self.min_takeprofit_distance_percent, round_trip_costs
            ));
        }

        if self.min_stoploss_distance_percent <= Decimal::ZERO {
            errors.push("min_stoploss_distance_percent must be > 0".to_string());
        }
        if self.max_stoploss_distance_percent <= self.min_stoploss_distance_percent {
            errors.push(format!(
                "max_stoploss_distance_percent ({}) must exceed min_stoploss_distance_percent ({})",
                self.max_stoploss_distance_percent, self.min_stoploss_distance_percent
            ));
        }
        if self.max_signal_lifetime_minutes == 0 {
            errors.push("max_signal_lifetime_minutes must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Fail fast with every violation aggregated into one error.
    pub fn validated(self) -> Result<Self, EngineError> {
        match self.validate() {
            Ok(()) => {
                debug!(
                    slippage = %self.percent_slippage,
                    fee = %self.percent_fee,
                    vwap_window = self.avg_price_candles_count,
                    "engine configuration accepted"
                );
                Ok(self)
            }
            Err(errors) => Err(EngineError::Config(errors)),
        }
    }
}
