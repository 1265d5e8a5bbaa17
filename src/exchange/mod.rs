pub mod replay;

pub use replay::*;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

use crate::error::EngineError;
use crate::types::{align_down, Candle, Interval, MINUTE_MS};

/// User-supplied market data source.
///
/// Contract for `get_candles`: the first candle's timestamp equals
/// `since_aligned`, exactly `limit` contiguous candles are returned.
/// Violations are detected and surfaced by [`CandleSource`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        since_aligned: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    fn format_price(&self, symbol: &str, value: Decimal) -> String;

    fn format_quantity(&self, symbol: &str, value: Decimal) -> String;
}

/// Volume-weighted average of typical prices over a candle window. Falls
/// back to the arithmetic mean of closes when total volume is zero.
pub fn vwap(candles: &[Candle]) -> Decimal {
    if candles.is_empty() {
        return Decimal::ZERO;
    }
    let total_volume: Decimal = candles.iter().map(|c| c.volume).sum();
    if total_volume.is_zero() {
        let total_close: Decimal = candles.iter().map(|c| c.close).sum();
        return total_close / Decimal::from(candles.len() as u64);
    }
    let weighted: Decimal = candles.iter().map(|c| c.typical_price() * c.volume).sum();
    weighted / total_volume
}

/// Candle access with adapter-contract enforcement and the engine's notion
/// of "current price".
#[derive(Clone)]
pub struct CandleSource {
    exchange_name: String,
    adapter: Arc<dyn ExchangeAdapter>,
    avg_price_candles_count: usize,
}

impl CandleSource {
    pub fn new(
        exchange_name: impl Into<String>,
        adapter: Arc<dyn ExchangeAdapter>,
        avg_price_candles_count: usize,
    ) -> Self {
        Self {
            exchange_name: exchange_name.into(),
            adapter,
            avg_price_candles_count,
        }
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn vwap_window(&self) -> usize {
        self.avg_price_candles_count
    }

    /// Fetch `limit` contiguous candles starting exactly at `since_aligned`.
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        since_aligned: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let candles = self
            .adapter
            .get_candles(symbol, interval, since_aligned, limit)
            .await
            .map_err(EngineError::Adapter)?;

        if let Some(first) = candles.first() {
            if first.timestamp != since_aligned {
                return Err(EngineError::Alignment {
                    symbol: symbol.to_string(),
                    expected: since_aligned,
                    actual: first.timestamp,
                });
            }
        }
        if candles.len() != limit {
            return Err(EngineError::Count {
                symbol: symbol.to_string(),
                expected: limit,
                actual: candles.len(),
            });
        }

        debug!(
            symbol,
            interval = %interval,
            since = since_aligned,
            limit,
            "fetched candles from {}",
            self.exchange_name
        );
        Ok(candles)
    }

    /// `get_candles` anchored at the interval boundary containing `when`.
    pub async fn get_next_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        when: i64,
    ) -> Result<Vec<Candle>, EngineError> {
        self.get_candles(symbol, interval, align_down(when, interval), limit)
            .await
    }

    /// VWAP over the last `avg_price_candles_count` one-minute candles
    /// ending at the minute containing `when`.
    pub async fn get_average_price(&self, symbol: &str, when: i64) -> Result<Decimal, EngineError> {
        let n = self.avg_price_candles_count;
        let last_minute = align_down(when, Interval::M1);
        let since = last_minute - (n as i64 - 1) * MINUTE_MS;
        let candles = self.get_candles(symbol, Interval::M1, since, n).await?;
        Ok(vwap(&candles))
    }

    pub fn format_price(&self, symbol: &str, value: Decimal) -> String {
        self.adapter.format_price(symbol, value)
    }

    pub fn format_quantity(&self, symbol: &str, value: Decimal) -> String {
        self.adapter.format_quantity(symbol, value)
    }
}
