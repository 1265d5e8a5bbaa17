use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::types::{Candle, Interval};

use super::ExchangeAdapter;

/// In-memory [`ExchangeAdapter`] serving pre-loaded candle series.
///
/// Deterministic by construction: the same data always produces the same
/// fetch results, which is what makes backtests replayable in tests and
/// demos without a network.
pub struct ReplayAdapter {
    candles: HashMap<(String, Interval), Vec<Candle>>,
    price_scale: u32,
    quantity_scale: u32,
}

impl ReplayAdapter {
    pub fn new() -> Self {
        Self {
            candles: HashMap::new(),
            price_scale: 2,
            quantity_scale: 6,
        }
    }

    pub fn with_scales(mut self, price_scale: u32, quantity_scale: u32) -> Self {
        self.price_scale = price_scale;
        self.quantity_scale = quantity_scale;
        self
    }

    /// Load a candle series. Candles are sorted by open time on insert.
    pub fn add_candles(&mut self, symbol: impl Into<String>, interval: Interval, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.timestamp);
        self.candles.insert((symbol.into(), interval), candles);
    }
}

impl Default for ReplayAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for ReplayAdapter {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        since_aligned: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let series = self
            .candles
            .get(&(symbol.to_string(), interval))
            .ok_or_else(|| anyhow::anyhow!("no {} candles loaded for {}", interval, symbol))?;

        let start = series.partition_point(|c| c.timestamp < since_aligned);
        let end = (start + limit).min(series.len());
        Ok(series[start..end].to_vec())
    }

    fn format_price(&self, _symbol: &str, value: Decimal) -> String {
        value.round_dp(self.price_scale).to_string()
    }

    fn format_quantity(&self, _symbol: &str, value: Decimal) -> String {
        value.round_dp(self.quantity_scale).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MINUTE_MS;
    use rust_decimal_macros::dec;

    fn flat_series(count: usize) -> Vec<Candle> {
        (0..count)
            .map(|i| Candle {
                timestamp: i as i64 * MINUTE_MS,
                open: dec!(100),
                high: dec!(101),
                low: dec!(99),
                close: dec!(100),
                volume: dec!(1),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_serves_window_from_aligned_start() {
        let mut adapter = ReplayAdapter::new();
        adapter.add_candles("BTCUSDT", Interval::M1, flat_series(10));

        let out = adapter
            .get_candles("BTCUSDT", Interval::M1, 3 * MINUTE_MS, 4)
            .await
            .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].timestamp, 3 * MINUTE_MS);
        assert_eq!(out[3].timestamp, 6 * MINUTE_MS);
    }

    #[tokio::test]
    async fn test_short_tail_returns_what_exists() {
        let mut adapter = ReplayAdapter::new();
        adapter.add_candles("BTCUSDT", Interval::M1, flat_series(5));

        let out = adapter
            .get_candles("BTCUSDT", Interval::M1, 3 * MINUTE_MS, 10)
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_symbol_errors() {
        let adapter = ReplayAdapter::new();
        assert!(adapter
            .get_candles("ETHUSDT", Interval::M1, 0, 1)
            .await
            .is_err());
    }

    #[test]
    fn test_formatting_uses_scales() {
        let adapter = ReplayAdapter::new().with_scales(2, 4);
        assert_eq!(adapter.format_price("BTCUSDT", dec!(50000.129)), "50000.13");
        assert_eq!(adapter.format_quantity("BTCUSDT", dec!(0.123456789)), "0.1235");
    }
}
