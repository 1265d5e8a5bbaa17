use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV candle. `timestamp` is the open time as an interval-aligned
/// millisecond epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            timestamp: 0,
            open,
            high,
            low,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn test_typical_price() {
        let c = candle(dec!(10), dec!(12), dec!(9), dec!(9));
        assert_eq!(c.typical_price(), dec!(10));
    }

    #[test]
    fn test_range_and_direction() {
        let c = candle(dec!(10), dec!(12), dec!(9), dec!(11));
        assert_eq!(c.range(), dec!(3));
        assert!(c.is_bullish());
    }
}
