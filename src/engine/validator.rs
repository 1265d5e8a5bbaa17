use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::types::{SignalRow, TradeSide};

/// Validate a freshly stamped signal before it enters the state machine.
///
/// Pure: collects every violated contract condition instead of stopping at
/// the first, so the error event names them all.
pub fn validate_signal(row: &SignalRow, config: &EngineConfig) -> Result<(), EngineError> {
    let mut reasons = Vec::new();

    if row.timestamp <= 0 {
        reasons.push(format!("timestamp must be positive, got {}", row.timestamp));
    }
    if row.minute_estimated_time == 0 {
        reasons.push("minute_estimated_time must be positive".to_string());
    }
    if row.minute_estimated_time > config.max_signal_lifetime_minutes {
        reasons.push(format!(
            "minute_estimated_time {} exceeds the {}-minute lifetime cap",
            row.minute_estimated_time, config.max_signal_lifetime_minutes
        ));
    }

    for (label, price) in [
        ("price_open", row.price_open),
        ("price_take_profit", row.price_take_profit),
        ("price_stop_loss", row.price_stop_loss),
    ] {
        if price <= Decimal::ZERO {
            reasons.push(format!("{label} must be positive, got {price}"));
        }
    }

    match row.side {
        TradeSide::Long => {
            if row.price_take_profit <= row.price_open {
                reasons.push(format!(
                    "long take-profit {} must be above entry {}",
                    row.price_take_profit, row.price_open
                ));
            }
            if row.price_stop_loss >= row.price_open {
                reasons.push(format!(
                    "long stop-loss {} must be below entry {}",
                    row.price_stop_loss, row.price_open
                ));
            }
        }
        TradeSide::Short => {
            if row.price_take_profit >= row.price_open {
                reasons.push(format!(
                    "short take-profit {} must be below entry {}",
                    row.price_take_profit, row.price_open
                ));
            }
            if row.price_stop_loss <= row.price_open {
                reasons.push(format!(
                    "short stop-loss {} must be above entry {}",
                    row.price_stop_loss, row.price_open
                ));
            }
        }
    }

    if row.price_open > Decimal::ZERO {
        let tp_distance = (row.price_take_profit - row.price_open).abs() / row.price_open * dec!(100);
        if tp_distance < config.min_takeprofit_distance_percent {
            reasons.push(format!(
                "take-profit distance {tp_distance:.4}% is below the {}% floor",
                config.min_takeprofit_distance_percent
            ));
        }

        let sl_distance = (row.price_open - row.price_stop_loss).abs() / row.price_open * dec!(100);
        if sl_distance < config.min_stoploss_distance_percent {
            reasons.push(format!(
                "stop-loss distance {sl_distance:.4}% is below the {}% floor",
                config.min_stoploss_distance_percent
            ));
        }
        if sl_distance > config.max_stoploss_distance_percent {
            reasons.push(format!(
                "stop-loss distance {sl_distance:.4}% exceeds the {}% cap",
                config.max_stoploss_distance_percent
            ));
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(EngineError::InvalidSignal { reasons })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn long_row() -> SignalRow {
        SignalRow {
            id: "sig-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            strategy_name: "demo".to_string(),
            exchange_name: "replay".to_string(),
            side: TradeSide::Long,
            price_open: dec!(50000),
            price_take_profit: dec!(51000),
            price_stop_loss: dec!(49000),
            minute_estimated_time: 60,
            note: None,
            timestamp: 1_000_000,
        }
    }

    fn short_row() -> SignalRow {
        SignalRow {
            side: TradeSide::Short,
            price_take_profit: dec!(49000),
            price_stop_loss: dec!(51000),
            ..long_row()
        }
    }

    #[test]
    fn test_well_formed_signals_pass() {
        assert!(validate_signal(&long_row(), &config()).is_ok());
        assert!(validate_signal(&short_row(), &config()).is_ok());
    }

    #[test]
    fn test_long_ordering_enforced() {
        let row = SignalRow {
            price_take_profit: dec!(49500),
            ..long_row()
        };
        let err = validate_signal(&row, &config()).unwrap_err();
        assert!(err.to_string().contains("must be above entry"));
    }

    #[test]
    fn test_short_ordering_enforced() {
        let row = SignalRow {
            price_stop_loss: dec!(49500),
            ..short_row()
        };
        let err = validate_signal(&row, &config()).unwrap_err();
        assert!(err.to_string().contains("must be above entry"));
    }

    #[test]
    fn test_all_reasons_collected() {
        let row = SignalRow {
            price_open: dec!(-1),
            minute_estimated_time: 0,
            timestamp: 0,
            ..long_row()
        };
        match validate_signal(&row, &config()).unwrap_err() {
            EngineError::InvalidSignal { reasons } => assert!(reasons.len() >= 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_takeprofit_floor() {
        // 0.1% distance, below the default 0.5% floor
        let row = SignalRow {
            price_take_profit: dec!(50050),
            ..long_row()
        };
        let err = validate_signal(&row, &config()).unwrap_err();
        assert!(err.to_string().contains("below the 0.5% floor"));
    }

    #[test]
    fn test_stoploss_band() {
        let config = config();

        // 0.05% distance, below the default 0.1% floor
        let tight = SignalRow {
            price_stop_loss: dec!(49975),
            ..long_row()
        };
        assert!(validate_signal(&tight, &config)
            .unwrap_err()
            .to_string()
            .contains("below the 0.1% floor"));

        // 30% distance, above the default 20% cap
        let wide = SignalRow {
            price_stop_loss: dec!(35000),
            ..long_row()
        };
        assert!(validate_signal(&wide, &config)
            .unwrap_err()
            .to_string()
            .contains("exceeds the 20% cap"));
    }

    #[test]
    fn test_lifetime_cap() {
        let row = SignalRow {
            minute_estimated_time: 2000,
            ..long_row()
        };
        let err = validate_signal(&row, &config()).unwrap_err();
        assert!(err.to_string().contains("lifetime cap"));
    }
}
