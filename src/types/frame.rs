use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::interval::{enumerate_timeframe, Interval};

/// A named historical range plus the base interval the backtest driver
/// iterates at.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub frame_name: String,
    pub interval: Interval,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl Frame {
    pub fn new(
        frame_name: impl Into<String>,
        interval: Interval,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            frame_name: frame_name.into(),
            interval,
            start_date,
            end_date,
        }
    }

    /// Aligned tick timestamps covering the frame, in order.
    pub fn timestamps(&self) -> Vec<i64> {
        enumerate_timeframe(
            self.start_date.timestamp_millis(),
            self.end_date.timestamp_millis(),
            self.interval,
        )
    }
}
