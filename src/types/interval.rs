use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;

pub const MINUTE_MS: i64 = 60_000;

/// Candle interval. The set is closed: adapters are only ever asked for
/// these granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H8 => "8h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
            Interval::D3 => "3d",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, EngineError> {
        match s {
            "1m" => Ok(Interval::M1),
            "3m" => Ok(Interval::M3),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "30m" => Ok(Interval::M30),
            "1h" => Ok(Interval::H1),
            "2h" => Ok(Interval::H2),
            "4h" => Ok(Interval::H4),
            "6h" => Ok(Interval::H6),
            "8h" => Ok(Interval::H8),
            "12h" => Ok(Interval::H12),
            "1d" => Ok(Interval::D1),
            "3d" => Ok(Interval::D3),
            _ => Err(EngineError::UnsupportedInterval(s.to_string())),
        }
    }

    pub fn minutes(&self) -> i64 {
        match self {
            Interval::M1 => 1,
            Interval::M3 => 3,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
            Interval::H2 => 120,
            Interval::H4 => 240,
            Interval::H6 => 360,
            Interval::H8 => 480,
            Interval::H12 => 720,
            Interval::D1 => 1440,
            Interval::D3 => 4320,
        }
    }

    pub fn millis(&self) -> i64 {
        self.minutes() * MINUTE_MS
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Align a millisecond timestamp down to the nearest interval boundary.
pub fn align_down(ts: i64, interval: Interval) -> i64 {
    let step = interval.millis();
    ts.div_euclid(step) * step
}

/// Enumerate every aligned timestamp `t` with `start <= t <= end`,
/// beginning at the first boundary at or after `start`. The sequence is
/// owned, so callers can restart or skip ahead freely.
pub fn enumerate_timeframe(start: i64, end: i64, interval: Interval) -> Vec<i64> {
    let step = interval.millis();
    let mut t = align_down(start, interval);
    if t < start {
        t += step;
    }
    let mut out = Vec::new();
    while t <= end {
        out.push(t);
        t += step;
    }
    out
}
