use thiserror::Error;

/// Every failure the engine can surface. Recoverable kinds are reported on
/// the `error` event stream and degrade the tick to `Idle`; `Config` and
/// `UnsupportedInterval` are fatal at registration time.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The user-supplied exchange adapter raised an error.
    #[error("exchange adapter failed: {0:#}")]
    Adapter(#[from] anyhow::Error),

    /// The adapter broke its contract: first candle not at the requested
    /// aligned timestamp.
    #[error("misaligned candles for {symbol}: expected first timestamp {expected}, got {actual}")]
    Alignment {
        symbol: String,
        expected: i64,
        actual: i64,
    },

    /// The adapter broke its contract: fewer candles than requested.
    #[error("short candle batch for {symbol}: expected {expected}, got {actual}")]
    Count {
        symbol: String,
        expected: usize,
        actual: usize,
    },

    /// The strategy produced an ill-formed signal.
    #[error("invalid signal: {}", reasons.join("; "))]
    InvalidSignal { reasons: Vec<String> },

    /// Startup configuration is inconsistent. Aggregates every violation.
    #[error("invalid configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    /// Live-mode state store failure. Non-fatal.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("unsupported interval '{0}'")]
    UnsupportedInterval(String),

    /// Registry lookup for a name that was never registered.
    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },

    /// Registry `register` on a name that already exists.
    #[error("{kind} '{name}' is already registered")]
    DuplicateName { kind: &'static str, name: String },

    /// Batch monitoring invoked while the machine holds no signal.
    #[error("batch monitoring requires a scheduled or pending signal")]
    NoActiveSignal,

    /// Batch monitoring invoked with an empty candle array.
    #[error("batch monitoring received an empty candle array")]
    EmptyBatch,
}

impl EngineError {
    /// Whether the error may crash startup instead of becoming an event.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Config(_)
                | EngineError::UnsupportedInterval(_)
                | EngineError::UnknownName { .. }
                | EngineError::DuplicateName { .. }
        )
    }
}
