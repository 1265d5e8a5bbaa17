use async_trait::async_trait;

use crate::engine::ExecutionContext;
use crate::exchange::CandleSource;
use crate::types::{Interval, SignalSpec, TickResult};

/// A registered strategy: produces signal specifications on the engine's
/// throttled ticks and optionally observes lifecycle results.
///
/// `get_signal` may suspend (fetch candles, compute indicators) and must be
/// idempotent: a tick interrupted mid-flight can be retried on the next
/// firing. Callback errors are captured and reported by the engine; they
/// never alter signal state.
#[async_trait]
pub trait SignalStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Generation cadence; the throttle skips ticks closer together than
    /// this interval.
    fn interval(&self) -> Interval;

    /// Risk profile bounding this strategy's concurrent positions.
    fn risk_name(&self) -> Option<&str> {
        None
    }

    async fn get_signal(
        &self,
        ctx: &ExecutionContext,
        source: &CandleSource,
    ) -> anyhow::Result<Option<SignalSpec>>;

    async fn on_open(&self, _result: &TickResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_active(&self, _result: &TickResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_idle(&self, _result: &TickResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_close(&self, _result: &TickResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_tick(&self, _result: &TickResult) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Adapter turning a plain closure plus static metadata into a strategy.
/// Keeps user code isolated from engine internals: the closure sees only
/// the execution context.
pub struct FnStrategy<F> {
    name: String,
    interval: Interval,
    risk_name: Option<String>,
    get_signal: F,
}

impl<F> FnStrategy<F>
where
    F: Fn(&ExecutionContext) -> anyhow::Result<Option<SignalSpec>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, interval: Interval, get_signal: F) -> Self {
        Self {
            name: name.into(),
            interval,
            risk_name: None,
            get_signal,
        }
    }

    pub fn with_risk(mut self, risk_name: impl Into<String>) -> Self {
        self.risk_name = Some(risk_name.into());
        self
    }
}

#[async_trait]
impl<F> SignalStrategy for FnStrategy<F>
where
    F: Fn(&ExecutionContext) -> anyhow::Result<Option<SignalSpec>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Interval {
        self.interval
    }

    fn risk_name(&self) -> Option<&str> {
        self.risk_name.as_deref()
    }

    async fn get_signal(
        &self,
        ctx: &ExecutionContext,
        _source: &CandleSource,
    ) -> anyhow::Result<Option<SignalSpec>> {
        (self.get_signal)(ctx)
    }
}
