use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::error::EngineError;
use crate::exchange::ExchangeAdapter;
use crate::risk::RiskSchema;
use crate::strategies::SignalStrategy;
use crate::types::Frame;

/// Interned schema registry: stable names to strategy, exchange, frame and
/// risk definitions. Owned by the engine and threaded through explicitly;
/// there is no process-wide registration.
///
/// `register_*` rejects duplicates, `override_*` replaces, `*(name)` looks
/// up or fails with the unknown name.
pub struct Registry {
    strategies: RwLock<HashMap<String, Arc<dyn SignalStrategy>>>,
    exchanges: RwLock<HashMap<String, Arc<dyn ExchangeAdapter>>>,
    frames: RwLock<HashMap<String, Frame>>,
    risks: RwLock<HashMap<String, Arc<RiskSchema>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            exchanges: RwLock::new(HashMap::new()),
            frames: RwLock::new(HashMap::new()),
            risks: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_strategy(&self, strategy: Arc<dyn SignalStrategy>) -> Result<(), EngineError> {
        let name = strategy.name().to_string();
        let mut strategies = self.strategies.write().unwrap();
        if strategies.contains_key(&name) {
            return Err(EngineError::DuplicateName {
                kind: "strategy",
                name,
            });
        }
        debug!(strategy = %name, interval = %strategy.interval(), "strategy registered");
        strategies.insert(name, strategy);
        Ok(())
    }

    pub fn override_strategy(&self, strategy: Arc<dyn SignalStrategy>) {
        let name = strategy.name().to_string();
        debug!(strategy = %name, "strategy overridden");
        self.strategies.write().unwrap().insert(name, strategy);
    }

    pub fn strategy(&self, name: &str) -> Result<Arc<dyn SignalStrategy>, EngineError> {
        self.strategies
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownName {
                kind: "strategy",
                name: name.to_string(),
            })
    }

    pub fn register_exchange(
        &self,
        name: impl Into<String>,
        adapter: Arc<dyn ExchangeAdapter>,
    ) -> Result<(), EngineError> {
        let name = name.into();
        let mut exchanges = self.exchanges.write().unwrap();
        if exchanges.contains_key(&name) {
            return Err(EngineError::DuplicateName {
                kind: "exchange",
                name,
            });
        }
        debug!(exchange = %name, "exchange registered");
        exchanges.insert(name, adapter);
        Ok(())
    }

    pub fn override_exchange(&self, name: impl Into<String>, adapter: Arc<dyn ExchangeAdapter>) {
        self.exchanges.write().unwrap().insert(name.into(), adapter);
    }

    pub fn exchange(&self, name: &str) -> Result<Arc<dyn ExchangeAdapter>, EngineError> {
        self.exchanges
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownName {
                kind: "exchange",
                name: name.to_string(),
            })
    }

    pub fn register_frame(&self, frame: Frame) -> Result<(), EngineError> {
        if frame.start_date >= frame.end_date {
            return Err(EngineError::Config(vec![format!(
                "frame '{}': start_date {} must precede end_date {}",
                frame.frame_name, frame.start_date, frame.end_date
            )]));
        }
        let mut frames = self.frames.write().unwrap();
        if frames.contains_key(&frame.frame_name) {
            return Err(EngineError::DuplicateName {
                kind: "frame",
                name: frame.frame_name,
            });
        }
        debug!(frame = %frame.frame_name, interval = %frame.interval, "frame registered");
        frames.insert(frame.frame_name.clone(), frame);
        Ok(())
    }

    pub fn override_frame(&self, frame: Frame) {
        self.frames
            .write()
            .unwrap()
            .insert(frame.frame_name.clone(), frame);
    }

    pub fn frame(&self, name: &str) -> Result<Frame, EngineError> {
        self.frames
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownName {
                kind: "frame",
                name: name.to_string(),
            })
    }

    pub fn register_risk(&self, schema: RiskSchema) -> Result<(), EngineError> {
        let name = schema.risk_name().to_string();
        let mut risks = self.risks.write().unwrap();
        if risks.contains_key(&name) {
            return Err(EngineError::DuplicateName { kind: "risk", name });
        }
        debug!(risk = %name, "risk profile registered");
        risks.insert(name, Arc::new(schema));
        Ok(())
    }

    pub fn override_risk(&self, schema: RiskSchema) {
        let name = schema.risk_name().to_string();
        self.risks.write().unwrap().insert(name, Arc::new(schema));
    }

    pub fn risk(&self, name: &str) -> Result<Arc<RiskSchema>, EngineError> {
        self.risks
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownName {
                kind: "risk",
                name: name.to_string(),
            })
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionContext;
    use crate::exchange::ReplayAdapter;
    use crate::strategies::FnStrategy;
    use crate::types::Interval;
    use chrono::{TimeZone, Utc};

    fn noop_strategy(name: &str) -> Arc<dyn SignalStrategy> {
        Arc::new(FnStrategy::new(name, Interval::M1, |_: &ExecutionContext| {
            Ok(None)
        }))
    }

    #[test]
    fn test_register_and_get() {
        let registry = Registry::new();
        registry.register_strategy(noop_strategy("demo")).unwrap();
        assert_eq!(registry.strategy("demo").unwrap().name(), "demo");
        assert!(registry.strategy("missing").is_err());
    }

    #[test]
    fn test_duplicate_rejected_override_replaces() {
        let registry = Registry::new();
        registry.register_strategy(noop_strategy("demo")).unwrap();
        assert!(matches!(
            registry.register_strategy(noop_strategy("demo")),
            Err(EngineError::DuplicateName { kind: "strategy", .. })
        ));

        registry.override_strategy(Arc::new(FnStrategy::new(
            "demo",
            Interval::M5,
            |_: &ExecutionContext| Ok(None),
        )));
        assert_eq!(registry.strategy("demo").unwrap().interval(), Interval::M5);
    }

    #[test]
    fn test_frame_dates_validated() {
        let registry = Registry::new();
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = registry
            .register_frame(Frame::new("bad", Interval::H1, start, end))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_exchange_and_risk_lookup() {
        let registry = Registry::new();
        registry
            .register_exchange("replay", Arc::new(ReplayAdapter::new()))
            .unwrap();
        assert!(registry.exchange("replay").is_ok());

        registry
            .register_risk(RiskSchema::new("cap3").max_concurrent_positions(3))
            .unwrap();
        assert_eq!(registry.risk("cap3").unwrap().risk_name(), "cap3");
    }
}
