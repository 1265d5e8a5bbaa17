use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Snapshot handed to every risk validation predicate.
#[derive(Debug, Clone, Serialize)]
pub struct RiskCheckContext {
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub current_price: Decimal,
    pub timestamp: i64,
    pub active_position_count: usize,
}

type RiskValidation = Box<dyn Fn(&RiskCheckContext) -> Result<(), String> + Send + Sync>;
type RejectedCallback = Box<dyn Fn(&RiskCheckContext, &str) + Send + Sync>;
type AllowedCallback = Box<dyn Fn(&RiskCheckContext) + Send + Sync>;

/// A named set of predicates bounding concurrent pending signals.
///
/// Any predicate returning an error rejects the check; callbacks observe
/// the outcome but cannot change it.
pub struct RiskSchema {
    risk_name: String,
    validations: Vec<RiskValidation>,
    on_rejected: Option<RejectedCallback>,
    on_allowed: Option<AllowedCallback>,
}

impl RiskSchema {
    pub fn new(risk_name: impl Into<String>) -> Self {
        Self {
            risk_name: risk_name.into(),
            validations: Vec::new(),
            on_rejected: None,
            on_allowed: None,
        }
    }

    pub fn risk_name(&self) -> &str {
        &self.risk_name
    }

    pub fn validation(
        mut self,
        f: impl Fn(&RiskCheckContext) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validations.push(Box::new(f));
        self
    }

    /// Convenience predicate capping concurrent pending signals.
    pub fn max_concurrent_positions(self, max: usize) -> Self {
        self.validation(move |ctx| {
            if ctx.active_position_count >= max {
                Err(format!(
                    "active position limit reached ({}/{})",
                    ctx.active_position_count, max
                ))
            } else {
                Ok(())
            }
        })
    }

    pub fn on_rejected(
        mut self,
        f: impl Fn(&RiskCheckContext, &str) + Send + Sync + 'static,
    ) -> Self {
        self.on_rejected = Some(Box::new(f));
        self
    }

    pub fn on_allowed(mut self, f: impl Fn(&RiskCheckContext) + Send + Sync + 'static) -> Self {
        self.on_allowed = Some(Box::new(f));
        self
    }

    fn run(&self, ctx: &RiskCheckContext) -> Result<(), String> {
        for validation in &self.validations {
            validation(ctx)?;
        }
        Ok(())
    }
}

/// Outcome of a risk-gate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Allowed,
    Rejected(String),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allowed)
    }
}

/// Tracks how many pending signals exist per risk scope and arbitrates new
/// admissions.
///
/// Scope: the risk profile name when the strategy names one, so strategies
/// sharing a profile share the bound; the strategy name otherwise.
pub struct RiskGate {
    counts: RwLock<HashMap<String, usize>>,
}

impl RiskGate {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    fn scope_key(strategy_name: &str, risk_name: Option<&str>) -> String {
        risk_name.unwrap_or(strategy_name).to_string()
    }

    pub async fn active_count(&self, strategy_name: &str, risk_name: Option<&str>) -> usize {
        let key = Self::scope_key(strategy_name, risk_name);
        self.counts.read().await.get(&key).copied().unwrap_or(0)
    }

    /// Run the profile's predicates against the current scope count.
    /// Without a configured profile the gate always allows.
    #[allow(clippy::too_many_arguments)]
    pub async fn check(
        &self,
        schema: Option<&RiskSchema>,
        symbol: &str,
        strategy_name: &str,
        exchange_name: &str,
        current_price: Decimal,
        timestamp: i64,
    ) -> RiskDecision {
        let schema = match schema {
            Some(schema) => schema,
            None => return RiskDecision::Allowed,
        };

        let ctx = RiskCheckContext {
            symbol: symbol.to_string(),
            strategy_name: strategy_name.to_string(),
            exchange_name: exchange_name.to_string(),
            current_price,
            timestamp,
            active_position_count: self
                .active_count(strategy_name, Some(schema.risk_name()))
                .await,
        };

        match schema.run(&ctx) {
            Ok(()) => {
                if let Some(cb) = &schema.on_allowed {
                    cb(&ctx);
                }
                RiskDecision::Allowed
            }
            Err(message) => {
                debug!(
                    symbol,
                    strategy = strategy_name,
                    risk = schema.risk_name(),
                    %message,
                    "risk gate rejected signal"
                );
                if let Some(cb) = &schema.on_rejected {
                    cb(&ctx, &message);
                }
                RiskDecision::Rejected(message)
            }
        }
    }

    /// Called exactly once when a signal transitions to pending.
    pub async fn add(&self, strategy_name: &str, risk_name: Option<&str>) {
        let key = Self::scope_key(strategy_name, risk_name);
        let mut counts = self.counts.write().await;
        let entry = counts.entry(key).or_insert(0);
        *entry += 1;
        debug!(strategy = strategy_name, count = *entry, "risk gate admitted position");
    }

    /// Called exactly once on closed/cancelled-from-pending transitions.
    pub async fn remove(&self, strategy_name: &str, risk_name: Option<&str>) {
        let key = Self::scope_key(strategy_name, risk_name);
        let mut counts = self.counts.write().await;
        match counts.get_mut(&key) {
            Some(entry) if *entry > 0 => {
                *entry -= 1;
                debug!(strategy = strategy_name, count = *entry, "risk gate released position");
            }
            _ => {
                warn!(
                    strategy = strategy_name,
                    risk = ?risk_name,
                    "risk gate release without a matching admission"
                );
            }
        }
    }
}

impl Default for RiskGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_no_profile_always_allows() {
        let gate = RiskGate::new();
        let decision = gate
            .check(None, "BTCUSDT", "demo", "replay", dec!(50000), 0)
            .await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_position_cap_rejects_fourth() {
        let gate = RiskGate::new();
        let schema = RiskSchema::new("cap3").max_concurrent_positions(3);

        for symbol in ["BTCUSDT", "ETHUSDT", "SOLUSDT"] {
            let decision = gate
                .check(Some(&schema), symbol, "demo", "replay", dec!(100), 0)
                .await;
            assert!(decision.is_allowed());
            gate.add("demo", Some("cap3")).await;
        }

        let decision = gate
            .check(Some(&schema), "BNBUSDT", "demo", "replay", dec!(100), 0)
            .await;
        assert_eq!(
            decision,
            RiskDecision::Rejected("active position limit reached (3/3)".to_string())
        );

        // Releasing one admits the next candidate.
        gate.remove("demo", Some("cap3")).await;
        let decision = gate
            .check(Some(&schema), "BNBUSDT", "demo", "replay", dec!(100), 0)
            .await;
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_shared_profile_shares_count() {
        let gate = RiskGate::new();
        gate.add("trend", Some("shared")).await;
        gate.add("momentum", Some("shared")).await;
        assert_eq!(gate.active_count("anything", Some("shared")).await, 2);

        // Without a profile, counts are per strategy.
        gate.add("solo", None).await;
        assert_eq!(gate.active_count("solo", None).await, 1);
        assert_eq!(gate.active_count("other", None).await, 0);
    }

    #[tokio::test]
    async fn test_remove_never_goes_negative() {
        let gate = RiskGate::new();
        gate.remove("demo", None).await;
        assert_eq!(gate.active_count("demo", None).await, 0);
    }

    #[tokio::test]
    async fn test_callbacks_observe_outcomes() {
        let rejected = Arc::new(AtomicUsize::new(0));
        let allowed = Arc::new(AtomicUsize::new(0));
        let rejected_clone = Arc::clone(&rejected);
        let allowed_clone = Arc::clone(&allowed);

        let schema = RiskSchema::new("cap1")
            .max_concurrent_positions(1)
            .on_rejected(move |_, _| {
                rejected_clone.fetch_add(1, Ordering::SeqCst);
            })
            .on_allowed(move |_| {
                allowed_clone.fetch_add(1, Ordering::SeqCst);
            });

        let gate = RiskGate::new();
        gate.check(Some(&schema), "BTCUSDT", "demo", "replay", dec!(1), 0)
            .await;
        gate.add("demo", Some("cap1")).await;
        gate.check(Some(&schema), "BTCUSDT", "demo", "replay", dec!(1), 0)
            .await;

        assert_eq!(allowed.load(Ordering::SeqCst), 1);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
    }
}
