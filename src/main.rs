use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use signal_engine::engine::ExecutionContext;
use signal_engine::exchange::CandleSource;
use signal_engine::types::{Candle, MINUTE_MS};
use signal_engine::{
    Engine, EngineConfig, Frame, Interval, Registry, ReplayAdapter, RiskSchema, SignalSpec,
    SignalStrategy, TradeSide,
};

#[derive(Parser)]
#[command(name = "signal-engine")]
#[command(version = "0.1.0")]
#[command(about = "Backtesting and live-trading engine for directional signal strategies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay the built-in demo strategy over synthetic candles
    Backtest {
        /// Start date (YYYY-MM-DD)
        #[arg(short, long, default_value = "2024-01-01")]
        start: String,

        /// End date (YYYY-MM-DD)
        #[arg(short, long, default_value = "2024-01-03")]
        end: String,

        /// Symbol to trade
        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,

        /// Maximum concurrent positions admitted by the risk gate
        #[arg(long, default_value = "3")]
        max_positions: usize,
    },
    /// Load, validate and print the resolved engine configuration
    CheckConfig,
}

/// Demo momentum strategy: long when the half-hour VWAP drift is up,
/// short when it is down, 2% target against a 1% stop.
struct VwapMomentum;

#[async_trait]
impl SignalStrategy for VwapMomentum {
    fn name(&self) -> &str {
        "vwap-momentum"
    }

    fn interval(&self) -> Interval {
        Interval::M30
    }

    fn risk_name(&self) -> Option<&str> {
        Some("default")
    }

    async fn get_signal(
        &self,
        ctx: &ExecutionContext,
        source: &CandleSource,
    ) -> Result<Option<SignalSpec>> {
        let now = source.get_average_price(&ctx.symbol, ctx.when).await?;
        let before = source
            .get_average_price(&ctx.symbol, ctx.when - 30 * MINUTE_MS)
            .await?;

        let spec = if now > before * dec!(1.002) {
            Some(SignalSpec {
                side: TradeSide::Long,
                price_open: None,
                price_take_profit: now * dec!(1.02),
                price_stop_loss: now * dec!(0.99),
                minute_estimated_time: 240,
                note: Some("vwap drift up".to_string()),
            })
        } else if now < before * dec!(0.998) {
            Some(SignalSpec {
                side: TradeSide::Short,
                price_open: None,
                price_take_profit: now * dec!(0.98),
                price_stop_loss: now * dec!(1.01),
                minute_estimated_time: 240,
                note: Some("vwap drift down".to_string()),
            })
        } else {
            None
        };
        Ok(spec)
    }
}

/// Deterministic synthetic market: a slow sine swing around 50k with a
/// four-hour period, so the demo produces both long and short closures.
fn synthetic_candles(start_ms: i64, minutes: usize) -> Vec<Candle> {
    (0..minutes)
        .map(|i| {
            let phase = i as f64 * std::f64::consts::TAU / 240.0;
            let level = 50_000.0 * (1.0 + 0.03 * phase.sin());
            let price = Decimal::from_f64_retain(level)
                .unwrap_or(dec!(50000))
                .round_dp(2);
            let wick = price * dec!(0.0005);
            Candle {
                timestamp: start_ms + i as i64 * MINUTE_MS,
                open: price,
                high: price + wick,
                low: price - wick,
                close: price,
                volume: dec!(10),
            }
        })
        .collect()
}

fn parse_date(s: &str) -> Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid date '{s}': {e}"))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap()))
}

async fn run_demo_backtest(
    start: &str,
    end: &str,
    symbol: &str,
    max_positions: usize,
) -> Result<()> {
    let start_date = parse_date(start)?;
    let end_date = parse_date(end)?;
    if start_date >= end_date {
        return Err(anyhow!("start date must precede end date"));
    }

    let start_ms = start_date.timestamp_millis();
    let total_minutes = ((end_date.timestamp_millis() - start_ms) / MINUTE_MS) as usize;

    // Cover the VWAP look-back before the frame and the last signal's
    // estimated window after it.
    let lookback_minutes = 40;
    let mut adapter = ReplayAdapter::new();
    adapter.add_candles(
        symbol,
        Interval::M1,
        synthetic_candles(
            start_ms - lookback_minutes as i64 * MINUTE_MS,
            total_minutes + lookback_minutes + 300,
        ),
    );

    let registry = Registry::new();
    registry.register_exchange("replay", Arc::new(adapter))?;
    registry.register_strategy(Arc::new(VwapMomentum))?;
    registry.register_risk(RiskSchema::new("default").max_concurrent_positions(max_positions))?;
    registry.register_frame(Frame::new("demo", Interval::M5, start_date, end_date))?;

    let engine = Engine::new(Arc::new(registry), EngineConfig::load()?)?;
    info!(symbol, start, end, "running demo backtest");

    let report = engine.backtest(symbol, "vwap-momentum", "replay", "demo").await?;
    report.print_summary();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(level.to_string())),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Backtest {
            start,
            end,
            symbol,
            max_positions,
        } => run_demo_backtest(&start, &end, &symbol, max_positions).await?,
        Commands::CheckConfig => {
            let config = EngineConfig::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
