use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::types::{CloseReason, Frame, Interval, PnlRecord, SignalRow, TickResult};

use super::events::{DoneEvent, ErrorEvent, EventBus, ProgressEvent};
use super::lifecycle::SignalLifecycle;
use super::ExecutionMode;

const PROGRESS_EVERY: usize = 1000;

/// One closed position from a backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedPosition {
    pub signal: SignalRow,
    pub close_timestamp: i64,
    pub close_reason: CloseReason,
    pub pnl: PnlRecord,
}

/// Accumulated output of one backtest: every closed position, in close
/// order, plus the run identity.
#[derive(Debug, Serialize)]
pub struct BacktestReport {
    pub symbol: String,
    pub strategy_name: String,
    pub exchange_name: String,
    pub frame_name: String,
    pub ticks_processed: usize,
    pub closed: Vec<ClosedPosition>,
}

/// Aggregate statistics over a report's closures.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestSummary {
    pub total_closed: usize,
    pub winning: usize,
    pub losing: usize,
    pub win_rate_pct: Decimal,
    pub cumulative_pnl_pct: Decimal,
    pub average_pnl_pct: Decimal,
    pub take_profits: usize,
    pub stop_losses: usize,
    pub time_expired: usize,
}

impl BacktestReport {
    pub fn summary(&self) -> BacktestSummary {
        let total = self.closed.len();
        let winning = self
            .closed
            .iter()
            .filter(|c| c.pnl.pnl_percentage > Decimal::ZERO)
            .count();
        let cumulative: Decimal = self.closed.iter().map(|c| c.pnl.pnl_percentage).sum();

        let count_reason = |reason: CloseReason| {
            self.closed
                .iter()
                .filter(|c| c.close_reason == reason)
                .count()
        };

        BacktestSummary {
            total_closed: total,
            winning,
            losing: total - winning,
            win_rate_pct: if total > 0 {
                Decimal::from(winning as u64) / Decimal::from(total as u64) * dec!(100)
            } else {
                Decimal::ZERO
            },
            cumulative_pnl_pct: cumulative,
            average_pnl_pct: if total > 0 {
                cumulative / Decimal::from(total as u64)
            } else {
                Decimal::ZERO
            },
            take_profits: count_reason(CloseReason::TakeProfit),
            stop_losses: count_reason(CloseReason::StopLoss),
            time_expired: count_reason(CloseReason::TimeExpired),
        }
    }

    /// Pretty print the run to the console.
    pub fn print_summary(&self) {
        let summary = self.summary();
        println!("\n{}", "=".repeat(60));
        println!("                 BACKTEST RESULTS");
        println!("{}", "=".repeat(60));
        println!("Symbol:           {}", self.symbol);
        println!("Strategy:         {}", self.strategy_name);
        println!("Exchange:         {}", self.exchange_name);
        println!("Frame:            {}", self.frame_name);
        println!("Ticks processed:  {}", self.ticks_processed);
        println!("{}", "-".repeat(60));
        println!("Closed positions: {}", summary.total_closed);
        println!(
            "  Winning:        {} ({:.1}%)",
            summary.winning, summary.win_rate_pct
        );
        println!("  Losing:         {}", summary.losing);
        println!("  Take-profit:    {}", summary.take_profits);
        println!("  Stop-loss:      {}", summary.stop_losses);
        println!("  Time-expired:   {}", summary.time_expired);
        println!("  Cumulative PnL: {:.4}%", summary.cumulative_pnl_pct);
        println!("  Average PnL:    {:.4}%", summary.average_pnl_pct);
        println!("{}", "=".repeat(60));
    }
}

/// Replay the frame through the state machine.
///
/// Each tick drives the machine once; an `Opened` result switches to the
/// batch path over the signal's estimated window of one-minute candles and
/// then skips the cursor past the reported close. The emitted sequence is a
/// pure function of (frame, adapter data, strategy), so identical runs
/// produce identical reports.
pub(crate) async fn run_backtest(
    lifecycle: &mut SignalLifecycle,
    frame: &Frame,
    bus: &EventBus,
) -> Result<BacktestReport, EngineError> {
    let timestamps = frame.timestamps();
    let total = timestamps.len();
    info!(
        symbol = lifecycle.symbol(),
        strategy = lifecycle.strategy_name(),
        frame = %frame.frame_name,
        ticks = total,
        "backtest started"
    );

    let mut closed: Vec<ClosedPosition> = Vec::new();
    let mut ticks_processed = 0usize;
    let mut i = 0usize;

    while i < timestamps.len() {
        let when = timestamps[i];
        let result = lifecycle.tick(when, ExecutionMode::Backtest).await;
        ticks_processed += 1;

        if ticks_processed % PROGRESS_EVERY == 0 {
            bus.progress.emit(ProgressEvent {
                symbol: lifecycle.symbol().to_string(),
                strategy_name: lifecycle.strategy_name().to_string(),
                frame_name: frame.frame_name.clone(),
                processed: i + 1,
                total,
            });
        }

        match result {
            TickResult::Opened { signal, .. } => {
                let limit = signal.minute_estimated_time as usize;
                match lifecycle
                    .source()
                    .get_next_candles(lifecycle.symbol(), Interval::M1, limit, when)
                    .await
                {
                    Ok(candles) => {
                        let terminal = lifecycle.batch(&candles).await?;
                        let close_timestamp = match &terminal {
                            TickResult::Closed {
                                signal,
                                close_timestamp,
                                close_reason,
                                pnl,
                                ..
                            } => {
                                closed.push(ClosedPosition {
                                    signal: signal.clone(),
                                    close_timestamp: *close_timestamp,
                                    close_reason: *close_reason,
                                    pnl: pnl.clone(),
                                });
                                *close_timestamp
                            }
                            TickResult::Cancelled {
                                close_timestamp, ..
                            } => *close_timestamp,
                            other => {
                                warn!(status = other.status(), "batch returned a non-terminal result");
                                when
                            }
                        };
                        // Skip ahead to the first tick strictly past the close.
                        while i + 1 < timestamps.len() && timestamps[i + 1] <= close_timestamp {
                            i += 1;
                        }
                    }
                    Err(err) => {
                        // The signal stays pending; per-tick monitoring
                        // picks it up on the next iteration.
                        bus.error.emit(ErrorEvent {
                            symbol: lifecycle.symbol().to_string(),
                            strategy_name: lifecycle.strategy_name().to_string(),
                            exchange_name: lifecycle.source().exchange_name().to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
            TickResult::Closed {
                signal,
                close_timestamp,
                close_reason,
                pnl,
                ..
            } => {
                // Per-tick closure, reached when a batch could not run.
                closed.push(ClosedPosition {
                    signal,
                    close_timestamp,
                    close_reason,
                    pnl,
                });
            }
            _ => {}
        }

        i += 1;
    }

    bus.done.emit(DoneEvent {
        symbol: lifecycle.symbol().to_string(),
        strategy_name: lifecycle.strategy_name().to_string(),
        frame_name: frame.frame_name.clone(),
        closed_count: closed.len(),
    });
    info!(
        symbol = lifecycle.symbol(),
        strategy = lifecycle.strategy_name(),
        closed = closed.len(),
        "backtest finished"
    );

    Ok(BacktestReport {
        symbol: lifecycle.symbol().to_string(),
        strategy_name: lifecycle.strategy_name().to_string(),
        exchange_name: lifecycle.source().exchange_name().to_string(),
        frame_name: frame.frame_name.clone(),
        ticks_processed,
        closed,
    })
}
