use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{PnlRecord, TradeSide};

/// Apply per-side slippage and fee to both legs of a trade and derive the
/// signed percentage return. Rates are fractions (`0.001` for 0.1%).
///
/// Both sides pay costs in the adverse direction on each leg, so a flat
/// round trip loses `2 * (slippage + fee)` percent up to the denominator
/// adjustment.
pub fn compute_pnl(
    side: TradeSide,
    price_open: Decimal,
    price_close: Decimal,
    slippage_rate: Decimal,
    fee_rate: Decimal,
) -> PnlRecord {
    let costs = slippage_rate + fee_rate;
    let (open_adj, close_adj, signed_diff) = match side {
        TradeSide::Long => {
            let open_adj = price_open * (Decimal::ONE + costs);
            let close_adj = price_close * (Decimal::ONE - costs);
            (open_adj, close_adj, close_adj - open_adj)
        }
        TradeSide::Short => {
            let open_adj = price_open * (Decimal::ONE - costs);
            let close_adj = price_close * (Decimal::ONE + costs);
            (open_adj, close_adj, open_adj - close_adj)
        }
    };

    let pnl_percentage = if open_adj.is_zero() {
        Decimal::ZERO
    } else {
        signed_diff / open_adj * dec!(100)
    };

    PnlRecord {
        price_open,
        price_close,
        price_open_with_costs: open_adj,
        price_close_with_costs: close_adj,
        pnl_percentage,
    }
}
