//! Risk admission control.
//!
//! Pure, non-blocking rule evaluation. Rules run in a fixed order and the
//! first failing rule wins; every denial is terminal for its signal and
//! still consumes the dedup slot.

use rust_decimal::Decimal;

use alert_trade_core::{DenyReason, RiskConfig, Signal};
use alert_trade_store::RiskCounters;

/// Outcome of evaluating a signal against the risk gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit { size: Decimal },
    Deny { reason: DenyReason },
}

/// Evaluates a signal. `symbol_is_live` must reflect whether a
/// non-terminal trade record already exists for the signal's symbol.
#[must_use]
pub fn evaluate(
    signal: &Signal,
    counters: &RiskCounters,
    symbol_is_live: bool,
    account_equity: Decimal,
    risk: &RiskConfig,
) -> Admission {
    if counters.open_position_count >= risk.max_concurrent_positions {
        return Admission::Deny {
            reason: DenyReason::ConcurrencyLimit,
        };
    }

    if counters.trades_today >= risk.max_daily_trades {
        return Admission::Deny {
            reason: DenyReason::DailyLimit,
        };
    }

    if symbol_is_live {
        return Admission::Deny {
            reason: DenyReason::DuplicateSymbol,
        };
    }

    let size = position_size(account_equity, risk.position_size_pct, signal.price, risk.min_lot);
    if size.is_zero() {
        return Admission::Deny {
            reason: DenyReason::ZeroSize,
        };
    }

    Admission::Admit { size }
}

/// `position_size_pct` percent of equity at `price`, floored to a multiple
/// of the instrument's minimum tradable unit.
#[must_use]
pub fn position_size(equity: Decimal, pct: Decimal, price: Decimal, min_lot: Decimal) -> Decimal {
    if price <= Decimal::ZERO || min_lot <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let notional = equity * pct / Decimal::ONE_HUNDRED;
    let lots = (notional / price / min_lot).floor();
    lots * min_lot
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn signal(price: Decimal) -> Signal {
        Signal {
            timestamp: Utc::now(),
            symbol: "ACME".to_string(),
            kind: "New High".to_string(),
            description: "New High".to_string(),
            price,
            relative_volume: 5.0,
        }
    }

    fn counters(open: u32, today: u32) -> RiskCounters {
        RiskCounters {
            open_position_count: open,
            trades_today: today,
            trading_day: Utc::now().date_naive(),
        }
    }

    #[test]
    fn acme_scenario_sizes_300_shares() {
        // 3% of 100k at $10.00 = $3000 -> 300 shares.
        let result = evaluate(
            &signal(dec!(10.00)),
            &counters(0, 0),
            false,
            dec!(100000),
            &RiskConfig::default(),
        );
        assert_eq!(result, Admission::Admit { size: dec!(300) });
    }

    #[test]
    fn concurrency_limit_wins_first() {
        // Both the concurrency and daily limits are breached; rule order
        // decides the reason code.
        let result = evaluate(
            &signal(dec!(10.00)),
            &counters(3, 30),
            true,
            dec!(100000),
            &RiskConfig::default(),
        );
        assert_eq!(
            result,
            Admission::Deny {
                reason: DenyReason::ConcurrencyLimit
            }
        );
    }

    #[test]
    fn daily_limit_denies_31st_trade_regardless_of_open_count() {
        let result = evaluate(
            &signal(dec!(10.00)),
            &counters(0, 30),
            false,
            dec!(100000),
            &RiskConfig::default(),
        );
        assert_eq!(
            result,
            Admission::Deny {
                reason: DenyReason::DailyLimit
            }
        );
    }

    #[test]
    fn live_symbol_is_denied_duplicate() {
        let result = evaluate(
            &signal(dec!(10.00)),
            &counters(1, 1),
            true,
            dec!(100000),
            &RiskConfig::default(),
        );
        assert_eq!(
            result,
            Admission::Deny {
                reason: DenyReason::DuplicateSymbol
            }
        );
    }

    #[test]
    fn unaffordable_price_is_zero_size() {
        let result = evaluate(
            &signal(dec!(5000.00)),
            &counters(0, 0),
            false,
            dec!(100000),
            &RiskConfig::default(),
        );
        assert_eq!(
            result,
            Admission::Deny {
                reason: DenyReason::ZeroSize
            }
        );
    }

    #[test]
    fn size_floors_to_whole_lots() {
        // $3000 / $7 = 428.57… -> 428 shares.
        assert_eq!(
            position_size(dec!(100000), dec!(3), dec!(7.00), dec!(1)),
            dec!(428)
        );
        // Lot size 100: 428 -> 400.
        assert_eq!(
            position_size(dec!(100000), dec!(3), dec!(7.00), dec!(100)),
            dec!(400)
        );
    }

    #[test]
    fn degenerate_inputs_size_zero() {
        assert_eq!(position_size(dec!(100000), dec!(3), dec!(0), dec!(1)), dec!(0));
        assert_eq!(position_size(dec!(100000), dec!(3), dec!(-1), dec!(1)), dec!(0));
    }
}
