//! Broker-state reconciliation planning.
//!
//! Pure diff of local belief against broker truth. The plan only ever
//! downgrades existing records (to `Orphaned`, or stale submissions to
//! `Rejected`); it never creates trades, never adopts unmanaged broker
//! positions, and never corrects quantities with new orders.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use alert_trade_core::{BrokerPosition, OrphanReason, TradeStatus};
use alert_trade_store::StateSnapshot;

/// Planned resolution for one local record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Downgrade to `Orphaned` with the given reason.
    Orphan(OrphanReason),
    /// A stale submission that provably never took effect; resolve to
    /// `Rejected`, freeing its slot.
    RejectStale,
}

/// Outcome of diffing local state against the broker's position list.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    /// Symbol -> planned resolution.
    pub resolutions: Vec<(String, Resolution)>,
    /// Broker positions with no local record: surfaced, never adopted.
    pub unmanaged: Vec<BrokerPosition>,
}

impl ReconcilePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolutions.is_empty() && self.unmanaged.is_empty()
    }
}

/// Builds the reconciliation plan.
///
/// `submit_grace` shields records in `PendingSubmit`/`Submitted` younger
/// than the grace window: a submission may legitimately still be in flight.
/// Past the window, broker truth decides: position present means an entry
/// happened that the engine never confirmed (orphan; never adopt an
/// unconfirmed fill); position absent means the submission never took
/// effect (reject, the slot frees).
#[must_use]
pub fn plan(
    snapshot: &StateSnapshot,
    broker_positions: &[BrokerPosition],
    now: DateTime<Utc>,
    submit_grace: Duration,
) -> ReconcilePlan {
    let broker: HashMap<&str, &BrokerPosition> = broker_positions
        .iter()
        .map(|p| (p.symbol.as_str(), p))
        .collect();

    let mut plan = ReconcilePlan::default();

    for record in snapshot.trades.values() {
        match record.status {
            TradeStatus::Open | TradeStatus::ExitScheduled | TradeStatus::Exiting => {
                match broker.get(record.symbol.as_str()) {
                    None => {
                        // Closed or rejected outside the engine's knowledge.
                        plan.resolutions.push((
                            record.symbol.clone(),
                            Resolution::Orphan(OrphanReason::VanishedAtBroker),
                        ));
                    }
                    Some(position) if position.quantity != record.filled_quantity => {
                        plan.resolutions.push((
                            record.symbol.clone(),
                            Resolution::Orphan(OrphanReason::QuantityMismatch),
                        ));
                    }
                    Some(_) => {}
                }
            }
            TradeStatus::PendingSubmit | TradeStatus::Submitted => {
                if now - record.created_at >= submit_grace {
                    if broker.contains_key(record.symbol.as_str()) {
                        plan.resolutions.push((
                            record.symbol.clone(),
                            Resolution::Orphan(OrphanReason::UnconfirmedSubmit),
                        ));
                    } else {
                        plan.resolutions
                            .push((record.symbol.clone(), Resolution::RejectStale));
                    }
                }
            }
            TradeStatus::Rejected | TradeStatus::Closed | TradeStatus::Orphaned => {}
        }
    }

    for position in broker_positions {
        // Positions already orphaned locally are known to the operator;
        // re-surfacing them every pass would only drown the alert.
        if !snapshot.trades.contains_key(&position.symbol) && !snapshot.has_orphan(&position.symbol)
        {
            plan.unmanaged.push(position.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_trade_core::{TradeRecord, TradeSide};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot_with(records: Vec<(&str, TradeStatus, Decimal, DateTime<Utc>)>) -> StateSnapshot {
        let now = Utc::now();
        let mut snapshot = StateSnapshot::new(dec!(100000), now.date_naive());
        for (symbol, status, qty, created_at) in records {
            let mut trade = TradeRecord::new(symbol.to_string(), TradeSide::Buy, qty, created_at);
            trade.status = status;
            trade.filled_quantity = qty;
            snapshot.trades.insert(symbol.to_string(), trade);
        }
        snapshot
    }

    fn broker(positions: Vec<(&str, Decimal)>) -> Vec<BrokerPosition> {
        positions
            .into_iter()
            .map(|(symbol, quantity)| BrokerPosition {
                symbol: symbol.to_string(),
                quantity,
                side: TradeSide::Buy,
            })
            .collect()
    }

    fn grace() -> Duration {
        Duration::minutes(2)
    }

    #[test]
    fn matching_positions_produce_empty_plan() {
        let now = Utc::now();
        let snapshot = snapshot_with(vec![("ACME", TradeStatus::Open, dec!(300), now)]);
        let plan = plan(&snapshot, &broker(vec![("ACME", dec!(300))]), now, grace());
        assert!(plan.is_empty());
    }

    #[test]
    fn vanished_position_is_orphaned_never_resubmitted() {
        let now = Utc::now();
        let snapshot = snapshot_with(vec![("ACME", TradeStatus::Open, dec!(300), now)]);
        let plan = plan(&snapshot, &broker(vec![]), now, grace());

        assert_eq!(
            plan.resolutions,
            vec![(
                "ACME".to_string(),
                Resolution::Orphan(OrphanReason::VanishedAtBroker)
            )]
        );
    }

    #[test]
    fn quantity_mismatch_is_orphaned_not_corrected() {
        let now = Utc::now();
        let snapshot = snapshot_with(vec![("ACME", TradeStatus::Exiting, dec!(300), now)]);
        let plan = plan(&snapshot, &broker(vec![("ACME", dec!(120))]), now, grace());

        assert_eq!(
            plan.resolutions,
            vec![(
                "ACME".to_string(),
                Resolution::Orphan(OrphanReason::QuantityMismatch)
            )]
        );
    }

    #[test]
    fn unmanaged_broker_position_is_surfaced_not_adopted() {
        let now = Utc::now();
        let snapshot = snapshot_with(vec![]);
        let plan = plan(&snapshot, &broker(vec![("MYST", dec!(50))]), now, grace());

        assert!(plan.resolutions.is_empty());
        assert_eq!(plan.unmanaged.len(), 1);
        assert_eq!(plan.unmanaged[0].symbol, "MYST");
    }

    #[test]
    fn fresh_submission_is_left_alone() {
        let now = Utc::now();
        let snapshot = snapshot_with(vec![("ACME", TradeStatus::Submitted, dec!(300), now)]);
        let plan = plan(&snapshot, &broker(vec![]), now, grace());
        assert!(plan.is_empty());
    }

    #[test]
    fn stale_submission_without_position_resolves_rejected() {
        let now = Utc::now();
        let snapshot = snapshot_with(vec![(
            "ACME",
            TradeStatus::PendingSubmit,
            dec!(300),
            now - Duration::minutes(5),
        )]);
        let plan = plan(&snapshot, &broker(vec![]), now, grace());

        assert_eq!(
            plan.resolutions,
            vec![("ACME".to_string(), Resolution::RejectStale)]
        );
    }

    #[test]
    fn stale_submission_with_position_is_orphaned() {
        let now = Utc::now();
        let snapshot = snapshot_with(vec![(
            "ACME",
            TradeStatus::Submitted,
            dec!(300),
            now - Duration::minutes(5),
        )]);
        let plan = plan(&snapshot, &broker(vec![("ACME", dec!(300))]), now, grace());

        assert_eq!(
            plan.resolutions,
            vec![(
                "ACME".to_string(),
                Resolution::Orphan(OrphanReason::UnconfirmedSubmit)
            )]
        );
    }

    #[test]
    fn orphaned_symbols_are_not_resurfaced_as_unmanaged() {
        let now = Utc::now();
        let mut snapshot = snapshot_with(vec![]);
        let mut orphan =
            TradeRecord::new("ACME".to_string(), TradeSide::Buy, dec!(300), now);
        orphan.status = TradeStatus::Orphaned;
        snapshot.orphans.push(orphan);

        let plan = plan(&snapshot, &broker(vec![("ACME", dec!(300))]), now, grace());
        assert!(plan.is_empty());
    }
}
