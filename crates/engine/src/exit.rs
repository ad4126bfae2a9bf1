//! Fixed-horizon exit scanning.
//!
//! Deadlines are persisted at fill time and never recomputed from process
//! uptime, so a restart mid-hold resumes counting down to the original
//! deadline, and a deadline missed while the process was down fires on the
//! first tick after load.

use chrono::{DateTime, Utc};

use alert_trade_core::TradeStatus;
use alert_trade_store::StateSnapshot;

/// `Open` records whose exit deadline has been reached.
///
/// Records already in `ExitScheduled`/`Exiting` are excluded: the exit for
/// them has been triggered, so repeated ticks (even ticks much shorter than
/// the horizon) issue at most one exit per position.
#[must_use]
pub fn due_for_exit(snapshot: &StateSnapshot, now: DateTime<Utc>) -> Vec<String> {
    snapshot
        .trades
        .values()
        .filter(|t| t.status == TradeStatus::Open)
        .filter(|t| t.exit_deadline.is_some_and(|deadline| now >= deadline))
        .map(|t| t.symbol.clone())
        .collect()
}

/// `ExitScheduled` records whose closing order still needs to be issued
/// (includes records recovered in that state after a crash).
#[must_use]
pub fn pending_issue(snapshot: &StateSnapshot) -> Vec<String> {
    snapshot
        .trades
        .values()
        .filter(|t| t.status == TradeStatus::ExitScheduled)
        .map(|t| t.symbol.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_trade_core::{TradeRecord, TradeSide};
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn snapshot_with(status: TradeStatus, deadline: Option<DateTime<Utc>>) -> StateSnapshot {
        let now = Utc::now();
        let mut snapshot = StateSnapshot::new(dec!(100000), now.date_naive());
        let mut trade = TradeRecord::new("ACME".to_string(), TradeSide::Buy, dec!(300), now);
        trade.status = status;
        trade.exit_deadline = deadline;
        snapshot.trades.insert("ACME".to_string(), trade);
        snapshot
    }

    #[test]
    fn open_past_deadline_is_due() {
        let now = Utc::now();
        let snapshot = snapshot_with(TradeStatus::Open, Some(now - Duration::seconds(1)));
        assert_eq!(due_for_exit(&snapshot, now), vec!["ACME".to_string()]);
    }

    #[test]
    fn open_before_deadline_is_not_due() {
        let now = Utc::now();
        let snapshot = snapshot_with(TradeStatus::Open, Some(now + Duration::minutes(9)));
        assert!(due_for_exit(&snapshot, now).is_empty());
    }

    #[test]
    fn exit_triggering_is_idempotent() {
        let now = Utc::now();
        // Already scheduled: repeated ticks must not trigger again.
        let snapshot = snapshot_with(TradeStatus::ExitScheduled, Some(now - Duration::minutes(5)));
        assert!(due_for_exit(&snapshot, now).is_empty());
        assert_eq!(pending_issue(&snapshot), vec!["ACME".to_string()]);

        let snapshot = snapshot_with(TradeStatus::Exiting, Some(now - Duration::minutes(5)));
        assert!(due_for_exit(&snapshot, now).is_empty());
        assert!(pending_issue(&snapshot).is_empty());
    }

    #[test]
    fn deadline_missed_while_down_is_due_at_load() {
        let now = Utc::now();
        // Restart scenario: the persisted deadline passed an hour ago.
        let snapshot = snapshot_with(TradeStatus::Open, Some(now - Duration::hours(1)));
        assert_eq!(due_for_exit(&snapshot, now).len(), 1);
    }
}
