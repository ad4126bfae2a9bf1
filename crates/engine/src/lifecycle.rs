//! Lifecycle transitions over the durable state.
//!
//! `EngineState` is the only mutator of the snapshot. Every public
//! transition method follows the same contract: validate that the current
//! status is a legal predecessor, apply the mutation, update the risk
//! counters where affected, persist the full snapshot, and only then
//! return. The in-memory view and the durable view never diverge by more
//! than one in-flight transition.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use alert_trade_core::{
    DenyReason, EngineError, ExitReason, OrphanReason, Signal, TradeRecord, TradeSide, TradeStatus,
};
use alert_trade_store::{
    Disposition, RiskCounters, SnapshotStore, StateSnapshot, TradeClosedEvent, TradeLog,
};

pub struct EngineState {
    snapshot: StateSnapshot,
    store: SnapshotStore,
    trade_log: TradeLog,
}

impl EngineState {
    /// Loads the persisted snapshot, or initializes a fresh one.
    ///
    /// On load, derived state is restored: risk counters are recomputed
    /// from the trade map and expired fingerprints trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::StateCorruption`] if a snapshot exists but
    /// fails its integrity check; the process must refuse to trade.
    pub fn load_or_init(
        store: SnapshotStore,
        trade_log: TradeLog,
        initial_equity: Decimal,
        dedup_retention_days: i64,
    ) -> Result<Self, EngineError> {
        let now = Utc::now();
        let snapshot = match store.load()? {
            Some(mut loaded) => {
                loaded.restore(now.date_naive(), now - Duration::days(dedup_retention_days));
                loaded
            }
            None => StateSnapshot::new(initial_equity, now.date_naive()),
        };

        Ok(Self {
            snapshot,
            store,
            trade_log,
        })
    }

    #[must_use]
    pub fn snapshot(&self) -> &StateSnapshot {
        &self.snapshot
    }

    /// Resets the daily quota when the trading day rolls over, and applies
    /// the dedup retention trim for the new day.
    pub fn roll_day(&mut self, now: DateTime<Utc>, dedup_retention_days: i64) {
        let today = now.date_naive();
        if self.snapshot.risk.trading_day != today {
            info!(day = %today, "New trading day, daily counters reset");
            self.snapshot.risk.roll_day(today);
            self.snapshot
                .processed_alerts
                .trim_older_than(now - Duration::days(dedup_retention_days));
        }
    }

    fn persist(&self) -> Result<()> {
        self.store.save(&self.snapshot).context("persisting snapshot")
    }

    fn recount_open(&mut self) {
        self.snapshot.risk.open_position_count = self
            .snapshot
            .trades
            .values()
            .filter(|t| t.status.counts_as_open())
            .count() as u32;
    }

    fn record_mut(&mut self, symbol: &str) -> Result<&mut TradeRecord> {
        self.snapshot
            .trades
            .get_mut(symbol)
            .with_context(|| format!("no trade record for {symbol}"))
    }

    fn check_transition(record: &TradeRecord, to: TradeStatus) -> Result<(), EngineError> {
        if record.status.can_transition_to(to) {
            Ok(())
        } else {
            Err(EngineError::IllegalTransition {
                symbol: record.symbol.clone(),
                from: record.status,
                to,
            })
        }
    }

    /// Records a risk denial as the signal's final disposition.
    pub fn record_denial(
        &mut self,
        signal: &Signal,
        reason: DenyReason,
        at: DateTime<Utc>,
    ) -> Result<()> {
        warn!(
            symbol = %signal.symbol,
            price = %signal.price,
            reason = %reason,
            "Signal denied by risk admission"
        );
        self.snapshot.processed_alerts.record(
            signal.fingerprint(),
            Disposition::RiskDenied(reason),
            at,
        );
        self.persist()
    }

    /// Admits a signal: creates the `PendingSubmit` record and commits the
    /// fingerprint in the same snapshot write, before any order leaves the
    /// process. A crash after this point leaves a resolvable record, never
    /// a silently dropped or double-traded signal.
    pub fn admit_trade(
        &mut self,
        signal: &Signal,
        size: Decimal,
        at: DateTime<Utc>,
    ) -> Result<TradeRecord> {
        anyhow::ensure!(
            self.snapshot.live_trade(&signal.symbol).is_none(),
            "live record already exists for {}",
            signal.symbol
        );

        let mut record = TradeRecord::new(signal.symbol.clone(), TradeSide::Buy, size, at);
        record.signal_fingerprint = Some(signal.fingerprint());
        self.snapshot
            .trades
            .insert(signal.symbol.clone(), record.clone());
        self.snapshot
            .processed_alerts
            .record(signal.fingerprint(), Disposition::Submitted, at);
        self.snapshot.risk.trades_today += 1;
        self.recount_open();
        self.persist()?;

        info!(
            symbol = %record.symbol,
            trade_id = %record.id,
            size = %size,
            trades_today = self.snapshot.risk.trades_today,
            "Trade admitted, pending submission"
        );
        Ok(record)
    }

    /// `PendingSubmit -> Submitted` once the broker acknowledged the order.
    pub fn mark_submitted(&mut self, symbol: &str, order_id: &str) -> Result<()> {
        let record = self.record_mut(symbol)?;
        Self::check_transition(record, TradeStatus::Submitted)?;
        record.status = TradeStatus::Submitted;
        record.entry_order_id = Some(order_id.to_string());
        self.persist()?;

        info!(symbol, order_id, "Entry order submitted");
        Ok(())
    }

    /// `PendingSubmit/Submitted -> Rejected`; terminal, the record leaves
    /// the live map and its risk slot frees immediately. The fingerprint's
    /// disposition is refined to the rejection; the dedup slot stays
    /// consumed.
    pub fn mark_rejected(&mut self, symbol: &str, reason: &str, at: DateTime<Utc>) -> Result<()> {
        {
            let record = self.record_mut(symbol)?;
            Self::check_transition(record, TradeStatus::Rejected)?;
            record.status = TradeStatus::Rejected;
            record.closed_at = Some(at);
        }
        if let Some(record) = self.snapshot.trades.remove(symbol) {
            if let Some(fingerprint) = &record.signal_fingerprint {
                self.snapshot
                    .processed_alerts
                    .reclassify(fingerprint, Disposition::BrokerRejected);
            }
        }
        self.recount_open();
        self.persist()?;

        warn!(symbol, reason, "Entry rejected");
        Ok(())
    }

    /// `Submitted -> Open` on the entry fill. The exit deadline is derived
    /// here, once, and persisted atomically with the transition.
    pub fn apply_entry_fill(
        &mut self,
        symbol: &str,
        filled_qty: Decimal,
        avg_price: Decimal,
        at: DateTime<Utc>,
        horizon: Duration,
    ) -> Result<()> {
        let deadline = at + horizon;
        {
            let record = self.record_mut(symbol)?;
            Self::check_transition(record, TradeStatus::Open)?;
            record.status = TradeStatus::Open;
            record.filled_quantity = filled_qty;
            record.entry_price = Some(avg_price);
            record.entry_time = Some(at);
            record.exit_deadline = Some(deadline);
        }
        self.persist()?;

        info!(
            symbol,
            filled_qty = %filled_qty,
            avg_price = %avg_price,
            exit_deadline = %deadline,
            "Position open"
        );
        Ok(())
    }

    /// `Open -> ExitScheduled` when the deadline is reached.
    pub fn schedule_exit(&mut self, symbol: &str) -> Result<()> {
        {
            let record = self.record_mut(symbol)?;
            Self::check_transition(record, TradeStatus::ExitScheduled)?;
            record.status = TradeStatus::ExitScheduled;
        }
        self.persist()?;

        info!(symbol, "Exit deadline reached, exit scheduled");
        Ok(())
    }

    /// `ExitScheduled -> Exiting` once the closing order has been issued.
    /// `exit_order_id` is `None` when the submission timed out: the
    /// attempt was made but its outcome is unknown, so no retry follows;
    /// reconciliation resolves it.
    pub fn mark_exiting(
        &mut self,
        symbol: &str,
        exit_order_id: Option<String>,
        reason: ExitReason,
    ) -> Result<()> {
        {
            let record = self.record_mut(symbol)?;
            Self::check_transition(record, TradeStatus::Exiting)?;
            record.status = TradeStatus::Exiting;
            record.exit_order_id = exit_order_id.clone();
            record.exit_reason = Some(reason);
        }
        self.persist()?;

        info!(symbol, exit_order_id = ?exit_order_id, reason = reason.as_str(), "Exit order issued");
        Ok(())
    }

    /// `Exiting -> Closed` on the exit fill; terminal. Appends to the
    /// closed-trade log (best-effort) and frees the risk slot. Returns the
    /// realized PnL.
    pub fn apply_exit_fill(
        &mut self,
        symbol: &str,
        avg_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Decimal> {
        let closed = {
            let record = self.record_mut(symbol)?;
            Self::check_transition(record, TradeStatus::Closed)?;
            record.status = TradeStatus::Closed;
            record.exit_price = Some(avg_price);
            record.closed_at = Some(at);
            record.clone()
        };
        self.snapshot.trades.remove(symbol);
        self.recount_open();
        self.persist()?;

        let pnl = closed.realized_pnl().unwrap_or(Decimal::ZERO);
        if let Some(event) = TradeClosedEvent::from_record(&closed) {
            if let Err(e) = self.trade_log.append(&event) {
                // The transition is already durable; the log is advisory.
                error!(symbol, error = %e, "Failed to append closed-trade event");
            }
        }

        info!(
            symbol,
            exit_price = %avg_price,
            pnl = %pnl,
            reason = closed.exit_reason.map_or("UNKNOWN", ExitReason::as_str),
            "Position closed"
        );
        Ok(pnl)
    }

    /// Downgrades a record to `Orphaned`: it leaves the live map (the
    /// symbol becomes admissible again and the risk slot frees) but stays
    /// in the store for audit until explicitly archived.
    pub fn mark_orphaned(
        &mut self,
        symbol: &str,
        reason: OrphanReason,
        at: DateTime<Utc>,
    ) -> Result<()> {
        {
            let record = self.record_mut(symbol)?;
            Self::check_transition(record, TradeStatus::Orphaned)?;
            record.status = TradeStatus::Orphaned;
            record.orphan_reason = Some(reason);
            record.closed_at = Some(at);
        }
        if let Some(record) = self.snapshot.trades.remove(symbol) {
            self.snapshot.orphans.push(record);
        }
        self.recount_open();
        self.persist()?;

        error!(
            symbol,
            reason = %reason,
            "Trade orphaned - operator attention required"
        );
        Ok(())
    }

    /// Drops orphaned records for a symbol after operator review.
    pub fn archive_orphan(&mut self, symbol: &str) -> Result<bool> {
        let before = self.snapshot.orphans.len();
        self.snapshot.orphans.retain(|t| t.symbol != symbol);
        let removed = self.snapshot.orphans.len() < before;
        if removed {
            self.persist()?;
            info!(symbol, "Orphaned record archived");
        }
        Ok(removed)
    }

    /// Updates the reconciliation watermark and cached equity in one write.
    pub fn record_reconcile_pass(
        &mut self,
        at: DateTime<Utc>,
        equity: Option<Decimal>,
    ) -> Result<()> {
        self.snapshot.last_reconciled_at = Some(at);
        if let Some(equity) = equity {
            self.snapshot.account_equity = equity;
        }
        // Orphans created during the pass already freed their slots; a
        // recount here is a cheap invariant guard.
        let recomputed = RiskCounters::recompute(
            &self.snapshot.trades,
            &self.snapshot.risk,
            self.snapshot.risk.trading_day,
        );
        self.snapshot.risk = recomputed;
        self.persist()
    }

    /// Symbol owning the given entry order id, if any.
    #[must_use]
    pub fn symbol_for_entry_order(&self, order_id: &str) -> Option<String> {
        self.snapshot
            .trades
            .values()
            .find(|t| t.entry_order_id.as_deref() == Some(order_id))
            .map(|t| t.symbol.clone())
    }

    /// Symbol owning the given exit order id, if any.
    #[must_use]
    pub fn symbol_for_exit_order(&self, order_id: &str) -> Option<String> {
        self.snapshot
            .trades
            .values()
            .find(|t| t.exit_order_id.as_deref() == Some(order_id))
            .map(|t| t.symbol.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn state_in(dir: &tempfile::TempDir) -> EngineState {
        EngineState::load_or_init(
            SnapshotStore::new(dir.path().join("snapshot.json"), 1),
            TradeLog::new(dir.path().join("trades.jsonl")),
            dec!(100000),
            7,
        )
        .unwrap()
    }

    fn signal() -> Signal {
        Signal {
            timestamp: Utc.with_ymd_and_hms(2025, 8, 4, 14, 31, 0).unwrap(),
            symbol: "ACME".to_string(),
            kind: "New High".to_string(),
            description: "New High".to_string(),
            price: dec!(10.00),
            relative_volume: 5.0,
        }
    }

    fn open_trade(state: &mut EngineState, at: DateTime<Utc>) {
        state.admit_trade(&signal(), dec!(300), at).unwrap();
        state.mark_submitted("ACME", "ORD-1").unwrap();
        state
            .apply_entry_fill("ACME", dec!(300), dec!(10.00), at, Duration::minutes(10))
            .unwrap();
    }

    #[test]
    fn admit_commits_fingerprint_and_counters_in_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir);
        let at = Utc::now();

        state.admit_trade(&signal(), dec!(300), at).unwrap();

        assert!(state.snapshot().processed_alerts.contains(&signal().fingerprint()));
        assert_eq!(state.snapshot().risk.trades_today, 1);
        assert_eq!(state.snapshot().risk.open_position_count, 1);

        // The same write is already durable.
        let reloaded = state_in(&dir);
        assert!(reloaded.snapshot().processed_alerts.contains(&signal().fingerprint()));
        assert_eq!(reloaded.snapshot().trades["ACME"].status, TradeStatus::PendingSubmit);
    }

    #[test]
    fn full_lifecycle_reaches_closed_and_frees_slot() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir);
        let at = Utc::now();

        open_trade(&mut state, at);
        assert_eq!(state.snapshot().trades["ACME"].status, TradeStatus::Open);
        assert_eq!(
            state.snapshot().trades["ACME"].exit_deadline,
            Some(at + Duration::minutes(10))
        );

        state.schedule_exit("ACME").unwrap();
        state
            .mark_exiting("ACME", Some("ORD-2".to_string()), ExitReason::FixedHorizon)
            .unwrap();
        let pnl = state
            .apply_exit_fill("ACME", dec!(10.50), at + Duration::minutes(10))
            .unwrap();

        assert_eq!(pnl, dec!(150.00));
        assert!(state.snapshot().trades.is_empty());
        assert_eq!(state.snapshot().risk.open_position_count, 0);
        // The trade-closed event landed in the log.
        let log = std::fs::read_to_string(dir.path().join("trades.jsonl")).unwrap();
        assert_eq!(log.lines().count(), 1);
    }

    #[test]
    fn illegal_transition_is_refused_and_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir);
        let at = Utc::now();

        state.admit_trade(&signal(), dec!(300), at).unwrap();

        // PendingSubmit -> Open skips Submitted.
        let err = state
            .apply_entry_fill("ACME", dec!(300), dec!(10.00), at, Duration::minutes(10))
            .unwrap_err();
        assert!(err.to_string().contains("illegal transition"));
        assert_eq!(state.snapshot().trades["ACME"].status, TradeStatus::PendingSubmit);
    }

    #[test]
    fn rejection_frees_slot_but_keeps_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir);
        let at = Utc::now();

        state.admit_trade(&signal(), dec!(300), at).unwrap();
        state.mark_submitted("ACME", "ORD-1").unwrap();
        state.mark_rejected("ACME", "no shortable shares", at).unwrap();

        assert!(state.snapshot().trades.is_empty());
        assert_eq!(state.snapshot().risk.open_position_count, 0);
        // Quota stays consumed, fingerprint stays recorded.
        assert_eq!(state.snapshot().risk.trades_today, 1);
        assert!(state.snapshot().processed_alerts.contains(&signal().fingerprint()));
    }

    #[test]
    fn orphan_keeps_record_for_audit_but_frees_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir);
        let at = Utc::now();

        open_trade(&mut state, at);
        state
            .mark_orphaned("ACME", OrphanReason::VanishedAtBroker, at)
            .unwrap();

        assert!(state.snapshot().trades.is_empty());
        assert!(state.snapshot().has_orphan("ACME"));
        assert_eq!(state.snapshot().risk.open_position_count, 0);
        assert_eq!(
            state.snapshot().orphans[0].orphan_reason,
            Some(OrphanReason::VanishedAtBroker)
        );

        assert!(state.archive_orphan("ACME").unwrap());
        assert!(!state.snapshot().has_orphan("ACME"));
        assert!(!state.archive_orphan("ACME").unwrap());
    }

    #[test]
    fn deadline_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc::now();
        {
            let mut state = state_in(&dir);
            open_trade(&mut state, at);
        }

        let reloaded = state_in(&dir);
        let record = &reloaded.snapshot().trades["ACME"];
        assert_eq!(record.status, TradeStatus::Open);
        assert_eq!(record.exit_deadline, Some(at + Duration::minutes(10)));
    }

    #[test]
    fn day_rollover_resets_quota() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir);
        let at = Utc::now();

        state.admit_trade(&signal(), dec!(300), at).unwrap();
        assert_eq!(state.snapshot().risk.trades_today, 1);

        state.roll_day(at + Duration::days(1), 7);
        assert_eq!(state.snapshot().risk.trades_today, 0);
    }

    #[test]
    fn order_id_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_in(&dir);
        let at = Utc::now();

        open_trade(&mut state, at);
        state.schedule_exit("ACME").unwrap();
        state
            .mark_exiting("ACME", Some("ORD-2".to_string()), ExitReason::FixedHorizon)
            .unwrap();

        assert_eq!(state.symbol_for_entry_order("ORD-1"), Some("ACME".to_string()));
        assert_eq!(state.symbol_for_exit_order("ORD-2"), Some("ACME".to_string()));
        assert_eq!(state.symbol_for_entry_order("ORD-9"), None);
    }
}
