//! The durable state aggregate.
//!
//! Everything the engine must not forget across a crash lives here, in one
//! document: processed alert fingerprints, non-terminal trade records, the
//! cached risk counters, and the reconciliation watermark. `BTreeMap`s keep
//! serialization deterministic so the snapshot checksum is reproducible.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use alert_trade_core::{DenyReason, Fingerprint, TradeRecord};

/// Final disposition of a processed alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Admitted and an entry order was submitted.
    Submitted,
    /// Denied by the risk admission controller.
    RiskDenied(DenyReason),
    /// The broker rejected the entry order.
    BrokerRejected,
}

/// A fingerprint's recorded outcome, timestamped for age-based trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub disposition: Disposition,
    pub recorded_at: DateTime<Utc>,
}

/// Set of fingerprints already admitted-or-rejected.
///
/// Append-only; entries leave only via [`ProcessedAlertSet::trim_older_than`]
/// (bounded by age, never by count), which preserves restart-dedup
/// guarantees for the configured retention window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedAlertSet {
    entries: BTreeMap<Fingerprint, AlertRecord>,
}

impl ProcessedAlertSet {
    #[must_use]
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Records a final disposition. Dispositions never change once written;
    /// a second write for the same fingerprint is ignored.
    pub fn record(&mut self, fingerprint: Fingerprint, disposition: Disposition, at: DateTime<Utc>) {
        self.entries.entry(fingerprint).or_insert(AlertRecord {
            disposition,
            recorded_at: at,
        });
    }

    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&AlertRecord> {
        self.entries.get(fingerprint)
    }

    /// Refines an already-recorded disposition (e.g. `Submitted` becomes
    /// `BrokerRejected` once the rejection arrives). The timestamp is
    /// preserved; the dedup guarantee is unaffected either way.
    pub fn reclassify(&mut self, fingerprint: &Fingerprint, disposition: Disposition) {
        if let Some(entry) = self.entries.get_mut(fingerprint) {
            entry.disposition = disposition;
        }
    }

    /// Drops entries recorded before `cutoff`; returns how many were removed.
    pub fn trim_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, record| record.recorded_at >= cutoff);
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cached admission-check counters, derived from the trade map.
///
/// The cache exists for O(1) admission checks only; the trade map stays
/// authoritative. [`RiskCounters::recompute`] restores the derived fields on
/// every load so drift cannot survive a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskCounters {
    pub open_position_count: u32,
    pub trades_today: u32,
    pub trading_day: NaiveDate,
}

impl RiskCounters {
    #[must_use]
    pub fn new(trading_day: NaiveDate) -> Self {
        Self {
            open_position_count: 0,
            trades_today: 0,
            trading_day,
        }
    }

    /// Rebuilds the counters from the authoritative trade map.
    ///
    /// `open_position_count` is recounted outright (orphaned records do not
    /// count). `trades_today` carries over from the cache when the trading
    /// day is unchanged (closed trades leave the map, so the map alone
    /// undercounts), but is floored at the number of live records created
    /// today, and resets to that floor on day rollover.
    #[must_use]
    pub fn recompute(
        trades: &BTreeMap<String, TradeRecord>,
        cached: &Self,
        today: NaiveDate,
    ) -> Self {
        let open_position_count = trades
            .values()
            .filter(|t| t.status.counts_as_open())
            .count() as u32;

        let created_today = trades
            .values()
            .filter(|t| t.created_at.date_naive() == today)
            .count() as u32;

        let trades_today = if cached.trading_day == today {
            cached.trades_today.max(created_today)
        } else {
            created_today
        };

        Self {
            open_position_count,
            trades_today,
            trading_day: today,
        }
    }

    /// Rolls the counters to a new trading day, resetting daily quota.
    pub fn roll_day(&mut self, today: NaiveDate) {
        if self.trading_day != today {
            self.trades_today = 0;
            self.trading_day = today;
        }
    }
}

/// The single unit of persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub processed_alerts: ProcessedAlertSet,
    /// Non-terminal trades, keyed by symbol (at most one per symbol).
    pub trades: BTreeMap<String, TradeRecord>,
    /// Orphaned records held for audit until explicitly archived. Kept
    /// outside the live map so the symbol becomes tradable again without
    /// losing the audit trail.
    #[serde(default)]
    pub orphans: Vec<TradeRecord>,
    pub risk: RiskCounters,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    /// Cached equity for sizing; refreshed on reconcile passes.
    pub account_equity: Decimal,
}

impl StateSnapshot {
    #[must_use]
    pub fn new(initial_equity: Decimal, today: NaiveDate) -> Self {
        Self {
            processed_alerts: ProcessedAlertSet::default(),
            trades: BTreeMap::new(),
            orphans: Vec::new(),
            risk: RiskCounters::new(today),
            last_reconciled_at: None,
            account_equity: initial_equity,
        }
    }

    /// The non-terminal record for a symbol, if one exists.
    #[must_use]
    pub fn live_trade(&self, symbol: &str) -> Option<&TradeRecord> {
        self.trades.get(symbol)
    }

    /// Symbols currently holding a risk slot.
    pub fn open_symbols(&self) -> impl Iterator<Item = &str> {
        self.trades.keys().map(String::as_str)
    }

    /// True if the symbol has an orphaned record awaiting archive.
    #[must_use]
    pub fn has_orphan(&self, symbol: &str) -> bool {
        self.orphans.iter().any(|t| t.symbol == symbol)
    }

    /// Restores derived state after a load: recompute counters and trim
    /// expired fingerprints.
    pub fn restore(&mut self, today: NaiveDate, dedup_cutoff: DateTime<Utc>) {
        let recomputed = RiskCounters::recompute(&self.trades, &self.risk, today);
        if recomputed != self.risk {
            tracing::warn!(
                cached_open = self.risk.open_position_count,
                recomputed_open = recomputed.open_position_count,
                cached_today = self.risk.trades_today,
                recomputed_today = recomputed.trades_today,
                "Cached risk counters disagreed with trade map; recomputed value wins"
            );
        }
        self.risk = recomputed;

        let trimmed = self.processed_alerts.trim_older_than(dedup_cutoff);
        if trimmed > 0 {
            tracing::info!(trimmed, "Trimmed expired alert fingerprints");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_trade_core::{Signal, TradeSide, TradeStatus};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn fp(n: u32) -> Fingerprint {
        Signal {
            timestamp: Utc.with_ymd_and_hms(2025, 8, 4, 14, 31, n).unwrap(),
            symbol: "ACME".to_string(),
            kind: "New High".to_string(),
            description: "New High".to_string(),
            price: dec!(10),
            relative_volume: 5.0,
        }
        .fingerprint()
    }

    fn trade(symbol: &str, status: TradeStatus, at: DateTime<Utc>) -> TradeRecord {
        let mut t = TradeRecord::new(symbol.to_string(), TradeSide::Buy, dec!(100), at);
        t.status = status;
        t
    }

    #[test]
    fn dispositions_are_write_once() {
        let mut set = ProcessedAlertSet::default();
        let now = Utc::now();
        set.record(fp(1), Disposition::Submitted, now);
        set.record(fp(1), Disposition::BrokerRejected, now);

        assert_eq!(set.len(), 1);
        assert_eq!(set.get(&fp(1)).unwrap().disposition, Disposition::Submitted);
    }

    #[test]
    fn trim_is_age_bounded_not_count_bounded() {
        let mut set = ProcessedAlertSet::default();
        let old = Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap();
        let recent = Utc.with_ymd_and_hms(2025, 8, 4, 10, 0, 0).unwrap();
        set.record(fp(1), Disposition::Submitted, old);
        set.record(fp(2), Disposition::RiskDenied(DenyReason::DailyLimit), recent);
        set.record(fp(3), Disposition::Submitted, recent);

        let removed = set.trim_older_than(Utc.with_ymd_and_hms(2025, 8, 1, 0, 0, 0).unwrap());

        assert_eq!(removed, 1);
        assert!(!set.contains(&fp(1)));
        assert!(set.contains(&fp(2)));
        assert!(set.contains(&fp(3)));
    }

    #[test]
    fn recompute_counts_live_records() {
        let now = Utc::now();
        let today = now.date_naive();
        let mut trades = BTreeMap::new();
        trades.insert("AAA".to_string(), trade("AAA", TradeStatus::Open, now));
        trades.insert("BBB".to_string(), trade("BBB", TradeStatus::Exiting, now));

        let counters = RiskCounters::recompute(&trades, &RiskCounters::new(today), today);

        assert_eq!(counters.open_position_count, 2);
        assert_eq!(counters.trades_today, 2);
    }

    #[test]
    fn recompute_preserves_closed_trade_count_within_the_day() {
        let now = Utc::now();
        let today = now.date_naive();
        let mut trades = BTreeMap::new();
        trades.insert("AAA".to_string(), trade("AAA", TradeStatus::Open, now));

        // Cache remembers 5 trades today; 4 of them have closed and left the map.
        let cached = RiskCounters {
            open_position_count: 1,
            trades_today: 5,
            trading_day: today,
        };

        let counters = RiskCounters::recompute(&trades, &cached, today);
        assert_eq!(counters.trades_today, 5);
        assert_eq!(counters.open_position_count, 1);
    }

    #[test]
    fn recompute_resets_on_day_rollover() {
        let yesterday_at = Utc::now() - chrono::Duration::days(1);
        let today = Utc::now().date_naive();
        let mut trades = BTreeMap::new();
        trades.insert("AAA".to_string(), trade("AAA", TradeStatus::Open, yesterday_at));

        let cached = RiskCounters {
            open_position_count: 1,
            trades_today: 17,
            trading_day: yesterday_at.date_naive(),
        };

        let counters = RiskCounters::recompute(&trades, &cached, today);
        assert_eq!(counters.trades_today, 0);
        assert_eq!(counters.open_position_count, 1);
        assert_eq!(counters.trading_day, today);
    }

    #[test]
    fn restore_repairs_drifted_cache() {
        let now = Utc::now();
        let mut snapshot = StateSnapshot::new(dec!(100000), now.date_naive());
        snapshot
            .trades
            .insert("AAA".to_string(), trade("AAA", TradeStatus::Open, now));
        // Simulate a drifted cache.
        snapshot.risk.open_position_count = 9;

        snapshot.restore(now.date_naive(), now - chrono::Duration::days(7));

        assert_eq!(snapshot.risk.open_position_count, 1);
    }

    #[test]
    fn orphans_leave_the_symbol_tradable_but_stay_on_record() {
        let now = Utc::now();
        let mut snapshot = StateSnapshot::new(dec!(100000), now.date_naive());
        snapshot.orphans.push(trade("AAA", TradeStatus::Orphaned, now));

        assert!(snapshot.live_trade("AAA").is_none());
        assert_eq!(snapshot.open_symbols().count(), 0);
        assert!(snapshot.has_orphan("AAA"));
    }
}
