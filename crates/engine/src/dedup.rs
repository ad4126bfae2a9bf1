//! Alert deduplication.
//!
//! The check is a pure membership test; nothing is marked at check time.
//! A fingerprint is committed to the processed set only in the same
//! snapshot write as its final disposition (trade created, risk denial,
//! broker rejection), so a crash between check and disposition re-delivers
//! the signal instead of silently dropping it.

use alert_trade_core::Signal;
use alert_trade_store::ProcessedAlertSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    Novel,
    Duplicate,
}

#[must_use]
pub fn check(processed: &ProcessedAlertSet, signal: &Signal) -> DedupVerdict {
    if processed.contains(&signal.fingerprint()) {
        DedupVerdict::Duplicate
    } else {
        DedupVerdict::Novel
    }
}
