//! Append-only closed-trade event log.
//!
//! One JSON object per line, consumed read-only by the dashboard. Logging a
//! close is best-effort: a write failure must never block or roll back a
//! lifecycle transition, so errors are surfaced to the caller for logging
//! and nothing else.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use uuid::Uuid;

use alert_trade_core::{ExitReason, TradeRecord, TradeSide};

/// One completed trade, as appended to the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeClosedEvent {
    pub trade_id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub exit_reason: ExitReason,
    pub pnl: Decimal,
}

impl TradeClosedEvent {
    /// Builds the event from a record that has fully closed. Returns `None`
    /// if any close-side field is missing (the record is not actually done).
    #[must_use]
    pub fn from_record(trade: &TradeRecord) -> Option<Self> {
        Some(Self {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.filled_quantity,
            entry_price: trade.entry_price?,
            exit_price: trade.exit_price?,
            entry_time: trade.entry_time?,
            closed_at: trade.closed_at?,
            exit_reason: trade.exit_reason?,
            pnl: trade.realized_pnl()?,
        })
    }
}

/// Appender for the closed-trade log.
pub struct TradeLog {
    path: PathBuf,
}

impl TradeLog {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Appends one event as a JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or written.
    pub fn append(&self, event: &TradeClosedEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;

        let line = serde_json::to_string(event).context("encoding trade event")?;
        writeln!(file, "{line}").context("appending trade event")?;
        Ok(())
    }
}
