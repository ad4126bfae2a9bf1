use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use alert_trade_core::{BrokerEvent, Signal};

/// Commands consumed by the engine actor.
///
/// Every trigger in the system (new signals, timer ticks, broker
/// notifications, operator requests) arrives here, so a single consumer
/// can serialize all state mutation.
#[derive(Debug)]
pub enum EngineCommand {
    Signal(Signal),
    Broker(BrokerEvent),
    ExitTick,
    ReconcileTick,
    GetStatus(oneshot::Sender<EngineStatus>),
    /// Close every open position (operator flatten). Replies with the
    /// number of close orders issued.
    Flatten(oneshot::Sender<usize>),
    /// Drain to a persisted state and stop. Replies once the final
    /// snapshot write has completed.
    Shutdown(oneshot::Sender<()>),
}

/// Read-only status report assembled by the actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub open_positions: u32,
    pub trades_today: u32,
    pub trades_remaining: u32,
    pub orphaned: u32,
    pub realized_pnl_today: Decimal,
    pub account_equity: Decimal,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub gateway_connected: bool,
    /// One entry per live trade record, ordered by symbol.
    pub positions: Vec<PositionSummary>,
}

/// Condensed view of one live trade record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub status: alert_trade_core::TradeStatus,
    pub quantity: Decimal,
    pub entry_price: Option<Decimal>,
    pub exit_deadline: Option<DateTime<Utc>>,
}
