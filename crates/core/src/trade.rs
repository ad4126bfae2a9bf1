//! Trade lifecycle records and the status transition table.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side for an entry; exits always take the opposite side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Returns the side that closes a position opened on this side.
    #[must_use]
    pub fn closing(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a [`TradeRecord`].
///
/// Transitions are owned exclusively by the lifecycle engine; everything
/// else observes. `Rejected`, `Closed` and `Orphaned` are terminal.
/// `Orphaned` records additionally stay in the store for audit until an
/// operator archives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    /// Persisted before the entry order is submitted, so a crash mid-call
    /// is recoverable by reconciliation.
    PendingSubmit,
    /// Entry order acknowledged by the broker; fill outcome pending.
    Submitted,
    /// Broker rejected the entry, or a stale submission was resolved as
    /// never-effective. Terminal.
    Rejected,
    /// Entry filled; holding until `exit_deadline`.
    Open,
    /// Exit deadline reached; the closing order has not been issued yet.
    ExitScheduled,
    /// Closing order issued; exit fill pending.
    Exiting,
    /// Exit filled. Terminal.
    Closed,
    /// Broker truth disagrees irreconcilably with local belief. Terminal;
    /// requires operator attention and is excluded from risk capacity.
    Orphaned,
}

impl TradeStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Closed | Self::Orphaned)
    }

    /// True for statuses that occupy a risk slot.
    #[must_use]
    pub fn counts_as_open(self) -> bool {
        matches!(
            self,
            Self::PendingSubmit | Self::Submitted | Self::Open | Self::ExitScheduled | Self::Exiting
        )
    }

    /// True for statuses where the broker is expected to report a position.
    #[must_use]
    pub fn expects_broker_position(self) -> bool {
        matches!(self, Self::Open | Self::ExitScheduled | Self::Exiting)
    }

    /// Legality table for the state machine. Every transition method in the
    /// engine checks this before mutating anything.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::PendingSubmit, Self::Submitted)
                | (Self::PendingSubmit, Self::Rejected)
                | (Self::PendingSubmit, Self::Orphaned)
                | (Self::Submitted, Self::Open)
                | (Self::Submitted, Self::Rejected)
                | (Self::Submitted, Self::Orphaned)
                | (Self::Open, Self::ExitScheduled)
                | (Self::Open, Self::Orphaned)
                | (Self::ExitScheduled, Self::Exiting)
                | (Self::ExitScheduled, Self::Orphaned)
                | (Self::Exiting, Self::Closed)
                | (Self::Exiting, Self::Orphaned)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingSubmit => "PENDING_SUBMIT",
            Self::Submitted => "SUBMITTED",
            Self::Rejected => "REJECTED",
            Self::Open => "OPEN",
            Self::ExitScheduled => "EXIT_SCHEDULED",
            Self::Exiting => "EXITING",
            Self::Closed => "CLOSED",
            Self::Orphaned => "ORPHANED",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a record was downgraded to [`TradeStatus::Orphaned`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrphanReason {
    /// Broker no longer reports the position the record believes it holds.
    VanishedAtBroker,
    /// Broker reports a different quantity than locally recorded.
    QuantityMismatch,
    /// Broker holds shares for a submission whose entry fill was never
    /// observed (submit call timed out).
    UnconfirmedSubmit,
    /// The closing order was rejected; the position is stuck open.
    ExitRejected,
}

impl OrphanReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VanishedAtBroker => "VANISHED_AT_BROKER",
            Self::QuantityMismatch => "QUANTITY_MISMATCH",
            Self::UnconfirmedSubmit => "UNCONFIRMED_SUBMIT",
            Self::ExitRejected => "EXIT_REJECTED",
        }
    }
}

impl std::fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// The configured fixed holding horizon elapsed.
    FixedHorizon,
    /// An operator-initiated flatten (graceful shutdown or `flatten`).
    OperatorFlatten,
}

impl ExitReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FixedHorizon => "FIXED_HORIZON",
            Self::OperatorFlatten => "OPERATOR_FLATTEN",
        }
    }
}

/// The engine's internal representation of one order/position lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub side: TradeSide,
    pub requested_quantity: Decimal,
    /// Zero until the entry fill arrives.
    pub filled_quantity: Decimal,
    pub entry_price: Option<Decimal>,
    pub entry_time: Option<DateTime<Utc>>,
    pub status: TradeStatus,
    /// Set atomically with `Submitted -> Open`; never recomputed afterwards.
    pub exit_deadline: Option<DateTime<Utc>>,
    pub entry_order_id: Option<String>,
    pub exit_order_id: Option<String>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub orphan_reason: Option<OrphanReason>,
    /// Fingerprint of the signal that opened this trade (audit link).
    #[serde(default)]
    pub signal_fingerprint: Option<crate::signal::Fingerprint>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    /// Creates a fresh record in `PendingSubmit` for an admitted signal.
    #[must_use]
    pub fn new(symbol: String, side: TradeSide, quantity: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol,
            side,
            requested_quantity: quantity,
            filled_quantity: Decimal::ZERO,
            entry_price: None,
            entry_time: None,
            status: TradeStatus::PendingSubmit,
            exit_deadline: None,
            entry_order_id: None,
            exit_order_id: None,
            exit_price: None,
            exit_reason: None,
            orphan_reason: None,
            signal_fingerprint: None,
            created_at: at,
            closed_at: None,
        }
    }

    /// Realized PnL once both entry and exit prices are known.
    #[must_use]
    pub fn realized_pnl(&self) -> Option<Decimal> {
        let entry = self.entry_price?;
        let exit = self.exit_price?;
        let signed = match self.side {
            TradeSide::Buy => exit - entry,
            TradeSide::Sell => entry - exit,
        };
        Some(signed * self.filled_quantity)
    }
}
