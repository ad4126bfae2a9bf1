//! Error taxonomy for the engine.
//!
//! The split matters operationally: only `TransientGateway` is ever retried,
//! and then only by the reconciler's next truth-check, never by blind
//! resubmission, which risks duplicate trades.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::trade::{OrphanReason, TradeStatus};

/// Failures surfaced by a [`crate::traits::BrokerGateway`] call.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The call did not complete in time; the outcome is UNKNOWN. The
    /// caller must not assume failure (the order may have gone through).
    #[error("gateway call timed out after {0:?} (outcome unknown)")]
    Timeout(Duration),

    /// Transport-level failure before the broker acknowledged anything.
    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The broker actively rejected the request.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// The gateway is currently disconnected.
    #[error("gateway disconnected")]
    Disconnected,
}

impl GatewayError {
    /// Transient errors are resolved by the reconciler's next pass.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_) | Self::Disconnected)
    }
}

/// Reason codes for risk admission denials. Terminal: a denied signal is
/// never retried and still consumes its dedup slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    ConcurrencyLimit,
    DailyLimit,
    DuplicateSymbol,
    ZeroSize,
}

impl DenyReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConcurrencyLimit => "CONCURRENCY_LIMIT",
            Self::DailyLimit => "DAILY_LIMIT",
            Self::DuplicateSymbol => "DUPLICATE_SYMBOL",
            Self::ZeroSize => "ZERO_SIZE",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Top-level engine error taxonomy.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Network/timeout class failure; recovered by reconciliation only.
    #[error("transient gateway failure: {0}")]
    TransientGateway(String),

    /// Broker rejected an order; terminal for that trade record.
    #[error("rejected by broker: {0}")]
    RejectedByBroker(String),

    /// Risk admission denial; terminal, logged, no retry.
    #[error("risk denied: {0}")]
    RiskDenied(DenyReason),

    /// The persisted snapshot failed its integrity check on load. Fatal:
    /// the process refuses to start until resolved manually.
    #[error("state corruption: {0}")]
    StateCorruption(String),

    /// Broker truth disagrees with local state; produces an orphan and an
    /// operator-visible alert, never an automated order.
    #[error("reconciliation conflict on {symbol}: {reason}")]
    ReconciliationConflict { symbol: String, reason: OrphanReason },

    /// A transition method was invoked from an illegal predecessor state.
    #[error("illegal transition for {symbol}: {from} -> {to}")]
    IllegalTransition {
        symbol: String,
        from: TradeStatus,
        to: TradeStatus,
    },
}

impl From<GatewayError> for EngineError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Rejected(reason) => Self::RejectedByBroker(reason),
            other => Self::TransientGateway(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_transient_rejection_is_not() {
        assert!(GatewayError::Timeout(Duration::from_secs(15)).is_transient());
        assert!(GatewayError::Disconnected.is_transient());
        assert!(!GatewayError::Rejected("insufficient funds".to_string()).is_transient());
    }

    #[test]
    fn gateway_errors_map_into_the_taxonomy() {
        let rejected: EngineError = GatewayError::Rejected("no shortable shares".to_string()).into();
        assert!(matches!(rejected, EngineError::RejectedByBroker(_)));

        let timeout: EngineError = GatewayError::Timeout(Duration::from_secs(15)).into();
        assert!(matches!(timeout, EngineError::TransientGateway(_)));
    }

    #[test]
    fn deny_reason_codes_are_stable() {
        assert_eq!(DenyReason::ConcurrencyLimit.as_str(), "CONCURRENCY_LIMIT");
        assert_eq!(DenyReason::DailyLimit.as_str(), "DAILY_LIMIT");
        assert_eq!(DenyReason::DuplicateSymbol.as_str(), "DUPLICATE_SYMBOL");
        assert_eq!(DenyReason::ZeroSize.as_str(), "ZERO_SIZE");
    }
}
