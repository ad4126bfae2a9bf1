//! Order and broker event types exchanged with the gateway.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::trade::TradeSide;

/// Order type supported for entries; exits are always market orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit { price: Decimal },
}

/// A request handed to the broker gateway for submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
}

impl OrderRequest {
    /// Market order helper (the common case for both entries and exits).
    #[must_use]
    pub fn market(symbol: &str, side: TradeSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
        }
    }
}

/// A position as reported by the broker's own books.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub side: TradeSide,
}

/// Asynchronous notifications pushed by the broker gateway.
///
/// Connection loss is a distinct event rather than an error on every call,
/// so the engine can pause admission instead of misreading an outage as a
/// stream of order failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerEvent {
    Fill {
        order_id: String,
        filled_qty: Decimal,
        avg_price: Decimal,
        at: DateTime<Utc>,
    },
    Rejected {
        order_id: String,
        reason: String,
    },
    Disconnected,
    Reconnected,
}
