use crate::error::GatewayError;
use crate::events::{BrokerEvent, BrokerPosition, OrderRequest};
use crate::signal::Signal;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::broadcast;

/// Produces batches of raw signals in arrival order.
///
/// At-least-once semantics: duplicates within a batch, across batches, and
/// across process restarts are all expected and resolved by deduplication.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn next_batch(&mut self) -> Result<Vec<Signal>>;
}

/// The brokerage, treated as an unreliable remote service.
///
/// Implementations must surface unknown outcomes as
/// [`GatewayError::Timeout`] rather than guessing: the engine never retries
/// a submission blindly, it lets reconciliation discover the truth.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Submits an order; the returned id correlates later fill/reject events.
    async fn submit_order(&self, request: OrderRequest) -> Result<String, GatewayError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;

    /// The broker's authoritative view of currently held positions.
    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError>;

    /// Current net liquidation value, used for position sizing.
    async fn account_equity(&self) -> Result<Decimal, GatewayError>;

    /// Subscribes to asynchronous fill/reject/connection events.
    fn subscribe(&self) -> broadcast::Receiver<BrokerEvent>;
}
