//! Simulated broker gateway.
//!
//! Fills orders against a configurable price book without touching a real
//! broker. Used for paper trading and as the scripted counterparty in
//! engine tests: the next submission can be made to reject (synchronously
//! or via the event stream) or to time out with or without broker-side
//! execution, and positions can be injected or removed behind the engine's
//! back to exercise reconciliation.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use alert_trade_core::{
    BrokerEvent, BrokerPosition, GatewayError, OrderRequest, OrderType, TradeSide,
};

/// Scripted behavior for the next `submit_order` call.
#[derive(Debug, Clone)]
pub enum SubmitScript {
    /// Fail synchronously with a broker rejection.
    RejectSync(String),
    /// Acknowledge the submission, then push a rejection event.
    RejectAsync(String),
    /// Return a timeout (unknown outcome). When `executes` is true the
    /// order still goes through broker-side: the unconfirmed-submit case.
    Timeout { executes: bool },
    /// Fail synchronously with a transport error (order never reached the
    /// broker).
    Transport(String),
}

#[derive(Debug, Default)]
struct SimState {
    next_order_id: u64,
    positions: HashMap<String, BrokerPosition>,
    prices: HashMap<String, Decimal>,
    equity: Decimal,
    scripts: VecDeque<SubmitScript>,
    /// When false, submissions are acknowledged but not filled until
    /// [`SimGateway::fill_order`] is called.
    auto_fill: bool,
    /// Orders acknowledged but not yet filled: id -> request.
    pending: HashMap<String, OrderRequest>,
    fail_next_list_positions: bool,
    connected: bool,
}

/// In-process [`alert_trade_core::BrokerGateway`] implementation.
#[derive(Clone)]
pub struct SimGateway {
    state: Arc<Mutex<SimState>>,
    event_tx: broadcast::Sender<BrokerEvent>,
}

impl Default for SimGateway {
    fn default() -> Self {
        Self::new(dec!(100000))
    }
}

impl SimGateway {
    #[must_use]
    pub fn new(equity: Decimal) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(SimState {
                equity,
                auto_fill: true,
                connected: true,
                ..SimState::default()
            })),
            event_tx,
        }
    }

    /// Sets the fill price used for market orders on `symbol`.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn set_equity(&self, equity: Decimal) {
        self.state.lock().equity = equity;
    }

    /// Queues a scripted behavior consumed by the next submission.
    pub fn script_next_submit(&self, script: SubmitScript) {
        self.state.lock().scripts.push_back(script);
    }

    /// Switches between immediate fills and manual [`Self::fill_order`].
    pub fn set_auto_fill(&self, auto: bool) {
        self.state.lock().auto_fill = auto;
    }

    /// Fills a previously acknowledged order (manual mode).
    pub fn fill_order(&self, order_id: &str) {
        let request = self.state.lock().pending.remove(order_id);
        if let Some(request) = request {
            self.execute(order_id, &request, true);
        }
    }

    /// Injects a position the engine never opened (reconciler drift case).
    pub fn inject_position(&self, symbol: &str, side: TradeSide, quantity: Decimal) {
        self.state.lock().positions.insert(
            symbol.to_string(),
            BrokerPosition {
                symbol: symbol.to_string(),
                quantity,
                side,
            },
        );
    }

    /// Removes a position behind the engine's back.
    pub fn remove_position(&self, symbol: &str) {
        self.state.lock().positions.remove(symbol);
    }

    /// Overrides a held quantity (reconciler mismatch case).
    pub fn set_position_quantity(&self, symbol: &str, quantity: Decimal) {
        if let Some(pos) = self.state.lock().positions.get_mut(symbol) {
            pos.quantity = quantity;
        }
    }

    /// Makes the next `list_positions` fail transiently.
    pub fn fail_next_list_positions(&self) {
        self.state.lock().fail_next_list_positions = true;
    }

    pub fn emit_disconnect(&self) {
        self.state.lock().connected = false;
        let _ = self.event_tx.send(BrokerEvent::Disconnected);
    }

    pub fn emit_reconnect(&self) {
        self.state.lock().connected = true;
        let _ = self.event_tx.send(BrokerEvent::Reconnected);
    }

    #[must_use]
    pub fn held_quantity(&self, symbol: &str) -> Option<Decimal> {
        self.state.lock().positions.get(symbol).map(|p| p.quantity)
    }

    fn fill_price(state: &SimState, request: &OrderRequest) -> Decimal {
        match &request.order_type {
            OrderType::Limit { price } => *price,
            OrderType::Market => state
                .prices
                .get(&request.symbol)
                .copied()
                .unwrap_or(dec!(100)),
        }
    }

    /// Applies an order to the position book and optionally emits the fill.
    fn execute(&self, order_id: &str, request: &OrderRequest, emit: bool) {
        let price = {
            let mut state = self.state.lock();
            let price = Self::fill_price(&state, request);

            match state.positions.get_mut(&request.symbol) {
                Some(pos) if pos.side != request.side => {
                    pos.quantity -= request.quantity;
                    if pos.quantity <= Decimal::ZERO {
                        state.positions.remove(&request.symbol);
                    }
                }
                Some(pos) => {
                    pos.quantity += request.quantity;
                }
                None => {
                    state.positions.insert(
                        request.symbol.clone(),
                        BrokerPosition {
                            symbol: request.symbol.clone(),
                            quantity: request.quantity,
                            side: request.side,
                        },
                    );
                }
            }
            price
        };

        debug!(
            order_id,
            symbol = %request.symbol,
            side = %request.side,
            quantity = %request.quantity,
            price = %price,
            "Sim fill"
        );

        if emit {
            let _ = self.event_tx.send(BrokerEvent::Fill {
                order_id: order_id.to_string(),
                filled_qty: request.quantity,
                avg_price: price,
                at: Utc::now(),
            });
        }
    }
}

#[async_trait]
impl alert_trade_core::BrokerGateway for SimGateway {
    async fn submit_order(&self, request: OrderRequest) -> Result<String, GatewayError> {
        let (order_id, script, auto_fill) = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(GatewayError::Disconnected);
            }
            state.next_order_id += 1;
            let order_id = format!("SIM-{}", state.next_order_id);
            let script = state.scripts.pop_front();
            (order_id, script, state.auto_fill)
        };

        match script {
            Some(SubmitScript::RejectSync(reason)) => {
                info!(order_id, reason, "Sim: synchronous rejection");
                return Err(GatewayError::Rejected(reason));
            }
            Some(SubmitScript::Transport(reason)) => {
                info!(order_id, reason, "Sim: transport failure");
                return Err(GatewayError::Transport(reason));
            }
            Some(SubmitScript::Timeout { executes }) => {
                info!(order_id, executes, "Sim: submission timeout");
                if executes {
                    // Order went through but the caller never learns the id.
                    self.execute(&order_id, &request, false);
                }
                return Err(GatewayError::Timeout(Duration::from_secs(0)));
            }
            Some(SubmitScript::RejectAsync(reason)) => {
                let _ = self.event_tx.send(BrokerEvent::Rejected {
                    order_id: order_id.clone(),
                    reason,
                });
                return Ok(order_id);
            }
            None => {}
        }

        if auto_fill {
            self.execute(&order_id, &request, true);
        } else {
            self.state
                .lock()
                .pending
                .insert(order_id.clone(), request);
        }

        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        self.state.lock().pending.remove(order_id);
        Ok(())
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        let mut state = self.state.lock();
        if state.fail_next_list_positions {
            state.fail_next_list_positions = false;
            return Err(GatewayError::Transport("sim: positions unavailable".to_string()));
        }
        if !state.connected {
            return Err(GatewayError::Disconnected);
        }
        Ok(state.positions.values().cloned().collect())
    }

    async fn account_equity(&self) -> Result<Decimal, GatewayError> {
        let state = self.state.lock();
        if !state.connected {
            return Err(GatewayError::Disconnected);
        }
        Ok(state.equity)
    }

    fn subscribe(&self) -> broadcast::Receiver<BrokerEvent> {
        self.event_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_trade_core::BrokerGateway;

    #[tokio::test]
    async fn auto_fill_emits_event_and_books_position() {
        let sim = SimGateway::default();
        sim.set_price("ACME", dec!(10.00));
        let mut events = sim.subscribe();

        let id = sim
            .submit_order(OrderRequest::market("ACME", TradeSide::Buy, dec!(300)))
            .await
            .unwrap();

        assert_eq!(sim.held_quantity("ACME"), Some(dec!(300)));
        match events.recv().await.unwrap() {
            BrokerEvent::Fill {
                order_id,
                filled_qty,
                avg_price,
                ..
            } => {
                assert_eq!(order_id, id);
                assert_eq!(filled_qty, dec!(300));
                assert_eq!(avg_price, dec!(10.00));
            }
            other => panic!("expected fill, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn closing_side_flattens_position() {
        let sim = SimGateway::default();
        sim.set_price("ACME", dec!(10.00));

        sim.submit_order(OrderRequest::market("ACME", TradeSide::Buy, dec!(300)))
            .await
            .unwrap();
        sim.submit_order(OrderRequest::market("ACME", TradeSide::Sell, dec!(300)))
            .await
            .unwrap();

        assert_eq!(sim.held_quantity("ACME"), None);
    }

    #[tokio::test]
    async fn timeout_script_can_execute_broker_side() {
        let sim = SimGateway::default();
        sim.script_next_submit(SubmitScript::Timeout { executes: true });

        let err = sim
            .submit_order(OrderRequest::market("ACME", TradeSide::Buy, dec!(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::Timeout(_)));
        // The shares exist even though the caller saw a timeout.
        assert_eq!(sim.held_quantity("ACME"), Some(dec!(100)));
    }

    #[tokio::test]
    async fn manual_mode_defers_fill_until_requested() {
        let sim = SimGateway::default();
        sim.set_auto_fill(false);
        let mut events = sim.subscribe();

        let id = sim
            .submit_order(OrderRequest::market("ACME", TradeSide::Buy, dec!(50)))
            .await
            .unwrap();
        assert_eq!(sim.held_quantity("ACME"), None);

        sim.fill_order(&id);
        assert_eq!(sim.held_quantity("ACME"), Some(dec!(50)));
        assert!(matches!(events.recv().await.unwrap(), BrokerEvent::Fill { .. }));
    }

    #[tokio::test]
    async fn disconnect_blocks_calls_until_reconnect() {
        let sim = SimGateway::default();
        sim.emit_disconnect();

        let err = sim
            .submit_order(OrderRequest::market("ACME", TradeSide::Buy, dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Disconnected));

        sim.emit_reconnect();
        assert!(sim.list_positions().await.is_ok());
    }
}
