//! The single-consumer engine actor.
//!
//! All three trigger sources (signals, timer ticks, broker events) arrive
//! as commands on one queue; the actor owns the snapshot exclusively and
//! processes one command to a persisted state before taking the next, so
//! no two triggers can ever observe a half-applied transition or race a
//! risk slot.

use anyhow::Result;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use alert_trade_core::{
    AppConfig, BrokerEvent, BrokerGateway, ExitReason, GatewayError, MarketHours, OrderRequest,
    OrphanReason, Signal, TradeStatus,
};

use crate::admission::{self, Admission};
use crate::commands::{EngineCommand, EngineStatus, PositionSummary};
use crate::dedup::{self, DedupVerdict};
use crate::exit;
use crate::lifecycle::EngineState;
use crate::reconciler::{self, Resolution};

pub struct EngineActor {
    rx: mpsc::Receiver<EngineCommand>,
    state: EngineState,
    gateway: Arc<dyn BrokerGateway>,
    config: AppConfig,
    market_hours: MarketHours,
    connected: bool,
    /// Set on operator flatten/shutdown: new signals are no longer admitted.
    draining: bool,
    realized_pnl_today: Decimal,
    pnl_day: NaiveDate,
}

impl EngineActor {
    /// Creates the actor over loaded state.
    ///
    /// # Errors
    /// Returns an error if the market-hours configuration is invalid.
    pub fn new(
        rx: mpsc::Receiver<EngineCommand>,
        state: EngineState,
        gateway: Arc<dyn BrokerGateway>,
        config: AppConfig,
    ) -> Result<Self> {
        let market_hours = MarketHours::from_config(&config.market_hours)?;
        Ok(Self {
            rx,
            state,
            gateway,
            config,
            market_hours,
            connected: true,
            draining: false,
            realized_pnl_today: Decimal::ZERO,
            pnl_day: Utc::now().date_naive(),
        })
    }

    /// Runs the command loop until shutdown or a fatal persistence error.
    ///
    /// # Errors
    /// Returns an error if a snapshot write fails; continuing would let
    /// the in-memory and durable views diverge.
    pub async fn run(mut self) -> Result<()> {
        info!("Trade lifecycle engine started");

        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                EngineCommand::Signal(signal) => self.handle_signal(signal).await?,
                EngineCommand::Broker(event) => self.handle_broker_event(event).await?,
                EngineCommand::ExitTick => self.handle_exit_tick().await?,
                EngineCommand::ReconcileTick => self.handle_reconcile_tick().await?,
                EngineCommand::GetStatus(tx) => {
                    let _ = tx.send(self.status());
                }
                EngineCommand::Flatten(tx) => {
                    let issued = self.flatten().await?;
                    let _ = tx.send(issued);
                }
                EngineCommand::Shutdown(tx) => {
                    info!("Engine draining for shutdown");
                    self.draining = true;
                    let _ = tx.send(());
                    break;
                }
            }
        }

        info!("Trade lifecycle engine stopped");
        Ok(())
    }

    async fn handle_signal(&mut self, signal: Signal) -> Result<()> {
        if self.draining {
            debug!(symbol = %signal.symbol, "Draining, signal skipped");
            return Ok(());
        }

        let now = Utc::now();
        if !self.market_hours.contains(now) {
            // Not a disposition: the feed re-delivers and a later delivery
            // inside the session is processed normally.
            debug!(symbol = %signal.symbol, "Outside market hours, signal skipped");
            return Ok(());
        }

        if !self.connected {
            warn!(symbol = %signal.symbol, "Gateway disconnected, signal skipped");
            return Ok(());
        }

        if dedup::check(&self.state.snapshot().processed_alerts, &signal) == DedupVerdict::Duplicate
        {
            debug!(
                symbol = %signal.symbol,
                fingerprint = signal.fingerprint().short(),
                "Duplicate signal ignored"
            );
            return Ok(());
        }

        self.state
            .roll_day(now, self.config.engine.dedup_retention_days);

        let snapshot = self.state.snapshot();
        let verdict = admission::evaluate(
            &signal,
            &snapshot.risk,
            snapshot.live_trade(&signal.symbol).is_some(),
            snapshot.account_equity,
            &self.config.risk,
        );

        match verdict {
            Admission::Deny { reason } => self.state.record_denial(&signal, reason, now),
            Admission::Admit { size } => self.submit_entry(&signal, size).await,
        }
    }

    /// Persists the admitted trade in `PendingSubmit`, then makes the one
    /// gateway call. The record is durable before the order can exist, so
    /// a crash mid-call leaves a resolvable record instead of an untracked
    /// order.
    async fn submit_entry(&mut self, signal: &Signal, size: Decimal) -> Result<()> {
        let now = Utc::now();
        let record = self.state.admit_trade(signal, size, now)?;

        let request = OrderRequest::market(&record.symbol, record.side, size);
        let submit_timeout = StdDuration::from_secs(self.config.engine.submit_timeout_secs);

        match timeout(submit_timeout, self.gateway.submit_order(request)).await {
            Ok(Ok(order_id)) => self.state.mark_submitted(&record.symbol, &order_id),
            Ok(Err(GatewayError::Rejected(reason))) => {
                self.state.mark_rejected(&record.symbol, &reason, Utc::now())
            }
            Ok(Err(err)) => {
                // Unknown or undelivered; never resubmit blindly. The
                // reconciler resolves the record against broker truth.
                warn!(
                    symbol = %record.symbol,
                    error = %err,
                    "Entry submission failed transiently, awaiting reconciliation"
                );
                Ok(())
            }
            Err(_elapsed) => {
                warn!(
                    symbol = %record.symbol,
                    timeout_secs = self.config.engine.submit_timeout_secs,
                    "Entry submission timed out (outcome unknown), awaiting reconciliation"
                );
                Ok(())
            }
        }
    }

    async fn handle_broker_event(&mut self, event: BrokerEvent) -> Result<()> {
        match event {
            BrokerEvent::Fill {
                order_id,
                filled_qty,
                avg_price,
                at,
            } => {
                if let Some(symbol) = self.state.symbol_for_entry_order(&order_id) {
                    let status = self.state.snapshot().trades[&symbol].status;
                    if status == TradeStatus::Submitted {
                        let horizon = Duration::minutes(self.config.engine.hold_minutes);
                        self.state
                            .apply_entry_fill(&symbol, filled_qty, avg_price, at, horizon)?;
                    } else {
                        warn!(symbol, order_id, %status, "Entry fill in unexpected status, ignored");
                    }
                } else if let Some(symbol) = self.state.symbol_for_exit_order(&order_id) {
                    let status = self.state.snapshot().trades[&symbol].status;
                    if status == TradeStatus::Exiting {
                        let pnl = self.state.apply_exit_fill(&symbol, avg_price, at)?;
                        self.track_pnl(pnl);
                    } else {
                        warn!(symbol, order_id, %status, "Exit fill in unexpected status, ignored");
                    }
                } else {
                    debug!(order_id, "Fill for unknown order, ignored");
                }
            }
            BrokerEvent::Rejected { order_id, reason } => {
                if let Some(symbol) = self.state.symbol_for_entry_order(&order_id) {
                    let status = self.state.snapshot().trades[&symbol].status;
                    if status.can_transition_to(TradeStatus::Rejected) {
                        self.state.mark_rejected(&symbol, &reason, Utc::now())?;
                    } else {
                        warn!(symbol, order_id, %status, "Rejection in unexpected status, ignored");
                    }
                } else if let Some(symbol) = self.state.symbol_for_exit_order(&order_id) {
                    // The position is stuck open with a refused close; the
                    // engine will not guess at a different order.
                    error!(symbol, order_id, reason, "Exit order rejected");
                    self.state
                        .mark_orphaned(&symbol, OrphanReason::ExitRejected, Utc::now())?;
                } else {
                    debug!(order_id, "Rejection for unknown order, ignored");
                }
            }
            BrokerEvent::Disconnected => {
                warn!("Broker gateway disconnected, admission paused");
                self.connected = false;
            }
            BrokerEvent::Reconnected => {
                info!("Broker gateway reconnected");
                self.connected = true;
            }
        }
        Ok(())
    }

    async fn handle_exit_tick(&mut self) -> Result<()> {
        let now = Utc::now();

        for symbol in exit::due_for_exit(self.state.snapshot(), now) {
            self.state.schedule_exit(&symbol)?;
        }

        for symbol in exit::pending_issue(self.state.snapshot()) {
            self.issue_exit(&symbol, ExitReason::FixedHorizon).await?;
        }

        Ok(())
    }

    /// Issues the closing order for an `ExitScheduled` record.
    ///
    /// Returns whether an attempt is now in flight. A definite delivery
    /// failure (rejection is the exception, handled as orphan; transport
    /// errors mean the order never reached the broker) leaves the record
    /// in `ExitScheduled` for the next tick; a timeout advances to
    /// `Exiting` with no order id: the attempt was made, its outcome is
    /// unknown, and retrying could double-close.
    async fn issue_exit(&mut self, symbol: &str, reason: ExitReason) -> Result<bool> {
        let Some(record) = self.state.snapshot().trades.get(symbol) else {
            return Ok(false);
        };
        let request = OrderRequest::market(symbol, record.side.closing(), record.filled_quantity);
        let submit_timeout = StdDuration::from_secs(self.config.engine.submit_timeout_secs);

        match timeout(submit_timeout, self.gateway.submit_order(request)).await {
            Ok(Ok(order_id)) => {
                self.state.mark_exiting(symbol, Some(order_id), reason)?;
                Ok(true)
            }
            Ok(Err(GatewayError::Rejected(reject_reason))) => {
                error!(symbol, reason = reject_reason, "Exit order rejected at submission");
                self.state
                    .mark_orphaned(symbol, OrphanReason::ExitRejected, Utc::now())?;
                Ok(false)
            }
            Ok(Err(err)) => {
                warn!(symbol, error = %err, "Exit submission failed, will retry next tick");
                Ok(false)
            }
            Err(_elapsed) => {
                warn!(symbol, "Exit submission timed out (outcome unknown)");
                self.state.mark_exiting(symbol, None, reason)?;
                Ok(true)
            }
        }
    }

    async fn handle_reconcile_tick(&mut self) -> Result<()> {
        let now = Utc::now();
        let call_timeout = StdDuration::from_secs(self.config.engine.submit_timeout_secs);

        let positions = match timeout(call_timeout, self.gateway.list_positions()).await {
            Ok(Ok(positions)) => positions,
            Ok(Err(err)) => {
                warn!(error = %err, "Reconcile pass skipped, broker positions unavailable");
                return Ok(());
            }
            Err(_elapsed) => {
                warn!("Reconcile pass skipped, position fetch timed out");
                return Ok(());
            }
        };

        let equity = match self.gateway.account_equity().await {
            Ok(equity) => Some(equity),
            Err(err) => {
                debug!(error = %err, "Equity refresh failed, keeping cached value");
                None
            }
        };

        let grace = Duration::seconds(self.config.engine.submit_grace_secs as i64);
        let plan = reconciler::plan(self.state.snapshot(), &positions, now, grace);

        for (symbol, resolution) in &plan.resolutions {
            match resolution {
                Resolution::Orphan(reason) => self.state.mark_orphaned(symbol, *reason, now)?,
                Resolution::RejectStale => {
                    self.state
                        .mark_rejected(symbol, "stale submission never took effect", now)?;
                }
            }
        }

        for position in &plan.unmanaged {
            error!(
                symbol = %position.symbol,
                quantity = %position.quantity,
                "Unmanaged broker position detected - will not adopt or flatten"
            );
        }

        self.state.record_reconcile_pass(now, equity)?;
        debug!(
            resolutions = plan.resolutions.len(),
            unmanaged = plan.unmanaged.len(),
            "Reconcile pass complete"
        );
        Ok(())
    }

    /// Operator flatten: closes every `Open`/`ExitScheduled` position and
    /// stops admitting new signals. Returns the number of exits now in
    /// flight.
    async fn flatten(&mut self) -> Result<usize> {
        self.draining = true;

        let candidates: Vec<String> = self
            .state
            .snapshot()
            .trades
            .values()
            .filter(|t| matches!(t.status, TradeStatus::Open | TradeStatus::ExitScheduled))
            .map(|t| t.symbol.clone())
            .collect();

        info!(count = candidates.len(), "Operator flatten requested");

        let mut issued = 0;
        for symbol in candidates {
            if self.state.snapshot().trades[&symbol].status == TradeStatus::Open {
                self.state.schedule_exit(&symbol)?;
            }
            if self.issue_exit(&symbol, ExitReason::OperatorFlatten).await? {
                issued += 1;
            }
        }

        Ok(issued)
    }

    fn track_pnl(&mut self, pnl: Decimal) {
        let today = Utc::now().date_naive();
        if self.pnl_day != today {
            self.pnl_day = today;
            self.realized_pnl_today = Decimal::ZERO;
        }
        self.realized_pnl_today += pnl;
    }

    fn status(&self) -> EngineStatus {
        let snapshot = self.state.snapshot();
        EngineStatus {
            open_positions: snapshot.risk.open_position_count,
            trades_today: snapshot.risk.trades_today,
            trades_remaining: self
                .config
                .risk
                .max_daily_trades
                .saturating_sub(snapshot.risk.trades_today),
            orphaned: snapshot.orphans.len() as u32,
            realized_pnl_today: self.realized_pnl_today,
            account_equity: snapshot.account_equity,
            last_reconciled_at: snapshot.last_reconciled_at,
            gateway_connected: self.connected,
            positions: snapshot
                .trades
                .values()
                .map(|t| PositionSummary {
                    symbol: t.symbol.clone(),
                    status: t.status,
                    quantity: if t.filled_quantity.is_zero() {
                        t.requested_quantity
                    } else {
                        t.filled_quantity
                    },
                    entry_price: t.entry_price,
                    exit_deadline: t.exit_deadline,
                })
                .collect(),
        }
    }
}
