//! Runtime wiring: spawns the actor and the auxiliary tasks that feed it.
//!
//! The auxiliary tasks (timer ticks, broker event pump, signal poll loop)
//! never touch state themselves; they only enqueue commands. Each loop
//! exits when the actor's queue closes.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use alert_trade_core::{AppConfig, BrokerGateway, SignalSource};
use alert_trade_store::{SnapshotStore, TradeLog};

use crate::actor::EngineActor;
use crate::commands::EngineCommand;
use crate::handle::EngineHandle;
use crate::lifecycle::EngineState;

/// A running engine: the actor plus its feeder tasks.
#[derive(Debug)]
pub struct EngineRuntime {
    handle: EngineHandle,
    actor_task: JoinHandle<Result<()>>,
}

impl EngineRuntime {
    /// Loads state and starts the engine.
    ///
    /// # Errors
    ///
    /// Fails if the persisted snapshot exists but is corrupt
    /// ([`alert_trade_core::EngineError::StateCorruption`]; trading on
    /// unverified state is refused), or if configuration is invalid.
    pub fn start(config: AppConfig, gateway: Arc<dyn BrokerGateway>) -> Result<Self> {
        let store = SnapshotStore::new(config.store.state_file.clone(), config.store.backup_count);
        let trade_log = TradeLog::new(config.store.trade_log.clone());

        let state = EngineState::load_or_init(
            store,
            trade_log,
            config.risk.initial_equity,
            config.engine.dedup_retention_days,
        )
        .context("refusing to start on unverified state")?;

        let (tx, rx) = mpsc::channel(256);
        let actor = EngineActor::new(rx, state, gateway.clone(), config.clone())?;
        let actor_task = tokio::spawn(actor.run());

        Self::spawn_broker_pump(gateway.subscribe(), tx.clone());
        Self::spawn_ticker(
            tx.clone(),
            Duration::from_secs(config.engine.exit_tick_secs),
            || EngineCommand::ExitTick,
        );
        Self::spawn_ticker(
            tx.clone(),
            Duration::from_secs(config.engine.reconcile_secs),
            || EngineCommand::ReconcileTick,
        );

        Ok(Self {
            handle: EngineHandle::new(tx),
            actor_task,
        })
    }

    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Waits for the actor to finish (after [`EngineHandle::shutdown`]).
    ///
    /// # Errors
    /// Surfaces a fatal actor error (e.g. a failed snapshot write).
    pub async fn join(self) -> Result<()> {
        self.actor_task.await.context("engine actor panicked")?
    }

    /// Forwards broker events into the command queue.
    fn spawn_broker_pump(
        mut events: broadcast::Receiver<alert_trade_core::BrokerEvent>,
        tx: mpsc::Sender<EngineCommand>,
    ) {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if tx.send(EngineCommand::Broker(event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Dropped events are recovered by reconciliation.
                        warn!(missed, "Broker event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_ticker(
        tx: mpsc::Sender<EngineCommand>,
        period: Duration,
        make: impl Fn() -> EngineCommand + Send + 'static,
    ) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // Swallow the interval's immediate first fire: the first real
            // tick lands one period after startup. Deadlines missed while
            // the process was down are still caught then.
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(make()).await.is_err() {
                    break;
                }
            }
        });
    }
}

/// Polls the signal source and feeds batches to the engine, in arrival
/// order. Returns when the engine shuts down.
pub async fn run_signal_loop(
    handle: EngineHandle,
    mut source: Box<dyn SignalSource>,
    poll_interval: Duration,
) {
    info!(poll_secs = poll_interval.as_secs(), "Signal loop started");
    let mut interval = tokio::time::interval(poll_interval);

    loop {
        interval.tick().await;

        let batch = match source.next_batch().await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "Signal source poll failed");
                continue;
            }
        };

        for signal in batch {
            if handle.signal(signal).await.is_err() {
                info!("Engine closed, signal loop stopping");
                return;
            }
        }
    }
}
