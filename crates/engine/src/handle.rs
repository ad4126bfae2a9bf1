use anyhow::Result;
use tokio::sync::{mpsc, oneshot};

use alert_trade_core::Signal;

use crate::commands::{EngineCommand, EngineStatus};

/// Clonable handle for feeding and controlling the engine actor.
#[derive(Clone, Debug)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<EngineCommand> {
        self.tx.clone()
    }

    /// Enqueues a raw signal for processing.
    ///
    /// # Errors
    /// Returns an error if the engine has shut down.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        self.tx.send(EngineCommand::Signal(signal)).await?;
        Ok(())
    }

    /// Forces an exit-deadline check outside the regular tick.
    ///
    /// # Errors
    /// Returns an error if the engine has shut down.
    pub async fn tick_exits(&self) -> Result<()> {
        self.tx.send(EngineCommand::ExitTick).await?;
        Ok(())
    }

    /// Forces a reconciliation pass outside the regular tick.
    ///
    /// # Errors
    /// Returns an error if the engine has shut down.
    pub async fn reconcile_now(&self) -> Result<()> {
        self.tx.send(EngineCommand::ReconcileTick).await?;
        Ok(())
    }

    /// Fetches the current status. Because commands are processed in
    /// order, this also acts as a barrier for previously sent commands.
    ///
    /// # Errors
    /// Returns an error if the engine has shut down.
    pub async fn status(&self) -> Result<EngineStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(EngineCommand::GetStatus(tx)).await?;
        Ok(rx.await?)
    }

    /// Closes all open positions; returns the number of close orders issued.
    ///
    /// # Errors
    /// Returns an error if the engine has shut down.
    pub async fn flatten(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Flatten(tx)).await?;
        Ok(rx.await?)
    }

    /// Drains the engine to a persisted state and stops it.
    ///
    /// # Errors
    /// Returns an error if the engine has already shut down.
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(EngineCommand::Shutdown(tx)).await?;
        rx.await?;
        Ok(())
    }
}
