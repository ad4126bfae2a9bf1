use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

mod csv_source;

use csv_source::CsvSignalSource;

#[derive(Parser)]
#[command(name = "alert-trade")]
#[command(about = "Breakout alert trading engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against the CSV alert feed (paper gateway; a live
    /// brokerage plugs in through the BrokerGateway trait)
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Close all open positions before exiting on shutdown
        #[arg(long)]
        flatten_on_exit: bool,
    },
    /// Close all open positions recorded in the snapshot, then exit
    Flatten {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
    /// Print the persisted engine state (read-only)
    Status {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            flatten_on_exit,
        } => run_engine(&config, flatten_on_exit).await?,
        Commands::Flatten { config } => run_flatten(&config).await?,
        Commands::Status { config } => print_status(&config)?,
    }

    Ok(())
}

async fn run_engine(config_path: &str, flatten_on_exit: bool) -> anyhow::Result<()> {
    let config = alert_trade_core::ConfigLoader::load_from(config_path)?;

    tracing::info!(
        max_positions = config.risk.max_concurrent_positions,
        max_daily = config.risk.max_daily_trades,
        hold_minutes = config.engine.hold_minutes,
        state_file = %config.store.state_file.display(),
        "Starting alert trading engine"
    );

    let gateway = Arc::new(alert_trade_gateway_sim::SimGateway::new(
        config.risk.initial_equity,
    ));

    let runtime = alert_trade_engine::EngineRuntime::start(config.clone(), gateway)?;
    let handle = runtime.handle();

    let source = Box::new(CsvSignalSource::new(config.signals.clone()));
    let signal_task = tokio::spawn(alert_trade_engine::run_signal_loop(
        handle.clone(),
        source,
        Duration::from_secs(config.signals.poll_secs),
    ));

    wait_for_shutdown_signal().await;

    if flatten_on_exit {
        tracing::info!("Flattening all positions before exit");
        match handle.flatten().await {
            Ok(issued) => tracing::info!(issued, "Flatten complete"),
            Err(e) => tracing::error!(error = %e, "Flatten failed"),
        }
    }

    handle.shutdown().await?;
    signal_task.abort();
    runtime.join().await?;

    tracing::info!("Engine stopped");
    Ok(())
}

async fn run_flatten(config_path: &str) -> anyhow::Result<()> {
    let config = alert_trade_core::ConfigLoader::load_from(config_path)?;

    let gateway = Arc::new(alert_trade_gateway_sim::SimGateway::new(
        config.risk.initial_equity,
    ));
    let runtime = alert_trade_engine::EngineRuntime::start(config, gateway)?;
    let handle = runtime.handle();

    // Reconcile first so the flatten acts on broker truth, not stale belief.
    handle.reconcile_now().await?;
    let issued = handle.flatten().await?;
    tracing::info!(issued, "Issued close orders");

    handle.shutdown().await?;
    runtime.join().await?;
    Ok(())
}

fn print_status(config_path: &str) -> anyhow::Result<()> {
    let config = alert_trade_core::ConfigLoader::load_from(config_path)?;
    let store = alert_trade_store::SnapshotStore::new(
        config.store.state_file.clone(),
        config.store.backup_count,
    );

    let Some(snapshot) = store.load()? else {
        println!("No snapshot at {}", config.store.state_file.display());
        return Ok(());
    };

    println!("State: {}", config.store.state_file.display());
    println!(
        "Day {} | trades today: {}/{} | open: {}/{} | equity: {}",
        snapshot.risk.trading_day,
        snapshot.risk.trades_today,
        config.risk.max_daily_trades,
        snapshot.risk.open_position_count,
        config.risk.max_concurrent_positions,
        snapshot.account_equity,
    );
    println!(
        "Last reconciled: {}",
        snapshot
            .last_reconciled_at
            .map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
    );
    println!("Processed alerts: {}", snapshot.processed_alerts.len());

    if !snapshot.trades.is_empty() {
        println!("\nLive trades:");
        for trade in snapshot.trades.values() {
            println!(
                "  {:<8} {:<14} qty {:>8}  entry {}  deadline {}",
                trade.symbol,
                trade.status,
                trade.filled_quantity,
                trade
                    .entry_price
                    .map_or_else(|| "-".to_string(), |p| p.to_string()),
                trade
                    .exit_deadline
                    .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
            );
        }
    }

    if !snapshot.orphans.is_empty() {
        println!("\nOrphaned (operator attention required):");
        for trade in &snapshot.orphans {
            println!(
                "  {:<8} qty {:>8}  reason {}",
                trade.symbol,
                trade.filled_quantity,
                trade
                    .orphan_reason
                    .map_or_else(|| "-".to_string(), |r| r.to_string()),
            );
        }
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("Failed to create SIGTERM handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("Failed to create SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
    }
}
