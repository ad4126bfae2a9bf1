use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub signals: SignalFeedConfig,
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
}

/// Risk admission limits and sizing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_positions: u32,
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    /// Percent of account equity per position (3.0 = 3%).
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: Decimal,
    /// Minimum tradable unit; sizes are floored to a multiple of this.
    #[serde(default = "default_min_lot")]
    pub min_lot: Decimal,
    /// Equity used for sizing until the first gateway refresh.
    #[serde(default = "default_initial_equity")]
    pub initial_equity: Decimal,
}

const fn default_max_concurrent() -> u32 {
    3
}

const fn default_max_daily_trades() -> u32 {
    30
}

fn default_position_size_pct() -> Decimal {
    Decimal::new(3, 0) // 3%
}

fn default_min_lot() -> Decimal {
    Decimal::ONE // whole shares
}

fn default_initial_equity() -> Decimal {
    Decimal::new(50_000, 0)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_positions: default_max_concurrent(),
            max_daily_trades: default_max_daily_trades(),
            position_size_pct: default_position_size_pct(),
            min_lot: default_min_lot(),
            initial_equity: default_initial_equity(),
        }
    }
}

/// Lifecycle engine timers and horizons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fixed holding horizon in minutes; the exit deadline is
    /// entry_time + this, persisted at fill time.
    #[serde(default = "default_hold_minutes")]
    pub hold_minutes: i64,
    #[serde(default = "default_exit_tick_secs")]
    pub exit_tick_secs: u64,
    #[serde(default = "default_reconcile_secs")]
    pub reconcile_secs: u64,
    /// Deadline for a single submit_order call; elapsing it means the
    /// outcome is unknown, not failed.
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    /// Age after which the reconciler resolves a stuck PendingSubmit or
    /// Submitted record against broker truth.
    #[serde(default = "default_submit_grace_secs")]
    pub submit_grace_secs: u64,
    /// Fingerprints older than this are trimmed from the processed set.
    #[serde(default = "default_dedup_retention_days")]
    pub dedup_retention_days: i64,
}

const fn default_hold_minutes() -> i64 {
    10
}

const fn default_exit_tick_secs() -> u64 {
    5
}

const fn default_reconcile_secs() -> u64 {
    300
}

const fn default_submit_timeout_secs() -> u64 {
    15
}

const fn default_submit_grace_secs() -> u64 {
    120
}

const fn default_dedup_retention_days() -> i64 {
    7
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_minutes: default_hold_minutes(),
            exit_tick_secs: default_exit_tick_secs(),
            reconcile_secs: default_reconcile_secs(),
            submit_timeout_secs: default_submit_timeout_secs(),
            submit_grace_secs: default_submit_grace_secs(),
            dedup_retention_days: default_dedup_retention_days(),
        }
    }
}

/// Broker gateway connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Gateway host (use 127.0.0.1, not localhost; TWS may block IPv6).
    #[serde(default = "default_broker_host")]
    pub host: String,
    /// Gateway port (4001 = live, 4002 = paper).
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: i32,
    /// Managed account id; discovered from the gateway when unset.
    #[serde(default)]
    pub account: Option<String>,
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_broker_port() -> u16 {
    4002
}

const fn default_client_id() -> i32 {
    100
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_client_id(),
            account: None,
        }
    }
}

/// State store locations and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Rolling `.bak.N` snapshots kept next to the state file.
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,
    #[serde(default = "default_trade_log")]
    pub trade_log: PathBuf,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data/state/snapshot.json")
}

const fn default_backup_count() -> usize {
    3
}

fn default_trade_log() -> PathBuf {
    PathBuf::from("data/state/trades.jsonl")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            backup_count: default_backup_count(),
            trade_log: default_trade_log(),
        }
    }
}

/// Signal feed adapter settings (the feed itself is an external collaborator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalFeedConfig {
    #[serde(default = "default_signal_dir")]
    pub directory: PathBuf,
    #[serde(default = "default_strategy_name")]
    pub strategy_name: String,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
}

fn default_signal_dir() -> PathBuf {
    PathBuf::from("data/alerts")
}

fn default_strategy_name() -> String {
    "Breaking out on Volume".to_string()
}

fn default_file_prefix() -> String {
    "alertlogging".to_string()
}

const fn default_poll_secs() -> u64 {
    10
}

impl Default for SignalFeedConfig {
    fn default() -> Self {
        Self {
            directory: default_signal_dir(),
            strategy_name: default_strategy_name(),
            file_prefix: default_file_prefix(),
            poll_secs: default_poll_secs(),
        }
    }
}

/// Trading session window; signals outside it are skipped (and left
/// unmarked, so a re-delivery inside the session is processed normally).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHoursConfig {
    #[serde(default = "default_hours_enabled")]
    pub enabled: bool,
    #[serde(default = "default_market_timezone")]
    pub timezone: String,
    /// Session open, HH:MM in the market timezone.
    #[serde(default = "default_session_open")]
    pub open: String,
    /// Session close, HH:MM in the market timezone.
    #[serde(default = "default_session_close")]
    pub close: String,
}

const fn default_hours_enabled() -> bool {
    true
}

fn default_market_timezone() -> String {
    "US/Eastern".to_string()
}

fn default_session_open() -> String {
    "09:30".to_string()
}

fn default_session_close() -> String {
    "16:00".to_string()
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            enabled: default_hours_enabled(),
            timezone: default_market_timezone(),
            open: default_session_open(),
            close: default_session_close(),
        }
    }
}
