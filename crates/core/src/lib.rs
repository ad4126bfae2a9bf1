pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod market_hours;
pub mod signal;
pub mod trade;
pub mod traits;

pub use config::{
    AppConfig, BrokerConfig, EngineConfig, MarketHoursConfig, RiskConfig, SignalFeedConfig,
    StoreConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{DenyReason, EngineError, GatewayError};
pub use events::{BrokerEvent, BrokerPosition, OrderRequest, OrderType};
pub use market_hours::MarketHours;
pub use signal::{Fingerprint, Signal};
pub use trade::{ExitReason, OrphanReason, TradeRecord, TradeSide, TradeStatus};
pub use traits::{BrokerGateway, SignalSource};
