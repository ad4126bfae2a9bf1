pub mod snapshot;
pub mod store;
pub mod trade_log;

pub use snapshot::{AlertRecord, Disposition, ProcessedAlertSet, RiskCounters, StateSnapshot};
pub use store::SnapshotStore;
pub use trade_log::{TradeClosedEvent, TradeLog};
