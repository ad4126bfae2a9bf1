pub mod actor;
pub mod admission;
pub mod commands;
pub mod dedup;
pub mod exit;
pub mod handle;
pub mod lifecycle;
pub mod reconciler;
pub mod runtime;

pub use actor::EngineActor;
pub use admission::Admission;
pub use commands::{EngineCommand, EngineStatus, PositionSummary};
pub use dedup::DedupVerdict;
pub use handle::EngineHandle;
pub use lifecycle::EngineState;
pub use reconciler::{ReconcilePlan, Resolution};
pub use runtime::{run_signal_loop, EngineRuntime};
