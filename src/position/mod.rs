//! Position management module

pub mod exit;
pub mod locks;
pub mod model;
pub mod monitor;
pub mod store;

pub use exit::{ExitEngine, ExitSettings, SellOutcome};
pub use locks::PairLocks;
pub use model::{CloseReason, Position, PositionState};
pub use monitor::{MonitorSettings, PositionMonitor};
pub use store::{JsonPositionStore, PositionStore};
