//! Trading logic: configuration, the position ledger and the risk gate.

mod config;
mod position;
mod risk_manager;

pub use config::{RiskConfig, SignalConfig};
pub use position::{CloseReason, Entry, Exit, PartialExit, Position, TpLevel};
pub use risk_manager::{ClosedTrade, EntryBlock, RiskManager};
