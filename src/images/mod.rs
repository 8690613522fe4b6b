mod core;

pub use core::{SettlementReport, SettlementTracker, SettlementWait};
