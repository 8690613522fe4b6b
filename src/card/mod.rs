mod core;

pub use core::{Card, CardId};
pub(crate) use core::{CardState, PendingWait};
