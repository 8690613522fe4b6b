mod core;

pub use core::EnginePhase;
pub(crate) use core::{EngineState, content_hash};
