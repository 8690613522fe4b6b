mod types;

pub use types::{CardError, Result};
