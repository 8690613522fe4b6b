mod core;

pub use core::{Boundary, ClickTarget, HIDDEN_CLASS, IMG_FAILED_CLASS};
