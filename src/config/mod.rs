mod core;

pub use core::{CardOptions, HostConfig, ResizeBounds, validate_options};
