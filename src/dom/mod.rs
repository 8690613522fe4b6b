mod core;
mod markup;

pub use core::{Document, ImageState, Node, NodeId, NodeKind};
pub use markup::parse_into;
