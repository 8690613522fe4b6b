//! Natural-size measurement of rendered content.
//!
//! The host document is headless, so measurement is a deterministic layout
//! pass over the arena: text advances at a fixed character cell, inline
//! elements flow on a line, block elements stack. The result is the
//! natural bounding box of a subtree at identity transform.

use unicode_width::UnicodeWidthStr;

use crate::dom::{Document, ImageState, NodeId, NodeKind};
use crate::geometry::Size;

/// Logical pixel advance of one character cell.
pub const CHAR_WIDTH: f64 = 8.0;

/// Logical pixel height of one text line.
pub const LINE_HEIGHT: f64 = 16.0;

const INLINE_TAGS: &[&str] = &["a", "b", "em", "i", "img", "span", "strong", "u"];

fn is_inline(doc: &Document, id: NodeId) -> bool {
    match doc.node(id).map(|node| &node.kind) {
        Some(NodeKind::Text(_)) => true,
        Some(NodeKind::Element { tag, .. }) => INLINE_TAGS.contains(&tag.as_str()),
        None => false,
    }
}

/// Display width of `text` in logical pixels, widest line wins.
pub fn text_width(text: &str) -> f64 {
    text.lines()
        .map(|line| UnicodeWidthStr::width(line) as f64 * CHAR_WIDTH)
        .fold(0.0, f64::max)
}

fn text_height(text: &str) -> f64 {
    let lines = text.lines().count().max(1);
    lines as f64 * LINE_HEIGHT
}

fn image_size(doc: &Document, id: NodeId) -> Size {
    match doc.image_state(id) {
        Some(ImageState::Loaded(natural)) => natural,
        _ => {
            // Unsettled or failed: fall back to declared dimensions.
            let width = attr_px(doc, id, "width");
            let height = attr_px(doc, id, "height");
            Size::new(width, height)
        }
    }
}

fn attr_px(doc: &Document, id: NodeId, name: &str) -> f64 {
    doc.attr(id, name)
        .and_then(|value| value.trim().trim_end_matches("px").parse::<f64>().ok())
        .filter(|px| px.is_finite() && *px >= 0.0)
        .unwrap_or(0.0)
}

/// Natural bounding box of the subtree rooted at `root` (children only,
/// the way a content region wraps author markup).
pub fn natural_size(doc: &Document, root: NodeId) -> Size {
    measure_children(doc, root)
}

fn measure_children(doc: &Document, parent: NodeId) -> Size {
    let mut width: f64 = 0.0;
    let mut height: f64 = 0.0;
    // Accumulates the current run of inline siblings.
    let mut line_width: f64 = 0.0;
    let mut line_height: f64 = 0.0;

    for &child in doc.children(parent) {
        if is_inline(doc, child) {
            let child_size = measure_node(doc, child);
            line_width += child_size.width;
            line_height = line_height.max(child_size.height);
        } else {
            if line_width > 0.0 {
                width = width.max(line_width);
                height += line_height;
                line_width = 0.0;
                line_height = 0.0;
            }
            let child_size = measure_node(doc, child);
            width = width.max(child_size.width);
            height += child_size.height;
        }
    }

    if line_width > 0.0 {
        width = width.max(line_width);
        height += line_height;
    }

    Size::new(width, height)
}

fn measure_node(doc: &Document, id: NodeId) -> Size {
    match doc.node(id).map(|node| &node.kind) {
        Some(NodeKind::Text(text)) => Size::new(text_width(text), text_height(text)),
        Some(NodeKind::Element { tag, image, .. }) => {
            if image.is_some() {
                return image_size(doc, id);
            }
            if tag == "br" {
                return Size::new(0.0, LINE_HEIGHT);
            }
            let inner = measure_children(doc, id);
            if inner.is_empty() && doc.children(id).is_empty() {
                // Empty block elements still occupy a line.
                return Size::new(0.0, if is_inline(doc, id) { 0.0 } else { LINE_HEIGHT });
            }
            inner
        }
        None => Size::ZERO,
    }
}
