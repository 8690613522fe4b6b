//! Isolation boundary: the encapsulated rendering root of a card.
//!
//! The boundary owns four handles into the arena: the host element, the
//! injected stylesheet, the loading overlay, and the content region that
//! author markup renders into. Outer styles cannot reach inside except
//! through the `--card-*` custom-property hooks.

use crate::config::CardOptions;
use crate::dom::{Document, NodeId, parse_into};
use crate::error::Result;
use crate::geometry::Size;
use crate::sanitize::AllowList;
use crate::style::{BASE_STYLESHEET, apply_style_variables};

/// Class toggled on the overlay while it is not visible.
pub const HIDDEN_CLASS: &str = "card-hidden";

/// Marker class applied to images whose load failed.
pub const IMG_FAILED_CLASS: &str = "card-img-failed";

/// Node handles for one card's rendering root.
#[derive(Debug, Clone, Copy)]
pub struct Boundary {
    pub host: NodeId,
    pub style: NodeId,
    pub overlay: NodeId,
    pub content: NodeId,
}

impl Boundary {
    /// Construct the rendering root for validated options: host element,
    /// base stylesheet plus author css, loading overlay (visible until the
    /// first resize settles), and the content region at its fixed logical
    /// width with an identity transform baseline.
    pub fn build(doc: &mut Document, options: &CardOptions) -> Result<Self> {
        let host = doc.create_element("card-host");
        doc.set_style(host, "width", format!("{}px", options.target_width));

        let style = doc.create_element("card-style");
        let css_text = doc.create_text(format!("{}{}", BASE_STYLESHEET, options.css));
        doc.append_child(style, css_text);
        doc.append_child(host, style);

        let overlay = doc.create_element("card-overlay");
        doc.add_class(overlay, "card-loading");
        let spinner = doc.create_element("card-spinner");
        doc.add_class(spinner, "card-spinner");
        doc.append_child(overlay, spinner);
        doc.append_child(host, overlay);

        let content = doc.create_element("card-content");
        doc.add_class(content, "card-content");
        doc.set_style(content, "width", format!("{}px", options.target_width));
        doc.set_style(content, "transform", "scale(1)");
        doc.set_style(content, "transform-origin", "top left");
        doc.append_child(host, content);

        let boundary = Self {
            host,
            style,
            overlay,
            content,
        };
        apply_style_variables(
            doc,
            host,
            options.styles.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );
        Ok(boundary)
    }

    /// Best-effort theming; unrecognized keys are ignored, never errors.
    pub fn apply_style_variables<'a, I>(&self, doc: &mut Document, vars: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        apply_style_variables(doc, self.host, vars);
    }

    /// Replace the stylesheet text. `reset` drops previously appended
    /// author css, otherwise the new rules are appended.
    pub fn set_style_text(&self, doc: &mut Document, css: &str, reset: bool) {
        let current = self
            .style_text_node(doc)
            .and_then(|id| doc.text(id).map(str::to_string));
        let next = if reset {
            format!("{}{}", BASE_STYLESHEET, css)
        } else {
            format!("{}{}", current.unwrap_or_else(|| BASE_STYLESHEET.to_string()), css)
        };
        match self.style_text_node(doc) {
            Some(id) => doc.set_text(id, next),
            None => {
                let id = doc.create_text(next);
                doc.append_child(self.style, id);
            }
        }
    }

    fn style_text_node(&self, doc: &Document) -> Option<NodeId> {
        doc.children(self.style).first().copied()
    }

    /// Swap the content region's markup. All-or-nothing: parsing happens in
    /// a scratch node and the region is only cleared on success.
    pub fn set_markup(&self, doc: &mut Document, html: &str, allow: &AllowList) -> Result<()> {
        let scratch = doc.create_element("card-scratch");
        if let Err(err) = parse_into(doc, scratch, html, allow) {
            doc.remove_subtree(scratch);
            return Err(err);
        }
        doc.clear_children(self.content);
        let parsed: Vec<NodeId> = doc.children(scratch).to_vec();
        for node in parsed {
            doc.append_child(self.content, node);
        }
        doc.remove_subtree(scratch);
        Ok(())
    }

    /// Write field data into matching `data-field` slots. Returns whether
    /// any slot matched.
    pub fn apply_field(&self, doc: &mut Document, key: &str, value: &str) -> bool {
        let mut applied = false;
        for node in doc.descendants(self.content) {
            if doc.attr(node, "data-field") == Some(key) {
                set_element_text(doc, node, value);
                applied = true;
            }
        }
        applied
    }

    pub fn show_overlay(&self, doc: &mut Document) {
        doc.remove_class(self.overlay, HIDDEN_CLASS);
    }

    pub fn hide_overlay(&self, doc: &mut Document) {
        doc.add_class(self.overlay, HIDDEN_CLASS);
    }

    pub fn overlay_visible(&self, doc: &Document) -> bool {
        !doc.has_class(self.overlay, HIDDEN_CLASS)
    }

    /// Set the host's outer width immediately so layout stabilizes before
    /// measurement.
    pub fn set_host_width(&self, doc: &mut Document, width: f64) {
        doc.set_style(self.host, "width", format!("{}px", width));
    }

    pub fn set_host_height(&self, doc: &mut Document, height: f64) {
        doc.set_style(self.host, "height", format!("{}px", height));
    }

    /// Apply the computed scale: transform on the content region plus the
    /// reverse-computed layout width, so the rendered width equals the
    /// target after the transform shrinks the box.
    pub fn apply_scale(&self, doc: &mut Document, scale: f64, target_width: f64, natural: Size) {
        let layout_width = (target_width / scale).round();
        let scaled_height = (natural.height * scale).round();
        doc.set_style(self.content, "width", format!("{}px", layout_width));
        doc.set_style(self.content, "transform", format!("scale({})", scale));
        self.set_host_height(doc, scaled_height);
    }

    /// Reset the content transform to identity for measurement.
    pub fn reset_transform(&self, doc: &mut Document) {
        doc.set_style(self.content, "transform", "scale(1)");
    }

    /// Classify a pointer hit by walking from the target toward the content
    /// root; the nearest matching ancestor wins. Non-editable cards keep
    /// interior elements inert, so everything classifies as background.
    pub fn delegated_click(&self, doc: &Document, target: NodeId, editable: bool) -> ClickTarget {
        if !editable {
            return ClickTarget::Background;
        }
        for node in doc.ancestors_inclusive(target) {
            if node == self.content || node == self.host {
                break;
            }
            if doc.image_state(node).is_some() {
                let key = doc
                    .attr(node, "data-key")
                    .or_else(|| doc.attr(node, "src"))
                    .unwrap_or_default()
                    .to_string();
                return ClickTarget::Image { key, node };
            }
            if let Some(field) = doc.attr(node, "data-field") {
                return ClickTarget::Field {
                    key: field.to_string(),
                    node,
                };
            }
        }
        ClickTarget::Background
    }
}

/// Result of delegated hit-testing inside the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickTarget {
    Image { key: String, node: NodeId },
    Field { key: String, node: NodeId },
    Background,
}

fn set_element_text(doc: &mut Document, element: NodeId, value: &str) {
    if let Some(&first) = doc.children(element).first() {
        if doc.text(first).is_some() {
            doc.set_text(first, value);
            return;
        }
    }
    doc.clear_children(element);
    let text = doc.create_text(value);
    doc.append_child(element, text);
}
