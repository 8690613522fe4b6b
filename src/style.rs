//! Theming hooks for the isolation boundary.
//!
//! A fixed table of recognized theme keys maps to `--card-*` custom
//! properties on the host. Everything else is ignored: best-effort theming
//! must never break a working card.

use crate::dom::{Document, NodeId};

/// Recognized theme keys and the custom properties they set.
const THEME_KEYS: &[(&str, &str)] = &[
    ("border", "--card-border"),
    ("border-radius", "--card-border-radius"),
    ("hover-color", "--card-hover-color"),
    ("loading-background", "--card-loading-background"),
    ("loading-foreground", "--card-loading-foreground"),
    ("loading-text", "--card-loading-text"),
    ("spinner-size", "--card-spinner-size"),
    ("spinner-color", "--card-spinner-color"),
    ("spinner-speed", "--card-spinner-speed"),
];

/// Base stylesheet installed inside every boundary. Host sizing, border and
/// hover affordance, the loading overlay and spinner, and the content
/// region's identity transform baseline.
pub const BASE_STYLESHEET: &str = "\
:host { display: inline-block; border: var(--card-border, 1px solid #ccc); \
border-radius: var(--card-border-radius, 4px); overflow: hidden; }\n\
:host(:hover) { border-color: var(--card-hover-color, #888); }\n\
.card-loading { position: absolute; inset: 0; display: flex; \
background: var(--card-loading-background, rgba(255,255,255,0.8)); \
color: var(--card-loading-foreground, #333); }\n\
.card-loading.card-hidden { display: none; }\n\
.card-spinner { width: var(--card-spinner-size, 24px); \
height: var(--card-spinner-size, 24px); \
border-color: var(--card-spinner-color, #888); \
animation: card-spin var(--card-spinner-speed, 0.8s) linear infinite; }\n\
.card-content { transform: scale(1); transform-origin: top left; }\n\
.card-img-failed { outline: 1px dashed #c00; }\n";

/// Resolve a theme key to its custom property name.
pub fn property_for(key: &str) -> Option<&'static str> {
    THEME_KEYS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, prop)| *prop)
}

/// Set each recognized variable on the host. Unrecognized keys and blank
/// values are skipped silently; this never errors.
pub fn apply_style_variables<'a, I>(doc: &mut Document, host: NodeId, vars: I)
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    for (key, value) in vars {
        let Some(property) = property_for(key) else {
            continue;
        };
        if value.trim().is_empty() {
            continue;
        }
        doc.set_style(host, property, value.trim());
    }
}
