use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{CardError, Result};
use crate::logging::Logger;
use crate::metrics::RuntimeMetrics;

/// Inclusive range a resize target width is allowed to take.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeBounds {
    pub min: f64,
    pub max: f64,
}

impl Default for ResizeBounds {
    fn default() -> Self {
        Self {
            min: 160.0,
            max: 1200.0,
        }
    }
}

impl ResizeBounds {
    pub fn contains(&self, width: f64) -> bool {
        width.is_finite() && width >= self.min && width <= self.max
    }
}

/// Per-card configuration. Every card gets its own value; there is no
/// shared mutable default across instances.
#[derive(Debug, Clone)]
pub struct CardOptions {
    /// Width in logical pixels the scaled content should occupy.
    pub target_width: f64,
    /// Author markup rendered inside the isolation boundary.
    pub html: String,
    /// Author stylesheet appended to the boundary base styles.
    pub css: String,
    /// Initial field data applied to `data-field` slots in the markup.
    pub data: BTreeMap<String, String>,
    /// Whether interior fields and images receive pointer events.
    pub editable: bool,
    /// Theme variables applied at construction. Unrecognized keys are
    /// ignored downstream, never rejected here.
    pub styles: BTreeMap<String, String>,
}

impl Default for CardOptions {
    fn default() -> Self {
        Self {
            target_width: 160.0,
            html: String::new(),
            css: String::new(),
            data: BTreeMap::new(),
            editable: false,
            styles: BTreeMap::new(),
        }
    }
}

impl CardOptions {
    pub fn with_target_width(mut self, width: f64) -> Self {
        self.target_width = width;
        self
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    pub fn with_css(mut self, css: impl Into<String>) -> Self {
        self.css = css.into();
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_style(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.styles.insert(key.into(), value.into());
        self
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = editable;
        self
    }
}

/// Runtime-wide knobs for the card host.
#[derive(Clone)]
pub struct HostConfig {
    /// Allowed range for resize target widths.
    pub resize_bounds: ResizeBounds,
    /// Delay after the most recent resize request before work begins.
    pub debounce: Duration,
    /// Upper bound on waiting for image settlement during a resize pass.
    pub image_timeout: Duration,
    /// Virtual-time distance to the next paint opportunity.
    pub frame_interval: Duration,
    /// Optional structured logger used by the runtime.
    pub logger: Option<Logger>,
    /// Metrics accumulator used for periodic snapshots.
    pub metrics: Option<Arc<Mutex<RuntimeMetrics>>>,
    /// Interval between metrics snapshot emissions. Zero disables snapshots.
    pub metrics_interval: Duration,
    /// Target field used when emitting metrics snapshots.
    pub metrics_target: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            resize_bounds: ResizeBounds::default(),
            debounce: Duration::from_millis(50),
            image_timeout: Duration::from_secs(5),
            frame_interval: Duration::from_millis(16),
            logger: None,
            metrics: None,
            metrics_interval: Duration::from_secs(5),
            metrics_target: "card::runtime.metrics".to_string(),
        }
    }
}

impl HostConfig {
    /// Enable metrics collection if it has not already been configured.
    pub fn enable_metrics(&mut self) {
        if self.metrics.is_none() {
            self.metrics = Some(Arc::new(Mutex::new(RuntimeMetrics::new())));
        }
    }

    pub fn disable_metrics(&mut self) {
        self.metrics = None;
    }

    pub fn metrics_handle(&self) -> Option<Arc<Mutex<RuntimeMetrics>>> {
        self.metrics.as_ref().map(Arc::clone)
    }
}

/// Fail-fast shape check for constructor input. Pure: no document access,
/// no defaulting beyond what `CardOptions::default` already did.
pub fn validate_options(options: &CardOptions, bounds: &ResizeBounds) -> Result<()> {
    if !options.target_width.is_finite() {
        return Err(CardError::validation(
            "target_width",
            format!("must be a finite number, got {}", options.target_width),
        ));
    }
    if options.target_width <= 0.0 {
        return Err(CardError::validation(
            "target_width",
            format!("must be positive, got {}", options.target_width),
        ));
    }
    if !bounds.contains(options.target_width) {
        return Err(CardError::validation(
            "target_width",
            format!(
                "{} is outside the allowed range [{}, {}]",
                options.target_width, bounds.min, bounds.max
            ),
        ));
    }
    if options.data.keys().any(|key| key.trim().is_empty()) {
        return Err(CardError::validation("data", "field names must be non-empty"));
    }
    Ok(())
}
