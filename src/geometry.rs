/// Size in logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub const ZERO: Self = Self::new(0.0, 0.0);

    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Usability floor for the content scale: cards never shrink below this.
pub const MIN_SCALE: f64 = 0.2;

/// Cards are never upscaled past their natural size.
pub const MAX_SCALE: f64 = 1.0;

/// Scale factor that makes `natural_width` fit `target_width`, clamped to
/// `[MIN_SCALE, MAX_SCALE]`. Non-finite or non-positive ratios fall back
/// to identity so a broken measurement never produces a broken card.
pub fn fit_scale(target_width: f64, natural_width: f64) -> f64 {
    let raw = target_width / natural_width;
    if !raw.is_finite() || raw <= 0.0 {
        return MAX_SCALE;
    }
    raw.clamp(MIN_SCALE, MAX_SCALE)
}
