//! Linear value rescaling into the display domain.

use crate::model::BandArray;

/// Upper edge of the byte display domain.
pub const DISPLAY_MAX: f64 = 255.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    pub lo: f64,
    pub hi: f64,
    pub domain_max: f64,
}

impl Rescale {
    pub fn new(lo: f64, hi: f64) -> Self {
        Self {
            lo,
            hi,
            domain_max: DISPLAY_MAX,
        }
    }

    /// Maps `[lo, hi]` onto `[0, domain_max]`, clamping outside values.
    /// A zero-width range and NaN samples map to 0.
    pub fn value(&self, v: f64) -> f64 {
        let span = self.hi - self.lo;
        if v.is_nan() || span == 0.0 {
            return 0.0;
        }
        let clamped = v.clamp(self.lo.min(self.hi), self.lo.max(self.hi));
        ((clamped - self.lo) / span * self.domain_max).clamp(0.0, self.domain_max)
    }

    pub fn apply(&self, band: &BandArray) -> BandArray {
        band.map(|v| self.value(v))
    }
}
