use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::shapes::PeakShape;

/// A single parametric reflex.
///
/// `width` is the shape specific width parameter, e.g. `w` in
/// `h * exp(-(x - x0)^2 / w)` for [`PeakShape::Gauss`], not a standard
/// deviation. Use [`Peak::fwhm`] to get a physical width.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Peak {
    pub center: f64,
    pub height: f64,
    pub width: f64,
}

impl Peak {
    pub fn new(center: f64, height: f64, width: f64) -> Self {
        Self {
            center,
            height,
            width,
        }
    }

    /// Whether the peak lies in the physically valid region, with a
    /// positive height and a width above `min_width` (and above zero).
    pub fn is_valid(&self, min_width: f64) -> bool {
        self.height > 0.0 && self.width > 0.0 && self.width >= min_width
    }

    pub fn fwhm(&self, shape: PeakShape) -> f64 {
        shape.fwhm(self.center, self.width)
    }

    pub fn area(&self, shape: PeakShape) -> f64 {
        shape.area(self.center, self.height, self.width)
    }
}

impl fmt::Display for Peak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Peak({}, {}, {})", self.center, self.height, self.width)
    }
}

/// A [`Peak`] as reported by the orchestrator, tagged with the residual
/// standard deviation of the section fit it came from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FittedReflex {
    pub center: f64,
    pub height: f64,
    pub width: f64,
    pub residual_std: f64,
}

impl FittedReflex {
    pub fn new(peak: Peak, residual_std: f64) -> Self {
        Self {
            center: peak.center,
            height: peak.height,
            width: peak.width,
            residual_std,
        }
    }

    pub fn peak(&self) -> Peak {
        Peak::new(self.center, self.height, self.width)
    }

    /// Flatten into `(center, height, width, residual_std)`
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.center, self.height, self.width, self.residual_std)
    }
}

impl From<FittedReflex> for Peak {
    fn from(value: FittedReflex) -> Self {
        value.peak()
    }
}

impl fmt::Display for FittedReflex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "FittedReflex({}, {}, {}, {})",
            self.center, self.height, self.width, self.residual_std
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_validity() {
        assert!(Peak::new(0.3, 1.0, 1e-4).is_valid(0.0));
        assert!(!Peak::new(0.3, 0.0, 1e-4).is_valid(0.0));
        assert!(!Peak::new(0.3, 1.0, -1e-4).is_valid(0.0));
        assert!(!Peak::new(0.3, 1.0, 1e-4).is_valid(1e-3));
    }

    #[test]
    fn test_conversion() {
        let peak = Peak::new(0.25, 3.0, 2e-5);
        let reflex = FittedReflex::new(peak, 0.1);
        assert_eq!(reflex.as_tuple(), (0.25, 3.0, 2e-5, 0.1));
        assert_eq!(Peak::from(reflex), peak);
    }
}
