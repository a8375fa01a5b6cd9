//! Closed form reflex peak shapes.
//!
//! Every shape is an even function of the distance `d` between `x` and the
//! peak center, scaled by a width parameter `w`:
//!
//! | Shape | Profile |
//! |---|---|
//! | [`PeakShape::Gauss`] | `h * exp(-d^2 / w)` |
//! | [`PeakShape::Lorentz`] | `h / (1 + d^2 / w)` |
//! | [`PeakShape::PseudoVoigt`] | `h / (1 + d^2 / w)^2` |
//!
//! The angular variants measure `d` between `asin(x)` and `asin(x0)`, for
//! scans over `sin(θ)` whose reflexes are symmetric in angle.
use std::f64::consts::{LN_2, PI, SQRT_2};
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::peak::Peak;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown peak shape {0:?}")]
pub struct UnknownPeakShape(pub String);

/// The radial part of a profile, as a function of `t = d^2 / w`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    Gauss,
    Lorentz,
    SquaredLorentz,
}

impl Kernel {
    #[inline]
    fn value(&self, t: f64) -> f64 {
        match self {
            Self::Gauss => (-t).exp(),
            Self::Lorentz => 1.0 / (1.0 + t),
            Self::SquaredLorentz => (1.0 + t).powi(-2),
        }
    }

    #[inline]
    fn derivative(&self, t: f64) -> f64 {
        match self {
            Self::Gauss => -(-t).exp(),
            Self::Lorentz => -(1.0 + t).powi(-2),
            Self::SquaredLorentz => -2.0 * (1.0 + t).powi(-3),
        }
    }

    /// The `t` at which the kernel drops to one half
    fn half_maximum(&self) -> f64 {
        match self {
            Self::Gauss => LN_2,
            Self::Lorentz => 1.0,
            Self::SquaredLorentz => SQRT_2 - 1.0,
        }
    }

    /// `∫ value(s^2) ds` over the real line
    fn unit_area(&self) -> f64 {
        match self {
            Self::Gauss => PI.sqrt(),
            Self::Lorentz => PI,
            Self::SquaredLorentz => PI / 2.0,
        }
    }
}

/// The peak shape used to model every reflex of a fitting run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PeakShape {
    #[default]
    Gauss,
    Lorentz,
    PseudoVoigt,
    GaussAngular,
    LorentzAngular,
    PseudoVoigtAngular,
}

impl PeakShape {
    pub const ALL: [PeakShape; 6] = [
        Self::Gauss,
        Self::Lorentz,
        Self::PseudoVoigt,
        Self::GaussAngular,
        Self::LorentzAngular,
        Self::PseudoVoigtAngular,
    ];

    pub fn is_angular(&self) -> bool {
        matches!(
            self,
            Self::GaussAngular | Self::LorentzAngular | Self::PseudoVoigtAngular
        )
    }

    fn kernel(&self) -> Kernel {
        match self {
            Self::Gauss | Self::GaussAngular => Kernel::Gauss,
            Self::Lorentz | Self::LorentzAngular => Kernel::Lorentz,
            Self::PseudoVoigt | Self::PseudoVoigtAngular => Kernel::SquaredLorentz,
        }
    }

    #[inline]
    fn transform(&self, value: f64) -> f64 {
        if self.is_angular() {
            value.asin()
        } else {
            value
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gauss => "gauss",
            Self::Lorentz => "lorentz",
            Self::PseudoVoigt => "pseudo_voigt",
            Self::GaussAngular => "gauss_angular",
            Self::LorentzAngular => "lorentz_angular",
            Self::PseudoVoigtAngular => "pseudo_voigt_angular",
        }
    }

    /// The shape's value at `x`
    #[inline]
    pub fn density(&self, x: f64, center: f64, height: f64, width: f64) -> f64 {
        let d = self.transform(x) - self.transform(center);
        height * self.kernel().value(d * d / width)
    }

    pub fn evaluate(&self, xs: &[f64], center: f64, height: f64, width: f64) -> Vec<f64> {
        xs.iter()
            .map(|x| self.density(*x, center, height, width))
            .collect()
    }

    /// The partial derivatives of [`PeakShape::density`] at `x` with respect to
    /// `(center, height, width)`
    #[inline]
    pub fn gradient(&self, x: f64, center: f64, height: f64, width: f64) -> [f64; 3] {
        let kernel = self.kernel();
        let d = self.transform(x) - self.transform(center);
        let t = d * d / width;
        let slope = height * kernel.derivative(t);
        let dcenter = if self.is_angular() {
            1.0 / (1.0 - center * center).sqrt()
        } else {
            1.0
        };
        [
            slope * (-2.0 * d / width) * dcenter,
            kernel.value(t),
            slope * (-d * d / (width * width)),
        ]
    }

    /// The full width at half maximum in `x` units
    pub fn fwhm(&self, center: f64, width: f64) -> f64 {
        let half_width = (self.kernel().half_maximum() * width).sqrt();
        if self.is_angular() {
            2.0 * center.asin().cos() * half_width.sin()
        } else {
            2.0 * half_width
        }
    }

    /// The integrated intensity of the peak over `x`.
    ///
    /// For angular shapes this uses the local Jacobian at the center, which is
    /// accurate while the peak is narrow.
    pub fn area(&self, center: f64, height: f64, width: f64) -> f64 {
        let area = height * width.sqrt() * self.kernel().unit_area();
        if self.is_angular() {
            area * center.asin().cos()
        } else {
            area
        }
    }
}

impl fmt::Display for PeakShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PeakShape {
    type Err = UnknownPeakShape;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .trim()
            .to_ascii_lowercase()
            .replace(|c: char| c == '-' || c == ' ', "_");
        Self::ALL
            .into_iter()
            .find(|shape| shape.name() == key)
            .ok_or_else(|| UnknownPeakShape(s.to_string()))
    }
}

/// A second wavelength component linked to every primary reflex by a fixed
/// position scale and intensity ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Satellite {
    /// `lambda2 / lambda1`
    pub lambda_ratio: f64,
    /// `I2 / I1`
    pub intensity_ratio: f64,
}

impl Satellite {
    pub fn new(lambda_ratio: f64, intensity_ratio: f64) -> Self {
        Self {
            lambda_ratio,
            intensity_ratio,
        }
    }

    /// The satellite reflex of `peak`
    pub fn of(&self, peak: &Peak) -> Peak {
        Peak::new(
            peak.center * self.lambda_ratio,
            peak.height * self.intensity_ratio,
            peak.width * self.lambda_ratio.powi(2),
        )
    }
}

/// The sum of one shape over a list of peaks, each optionally accompanied
/// by its [`Satellite`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompositeShape {
    pub shape: PeakShape,
    pub satellite: Option<Satellite>,
}

impl CompositeShape {
    pub fn new(shape: PeakShape, satellite: Option<Satellite>) -> Self {
        Self { shape, satellite }
    }

    /// The total intensity carried by a primary reflex and its satellite,
    /// relative to the primary alone
    pub fn intensity_share(&self) -> f64 {
        1.0 + self.satellite.map(|s| s.intensity_ratio).unwrap_or_default()
    }

    #[inline]
    fn peak_density(&self, x: f64, peak: &Peak) -> f64 {
        let mut value = self.shape.density(x, peak.center, peak.height, peak.width);
        if let Some(satellite) = self.satellite {
            let sat = satellite.of(peak);
            value += self.shape.density(x, sat.center, sat.height, sat.width);
        }
        value
    }

    pub fn density(&self, x: f64, peaks: &[Peak]) -> f64 {
        peaks.iter().map(|p| self.peak_density(x, p)).sum()
    }

    pub fn predict(&self, xs: &[f64], peaks: &[Peak]) -> Vec<f64> {
        xs.iter().map(|x| self.density(*x, peaks)).collect()
    }

    /// The partial derivatives at `x` with respect to one primary peak's
    /// `(center, height, width)`, including its satellite's contribution
    pub fn peak_gradient(&self, x: f64, peak: &Peak) -> [f64; 3] {
        let mut grad = self.shape.gradient(x, peak.center, peak.height, peak.width);
        if let Some(satellite) = self.satellite {
            let sat = satellite.of(peak);
            let sat_grad = self.shape.gradient(x, sat.center, sat.height, sat.width);
            grad[0] += sat_grad[0] * satellite.lambda_ratio;
            grad[1] += sat_grad[1] * satellite.intensity_ratio;
            grad[2] += sat_grad[2] * satellite.lambda_ratio.powi(2);
        }
        grad
    }

    /// Sum of squared residuals of `peaks` against `(x, y)`
    pub fn squared_error(&self, x: &[f64], y: &[f64], peaks: &[Peak]) -> f64 {
        x.iter()
            .zip(y.iter())
            .map(|(x, y)| (y - self.density(*x, peaks)).powi(2))
            .sum()
    }
}
