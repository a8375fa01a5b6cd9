//! Wavelengths and the conversions between a diffractometer's native axis
//! and the `sin(θ)` or `q` axes the fitter works on.
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::shapes::Satellite;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WavelengthError {
    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },
    #[error("{name} must not be negative, got {value}")]
    NegativeIntensity { name: &'static str, value: f64 },
    #[error("{0} is missing its counterpart")]
    IncompleteLine(&'static str),
}

/// The radiation of a scan: a primary wavelength and up to two weaker
/// lines, in Ångström
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Wavelength {
    pub lambda1: f64,
    pub lambda2: Option<f64>,
    /// The intensity of the second line relative to the first
    pub intensity_ratio_2: Option<f64>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub lambda3: Option<f64>,
    /// The intensity of the third line relative to the first
    #[cfg_attr(feature = "serde", serde(default))]
    pub intensity_ratio_3: Option<f64>,
}

impl Wavelength {
    /// Copper Kα1/Kα2
    pub const CU_K_ALPHA: Wavelength = Wavelength {
        lambda1: 1.540562,
        lambda2: Some(1.544390),
        intensity_ratio_2: Some(0.5),
        lambda3: None,
        intensity_ratio_3: None,
    };

    /// Cobalt Kα1/Kα2
    pub const CO_K_ALPHA: Wavelength = Wavelength {
        lambda1: 1.788965,
        lambda2: Some(1.792850),
        intensity_ratio_2: Some(0.5),
        lambda3: None,
        intensity_ratio_3: None,
    };

    /// Molybdenum Kα1/Kα2
    pub const MO_K_ALPHA: Wavelength = Wavelength {
        lambda1: 0.709300,
        lambda2: Some(0.713590),
        intensity_ratio_2: Some(0.5),
        lambda3: None,
        intensity_ratio_3: None,
    };

    pub fn new(lambda1: f64) -> Self {
        Self {
            lambda1,
            lambda2: None,
            intensity_ratio_2: None,
            lambda3: None,
            intensity_ratio_3: None,
        }
    }

    pub fn with_second_line(mut self, lambda2: f64, intensity_ratio_2: f64) -> Self {
        self.lambda2 = Some(lambda2);
        self.intensity_ratio_2 = Some(intensity_ratio_2);
        self
    }

    pub fn with_third_line(mut self, lambda3: f64, intensity_ratio_3: f64) -> Self {
        self.lambda3 = Some(lambda3);
        self.intensity_ratio_3 = Some(intensity_ratio_3);
        self
    }

    /// The satellite every reflex of this radiation carries, when a second
    /// line is present. The third line only enters [`Wavelength::effective`].
    pub fn satellite(&self) -> Option<Satellite> {
        match (self.lambda2, self.intensity_ratio_2) {
            (Some(lambda2), Some(ratio)) => Some(Satellite::new(lambda2 / self.lambda1, ratio)),
            _ => None,
        }
    }

    fn extra_lines(&self) -> impl Iterator<Item = (f64, f64)> {
        [
            (self.lambda2, self.intensity_ratio_2),
            (self.lambda3, self.intensity_ratio_3),
        ]
        .into_iter()
        .filter_map(|line| match line {
            (Some(lambda), Some(ratio)) => Some((lambda, ratio)),
            _ => None,
        })
    }

    /// The intensity weighted mean wavelength over every complete line
    pub fn effective(&self) -> f64 {
        let mut weight = 1.0;
        let mut mean = self.lambda1;
        for (lambda, ratio) in self.extra_lines() {
            weight += ratio;
            mean += (lambda - mean) * ratio / weight;
        }
        mean
    }

    /// Describe what makes this wavelength unusable, if anything
    pub fn check(&self) -> Result<(), WavelengthError> {
        if !(self.lambda1 > 0.0) {
            return Err(WavelengthError::NotPositive {
                name: "lambda1",
                value: self.lambda1,
            });
        }
        let lines = [
            ("lambda2", "intensity_ratio_2", self.lambda2, self.intensity_ratio_2),
            ("lambda3", "intensity_ratio_3", self.lambda3, self.intensity_ratio_3),
        ];
        for (lambda_name, ratio_name, lambda, ratio) in lines {
            match (lambda, ratio) {
                (None, None) => {}
                (Some(lambda), Some(ratio)) => {
                    if !(lambda > 0.0) {
                        return Err(WavelengthError::NotPositive {
                            name: lambda_name,
                            value: lambda,
                        });
                    }
                    if !(ratio >= 0.0) {
                        return Err(WavelengthError::NegativeIntensity {
                            name: ratio_name,
                            value: ratio,
                        });
                    }
                }
                (Some(_), None) => return Err(WavelengthError::IncompleteLine(lambda_name)),
                (None, Some(_)) => return Err(WavelengthError::IncompleteLine(ratio_name)),
            }
        }
        Ok(())
    }
}

/// The monochromator angles of an instrument, in degrees, used to undo the
/// polarization factor on measured intensities. `alpha1` is the
/// monochromator before the sample and `alpha2` the one after. A missing
/// angle means no monochromator at that position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Polarization {
    pub alpha1: Option<f64>,
    pub alpha2: Option<f64>,
}

impl Polarization {
    pub fn new(alpha1: Option<f64>, alpha2: Option<f64>) -> Self {
        Self { alpha1, alpha2 }
    }

    fn cos2(alpha: Option<f64>) -> f64 {
        alpha.map_or(1.0, |a| (2.0 * a).to_radians().cos().powi(2))
    }

    /// The relative intensity a reflex at `two_theta` degrees keeps after
    /// polarization, normalised to 1 at `two_theta = 0`
    pub fn factor(&self, two_theta: f64) -> f64 {
        let c1 = Self::cos2(self.alpha1);
        let c2 = Self::cos2(self.alpha2);
        (1.0 + c1 * c2 * two_theta.to_radians().cos().powi(2)) / (1.0 + c1)
    }

    fn apply(&self, x: &[f64], y: &[f64], units: XUnits, forward: bool) -> Vec<f64> {
        x.iter()
            .zip(y)
            .map(|(x, y)| {
                let two_theta = match units {
                    XUnits::TwoTheta => *x,
                    XUnits::Theta => 2.0 * x,
                    XUnits::Q => return *y,
                };
                let factor = self.factor(two_theta);
                if forward {
                    y / factor
                } else {
                    y * factor
                }
            })
            .collect()
    }

    /// Divide the polarization factor out of intensities recorded on an
    /// angular axis. Intensities over `q` carry no angle and are returned
    /// unchanged.
    pub fn correct(&self, x: &[f64], y: &[f64], units: XUnits) -> Vec<f64> {
        self.apply(x, y, units, true)
    }

    /// The inverse of [`Polarization::correct`]
    pub fn reverse(&self, x: &[f64], y: &[f64], units: XUnits) -> Vec<f64> {
        self.apply(x, y, units, false)
    }
}

/// The axis a scan was recorded on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum XUnits {
    /// Diffraction angle 2θ in degrees
    #[default]
    TwoTheta,
    /// Bragg angle θ in degrees
    Theta,
    /// Scattering vector magnitude `4π sin(θ) / λ`
    Q,
}

impl XUnits {
    pub fn to_sin_theta(&self, x: f64, lambda: f64) -> f64 {
        match self {
            Self::TwoTheta => (x.to_radians() / 2.0).sin(),
            Self::Theta => x.to_radians().sin(),
            Self::Q => x * lambda / (4.0 * PI),
        }
    }

    pub fn from_sin_theta(&self, sin_theta: f64, lambda: f64) -> f64 {
        match self {
            Self::TwoTheta => (sin_theta.asin() * 2.0).to_degrees(),
            Self::Theta => sin_theta.asin().to_degrees(),
            Self::Q => sin_theta * 4.0 * PI / lambda,
        }
    }

    pub fn to_q(&self, x: f64, lambda: f64) -> f64 {
        match self {
            Self::Q => x,
            _ => 4.0 * PI * self.to_sin_theta(x, lambda) / lambda,
        }
    }

    /// Convert a whole axis to `sin(θ)`
    pub fn axis_to_sin_theta(&self, xs: &[f64], lambda: f64) -> Vec<f64> {
        xs.iter().map(|x| self.to_sin_theta(*x, lambda)).collect()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::TwoTheta => "2theta",
            Self::Theta => "theta",
            Self::Q => "q",
        }
    }
}

impl fmt::Display for XUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown x axis units {0:?}")]
pub struct UnknownXUnits(pub String);

impl FromStr for XUnits {
    type Err = UnknownXUnits;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "2theta" | "2θ" | "two_theta" => Ok(Self::TwoTheta),
            "theta" | "θ" => Ok(Self::Theta),
            "q" => Ok(Self::Q),
            _ => Err(UnknownXUnits(s.to_string())),
        }
    }
}

/// Interplanar spacing from Bragg's law, `λ / (2 sin(θ))`
pub fn d_spacing(sin_theta: f64, lambda: f64) -> f64 {
    lambda / (2.0 * sin_theta)
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_effective_wavelength() {
        let w = Wavelength::CU_K_ALPHA;
        let expected = (1.540562 + 0.5 * 1.544390) / 1.5;
        assert!((w.effective() - expected).abs() < 1e-12);
        assert_eq!(Wavelength::new(1.5).effective(), 1.5);
    }

    #[test]
    fn test_effective_wavelength_third_line() {
        let w = Wavelength::new(1.5)
            .with_second_line(1.6, 0.5)
            .with_third_line(1.4, 0.25);
        let expected = (1.5 + 0.5 * 1.6 + 0.25 * 1.4) / 1.75;
        assert!((w.effective() - expected).abs() < 1e-12);

        let third_only = Wavelength::new(1.5).with_third_line(1.7, 1.0);
        assert!((third_only.effective() - 1.6).abs() < 1e-12);
        assert!(third_only.satellite().is_none());
    }

    #[test]
    fn test_satellite() {
        let sat = Wavelength::CU_K_ALPHA.satellite().unwrap();
        assert!((sat.lambda_ratio - 1.544390 / 1.540562).abs() < 1e-12);
        assert_eq!(sat.intensity_ratio, 0.5);
        assert!(Wavelength::new(1.5).satellite().is_none());
    }

    #[test]
    fn test_check() {
        assert!(Wavelength::CU_K_ALPHA.check().is_ok());
        assert!(Wavelength::new(-1.0).check().is_err());
        assert_eq!(
            Wavelength::new(-1.0).check(),
            Err(WavelengthError::NotPositive {
                name: "lambda1",
                value: -1.0
            })
        );
        let partial = Wavelength {
            lambda2: Some(1.6),
            ..Wavelength::new(1.5)
        };
        assert_eq!(
            partial.check(),
            Err(WavelengthError::IncompleteLine("lambda2"))
        );
        let third = Wavelength::CU_K_ALPHA.with_third_line(1.39, -0.1);
        assert_eq!(
            third.check(),
            Err(WavelengthError::NegativeIntensity {
                name: "intensity_ratio_3",
                value: -0.1
            })
        );
        let third = Wavelength {
            intensity_ratio_3: Some(0.1),
            ..Wavelength::CU_K_ALPHA
        };
        assert_eq!(
            third.check(),
            Err(WavelengthError::IncompleteLine("intensity_ratio_3"))
        );
    }

    #[test]
    fn test_axis_conversion() {
        let lambda = 1.540562;
        let s = XUnits::TwoTheta.to_sin_theta(60.0, lambda);
        assert!((s - 0.5).abs() < 1e-12);
        assert!((XUnits::Theta.to_sin_theta(30.0, lambda) - 0.5).abs() < 1e-12);
        assert!((XUnits::TwoTheta.from_sin_theta(s, lambda) - 60.0).abs() < 1e-9);

        let q = XUnits::TwoTheta.to_q(60.0, lambda);
        assert!((XUnits::Q.to_sin_theta(q, lambda) - 0.5).abs() < 1e-12);
        assert!((d_spacing(0.5, lambda) - lambda).abs() < 1e-12);

        assert_eq!("2theta".parse::<XUnits>().unwrap(), XUnits::TwoTheta);
        assert_eq!(
            "furlongs".parse::<XUnits>(),
            Err(UnknownXUnits("furlongs".to_string()))
        );
    }

    #[test]
    fn test_polarization_without_monochromators() {
        let pol = Polarization::default();
        let x = [0.0, 45.0, 90.0, 120.0];
        let y = [10.0; 4];
        let corrected = pol.correct(&x, &y, XUnits::TwoTheta);
        for (x, c) in x.iter().zip(&corrected) {
            let expected = 10.0 * 2.0 / (1.0 + x.to_radians().cos().powi(2));
            assert!((c - expected).abs() < 1e-12, "{c} != {expected}");
        }
        // A 2θ of 90 degrees halves the intensity
        assert!((corrected[2] - 20.0).abs() < 1e-12);

        let theta: Vec<f64> = x.iter().map(|x| x / 2.0).collect();
        assert_eq!(pol.correct(&theta, &y, XUnits::Theta), corrected);
        assert_eq!(pol.correct(&x, &y, XUnits::Q), y.to_vec());
    }

    #[test]
    fn test_polarization_monochromator_factor() {
        let alpha = 13.3f64;
        let c2a = (2.0 * alpha).to_radians().cos().powi(2);
        let pol = Polarization::new(Some(alpha), None);
        let expected = (c2a * 60f64.to_radians().cos().powi(2) + 1.0) / (1.0 + c2a);
        assert!((pol.factor(60.0) - expected).abs() < 1e-12);
        assert!((pol.factor(0.0) - 1.0).abs() < 1e-12);

        let pol = Polarization::new(None, Some(alpha));
        let expected = (c2a * 60f64.to_radians().cos().powi(2) + 1.0) / 2.0;
        assert!((pol.factor(60.0) - expected).abs() < 1e-12);
    }

    #[rstest]
    #[case(Polarization::default(), XUnits::TwoTheta)]
    #[case(Polarization::new(Some(13.3), None), XUnits::TwoTheta)]
    #[case(Polarization::new(None, Some(26.6)), XUnits::Theta)]
    #[case(Polarization::new(Some(13.3), Some(26.6)), XUnits::TwoTheta)]
    fn test_polarization_reverse_restores(#[case] pol: Polarization, #[case] units: XUnits) {
        let x = [10.0, 35.5, 62.0, 88.0, 140.0];
        let y = [3.0, 120.0, 55.5, 0.25, 9.0];
        let corrected = pol.correct(&x, &y, units);
        assert_ne!(corrected, y.to_vec());
        let restored = pol.reverse(&x, &corrected, units);
        for (a, b) in restored.iter().zip(y) {
            assert!((a - b).abs() < 1e-12 * b.abs().max(1.0), "{a} != {b}");
        }
    }
}
