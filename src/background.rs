//! Robust polynomial baseline estimation for diffractograms.
//!
//! The baseline is found by repeatedly fitting a low order polynomial and
//! discarding the points that rise too far above it, i.e. the points that
//! most likely belong to reflexes rather than to the background. The loop
//! ends once the noise variance estimate reaches a fixed point.
use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::SignalError;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum BackgroundError {
    #[error("A degree {degree} polynomial cannot be estimated from {points} retained points")]
    InsufficientData { points: usize, degree: usize },
    #[error("Failed to solve for polynomial coefficients: {0}")]
    FailedToSolve(&'static str),
    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// A polynomial with coefficients in ascending power order
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Polynomial {
    pub coefficients: Vec<f64>,
}

impl Polynomial {
    pub fn new(coefficients: Vec<f64>) -> Self {
        Self { coefficients }
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.coefficients.iter()
    }

    /// Evaluate the polynomial at a single point using Horner's scheme
    pub fn eval_at(&self, x: f64) -> f64 {
        self.coefficients
            .iter()
            .rev()
            .fold(0.0, |acc, c| acc * x + *c)
    }

    pub fn eval(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| self.eval_at(*v)).collect()
    }
}

impl AsRef<[f64]> for Polynomial {
    fn as_ref(&self) -> &[f64] {
        &self.coefficients
    }
}

/// Ordinary least squares polynomial fit of `y` against `x`.
///
/// The Vandermonde columns are normalized before the SVD solve and the
/// coefficients rescaled afterwards, which keeps the system well conditioned
/// when `x` is in degrees.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Polynomial, BackgroundError> {
    let nc = degree + 1;
    let nr = x.len();
    if nr < nc {
        return Err(BackgroundError::InsufficientData {
            points: nr,
            degree,
        });
    }

    let mut system = DMatrix::<f64>::zeros(nr, nc);
    x.iter().enumerate().for_each(|(row_i, x)| {
        let mut term = 1.0;
        (0..nc).for_each(|col_j| {
            system[(row_i, col_j)] = term;
            term *= *x;
        });
    });

    let scales: Vec<f64> = (0..nc)
        .map(|j| {
            let norm = system.column(j).norm();
            if norm > 0.0 {
                norm
            } else {
                1.0
            }
        })
        .collect();
    for (j, scale) in scales.iter().enumerate() {
        system.column_mut(j).unscale_mut(*scale);
    }

    let beta = DVector::from_column_slice(y);
    let decomp = nalgebra::linalg::SVD::new(system, true, true);
    let solution = decomp
        .solve(&beta, 1e-14)
        .map_err(BackgroundError::FailedToSolve)?;

    let coefficients = solution
        .iter()
        .zip(scales.iter())
        .map(|(c, s)| c / s)
        .collect();
    Ok(Polynomial::new(coefficients))
}

/// The baseline estimated by [`RobustBackgroundFitter::fit`]
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Baseline {
    pub polynomial: Polynomial,
    /// The baseline evaluated over the full x axis
    pub values: Vec<f64>,
    /// The noise variance estimate from the retained points' residuals
    pub sigma2: f64,
    /// Indices of the points the final polynomial was fit to
    pub retained: Vec<usize>,
    /// The number of outlier rejection rounds performed
    pub iterations: usize,
}

impl Baseline {
    pub fn sigma(&self) -> f64 {
        self.sigma2.sqrt()
    }

    /// Subtract the baseline from `y`
    pub fn strip(&self, y: &[f64]) -> Vec<f64> {
        y.iter().zip(self.values.iter()).map(|(y, b)| y - b).collect()
    }
}

/// Iteratively fits a polynomial background, rejecting points that exceed
/// `believe_factor` standard deviations above the current fit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RobustBackgroundFitter {
    pub degree: usize,
    pub believe_factor: f64,
    pub max_iterations: usize,
}

impl Default for RobustBackgroundFitter {
    fn default() -> Self {
        Self {
            degree: 2,
            believe_factor: 2.0,
            max_iterations: 100,
        }
    }
}

impl RobustBackgroundFitter {
    pub fn new(degree: usize, believe_factor: f64) -> Self {
        Self {
            degree,
            believe_factor,
            ..Default::default()
        }
    }

    pub fn degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    pub fn believe_factor(mut self, believe_factor: f64) -> Self {
        self.believe_factor = believe_factor;
        self
    }

    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Fit the polynomial to the points at `indices` only, returning it and the
    /// variance of those points' residuals.
    pub fn fit_subset(
        &self,
        x: &[f64],
        y: &[f64],
        indices: &[usize],
    ) -> Result<(Polynomial, f64), BackgroundError> {
        let dof = indices.len() as isize - 1 - self.degree as isize;
        if dof <= 0 {
            return Err(BackgroundError::InsufficientData {
                points: indices.len(),
                degree: self.degree,
            });
        }
        let xs: Vec<f64> = indices.iter().map(|i| x[*i]).collect();
        let ys: Vec<f64> = indices.iter().map(|i| y[*i]).collect();
        let polynomial = polyfit(&xs, &ys, self.degree)?;
        let ssr: f64 = xs
            .iter()
            .zip(ys.iter())
            .map(|(x, y)| (y - polynomial.eval_at(*x)).powi(2))
            .sum();
        Ok((polynomial, ssr / dof as f64))
    }

    pub fn fit(&self, x: &[f64], y: &[f64]) -> Result<Baseline, BackgroundError> {
        if x.len() != y.len() {
            return Err(SignalError::LengthMismatch(x.len(), y.len()).into());
        }
        let mut retained: Vec<usize> = (0..x.len()).collect();
        let (mut polynomial, mut sigma2) = self.fit_subset(x, y, &retained)?;
        let mut values = polynomial.eval(x);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iterations {
            if sigma2 == 0.0 {
                converged = true;
                break;
            }
            let sigma = sigma2.sqrt() * self.believe_factor;
            let next: Vec<usize> = (0..x.len())
                .filter(|i| y[*i] - values[*i] < sigma)
                .collect();
            if next == retained {
                converged = true;
                break;
            }
            iterations += 1;
            let (next_polynomial, next_sigma2) = self.fit_subset(x, y, &next)?;
            trace!(
                "Background round {iterations}: {} points retained, sigma2 = {next_sigma2:e}",
                next.len()
            );
            let fixed_point = next_sigma2 == sigma2;
            polynomial = next_polynomial;
            sigma2 = next_sigma2;
            values = polynomial.eval(x);
            retained = next;
            if fixed_point {
                converged = true;
                break;
            }
        }

        if converged {
            debug!(
                "Background converged after {iterations} rounds with sigma2 = {sigma2:e} from {} of {} points",
                retained.len(),
                x.len()
            );
        } else {
            warn!(
                "Background did not reach a fixed point within {} rounds, sigma2 = {sigma2:e}",
                self.max_iterations
            );
        }

        Ok(Baseline {
            polynomial,
            values,
            sigma2,
            retained,
            iterations,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_data::{gauss_sum, linear_axis, noise};

    #[test]
    fn test_polyfit_exact() {
        let x = linear_axis(20.0, 80.0, 61);
        let poly = Polynomial::new(vec![3.0, -0.5, 0.01]);
        let y = poly.eval(&x);
        let fit = polyfit(&x, &y, 2).unwrap();
        for (a, b) in fit.iter().zip(poly.iter()) {
            assert!((a - b).abs() < 1e-8, "{a} != {b}");
        }
    }

    #[test]
    fn test_polyfit_too_few_points() {
        let err = polyfit(&[0.0, 1.0], &[1.0, 2.0], 2).unwrap_err();
        assert_eq!(
            err,
            BackgroundError::InsufficientData {
                points: 2,
                degree: 2
            }
        );
    }

    #[test_log::test]
    fn test_background_rejects_spike() {
        let x = linear_axis(0.0, 1.0, 201);
        let poly = Polynomial::new(vec![5.0, 2.0, -3.0]);
        let noise: Vec<f64> = noise(7, 0.004).take(x.len()).collect();
        let spike = gauss_sum(&x, &[(0.5, 20.0, 0.001)]);
        let y: Vec<f64> = poly
            .eval(&x)
            .into_iter()
            .zip(noise)
            .zip(spike)
            .map(|((b, e), s)| b + e + s)
            .collect();

        let baseline = RobustBackgroundFitter::new(2, 3.0).fit(&x, &y).unwrap();
        assert!(baseline.sigma2 >= 0.0);
        for (a, b) in baseline.polynomial.iter().zip(poly.iter()) {
            assert!((a - b).abs() < 0.05, "{a} != {b}");
        }
        let i = x.iter().position(|v| (*v - 0.5).abs() < 1e-9).unwrap();
        assert!(!baseline.retained.contains(&i));
        assert!(baseline.sigma() < 0.05);
    }

    #[test]
    fn test_background_refit_is_fixed_point() {
        let x = linear_axis(0.0, 1.0, 150);
        let y: Vec<f64> = noise(11, 0.03)
            .take(x.len())
            .zip(gauss_sum(&x, &[(0.3, 4.0, 0.002), (0.7, 2.0, 0.004)]))
            .zip(x.iter())
            .map(|((e, p), x)| 1.0 + 0.5 * x + e + p)
            .collect();
        let fitter = RobustBackgroundFitter::new(1, 2.0);
        let baseline = fitter.fit(&x, &y).unwrap();
        let (refit, sigma2) = fitter.fit_subset(&x, &y, &baseline.retained).unwrap();
        assert_eq!(sigma2, baseline.sigma2);
        assert_eq!(refit, baseline.polynomial);
        assert!(baseline.iterations <= fitter.max_iterations);
    }

    #[test]
    fn test_background_insufficient_data() {
        let x = [0.0, 1.0, 2.0];
        let y = [1.0, 2.0, 1.5];
        let err = RobustBackgroundFitter::new(2, 2.0).fit(&x, &y).unwrap_err();
        assert!(matches!(err, BackgroundError::InsufficientData { .. }));
    }

    #[test]
    fn test_strip() {
        let baseline = Baseline {
            values: vec![1.0, 2.0, 3.0],
            ..Default::default()
        };
        assert_eq!(baseline.strip(&[1.5, 2.0, 2.5]), vec![0.5, 0.0, -0.5]);
    }
}
