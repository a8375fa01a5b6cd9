use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::peak::Peak;

/// Hyperparameters for fitting reflexes within one section
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitConfig {
    /// The smallest width parameter a peak may take. Widths must be positive
    /// regardless of this value.
    pub min_sigma: f64,
    /// Whether all peaks of one fit share a single width parameter
    pub const_sigma: bool,
    /// The maximum number of Levenberg-Marquardt iterations
    pub max_iter: usize,
    /// The relative reduction in squared error below which a Levenberg-Marquardt
    /// fit is considered converged
    pub ftol: f64,
    /// The relative parameter step below which a Levenberg-Marquardt fit is
    /// considered converged
    pub xtol: f64,
    /// A residual standard deviation below this fraction of the section's
    /// maximum height ends the search for more peaks
    pub perfect_fit_tolerance: f64,
    /// The maximum number of Nelder-Mead iterations per simplex run
    pub simplex_max_iter: u64,
    /// The standard deviation of the simplex vertices' objective values at
    /// which a Nelder-Mead run stops
    pub simplex_tolerance: f64,
    /// How many times to restart the Nelder-Mead search from its best vertex
    pub simplex_restarts: usize,
}

impl FitConfig {
    pub fn min_sigma(mut self, min_sigma: f64) -> Self {
        self.min_sigma = min_sigma;
        self
    }

    pub fn const_sigma(mut self, const_sigma: bool) -> Self {
        self.const_sigma = const_sigma;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn ftol(mut self, ftol: f64) -> Self {
        self.ftol = ftol;
        self
    }

    pub fn xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn perfect_fit_tolerance(mut self, value: f64) -> Self {
        self.perfect_fit_tolerance = value;
        self
    }

    pub fn simplex_max_iter(mut self, simplex_max_iter: u64) -> Self {
        self.simplex_max_iter = simplex_max_iter;
        self
    }

    pub fn simplex_tolerance(mut self, simplex_tolerance: f64) -> Self {
        self.simplex_tolerance = simplex_tolerance;
        self
    }

    pub fn simplex_restarts(mut self, simplex_restarts: usize) -> Self {
        self.simplex_restarts = simplex_restarts;
        self
    }
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            min_sigma: 0.0,
            const_sigma: false,
            max_iter: 2_000,
            ftol: 1e-15,
            xtol: 1e-12,
            perfect_fit_tolerance: 1e-9,
            simplex_max_iter: 5_000,
            simplex_tolerance: 1e-14,
            simplex_restarts: 3,
        }
    }
}

/// All the ways fitting a section can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    #[error("The fit did not converge within {iterations} iterations")]
    DidNotConverge { iterations: usize },
    #[error("The least squares system became singular or non-finite")]
    SingularSystem,
    #[error("The initial peak estimate lies outside the valid parameter region")]
    InvalidStartingPoint,
    #[error("A section of {0} points is too short to constrain any peak")]
    TooFewPoints(usize),
    #[error("Pinned candidate index {0} is out of range")]
    PinnedIndexOutOfRange(usize),
    #[error("The simplex solver failed: {0}")]
    Solver(String),
}

/// The peaks fit to one section and the residual standard deviation of the fit
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitResult {
    pub peaks: Vec<Peak>,
    pub residual_std: f64,
}

impl FitResult {
    pub fn new(peaks: Vec<Peak>, residual_std: f64) -> Self {
        Self {
            peaks,
            residual_std,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Peak> {
        self.peaks.iter()
    }
}
