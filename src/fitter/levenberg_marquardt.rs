//! A damped Gauss-Newton least squares solver over a region of valid
//! parameters.
use nalgebra::{DMatrix, DVector};

use super::FitError;

const MIN_LAMBDA: f64 = 1e-15;
const MAX_LAMBDA: f64 = 1e16;
const LAMBDA_UP: f64 = 10.0;
const LAMBDA_DOWN: f64 = 0.1;

/// A model fit to observations by minimizing the sum of squared residuals
pub(crate) trait LeastSquaresProblem {
    /// `observed - predicted` at `params`, or `None` when `params` lies
    /// outside the valid region
    fn residuals(&self, params: &[f64]) -> Option<DVector<f64>>;

    /// The Jacobian of the *prediction* with respect to `params`, one row per
    /// observation
    fn jacobian(&self, params: &[f64]) -> DMatrix<f64>;
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeastSquaresReport {
    pub params: Vec<f64>,
    pub ssr: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct LevenbergMarquardt {
    pub max_iter: usize,
    pub ftol: f64,
    pub xtol: f64,
    pub initial_lambda: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            max_iter: 2_000,
            ftol: 1e-15,
            xtol: 1e-12,
            initial_lambda: 1e-3,
        }
    }
}

impl LevenbergMarquardt {
    pub fn new(max_iter: usize, ftol: f64, xtol: f64) -> Self {
        Self {
            max_iter,
            ftol,
            xtol,
            ..Default::default()
        }
    }

    /// Solve `(JᵀJ + λ·diag(JᵀJ)) δ = Jᵀr`, flooring the diagonal so
    /// columns without support stay solvable
    fn damped_step(
        jtj: &DMatrix<f64>,
        jtr: &DVector<f64>,
        lambda: f64,
    ) -> Option<DVector<f64>> {
        let n = jtj.nrows();
        let max_diag = (0..n).map(|j| jtj[(j, j)]).fold(0.0, f64::max);
        let floor = if max_diag > 0.0 {
            max_diag * 1e-15
        } else {
            f64::MIN_POSITIVE
        };
        let mut damped = jtj.clone();
        for j in 0..n {
            damped[(j, j)] += lambda * jtj[(j, j)].max(floor);
        }
        damped.cholesky().map(|chol| chol.solve(jtr))
    }

    pub fn minimize<P: LeastSquaresProblem>(
        &self,
        problem: &P,
        initial: Vec<f64>,
    ) -> Result<LeastSquaresReport, FitError> {
        let mut params = initial;
        let mut residuals = problem
            .residuals(&params)
            .ok_or(FitError::InvalidStartingPoint)?;
        let mut ssr = residuals.norm_squared();
        if !ssr.is_finite() {
            return Err(FitError::InvalidStartingPoint);
        }

        let mut lambda = self.initial_lambda;
        for iteration in 0..self.max_iter {
            if ssr == 0.0 {
                log::trace!("{iteration}: Exact fit");
                return Ok(LeastSquaresReport {
                    params,
                    ssr,
                    iterations: iteration,
                });
            }

            let jacobian = problem.jacobian(&params);
            if jacobian.iter().any(|v| !v.is_finite()) {
                return Err(FitError::SingularSystem);
            }
            let jt = jacobian.transpose();
            let jtj = &jt * &jacobian;
            let jtr = &jt * &residuals;

            let mut accepted = None;
            while lambda <= MAX_LAMBDA {
                let Some(step) = Self::damped_step(&jtj, &jtr, lambda) else {
                    lambda *= LAMBDA_UP;
                    continue;
                };
                let candidate: Vec<f64> = params
                    .iter()
                    .zip(step.iter())
                    .map(|(p, d)| p + d)
                    .collect();
                match problem.residuals(&candidate) {
                    Some(r) if r.norm_squared() < ssr => {
                        accepted = Some((candidate, r, step));
                        break;
                    }
                    _ => lambda *= LAMBDA_UP,
                }
            }

            let Some((candidate, candidate_residuals, step)) = accepted else {
                // No damping produces a descent step, so this is a minimum to
                // working precision
                log::trace!("{iteration}: Damping exhausted at SSR = {ssr:e}");
                return Ok(LeastSquaresReport {
                    params,
                    ssr,
                    iterations: iteration,
                });
            };

            let new_ssr = candidate_residuals.norm_squared();
            let reduction = ssr - new_ssr;
            let relative_step = params
                .iter()
                .zip(step.iter())
                .map(|(p, d)| d.abs() / (p.abs() + self.xtol))
                .fold(0.0, f64::max);
            log::trace!("{iteration}: SSR = {new_ssr:e}, lambda = {lambda:e}");

            params = candidate;
            residuals = candidate_residuals;
            let previous = ssr;
            ssr = new_ssr;
            lambda = (lambda * LAMBDA_DOWN).max(MIN_LAMBDA);

            if reduction <= self.ftol * previous || relative_step <= self.xtol {
                log::trace!("{iteration}: Converged");
                return Ok(LeastSquaresReport {
                    params,
                    ssr,
                    iterations: iteration + 1,
                });
            }
        }
        Err(FitError::DidNotConverge {
            iterations: self.max_iter,
        })
    }
}
