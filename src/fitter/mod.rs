//! Fit sums of parametric peaks to the [`Section`](crate::segment::Section)s of
//! a stripped diffractogram.
//!
//! Two strategies are offered by [`MultiPeakFitter`]:
//! 1. [`MultiPeakFitter::find_bells`] knows nothing about where reflexes are. It fits
//!    one, two, three... peaks with Levenberg-Marquardt least squares and stops when
//!    another peak no longer improves the residual variance enough to pay for its
//!    parameters.
//! 2. [`MultiPeakFitter::find_bells_pp`] is given candidate positions and fits one peak
//!    per candidate with a Nelder-Mead simplex search on a width-penalized error,
//!    first with every center pinned and then with the movable ones released.
mod layout;
mod levenberg_marquardt;
mod multipeak;
mod simplex;
mod utils;

pub use multipeak::MultiPeakFitter;
pub use utils::{FitConfig, FitError, FitResult};
