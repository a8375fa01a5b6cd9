//! `xrdsignal` is a library for decomposing 1-D X-ray diffractograms into
//! lists of fitted reflexes, each described by a center, a height, a width
//! and the residual standard deviation of the fit it came from.
//!
//! Extraction runs in three stages:
//! 1. [`RobustBackgroundFitter`] estimates a polynomial baseline and the noise
//!    variance by iteratively discarding points that rise above the current fit.
//! 2. [`segments`] splits the background-stripped signal into [`Section`]s that
//!    plausibly contain reflexes.
//! 3. [`MultiPeakFitter`] fits sums of [`PeakShape`]s to each section, either
//!    searching for the number and position of reflexes or fitting them at
//!    assumed positions.
//!
//! [`ReflexOrchestrator`] drives the stages end-to-end, reporting progress per
//! section and tolerating sections that fail to fit.
//!
//! # Usage
//! ```
//! use xrdsignal::{ReflexConfig, ReflexOrchestrator};
//! # use rand::{rngs::StdRng, SeedableRng};
//! # use rand_distr::{Distribution, Normal};
//! # let noise = Normal::new(0.0, 0.1).unwrap().sample_iter(StdRng::seed_from_u64(3));
//! # let sin_theta: Vec<f64> = (0..1001).map(|i| 0.1 + 0.5 * i as f64 / 1000.0).collect();
//! # let intensity: Vec<f64> = sin_theta
//! #     .iter()
//! #     .zip(noise)
//! #     .map(|(x, e)| {
//! #         let peaks: f64 = [(0.2, 40.0, 1e-5), (0.35, 25.0, 2e-5), (0.5, 15.0, 2e-5)]
//! #             .iter()
//! #             .map(|(x0, h, w)| h * (-(x - x0).powi(2) / w).exp())
//! #             .sum();
//! #         20.0 - 10.0 * x + 4.0 * x * x + peaks + e
//! #     })
//! #     .collect();
//! let orchestrator = ReflexOrchestrator::new(ReflexConfig::default().believe_factor(3.0)).unwrap();
//! let (baseline, result) = orchestrator.analyze(&sin_theta, &intensity, 2).unwrap();
//! println!("Noise sigma: {}", baseline.sigma());
//! for reflex in result.iter() {
//!     println!("{}", reflex);
//! }
//! assert!(result.len() >= 3);
//! ```
//!
//! ## Features
//! - `parallelism` (default) fits sections on a `rayon` thread pool in
//!   [`ReflexOrchestrator::fit_all`].
//! - `serde` derives serialization for configurations and results.
pub mod arrayops;
pub mod background;
pub mod fitter;
pub mod peak;
pub mod reflex;
pub mod segment;
pub mod shapes;
pub mod units;

pub mod prelude;

#[cfg(test)]
mod test_data;

pub use crate::arrayops::{Signal, SignalError};
pub use crate::background::{BackgroundError, Baseline, Polynomial, RobustBackgroundFitter};
pub use crate::fitter::{FitConfig, FitError, FitResult, MultiPeakFitter};
pub use crate::peak::{FittedReflex, Peak};
pub use crate::reflex::{
    FitMode, Progress, ReflexConfig, ReflexError, ReflexOrchestrator, ReflexResult, ReflexRun,
    SkippedSection,
};
pub use crate::segment::{segments, Section, Segments};
pub use crate::shapes::{CompositeShape, PeakShape, Satellite};
pub use crate::units::{
    d_spacing, Polarization, UnknownXUnits, Wavelength, WavelengthError, XUnits,
};
