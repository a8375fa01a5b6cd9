use std::f64::consts::PI;

use log::debug;
use nalgebra::{DMatrix, DVector};

use super::layout::{ParameterLayout, Slot};
use super::levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use super::simplex::{self, PenalizedObjective};
use super::{FitConfig, FitError, FitResult};
use crate::arrayops::linspace_interior;
use crate::peak::Peak;
use crate::segment::Section;
use crate::shapes::CompositeShape;

/// The least squares view of a section against a sum of peaks
struct SectionProblem<'a> {
    x: &'a [f64],
    y: &'a [f64],
    model: CompositeShape,
    layout: &'a ParameterLayout,
    min_width: f64,
}

impl<'a> LeastSquaresProblem for SectionProblem<'a> {
    fn residuals(&self, params: &[f64]) -> Option<DVector<f64>> {
        let peaks = self.layout.unflatten(params);
        if !peaks.iter().all(|p| p.is_valid(self.min_width)) {
            return None;
        }
        let residuals = DVector::from_iterator(
            self.x.len(),
            self.x
                .iter()
                .zip(self.y.iter())
                .map(|(x, y)| y - self.model.density(*x, &peaks)),
        );
        if residuals.iter().all(|r| r.is_finite()) {
            Some(residuals)
        } else {
            None
        }
    }

    fn jacobian(&self, params: &[f64]) -> DMatrix<f64> {
        let peaks = self.layout.unflatten(params);
        let slots = self.layout.slots();
        let mut jacobian = DMatrix::zeros(self.x.len(), slots.len());
        let mut grads = vec![[0.0; 3]; peaks.len()];
        for (i, x) in self.x.iter().enumerate() {
            for (grad, peak) in grads.iter_mut().zip(peaks.iter()) {
                *grad = self.model.peak_gradient(*x, peak);
            }
            for (j, slot) in slots.iter().enumerate() {
                jacobian[(i, j)] = match slot {
                    Slot::Center(k) => grads[*k][0],
                    Slot::Height(k) => grads[*k][1],
                    Slot::Width(k) => grads[*k][2],
                    Slot::SharedWidth => grads.iter().map(|g| g[2]).sum(),
                };
            }
        }
        jacobian
    }
}

/// Fits sums of peaks to one [`Section`].
///
/// [`MultiPeakFitter::find_bells`] searches for the number of peaks as well
/// as their parameters, [`MultiPeakFitter::find_bells_pp`] fits peaks at
/// known candidate positions.
#[derive(Debug, Clone)]
pub struct MultiPeakFitter<'a> {
    section: &'a Section,
    model: CompositeShape,
    config: FitConfig,
}

impl<'a> MultiPeakFitter<'a> {
    pub fn new(section: &'a Section, model: CompositeShape, config: FitConfig) -> Self {
        Self {
            section,
            model,
            config,
        }
    }

    pub fn section(&self) -> &Section {
        self.section
    }

    pub fn model(&self) -> &CompositeShape {
        &self.model
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Split the section's area and maximum height evenly across one peak
    /// per entry of `centers`
    fn seed_peaks(&self, centers: &[f64]) -> Vec<Peak> {
        let n = centers.len() as f64;
        let share = self.model.intensity_share();
        let area = self.section.area() / share / n;
        let height = self.section.max_height() / share / n;
        let (lo, hi) = self.section.x_bounds();
        let mut width = (area / height).powi(2) / PI;
        if !width.is_finite() || width <= 0.0 {
            width = ((hi - lo) / (2.0 * n)).powi(2);
        }
        let width = width.max(self.config.min_sigma);
        centers
            .iter()
            .map(|c| Peak::new(*c, height, width))
            .collect()
    }

    fn least_squares(
        &self,
        seed: &[Peak],
        layout: &ParameterLayout,
    ) -> Result<(Vec<Peak>, f64), FitError> {
        let problem = SectionProblem {
            x: &self.section.x,
            y: &self.section.y,
            model: self.model,
            layout,
            min_width: self.config.min_sigma,
        };
        let solver = LevenbergMarquardt::new(self.config.max_iter, self.config.ftol, self.config.xtol);
        let report = solver.minimize(&problem, layout.flatten(seed))?;
        debug!(
            "Fit {} peaks in {} iterations, SSR = {:e}",
            layout.n_peaks(),
            report.iterations,
            report.ssr
        );
        Ok((layout.unflatten(&report.params), report.ssr))
    }

    /// Fit an increasing number of peaks, up to `max_peaks` and at most one
    /// per four points, keeping the count with the best penalized residual
    /// variance.
    ///
    /// Peaks are returned in order of increasing center. A failure to fit
    /// more peaks than an already successful fit keeps that fit.
    pub fn find_bells(&self, max_peaks: usize) -> Result<FitResult, FitError> {
        let n_points = self.section.len();
        let limit = max_peaks.min(n_points / 4);
        if limit == 0 {
            return Err(FitError::TooFewPoints(n_points));
        }
        let (lo, hi) = self.section.x_bounds();
        let tolerance = self.config.perfect_fit_tolerance * self.section.max_height();

        let mut best: Option<(f64, Vec<Peak>)> = None;
        for n in 1..=limit {
            let layout = ParameterLayout::free(n, self.config.const_sigma);
            let seed = self.seed_peaks(&linspace_interior(lo, hi, n));
            let (peaks, ssr) = match self.least_squares(&seed, &layout) {
                Ok(fit) => fit,
                Err(err) => match best {
                    Some(_) => {
                        debug!("Fitting {n} peaks failed ({err}), keeping {} peaks", n - 1);
                        break;
                    }
                    None => return Err(err),
                },
            };
            let variance = ssr / (n_points - layout.len()) as f64;
            if let Some((previous, _)) = &best {
                if *previous < variance * (n + 1) as f64 / n as f64 {
                    debug!("{n} peaks do not improve on {} peaks", n - 1);
                    break;
                }
            }
            best = Some((variance, peaks));
            if variance.sqrt() <= tolerance {
                debug!("{n} peaks fit to within tolerance");
                break;
            }
        }

        match best {
            Some((variance, mut peaks)) => {
                peaks.sort_by(|a, b| a.center.total_cmp(&b.center));
                Ok(FitResult::new(peaks, variance.sqrt()))
            }
            None => Err(FitError::TooFewPoints(n_points)),
        }
    }

    fn minimize_penalized(
        &self,
        seed: &[Peak],
        layout: ParameterLayout,
    ) -> Result<(Vec<Peak>, f64), FitError> {
        let initial = layout.flatten(seed);
        let objective = PenalizedObjective::new(
            &self.section.x,
            &self.section.y,
            self.model,
            layout,
            self.config.min_sigma,
        );
        let (params, value) = simplex::minimize(&objective, initial, &self.config)?;
        Ok((objective.layout().unflatten(&params), value))
    }

    /// Fit one peak per entry of `candidates`, in the same order.
    ///
    /// Heights and widths are fit with every center pinned first. Then the
    /// centers not listed in `fixed` are released, or every center when
    /// `fixed` is empty, and the fit is refined. The residual is the square
    /// root of the width-penalized mean squared error.
    pub fn find_bells_pp(&self, candidates: &[f64], fixed: &[usize]) -> Result<FitResult, FitError> {
        if candidates.is_empty() {
            return Ok(FitResult::empty());
        }
        if let Some(index) = fixed.iter().find(|i| **i >= candidates.len()) {
            return Err(FitError::PinnedIndexOutOfRange(*index));
        }
        let seed = self.seed_peaks(candidates);

        let layout = ParameterLayout::pinned_at(candidates, self.config.const_sigma);
        let (mut peaks, mut value) = self.minimize_penalized(&seed, layout)?;
        debug!("Pinned fit of {} peaks, objective = {value:e}", candidates.len());

        let all_fixed = !fixed.is_empty() && (0..candidates.len()).all(|i| fixed.contains(&i));
        if !all_fixed {
            let pinned = candidates
                .iter()
                .enumerate()
                .map(|(i, c)| fixed.contains(&i).then_some(*c))
                .collect();
            let layout = ParameterLayout::new(pinned, self.config.const_sigma);
            (peaks, value) = self.minimize_penalized(&peaks, layout)?;
            debug!("Released fit of {} peaks, objective = {value:e}", candidates.len());
        }

        Ok(FitResult::new(peaks, value.sqrt()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::shapes::{PeakShape, Satellite};
    use crate::test_data::{gauss_sum, linear_axis};

    fn section_of(x: Vec<f64>, y: Vec<f64>) -> Section {
        let n = x.len();
        Section::new(&x, &y, 0..n)
    }

    fn gauss() -> CompositeShape {
        CompositeShape::new(PeakShape::Gauss, None)
    }

    #[test_log::test]
    fn test_blind_two_gaussians() {
        let x = linear_axis(0.0, 3.0, 301);
        let y = gauss_sum(&x, &[(1.0, 10.0, 0.05), (2.0, 6.0, 0.08)]);
        let section = section_of(x, y);
        let fitter = MultiPeakFitter::new(&section, gauss(), FitConfig::default());
        let result = fitter.find_bells(5).unwrap();

        assert_eq!(result.len(), 2, "{result:?}");
        let expected = [Peak::new(1.0, 10.0, 0.05), Peak::new(2.0, 6.0, 0.08)];
        for (found, expected) in result.iter().zip(expected.iter()) {
            assert!((found.center - expected.center).abs() < 1e-6, "{found}");
            assert!((found.height - expected.height).abs() < 1e-6, "{found}");
            assert!((found.width - expected.width).abs() < 1e-6, "{found}");
        }
        assert!(result.residual_std < 1e-6);
    }

    #[test_log::test]
    fn test_blind_single_bump() {
        let x = linear_axis(0.2, 0.4, 81);
        let y = gauss_sum(&x, &[(0.31, 4.0, 2e-4)]);
        let section = section_of(x, y);
        let result = MultiPeakFitter::new(&section, gauss(), FitConfig::default())
            .find_bells(5)
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!((result.peaks[0].center - 0.31).abs() < 1e-6);
        assert!((result.peaks[0].height - 4.0).abs() < 1e-6);
        assert!(result.iter().all(|p| p.is_valid(0.0)));
    }

    #[test_log::test]
    fn test_blind_keeps_fit_when_more_peaks_fail() {
        let x = linear_axis(0.2, 0.4, 201);
        let y = gauss_sum(&x, &[(0.3, 4.0, 1e-4)]);
        let section = section_of(x, y);
        // One peak converges from its seed within the budget, two do not
        let config = FitConfig::default().max_iter(10).perfect_fit_tolerance(0.0);
        let fitter = MultiPeakFitter::new(&section, gauss(), config);

        let (lo, hi) = section.x_bounds();
        let seed = fitter.seed_peaks(&linspace_interior(lo, hi, 2));
        let err = fitter
            .least_squares(&seed, &ParameterLayout::free(2, false))
            .unwrap_err();
        assert_eq!(err, FitError::DidNotConverge { iterations: 10 });

        let result = fitter.find_bells(3).unwrap();
        assert_eq!(result.len(), 1, "{result:?}");
        assert!((result.peaks[0].center - 0.3).abs() < 1e-9);
        assert!((result.peaks[0].height - 4.0).abs() < 1e-9);
        assert!((result.peaks[0].width - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_too_few_points() {
        let section = section_of(vec![0.1, 0.2, 0.3], vec![0.0, 1.0, 0.0]);
        let err = MultiPeakFitter::new(&section, gauss(), FitConfig::default())
            .find_bells(5)
            .unwrap_err();
        assert_eq!(err, FitError::TooFewPoints(3));
    }

    #[test_log::test]
    fn test_blind_with_satellite() {
        let model = CompositeShape::new(PeakShape::Gauss, Some(Satellite::new(1.002485, 0.5)));
        let x = linear_axis(0.29, 0.31, 201);
        let truth = [Peak::new(0.3, 5.0, 2e-6)];
        let y = model.predict(&x, &truth);
        let section = section_of(x, y);
        let result = MultiPeakFitter::new(&section, model, FitConfig::default())
            .find_bells(3)
            .unwrap();
        assert_eq!(result.len(), 1, "{result:?}");
        assert!((result.peaks[0].center - 0.3).abs() < 1e-6);
        assert!((result.peaks[0].height - 5.0).abs() < 1e-5);
    }

    #[test_log::test]
    fn test_assumed_positions() {
        let x = linear_axis(0.0, 3.0, 301);
        let y = gauss_sum(&x, &[(1.0, 10.0, 0.05), (2.0, 6.0, 0.05)]);
        let section = section_of(x, y);
        let fitter = MultiPeakFitter::new(&section, gauss(), FitConfig::default());
        let result = fitter.find_bells_pp(&[1.0, 2.0], &[]).unwrap();
        assert_eq!(result.len(), 2);
        assert!((result.peaks[0].height - 10.0).abs() < 1e-3, "{result:?}");
        assert!((result.peaks[1].height - 6.0).abs() < 1e-3, "{result:?}");
        assert!((result.peaks[0].center - 1.0).abs() < 1e-4, "{result:?}");
        assert!(result.residual_std < 1e-3);
    }

    #[test_log::test]
    fn test_assumed_single_peak() {
        let x = linear_axis(0.2, 0.4, 81);
        let y = gauss_sum(&x, &[(0.31, 4.0, 2e-4)]);
        let section = section_of(x, y);
        let result = MultiPeakFitter::new(&section, gauss(), FitConfig::default())
            .find_bells_pp(&[0.31], &[])
            .unwrap();
        let peak = result.peaks[0];
        assert!((peak.center - 0.31).abs() < 1e-5, "{peak}");
        assert!((peak.height - 4.0).abs() < 1e-4, "{peak}");
        assert!((peak.width - 2e-4).abs() < 1e-7, "{peak}");
    }

    #[test]
    fn test_assumed_positions_fixed_centers() {
        let x = linear_axis(0.0, 3.0, 301);
        let y = gauss_sum(&x, &[(1.02, 10.0, 0.05), (2.0, 6.0, 0.05)]);
        let section = section_of(x, y);
        let fitter = MultiPeakFitter::new(&section, gauss(), FitConfig::default());

        let result = fitter.find_bells_pp(&[1.0, 1.98], &[0]).unwrap();
        assert_eq!(result.peaks[0].center, 1.0);
        assert!((result.peaks[1].center - 2.0).abs() < 1e-3, "{result:?}");

        let result = fitter.find_bells_pp(&[1.0, 1.98], &[0, 1]).unwrap();
        assert_eq!(result.peaks[0].center, 1.0);
        assert_eq!(result.peaks[1].center, 1.98);
        assert!(result.iter().all(|p| p.is_valid(0.0)));
    }

    #[test]
    fn test_assumed_positions_edges() {
        let x = linear_axis(0.0, 1.0, 11);
        let y = gauss_sum(&x, &[(0.5, 1.0, 0.01)]);
        let section = section_of(x, y);
        let fitter = MultiPeakFitter::new(&section, gauss(), FitConfig::default());

        let result = fitter.find_bells_pp(&[], &[]).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.residual_std, 0.0);

        let err = fitter.find_bells_pp(&[0.5], &[1]).unwrap_err();
        assert_eq!(err, FitError::PinnedIndexOutOfRange(1));
    }

    #[test_log::test]
    fn test_shared_width() {
        let x = linear_axis(0.0, 3.0, 301);
        let y = gauss_sum(&x, &[(1.0, 10.0, 0.05), (2.0, 6.0, 0.05)]);
        let section = section_of(x, y);
        let config = FitConfig::default().const_sigma(true);
        let result = MultiPeakFitter::new(&section, gauss(), config)
            .find_bells(4)
            .unwrap();
        assert_eq!(result.len(), 2, "{result:?}");
        assert_eq!(result.peaks[0].width, result.peaks[1].width);
        assert!((result.peaks[0].width - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_min_sigma_respected() {
        let x = linear_axis(0.2, 0.4, 81);
        let y = gauss_sum(&x, &[(0.31, 4.0, 2e-4)]);
        let section = section_of(x, y);
        let config = FitConfig::default().min_sigma(5e-4);
        let result = MultiPeakFitter::new(&section, gauss(), config)
            .find_bells(3)
            .unwrap();
        assert!(result.iter().all(|p| p.width >= 5e-4), "{result:?}");
    }
}
