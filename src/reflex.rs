//! Drive the whole extraction: strip the background, split the signal into
//! sections and fit each section's reflexes.
//!
//! [`ReflexOrchestrator::run`] yields a [`Progress`] report after each section
//! and checks a shared cancellation flag between sections.
//! [`ReflexOrchestrator::fit_all`] fits every section in one call, spreading
//! the sections over a thread pool when the `parallelism` feature is enabled.
use std::iter::FusedIterator;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallelism")]
use rayon::prelude::*;

use crate::arrayops::{Signal, SignalError};
use crate::background::{Baseline, BackgroundError, RobustBackgroundFitter};
use crate::fitter::{FitConfig, FitError, FitResult, MultiPeakFitter};
use crate::peak::FittedReflex;
use crate::segment::{segments, Section};
use crate::shapes::{CompositeShape, PeakShape};
use crate::units::Wavelength;

#[derive(Debug, Error)]
pub enum ReflexError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Background(#[from] BackgroundError),
    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// How reflex positions are found within a section
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FitMode {
    /// Search for the number of reflexes and their positions
    #[default]
    Blind,
    /// Fit one reflex per candidate position falling inside a section.
    /// `pinned` indexes into `candidates` and marks positions that may not move.
    AssumedPositions {
        candidates: Vec<f64>,
        pinned: Vec<usize>,
    },
}

/// The parameters of a [`ReflexOrchestrator`]
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReflexConfig {
    pub fit: FitConfig,
    /// The most reflexes a blind fit may place in one section
    pub max_bells: usize,
    /// The multiple of the noise standard deviation used for both background
    /// rejection and section detection
    pub believe_factor: f64,
    /// Sections with fewer points are ignored
    pub min_points: usize,
    pub shape: PeakShape,
    pub mode: FitMode,
    /// When it carries a second line, every reflex is fit together with its
    /// satellite
    pub wavelength: Option<Wavelength>,
}

impl Default for ReflexConfig {
    fn default() -> Self {
        Self {
            fit: FitConfig::default(),
            max_bells: 5,
            believe_factor: 2.0,
            min_points: 4,
            shape: PeakShape::default(),
            mode: FitMode::default(),
            wavelength: None,
        }
    }
}

impl ReflexConfig {
    pub fn fit(mut self, fit: FitConfig) -> Self {
        self.fit = fit;
        self
    }

    pub fn min_sigma(mut self, min_sigma: f64) -> Self {
        self.fit.min_sigma = min_sigma;
        self
    }

    pub fn const_sigma(mut self, const_sigma: bool) -> Self {
        self.fit.const_sigma = const_sigma;
        self
    }

    pub fn max_bells(mut self, max_bells: usize) -> Self {
        self.max_bells = max_bells;
        self
    }

    pub fn believe_factor(mut self, believe_factor: f64) -> Self {
        self.believe_factor = believe_factor;
        self
    }

    pub fn min_points(mut self, min_points: usize) -> Self {
        self.min_points = min_points;
        self
    }

    pub fn shape(mut self, shape: PeakShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn mode(mut self, mode: FitMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn assumed_positions(self, candidates: Vec<f64>, pinned: Vec<usize>) -> Self {
        self.mode(FitMode::AssumedPositions { candidates, pinned })
    }

    pub fn wavelength(mut self, wavelength: Wavelength) -> Self {
        self.wavelength = Some(wavelength);
        self
    }

    pub fn validate(&self) -> Result<(), ReflexError> {
        let invalid = |msg: String| Err(ReflexError::InvalidConfiguration(msg));
        if self.max_bells == 0 {
            return invalid("max_bells must be at least 1".to_string());
        }
        if !(self.believe_factor > 0.0) {
            return invalid(format!(
                "believe_factor must be positive, got {}",
                self.believe_factor
            ));
        }
        if self.min_points == 0 {
            return invalid("min_points must be at least 1".to_string());
        }
        if !(self.fit.min_sigma >= 0.0) {
            return invalid(format!(
                "min_sigma must not be negative, got {}",
                self.fit.min_sigma
            ));
        }
        if let FitMode::AssumedPositions { candidates, pinned } = &self.mode {
            if candidates.is_empty() {
                return invalid("assumed positions mode requires candidate positions".to_string());
            }
            if let Some(i) = pinned.iter().find(|i| **i >= candidates.len()) {
                return invalid(format!(
                    "pinned index {i} is out of range for {} candidates",
                    candidates.len()
                ));
            }
        }
        if let Some(wavelength) = &self.wavelength {
            wavelength
                .check()
                .map_err(|e| ReflexError::InvalidConfiguration(e.to_string()))?;
        }
        Ok(())
    }

    pub fn model(&self) -> CompositeShape {
        CompositeShape::new(
            self.shape,
            self.wavelength.and_then(|w| w.satellite()),
        )
    }
}

/// A report emitted after each section
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// The share of sections processed so far, in `[0, 1]`
    pub fraction_complete: f64,
    pub cancelled: bool,
}

/// A section whose fit failed and contributed no reflexes
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSection {
    pub index: usize,
    pub range: Range<usize>,
    pub error: FitError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReflexResult {
    pub reflexes: Vec<FittedReflex>,
    pub skipped: Vec<SkippedSection>,
    /// The number of sections that passed the `min_points` filter
    pub sections: usize,
    pub cancelled: bool,
}

impl ReflexResult {
    pub fn len(&self) -> usize {
        self.reflexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reflexes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FittedReflex> {
        self.reflexes.iter()
    }

    /// Every reflex as `(center, height, width, residual_std)`
    pub fn as_tuples(&self) -> Vec<(f64, f64, f64, f64)> {
        self.reflexes.iter().map(|r| r.as_tuple()).collect()
    }

    fn record(&mut self, index: usize, section: &Section, outcome: Result<FitResult, FitError>) {
        match outcome {
            Ok(fit) => {
                debug!(
                    "Section {index} over {:?}: {} reflexes, residual std {:e}",
                    section.range,
                    fit.len(),
                    fit.residual_std
                );
                let residual_std = fit.residual_std;
                self.reflexes.extend(
                    fit.peaks
                        .into_iter()
                        .map(|p| FittedReflex::new(p, residual_std)),
                );
            }
            Err(error) => {
                warn!(
                    "Skipping section {index} over {:?}: {error}",
                    section.range
                );
                self.skipped.push(SkippedSection {
                    index,
                    range: section.range.clone(),
                    error,
                });
            }
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "parallelism")] {
        fn fit_sections_inner(
            orchestrator: &ReflexOrchestrator,
            sections: &[Section],
        ) -> Vec<Result<FitResult, FitError>> {
            sections
                .par_iter()
                .map(|section| orchestrator.fit_section(section))
                .collect()
        }
    } else {
        fn fit_sections_inner(
            orchestrator: &ReflexOrchestrator,
            sections: &[Section],
        ) -> Vec<Result<FitResult, FitError>> {
            sections
                .iter()
                .map(|section| orchestrator.fit_section(section))
                .collect()
        }
    }
}

/// Extracts reflexes from a diffractogram according to a [`ReflexConfig`]
#[derive(Debug, Clone)]
pub struct ReflexOrchestrator {
    config: ReflexConfig,
    model: CompositeShape,
}

impl ReflexOrchestrator {
    pub fn new(config: ReflexConfig) -> Result<Self, ReflexError> {
        config.validate()?;
        let model = config.model();
        Ok(Self { config, model })
    }

    pub fn config(&self) -> &ReflexConfig {
        &self.config
    }

    pub fn model(&self) -> &CompositeShape {
        &self.model
    }

    /// The sections of a stripped signal with at least `min_points` points
    pub fn sections(&self, signal: &Signal, sigma2: f64) -> Vec<Section> {
        segments(&signal.x, &signal.y, sigma2, self.config.believe_factor)
            .filter(|section| section.len() >= self.config.min_points)
            .collect()
    }

    /// The candidates inside `section`, and the pinned indices rewritten to
    /// index into them
    fn local_candidates(
        section: &Section,
        candidates: &[f64],
        pinned: &[usize],
    ) -> (Vec<f64>, Vec<usize>) {
        let mut local = Vec::new();
        let mut local_pinned = Vec::new();
        for (i, candidate) in candidates.iter().enumerate() {
            if section.contains(*candidate) {
                if pinned.contains(&i) {
                    local_pinned.push(local.len());
                }
                local.push(*candidate);
            }
        }
        (local, local_pinned)
    }

    pub fn fit_section(&self, section: &Section) -> Result<FitResult, FitError> {
        let fitter = MultiPeakFitter::new(section, self.model, self.config.fit.clone());
        match &self.config.mode {
            FitMode::Blind => fitter.find_bells(self.config.max_bells),
            FitMode::AssumedPositions { candidates, pinned } => {
                let (local, local_pinned) = Self::local_candidates(section, candidates, pinned);
                fitter.find_bells_pp(&local, &local_pinned)
            }
        }
    }

    /// Fit the sections of a stripped signal one at a time, reporting
    /// progress and honouring `cancel` between sections
    pub fn run<'a>(&'a self, signal: &Signal, sigma2: f64, cancel: &'a AtomicBool) -> ReflexRun<'a> {
        let sections = self.sections(signal, sigma2);
        ReflexRun::new(self, sections, cancel)
    }

    /// Fit every section of a stripped signal
    pub fn fit_all(&self, signal: &Signal, sigma2: f64) -> ReflexResult {
        let sections = self.sections(signal, sigma2);
        let outcomes = fit_sections_inner(self, &sections);
        let mut result = ReflexResult {
            sections: sections.len(),
            ..Default::default()
        };
        for (index, (section, outcome)) in sections.iter().zip(outcomes).enumerate() {
            result.record(index, section, outcome);
        }
        result
    }

    /// Estimate and strip the background of a raw scan, then fit every
    /// section of what remains
    pub fn analyze(
        &self,
        x: &[f64],
        raw_y: &[f64],
        degree: usize,
    ) -> Result<(Baseline, ReflexResult), ReflexError> {
        let raw = Signal::wrap(x, raw_y)?;
        let baseline = RobustBackgroundFitter::new(degree, self.config.believe_factor).fit(&raw.x, &raw.y)?;
        let stripped = raw.with_y(baseline.strip(&raw.y))?;
        let result = self.fit_all(&stripped, baseline.sigma2);
        info!(
            "Found {} reflexes in {} sections, {} sections skipped",
            result.len(),
            result.sections,
            result.skipped.len()
        );
        Ok((baseline, result))
    }
}

/// An in-progress, cancellable extraction created by
/// [`ReflexOrchestrator::run`]. Each step fits one section.
#[derive(Debug)]
pub struct ReflexRun<'a> {
    orchestrator: &'a ReflexOrchestrator,
    sections: std::iter::Enumerate<std::vec::IntoIter<Section>>,
    total: usize,
    completed: usize,
    cancel: &'a AtomicBool,
    result: ReflexResult,
    done: bool,
}

impl<'a> ReflexRun<'a> {
    fn new(orchestrator: &'a ReflexOrchestrator, sections: Vec<Section>, cancel: &'a AtomicBool) -> Self {
        let total = sections.len();
        Self {
            orchestrator,
            sections: sections.into_iter().enumerate(),
            total,
            completed: 0,
            cancel,
            result: ReflexResult {
                sections: total,
                ..Default::default()
            },
            done: false,
        }
    }

    fn fraction_complete(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// The reflexes collected so far
    pub fn result(&self) -> &ReflexResult {
        &self.result
    }

    /// Process the remaining sections, unless cancelled, and return
    /// everything collected
    pub fn finish(mut self) -> ReflexResult {
        for _ in self.by_ref() {}
        self.result
    }
}

impl<'a> Iterator for ReflexRun<'a> {
    type Item = Progress;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cancel.load(Ordering::Relaxed) {
            info!(
                "Cancelled after {} of {} sections",
                self.completed, self.total
            );
            self.done = true;
            self.result.cancelled = true;
            return Some(Progress {
                fraction_complete: self.fraction_complete(),
                cancelled: true,
            });
        }
        if self.total == 0 {
            // Nothing to fit still reports completion once
            self.done = true;
            return Some(Progress {
                fraction_complete: 1.0,
                cancelled: false,
            });
        }
        let Some((index, section)) = self.sections.next() else {
            self.done = true;
            return None;
        };
        let outcome = self.orchestrator.fit_section(&section);
        self.result.record(index, &section, outcome);
        self.completed += 1;
        Some(Progress {
            fraction_complete: self.fraction_complete(),
            cancelled: false,
        })
    }
}

impl<'a> FusedIterator for ReflexRun<'a> {}
