//! Partition a background-stripped signal into sections that plausibly hold
//! one or more overlapping reflexes.
//!
//! A section opens when the signal rises above `sqrt(sigma2) * believe_factor`
//! and closes at the first point that falls back below zero. The run of
//! points rising towards the threshold just before a section opens is kept
//! as its leading edge, unless a sharp drop or a non-positive point shows it
//! to be noise.
use std::iter::FusedIterator;
use std::mem;
use std::ops::Range;

use log::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::trapz;

/// A contiguous run of points drawn from the stripped signal
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Section {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    /// The indices of the stripped signal this section was drawn from
    pub range: Range<usize>,
}

impl Section {
    /// Copy the points in `range` out of `x` and `y`.
    ///
    /// A negative boundary point is moved to the zero crossing with its
    /// inner neighbour when that neighbour is positive, and its value is set
    /// to zero either way.
    pub fn new(x: &[f64], y: &[f64], range: Range<usize>) -> Self {
        let mut section = Self {
            x: x[range.clone()].to_vec(),
            y: y[range.clone()].to_vec(),
            range,
        };
        section.clamp_boundaries();
        section
    }

    fn clamp_boundaries(&mut self) {
        let n = self.len();
        if n == 0 {
            return;
        }
        if self.y[0] < 0.0 {
            if n > 1 && self.y[1] > 0.0 {
                let t = -self.y[0] / (self.y[1] - self.y[0]);
                self.x[0] += (self.x[1] - self.x[0]) * t;
            }
            self.y[0] = 0.0;
        }
        let last = n - 1;
        if n > 1 && self.y[last] < 0.0 {
            if self.y[last - 1] > 0.0 {
                let t = self.y[last - 1] / (self.y[last - 1] - self.y[last]);
                self.x[last] = self.x[last - 1] + (self.x[last] - self.x[last - 1]) * t;
            }
            self.y[last] = 0.0;
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// The first and last x coordinate
    pub fn x_bounds(&self) -> (f64, f64) {
        match (self.x.first(), self.x.last()) {
            (Some(lo), Some(hi)) => (*lo, *hi),
            _ => (0.0, 0.0),
        }
    }

    pub fn contains(&self, x: f64) -> bool {
        let (lo, hi) = self.x_bounds();
        !self.is_empty() && lo <= x && x <= hi
    }

    /// The trapezoidal area under the section
    pub fn area(&self) -> f64 {
        trapz(&self.x, &self.y)
    }

    pub fn max_height(&self) -> f64 {
        self.y.iter().copied().fold(0.0, f64::max)
    }
}

/// A lazy, single pass iterator over the [`Section`]s of a stripped signal.
///
/// Created by [`segments`].
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    x: &'a [f64],
    y: &'a [f64],
    threshold: f64,
    index: usize,
    sector: Vec<usize>,
    prev: Vec<usize>,
}

impl<'a> Segments<'a> {
    pub fn new(x: &'a [f64], y: &'a [f64], sigma2: f64, believe_factor: f64) -> Self {
        let threshold = sigma2.sqrt() * believe_factor;
        Self {
            x,
            y: &y[..x.len().min(y.len())],
            threshold,
            index: 0,
            sector: Vec::new(),
            prev: Vec::new(),
        }
    }

    /// The signal level a point must exceed to open a section
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn emit(&self, indices: &[usize]) -> Option<Section> {
        let start = *indices.first()?;
        let end = *indices.last()? + 1;
        trace!("Emitting section over {start}..{end}");
        Some(Section::new(self.x, self.y, start..end))
    }

    fn continues_noise_run(&self, value: f64) -> bool {
        match self.prev.last() {
            None => true,
            Some(j) => self.y[*j] - value > value || value <= 0.0,
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Section;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.y.len() {
            let i = self.index;
            self.index += 1;
            let value = self.y[i];

            if value > self.threshold {
                if !self.prev.is_empty() {
                    self.sector = mem::take(&mut self.prev);
                }
                self.sector.push(i);
            } else if !self.sector.is_empty() {
                self.sector.push(i);
                if value < 0.0 {
                    let sector = mem::take(&mut self.sector);
                    self.prev.push(i);
                    return self.emit(&sector);
                }
            } else if self.continues_noise_run(value) {
                self.prev.clear();
                self.prev.push(i);
            } else {
                self.prev.push(i);
            }
        }

        if self.sector.is_empty() {
            None
        } else {
            let sector = mem::take(&mut self.sector);
            self.emit(&sector)
        }
    }
}

impl<'a> FusedIterator for Segments<'a> {}

/// Split a stripped signal into candidate reflex sections
pub fn segments<'a>(x: &'a [f64], y: &'a [f64], sigma2: f64, believe_factor: f64) -> Segments<'a> {
    Segments::new(x, y, sigma2, believe_factor)
}
