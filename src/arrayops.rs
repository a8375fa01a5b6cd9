//! Paired coordinate arrays and the small numeric helpers shared by the
//! background, segmentation and fitting stages.
use std::borrow::Cow;
use std::iter::{FusedIterator, Sum};

use num_traits::Float;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// All the ways a pair of coordinate arrays can be rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalError {
    #[error("The x array ({0} points) and y array ({1} points) do not match in length")]
    LengthMismatch(usize, usize),
    #[error("The x array is not strictly increasing")]
    NotSorted,
}

/// Check if the values in `it` are strictly ascending
pub fn is_increasing<F: Float>(it: &[F]) -> bool {
    it.windows(2).all(|w| w[0] < w[1])
}

/// Trapezoidal integration of `y` over `x`
pub fn trapz<F: Float + Sum>(x: &[F], y: &[F]) -> F {
    let half = F::one() / (F::one() + F::one());
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xw, yw)| (xw[1] - xw[0]) * half * (yw[1] + yw[0]))
        .sum()
}

/// `n` evenly spaced points strictly inside `(start, end)`
pub fn linspace_interior(start: f64, end: f64, n: usize) -> Vec<f64> {
    let step = (end - start) / (n + 1) as f64;
    (1..=n).map(|i| start + step * i as f64).collect()
}

/// An iterator over the `(x, y)` pairs of a [`Signal`]
pub struct SignalIter<'a> {
    inner: std::iter::Zip<
        std::iter::Copied<std::slice::Iter<'a, f64>>,
        std::iter::Copied<std::slice::Iter<'a, f64>>,
    >,
}

impl<'a> Iterator for SignalIter<'a> {
    type Item = (f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a> FusedIterator for SignalIter<'a> {}

impl<'a> ExactSizeIterator for SignalIter<'a> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// A 1-D diffraction scan: an `x` axis (`sin(θ)` or `q`) and the paired
/// signal magnitude.
///
/// The `x` axis is guaranteed to be strictly increasing and both arrays
/// have the same length.
#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Signal<'a, 'b> {
    pub x: Cow<'a, [f64]>,
    pub y: Cow<'b, [f64]>,
}

impl<'a, 'b> Signal<'a, 'b> {
    pub fn new(x: Cow<'a, [f64]>, y: Cow<'b, [f64]>) -> Result<Self, SignalError> {
        if x.len() != y.len() {
            return Err(SignalError::LengthMismatch(x.len(), y.len()));
        }
        if !is_increasing(&x) {
            return Err(SignalError::NotSorted);
        }
        Ok(Self { x, y })
    }

    /// Wrap borrowed slices, validating them like [`Signal::new`]
    pub fn wrap(x: &'a [f64], y: &'b [f64]) -> Result<Self, SignalError> {
        Self::new(Cow::Borrowed(x), Cow::Borrowed(y))
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn iter(&self) -> SignalIter<'_> {
        SignalIter {
            inner: self.x.iter().copied().zip(self.y.iter().copied()),
        }
    }

    /// A signal on the same `x` axis with new magnitudes
    pub fn with_y(&self, y: Vec<f64>) -> Result<Signal<'_, 'static>, SignalError> {
        Signal::new(Cow::Borrowed(self.x.as_ref()), Cow::Owned(y))
    }
}

impl TryFrom<(Vec<f64>, Vec<f64>)> for Signal<'static, 'static> {
    type Error = SignalError;

    fn try_from((x, y): (Vec<f64>, Vec<f64>)) -> Result<Self, Self::Error> {
        Self::new(Cow::Owned(x), Cow::Owned(y))
    }
}
