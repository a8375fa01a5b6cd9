//! Deterministic synthetic diffractograms used by the tests.
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// `n` evenly spaced points from `start` to `end` inclusive
pub fn linear_axis(start: f64, end: f64, n: usize) -> Vec<f64> {
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Sum of `h * exp(-(x - x0)^2 / w)` terms for each `(x0, h, w)`
pub fn gauss_sum(x: &[f64], peaks: &[(f64, f64, f64)]) -> Vec<f64> {
    x.iter()
        .map(|x| {
            peaks
                .iter()
                .map(|(x0, h, w)| h * (-(x - x0).powi(2) / w).exp())
                .sum()
        })
        .collect()
}

/// Seeded zero-mean gaussian noise with standard deviation `sigma`
pub fn noise(seed: u64, sigma: f64) -> impl Iterator<Item = f64> {
    let rng = StdRng::seed_from_u64(seed);
    Normal::new(0.0, sigma).unwrap().sample_iter(rng)
}

/// Standard deviation of the noise added by [`two_reflex_scan`]
pub const TWO_REFLEX_SIGMA: f64 = 0.05 / 3.0;

/// A background-stripped scan over `sin(θ)` with two well separated
/// reflexes and small zero-mean noise.
pub fn two_reflex_scan() -> (Vec<f64>, Vec<f64>) {
    let x = linear_axis(0.1, 0.5, 401);
    let y = gauss_sum(&x, &[(0.2, 10.0, 2e-5), (0.4, 6.0, 3e-5)])
        .into_iter()
        .zip(noise(42, TWO_REFLEX_SIGMA))
        .map(|(y, e)| y + e)
        .collect();
    (x, y)
}

/// A raw scan: quadratic background, three reflexes and noise.
pub fn raw_diffractogram() -> (Vec<f64>, Vec<f64>) {
    let x = linear_axis(0.1, 0.6, 1001);
    let peaks = gauss_sum(
        &x,
        &[(0.2, 40.0, 1e-5), (0.35, 25.0, 2e-5), (0.5, 15.0, 2e-5)],
    );
    let y = x
        .iter()
        .zip(peaks)
        .zip(noise(3, 0.1))
        .map(|((x, p), e)| 20.0 - 10.0 * x + 4.0 * x * x + p + e)
        .collect();
    (x, y)
}
