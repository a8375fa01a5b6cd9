use criterion::Criterion;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use xrdsignal::{ReflexConfig, ReflexOrchestrator, RobustBackgroundFitter, Signal};

const NOISE_SIGMA: f64 = 0.05 / 3.0;

fn scan(
    start: f64,
    end: f64,
    n: usize,
    peaks: &[(f64, f64, f64)],
    background: impl Fn(f64) -> f64,
    seed: u64,
    sigma: f64,
) -> (Vec<f64>, Vec<f64>) {
    let step = (end - start) / (n - 1) as f64;
    let x: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
    let noise = Normal::new(0.0, sigma)
        .unwrap()
        .sample_iter(StdRng::seed_from_u64(seed));
    let y = x
        .iter()
        .zip(noise)
        .map(|(x, e)| {
            let signal: f64 = peaks
                .iter()
                .map(|(x0, h, w)| h * (-(x - x0).powi(2) / w).exp())
                .sum();
            background(*x) + signal + e
        })
        .collect();
    (x, y)
}

fn two_reflex_scan() -> (Vec<f64>, Vec<f64>) {
    scan(
        0.1,
        0.5,
        401,
        &[(0.2, 10.0, 2e-5), (0.4, 6.0, 3e-5)],
        |_| 0.0,
        42,
        NOISE_SIGMA,
    )
}

fn raw_diffractogram() -> (Vec<f64>, Vec<f64>) {
    scan(
        0.1,
        0.6,
        1001,
        &[(0.2, 40.0, 1e-5), (0.35, 25.0, 2e-5), (0.5, 15.0, 2e-5)],
        |x| 20.0 - 10.0 * x + 4.0 * x * x,
        3,
        0.1,
    )
}

fn background_fitting(c: &mut Criterion) {
    let (x, y) = raw_diffractogram();
    let fitter = RobustBackgroundFitter::new(2, 3.0);
    c.bench_function("background_quadratic", |b| b.iter(|| fitter.fit(&x, &y).unwrap()));
}

fn section_fitting(c: &mut Criterion) {
    let (x, y) = two_reflex_scan();
    let signal = Signal::wrap(&x, &y).unwrap();
    let sigma2 = NOISE_SIGMA.powi(2);

    let blind = ReflexOrchestrator::new(ReflexConfig::default().believe_factor(5.0)).unwrap();
    c.bench_function("blind_two_reflexes", |b| {
        b.iter(|| blind.fit_all(&signal, sigma2))
    });

    let assumed = ReflexOrchestrator::new(
        ReflexConfig::default()
            .believe_factor(5.0)
            .assumed_positions(vec![0.2, 0.4], vec![]),
    )
    .unwrap();
    c.bench_function("assumed_two_reflexes", |b| {
        b.iter(|| assumed.fit_all(&signal, sigma2))
    });
}

fn end_to_end(c: &mut Criterion) {
    let (x, y) = raw_diffractogram();
    let orchestrator = ReflexOrchestrator::new(ReflexConfig::default().believe_factor(3.0)).unwrap();
    c.bench_function("analyze_raw_scan", |b| {
        b.iter(|| orchestrator.analyze(&x, &y, 2).unwrap())
    });
}

fn fitting(c: &mut Criterion) {
    background_fitting(c);
    section_fitting(c);
    end_to_end(c);
}

criterion::criterion_group!(benches, fitting);
criterion::criterion_main!(benches);
