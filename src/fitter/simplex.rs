//! Derivative free minimization of the width-penalized squared error used
//! when reflex positions are known in advance.
use argmin::core::{CostFunction, Error, Executor, State};
use argmin::solver::neldermead::NelderMead;

use super::layout::ParameterLayout;
use super::{FitConfig, FitError};
use crate::shapes::CompositeShape;

/// `SSR / N * (1 + var(widths))`, or `+inf` outside the valid region
#[derive(Debug, Clone)]
pub(crate) struct PenalizedObjective<'a> {
    x: &'a [f64],
    y: &'a [f64],
    model: CompositeShape,
    layout: ParameterLayout,
    min_width: f64,
}

impl<'a> PenalizedObjective<'a> {
    pub fn new(
        x: &'a [f64],
        y: &'a [f64],
        model: CompositeShape,
        layout: ParameterLayout,
        min_width: f64,
    ) -> Self {
        Self {
            x,
            y,
            model,
            layout,
            min_width,
        }
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn evaluate(&self, params: &[f64]) -> f64 {
        let peaks = self.layout.unflatten(params);
        if peaks.is_empty() || self.x.is_empty() {
            return 0.0;
        }
        if !peaks.iter().all(|p| p.is_valid(self.min_width)) {
            return f64::INFINITY;
        }
        let n = peaks.len() as f64;
        let mean_width = peaks.iter().map(|p| p.width).sum::<f64>() / n;
        let width_variance = peaks
            .iter()
            .map(|p| (p.width - mean_width).powi(2))
            .sum::<f64>()
            / n;
        let mse = self.model.squared_error(self.x, self.y, &peaks) / self.x.len() as f64;
        let value = mse * (1.0 + width_variance);
        if value.is_finite() {
            value
        } else {
            f64::INFINITY
        }
    }
}

impl<'a> CostFunction for PenalizedObjective<'a> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.evaluate(param))
    }
}

/// Each vertex perturbs one coordinate of `initial` by 5%, or by a small
/// absolute amount when that coordinate is zero
fn initial_simplex(initial: &[f64]) -> Vec<Vec<f64>> {
    let mut vertices = Vec::with_capacity(initial.len() + 1);
    vertices.push(initial.to_vec());
    for j in 0..initial.len() {
        let mut vertex = initial.to_vec();
        vertex[j] = if vertex[j] != 0.0 {
            vertex[j] * 1.05
        } else {
            0.00025
        };
        vertices.push(vertex);
    }
    vertices
}

fn run_once(
    objective: &PenalizedObjective<'_>,
    initial: &[f64],
    config: &FitConfig,
) -> Result<(Vec<f64>, f64), FitError> {
    let solver = NelderMead::new(initial_simplex(initial))
        .with_sd_tolerance(config.simplex_tolerance)
        .map_err(|e| FitError::Solver(e.to_string()))?;
    let result = Executor::new(objective.clone(), solver)
        .configure(|state| state.max_iters(config.simplex_max_iter))
        .run()
        .map_err(|e| FitError::Solver(e.to_string()))?;
    let state = result.state();
    let iterations = state.get_iter() as usize;
    let best = state
        .get_best_param()
        .cloned()
        .ok_or(FitError::DidNotConverge { iterations })?;
    Ok((best, state.get_best_cost()))
}

/// Minimize `objective` from `initial`, restarting from the best vertex
/// while restarts keep improving on it. Returns the best parameters and
/// objective value.
pub(crate) fn minimize(
    objective: &PenalizedObjective<'_>,
    initial: Vec<f64>,
    config: &FitConfig,
) -> Result<(Vec<f64>, f64), FitError> {
    if initial.is_empty() {
        let value = objective.evaluate(&initial);
        return Ok((initial, value));
    }
    let mut best_cost = objective.evaluate(&initial);
    let mut best = initial;

    for round in 0..=config.simplex_restarts {
        let (params, cost) = run_once(objective, &best, config)?;
        log::trace!("Simplex round {round}: objective = {cost:e}");
        if cost < best_cost {
            let improvement = best_cost - cost;
            best = params;
            best_cost = cost;
            if improvement.is_finite()
                && improvement <= config.simplex_tolerance * (best_cost.abs() + config.simplex_tolerance)
            {
                break;
            }
        } else {
            break;
        }
    }

    if !best_cost.is_finite() {
        return Err(FitError::InvalidStartingPoint);
    }
    Ok((best, best_cost))
}
