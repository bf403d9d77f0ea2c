//! Low-level fitting routines.
//!
//! Given:
//! - a model function `f(x; θ)`
//! - sample points `x_k` and observations `y_k`
//! - box constraints on `θ`
//! - one or more starting points
//!
//! we minimize `Σ (f(x_k; θ) - y_k)²` from each start with the bounded
//! Levenberg–Marquardt solver and return the best (lowest SSE) candidate.

use rayon::prelude::*;

use crate::domain::{Bounds, Covariance, Termination};
use crate::error::AppError;
use crate::math::{LmOptions, covariance_from_jacobian, minimize_bounded};

/// A model `f(x; θ)` evaluated on a whole grid at once.
pub trait ModelFunction: Sync {
    fn eval(&self, x: &[f64], params: &[f64]) -> Result<Vec<f64>, AppError>;
}

impl<F> ModelFunction for F
where
    F: Fn(&[f64], &[f64]) -> Result<Vec<f64>, AppError> + Sync,
{
    fn eval(&self, x: &[f64], params: &[f64]) -> Result<Vec<f64>, AppError> {
        self(x, params)
    }
}

/// Converged fit from a single starting point.
#[derive(Debug, Clone)]
pub struct CurveFit {
    pub params: Vec<f64>,
    pub covariance: Covariance,
    /// `f(x_k; θ) - y_k`.
    pub residuals: Vec<f64>,
    pub sse: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

/// Outcome of one start in a multistart run.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub index: usize,
    pub start: Vec<f64>,
    pub result: Result<CurveFit, AppError>,
}

/// Fit `model` to `(x, y)` inside `bounds`, starting from `p0`.
///
/// # Errors
/// `Fit` for mismatched inputs, infeasible bounds, a start outside the box, or
/// an exhausted optimizer budget. Errors raised by the model itself (e.g.
/// `Integration`) at the starting point pass through unchanged.
pub fn curve_fit<M: ModelFunction + ?Sized>(
    model: &M,
    x: &[f64],
    y: &[f64],
    bounds: &Bounds,
    p0: &[f64],
    opts: &LmOptions,
) -> Result<CurveFit, AppError> {
    if x.len() != y.len() {
        return Err(AppError::fit(format!(
            "Sample points and observations differ in length ({} vs {}).",
            x.len(),
            y.len()
        )));
    }
    if y.is_empty() {
        return Err(AppError::fit("No observations to fit."));
    }

    let residual = |params: &[f64]| -> Result<Vec<f64>, AppError> {
        let fitted = model.eval(x, params)?;
        if fitted.len() != y.len() {
            return Err(AppError::fit(format!(
                "Model returned {} values for {} observations.",
                fitted.len(),
                y.len()
            )));
        }
        Ok(fitted.iter().zip(y.iter()).map(|(f, o)| f - o).collect())
    };

    let outcome = minimize_bounded(residual, p0, bounds, opts)?;
    if !outcome.termination.converged() {
        return Err(AppError::fit(format!(
            "Optimizer did not converge ({} after {} iterations, {} evaluations; SSE={:.6e}).",
            outcome.termination.label(),
            outcome.iterations,
            outcome.evaluations,
            outcome.sse
        )));
    }

    let n = p0.len();
    let covariance = match covariance_from_jacobian(&outcome.jacobian, outcome.sse) {
        Some(cov) => Covariance::from_rows(
            (0..n).map(|i| (0..n).map(|j| cov[(i, j)]).collect()).collect(),
        ),
        None => {
            log::warn!(
                "Covariance of the parameters could not be estimated ({} observations, {} parameters).",
                y.len(),
                n
            );
            Covariance::unestimable(n)
        }
    };

    Ok(CurveFit {
        params: outcome.x,
        covariance,
        residuals: outcome.residuals,
        sse: outcome.sse,
        iterations: outcome.iterations,
        evaluations: outcome.evaluations,
        termination: outcome.termination,
    })
}

/// Run [`curve_fit`] from every start in parallel.
///
/// Outcomes are returned in start order regardless of scheduling.
pub fn curve_fit_multistart<M: ModelFunction + ?Sized>(
    model: &M,
    x: &[f64],
    y: &[f64],
    bounds: &Bounds,
    starts: &[Vec<f64>],
    opts: &LmOptions,
) -> Vec<StartOutcome> {
    starts
        .par_iter()
        .enumerate()
        .map(|(index, start)| {
            let result = curve_fit(model, x, y, bounds, start, opts);
            match &result {
                Ok(fit) => log::debug!(
                    "start {index}: {:?} -> {:?} sse={:.6e} ({}, {} iterations)",
                    start,
                    fit.params,
                    fit.sse,
                    fit.termination.label(),
                    fit.iterations
                ),
                Err(err) => log::debug!("start {index}: {:?} failed: {err}", start),
            }
            StartOutcome {
                index,
                start: start.clone(),
                result,
            }
        })
        .collect()
}

/// Deterministic selection: minimum SSE; ties broken by start index.
pub fn best_outcome(outcomes: &[StartOutcome]) -> Option<(usize, &CurveFit)> {
    let mut best: Option<(usize, &CurveFit)> = None;
    for o in outcomes {
        let Ok(fit) = &o.result else {
            continue;
        };
        best = match best {
            Some((idx, b)) if b.sse < fit.sse || (b.sse == fit.sse && idx < o.index) => Some((idx, b)),
            _ => Some((o.index, fit)),
        };
    }
    best
}
