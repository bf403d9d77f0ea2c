//! Starting points for the optimizer.
//!
//! The least-squares surface of an SIR fit has long flat valleys (`gamma` and
//! `s_0` trade off early in an outbreak), so the starting point matters. We
//! make it explicit:
//!
//! - `Auto`: read the early exponential growth off the data
//! - `Midpoint` / `Ones`: fixed, data-independent guesses
//! - `Explicit`: whatever the caller passes
//!
//! and optionally add a deterministic grid of extra starts around it.

use crate::domain::{Bounds, InitialGuess, ObservedSeries, SirParams};
use crate::error::AppError;

/// Days of increments used to estimate the early growth rate.
const GROWTH_WINDOW_DAYS: usize = 30;

/// Removal rate assumed by the data-driven guess.
const AUTO_ALPHA: f64 = 0.1;

/// Multistart range for `gamma`.
const GAMMA_GRID: (f64, f64) = (0.05, 5.0);

/// Multistart range for `s_0`, as fractions of the population.
const S0_GRID_FRACTION: (f64, f64) = (1e-4, 1.0);

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(AppError::config(format!(
            "Invalid grid range: min={min}, max={max} (must be finite, >0, and max>min)."
        )));
    }
    if steps < 2 {
        return Err(AppError::config("Grid steps must be >= 2."));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    Ok((0..steps).map(|i| (ln_min + step * i as f64).exp()).collect())
}

/// Resolve the primary starting point and clip it into the box.
///
/// `Explicit` is not clipped: a user-supplied vector outside the box is an error.
pub fn initial_guess(
    kind: InitialGuess,
    series: &ObservedSeries,
    bounds: &Bounds,
    population: f64,
    explicit: Option<&SirParams>,
) -> Result<SirParams, AppError> {
    let raw = match kind {
        InitialGuess::Auto => auto_guess(series, population).to_array().to_vec(),
        InitialGuess::Midpoint => bounds.midpoint(),
        InitialGuess::Ones => vec![1.0; bounds.len()],
        InitialGuess::Explicit => {
            let Some(p0) = explicit else {
                return Err(AppError::config(
                    "Explicit initial guess requested but no parameter vector was given.",
                ));
            };
            let x = p0.to_array();
            if !bounds.contains(&x) {
                return Err(AppError::fit(format!(
                    "Initial guess {x:?} lies outside the parameter bounds."
                )));
            }
            return Ok(*p0);
        }
    };
    SirParams::from_slice(&bounds.clamp(&raw))
}

/// Data-driven guess from the early growth of the series.
///
/// Early on `s ≈ M`, so the daily increments grow like `exp((gamma - alpha) t)`
/// and the first increment is roughly `gamma · i_0`.
pub fn auto_guess(series: &ObservedSeries, population: f64) -> SirParams {
    let values = series.values();
    let a0 = values.first().copied().unwrap_or(0.0);
    let increments = series.increments();
    let window = &increments[..increments.len().min(GROWTH_WINDOW_DAYS)];

    let points: Vec<(f64, f64)> = window
        .iter()
        .enumerate()
        .filter(|(_, d)| **d > 0.0)
        .map(|(k, d)| (k as f64, d.ln()))
        .collect();

    let Some(first_positive) = window.iter().copied().find(|d| *d > 0.0) else {
        return SirParams {
            gamma: 0.0,
            alpha: AUTO_ALPHA,
            s0: population,
            i0: 0.0,
            a0,
        };
    };

    let r = log_linear_slope(&points).unwrap_or(0.0);
    let gamma = (r + AUTO_ALPHA).clamp(0.0, crate::domain::GAMMA_MAX);
    let i0 = if gamma > 0.0 { first_positive / gamma } else { 0.0 };

    SirParams {
        gamma,
        alpha: AUTO_ALPHA,
        s0: population,
        i0,
        a0,
    }
}

/// Ordinary least-squares slope of `(x, y)` pairs; `None` with fewer than two
/// distinct `x`.
fn log_linear_slope(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let xbar = points.iter().map(|p| p.0).sum::<f64>() / n;
    let ybar = points.iter().map(|p| p.1).sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var = 0.0;
    for &(x, y) in points {
        cov += (x - xbar) * (y - ybar);
        var += (x - xbar) * (x - xbar);
    }
    if var <= 0.0 {
        return None;
    }
    let slope = cov / var;
    slope.is_finite().then_some(slope)
}

/// Primary start followed by a `steps × steps` grid over `(gamma, s_0)`.
///
/// Grid points keep `alpha`, `i_0` and `a_0` from the primary start; `steps = 0`
/// disables the grid.
pub fn multistart_grid(
    primary: &SirParams,
    steps: usize,
    bounds: &Bounds,
    population: f64,
) -> Result<Vec<SirParams>, AppError> {
    let mut starts = vec![*primary];
    if steps == 0 {
        return Ok(starts);
    }

    let (gamma_values, s0_values) = if steps == 1 {
        (vec![(GAMMA_GRID.0 * GAMMA_GRID.1).sqrt()], vec![population])
    } else {
        (
            log_space(GAMMA_GRID.0, GAMMA_GRID.1, steps)?,
            log_space(S0_GRID_FRACTION.0 * population, S0_GRID_FRACTION.1 * population, steps)?,
        )
    };

    for &gamma in &gamma_values {
        for &s0 in &s0_values {
            let candidate = SirParams { gamma, s0, ..*primary };
            starts.push(SirParams::from_slice(&bounds.clamp(&candidate.to_array()))?);
        }
    }

    Ok(starts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_endpoints() {
        let v = log_space(0.05, 5.0, 3).unwrap();
        assert_eq!(v.len(), 3);
        assert!((v[0] - 0.05).abs() < 1e-12);
        assert!((v[1] - 0.5).abs() < 1e-12);
        assert!((v[2] - 5.0).abs() < 1e-12);
        assert!(log_space(1.0, 1.0, 3).is_err());
        assert!(log_space(1.0, 2.0, 1).is_err());
    }

    #[test]
    fn auto_guess_reads_doubling_growth() {
        let series = ObservedSeries::new(vec![1.0, 2.0, 4.0, 8.0, 16.0]).unwrap();
        let g = auto_guess(&series, 1000.0);
        assert!((g.gamma - (2f64.ln() + 0.1)).abs() < 1e-12);
        assert_eq!(g.alpha, 0.1);
        assert_eq!(g.s0, 1000.0);
        assert_eq!(g.a0, 1.0);
        assert!((g.i0 - 1.0 / g.gamma).abs() < 1e-12);
    }

    #[test]
    fn auto_guess_without_growth_has_no_transmission() {
        let series = ObservedSeries::new(vec![0.0; 10]).unwrap();
        let g = auto_guess(&series, 1000.0);
        assert_eq!(g.gamma, 0.0);
        assert_eq!(g.i0, 0.0);
        assert_eq!(g.a0, 0.0);
    }

    #[test]
    fn ones_guess_is_clipped_into_box() {
        let series = ObservedSeries::new(vec![1.0, 2.0]).unwrap();
        let bounds = Bounds::new(vec![0.0; 5], vec![50.0, 0.5, 1000.0, 1000.0, 1000.0]);
        let g = initial_guess(InitialGuess::Ones, &series, &bounds, 1000.0, None).unwrap();
        assert_eq!(g.to_array(), [1.0, 0.5, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn explicit_guess_outside_box_is_a_fit_error() {
        let series = ObservedSeries::new(vec![1.0, 2.0]).unwrap();
        let bounds = Bounds::sir(1000.0);
        let p0 = SirParams { gamma: 60.0, alpha: 0.1, s0: 10.0, i0: 1.0, a0: 1.0 };
        let err = initial_guess(InitialGuess::Explicit, &series, &bounds, 1000.0, Some(&p0))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fit);
    }

    #[test]
    fn grid_has_primary_first_and_steps_squared_more() {
        let primary = SirParams { gamma: 0.3, alpha: 0.1, s0: 1000.0, i0: 2.0, a0: 1.0 };
        let bounds = Bounds::sir(1000.0);
        let starts = multistart_grid(&primary, 3, &bounds, 1000.0).unwrap();
        assert_eq!(starts.len(), 10);
        assert_eq!(starts[0], primary);
        assert!(starts.iter().all(|s| bounds.contains(&s.to_array())));
        assert!(starts[1..].iter().all(|s| s.alpha == 0.1 && s.i0 == 2.0));
        assert_eq!(multistart_grid(&primary, 0, &bounds, 1000.0).unwrap().len(), 1);
    }
}
