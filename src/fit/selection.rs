//! SIR fit orchestration: starting points, multistart, and the final result.
//!
//! The tool fits the five SIR parameters from every starting point and computes:
//! - SSE / RMSE
//! - BIC = n * ln(SSE/n) + k * ln(n)
//! - the covariance (and standard errors) at the winning optimum
//!
//! Selection is deterministic: minimum SSE, ties broken by start index, with
//! the primary guess at index 0.

use crate::domain::{FitConfig, FitQuality, FitResult, ObservedSeries, PARAM_COUNT, SirParams};
use crate::error::AppError;
use crate::fit::fitter::{StartOutcome, best_outcome, curve_fit_multistart};
use crate::fit::starts::{initial_guess, multistart_grid};
use crate::math::LmOptions;
use crate::models::TrajectoryModel;

/// Output of fitting + selection.
#[derive(Debug, Clone)]
pub struct FitSelection {
    pub best: FitResult,
    /// Every start, in start order (successful or not).
    pub candidates: Vec<StartOutcome>,
}

impl FitSelection {
    /// Starts that failed, with the reason.
    pub fn failed(&self) -> impl Iterator<Item = (usize, &AppError)> {
        self.candidates
            .iter()
            .filter_map(|c| c.result.as_ref().err().map(|e| (c.index, e)))
    }
}

/// `n · ln(SSE/n) + k · ln(n)`, with `SSE/n` floored so an exact fit stays finite.
pub fn bic(sse: f64, n: usize, k: usize) -> f64 {
    let n_f = n.max(1) as f64;
    n_f * (sse / n_f).max(1e-300).ln() + k as f64 * n_f.ln()
}

/// Optimizer settings derived from the run configuration.
pub fn lm_options(config: &FitConfig) -> LmOptions {
    LmOptions {
        max_iterations: config.max_iterations,
        max_evaluations: config.max_evaluations,
        ..LmOptions::default()
    }
}

/// Fit the SIR parameters to `series` and pick the best start.
///
/// # Errors
/// If every start fails, the primary start's error is returned (usually `Fit`,
/// or `Integration` when the model cannot be evaluated at the guess).
pub fn fit_sir<T: TrajectoryModel + ?Sized>(
    model: &T,
    series: &ObservedSeries,
    config: &FitConfig,
) -> Result<FitSelection, AppError> {
    let bounds = config.bounds();
    bounds.validate()?;

    let primary = initial_guess(
        config.initial_guess,
        series,
        &bounds,
        config.population,
        config.p0.as_ref(),
    )?;
    let starts: Vec<Vec<f64>> =
        multistart_grid(&primary, config.multistart_steps, &bounds, config.population)?
            .iter()
            .map(|p| p.to_array().to_vec())
            .collect();

    log::info!(
        "fitting {} days from {} start(s); primary guess {:?}",
        series.len(),
        starts.len(),
        primary
    );

    let model_fn = |x: &[f64], p: &[f64]| -> Result<Vec<f64>, AppError> {
        let params = SirParams::from_slice(p)?;
        model.reported(x, &params)
    };

    let days = series.days();
    let candidates = curve_fit_multistart(
        &model_fn,
        &days,
        series.values(),
        &bounds,
        &starts,
        &lm_options(config),
    );

    for c in &candidates {
        if let Err(err) = &c.result {
            log::warn!("start {} {:?} failed: {err}", c.index, c.start);
        }
    }

    let Some((start_index, fit)) = best_outcome(&candidates) else {
        return Err(match candidates.first().map(|c| &c.result) {
            Some(Err(err)) => err.clone(),
            _ => AppError::fit("No starting point produced a fit."),
        });
    };

    let n = series.len();
    let quality = FitQuality {
        sse: fit.sse,
        rmse: (fit.sse / n as f64).sqrt(),
        bic: bic(fit.sse, n, PARAM_COUNT),
        n,
        iterations: fit.iterations,
        evaluations: fit.evaluations,
        termination: fit.termination,
    };
    let best = FitResult {
        params: SirParams::from_slice(&fit.params)?,
        covariance: fit.covariance.clone(),
        quality,
        start_index,
    };

    log::info!(
        "best fit from start {start_index}: {:?} sse={:.6e} ({})",
        best.params,
        best.quality.sse,
        best.quality.termination.label()
    );

    Ok(FitSelection { best, candidates })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Bounds, InitialGuess};
    use crate::fit::fitter::curve_fit;
    use crate::models::SirSolver;

    fn config(population: f64) -> FitConfig {
        FitConfig {
            population,
            ..FitConfig::default()
        }
    }

    #[test]
    fn three_point_doubling_series_fits_closely() {
        let series = ObservedSeries::new(vec![1.0, 2.0, 4.0]).unwrap();
        let cfg = config(1000.0);
        let solver = SirSolver::new(1000.0);

        let sel = fit_sir(&solver, &series, &cfg).unwrap();
        let p = sel.best.params;
        assert!(cfg.bounds().contains(&p.to_array()), "{p:?}");
        assert!(sel.best.quality.sse < 1.0, "sse = {}", sel.best.quality.sse);

        let fitted = solver.reported(&[0.0, 1.0, 2.0], &p).unwrap();
        let sse: f64 = fitted.iter().zip([1.0, 2.0, 4.0]).map(|(f, o)| (f - o).powi(2)).sum();
        assert!(sse < 1.0);
        // Three observations cannot pin down five parameters.
        assert!(!sel.best.covariance.is_finite());
    }

    #[test]
    fn flat_zero_series_drives_transmission_to_zero() {
        let series = ObservedSeries::new(vec![0.0; 20]).unwrap();
        let cfg = config(1000.0);
        let sel = fit_sir(&SirSolver::new(1000.0), &series, &cfg).unwrap();
        assert!(sel.best.params.gamma.abs() < 1e-9, "{:?}", sel.best.params);
        assert_eq!(sel.best.quality.sse, 0.0);
    }

    #[test]
    fn recovers_parameters_of_a_simulated_outbreak() {
        let truth = SirParams {
            gamma: 0.5,
            alpha: 0.2,
            s0: 6_000.0,
            i0: 5.0,
            a0: 5.0,
        };
        let solver = SirSolver::new(10_000.0);
        let days: Vec<f64> = (0..150).map(|d| d as f64).collect();
        let observed = solver.reported(&days, &truth).unwrap();
        let series = ObservedSeries::new(observed.clone()).unwrap();

        let sel = fit_sir(&solver, &series, &config(10_000.0)).unwrap();
        let p = sel.best.params;

        let max = series.max();
        assert!(sel.best.quality.rmse < 1e-3 * max, "rmse = {}", sel.best.quality.rmse);
        assert!((p.gamma - truth.gamma).abs() < 0.05 * truth.gamma, "{p:?}");
        assert!((p.alpha - truth.alpha).abs() < 0.05 * truth.alpha, "{p:?}");
        assert!((p.s0 - truth.s0).abs() < 0.05 * truth.s0, "{p:?}");

        // Feeding the fitted curve back in lands on the same parameters.
        let refit_series = ObservedSeries::new(solver.reported(&days, &p).unwrap()).unwrap();
        let cfg = FitConfig {
            initial_guess: InitialGuess::Explicit,
            p0: Some(p),
            multistart_steps: 0,
            ..config(10_000.0)
        };
        let refit = fit_sir(&solver, &refit_series, &cfg).unwrap();
        assert!((refit.best.params.gamma - p.gamma).abs() < 1e-3 * p.gamma);
        assert!((refit.best.params.s0 - p.s0).abs() < 1e-3 * p.s0);
    }

    #[test]
    fn explicit_guess_outside_bounds_is_a_fit_error() {
        let series = ObservedSeries::new(vec![1.0, 2.0, 4.0]).unwrap();
        let cfg = FitConfig {
            initial_guess: InitialGuess::Explicit,
            p0: Some(SirParams { gamma: 0.3, alpha: 2.0, s0: 10.0, i0: 1.0, a0: 1.0 }),
            ..config(1000.0)
        };
        let err = fit_sir(&SirSolver::new(1000.0), &series, &cfg).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fit);
    }

    #[test]
    fn infeasible_bounds_are_a_fit_error() {
        let bounds = Bounds::new(vec![0.0; 5], vec![50.0, -1.0, 10.0, 10.0, 10.0]);
        let solver = SirSolver::new(10.0);
        let model = |x: &[f64], p: &[f64]| -> Result<Vec<f64>, AppError> {
            solver.reported(x, &SirParams::from_slice(p)?)
        };
        let err = curve_fit(
            &model,
            &[0.0, 1.0],
            &[1.0, 2.0],
            &bounds,
            &[1.0, 0.0, 1.0, 1.0, 1.0],
            &LmOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fit);
    }

    #[test]
    fn exhausted_budget_is_a_fit_error() {
        let truth = SirParams { gamma: 0.5, alpha: 0.2, s0: 6_000.0, i0: 5.0, a0: 5.0 };
        let solver = SirSolver::new(10_000.0);
        let days: Vec<f64> = (0..60).map(|d| d as f64).collect();
        let series = ObservedSeries::new(solver.reported(&days, &truth).unwrap()).unwrap();
        let cfg = FitConfig {
            initial_guess: InitialGuess::Ones,
            multistart_steps: 0,
            max_iterations: 1,
            ..config(10_000.0)
        };
        let err = fit_sir(&solver, &series, &cfg).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fit);
    }

    #[test]
    fn bic_stays_finite_for_exact_fit() {
        assert!(bic(0.0, 10, 5).is_finite());
        assert!(bic(10.0, 10, 5) < bic(20.0, 10, 5));
    }
}
