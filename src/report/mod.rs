//! Reporting utilities: residuals, rankings, projections, and formatted output.

use crate::domain::{DayResidual, ObservedSeries, SirParams};
use crate::error::AppError;
use crate::models::{TrajectoryModel, infected_peak};

pub mod format;

pub use format::*;

/// Largest misfits on each side (top-N each).
#[derive(Debug, Clone, Default)]
pub struct Rankings {
    /// Observed above the curve (positive residual): the model under-fits.
    pub under: Vec<DayResidual>,
    /// Observed below the curve (negative residual): the model over-fits.
    pub over: Vec<DayResidual>,
}

/// The fitted model evaluated over the rendering horizon.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    pub days: Vec<f64>,
    pub reported: Vec<f64>,
    /// Day and size of the infected peak (`None` for an empty horizon).
    pub peak: Option<(f64, f64)>,
}

impl Projection {
    /// Reported count at the end of the horizon.
    pub fn final_reported(&self) -> f64 {
        self.reported.last().copied().unwrap_or(0.0)
    }
}

/// Evaluate the model on days `0..horizon_days`.
pub fn project<T: TrajectoryModel + ?Sized>(
    model: &T,
    params: &SirParams,
    horizon_days: usize,
) -> Result<Projection, AppError> {
    let days: Vec<f64> = (0..horizon_days).map(|d| d as f64).collect();
    let states = model.trajectory(&days, params)?;
    let peak = infected_peak(&days, &states);
    Ok(Projection {
        reported: states.iter().map(|s| s.a).collect(),
        days,
        peak,
    })
}

/// Pair each observed day with the fitted value; residual = observed - fitted.
pub fn compute_residuals(series: &ObservedSeries, fitted: &[f64]) -> Result<Vec<DayResidual>, AppError> {
    if fitted.len() < series.len() {
        return Err(AppError::fit(format!(
            "Fitted curve covers {} days but the series has {}.",
            fitted.len(),
            series.len()
        )));
    }
    let mut out = Vec::with_capacity(series.len());
    for (day, (&observed, &fit)) in series.values().iter().zip(fitted.iter()).enumerate() {
        if !fit.is_finite() {
            return Err(AppError::integration(format!(
                "Non-finite fitted value at day {day} during residual computation."
            )));
        }
        out.push(DayResidual {
            day,
            observed,
            fitted: fit,
            residual: observed - fit,
        });
    }
    Ok(out)
}

/// Rank the days with the largest misfit on each side.
pub fn rank_misfits(residuals: &[DayResidual], top_n: usize) -> Rankings {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.residual.partial_cmp(&a.residual).unwrap_or(std::cmp::Ordering::Equal));
    let under = sorted
        .iter()
        .filter(|r| r.residual > 0.0)
        .take(top_n)
        .cloned()
        .collect();

    sorted.reverse();
    let over = sorted
        .iter()
        .filter(|r| r.residual < 0.0)
        .take(top_n)
        .cloned()
        .collect();

    Rankings { under, over }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SirSolver;

    #[test]
    fn residuals_are_observed_minus_fitted() {
        let series = ObservedSeries::new(vec![1.0, 2.0, 4.0]).unwrap();
        let r = compute_residuals(&series, &[1.0, 2.5, 3.0, 9.0]).unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r[1].residual, -0.5);
        assert_eq!(r[2].residual, 1.0);
        assert!(compute_residuals(&series, &[1.0]).is_err());
    }

    #[test]
    fn rankings_split_by_sign() {
        let rows: Vec<DayResidual> = [0.0, 5.0, -3.0, 2.0, -7.0]
            .iter()
            .enumerate()
            .map(|(day, &residual)| DayResidual { day, observed: 10.0, fitted: 10.0 - residual, residual })
            .collect();
        let r = rank_misfits(&rows, 1);
        assert_eq!(r.under.len(), 1);
        assert_eq!(r.under[0].day, 1);
        assert_eq!(r.over.len(), 1);
        assert_eq!(r.over[0].day, 4);

        let all = rank_misfits(&rows, 10);
        assert_eq!(all.under.iter().map(|d| d.day).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(all.over.iter().map(|d| d.day).collect::<Vec<_>>(), vec![4, 2]);
    }

    #[test]
    fn projection_covers_the_horizon() {
        let params = SirParams { gamma: 0.5, alpha: 0.2, s0: 6_000.0, i0: 5.0, a0: 5.0 };
        let p = project(&SirSolver::new(10_000.0), &params, 200).unwrap();
        assert_eq!(p.days.len(), 200);
        assert_eq!(p.days[199], 199.0);
        assert!(p.final_reported() > p.reported[0]);
        assert!(p.peak.is_some());
    }
}
