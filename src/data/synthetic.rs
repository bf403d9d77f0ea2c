//! Synthetic cumulative-case series from known SIR parameters.
//!
//! Used by `sirfit simulate` to produce inputs when no recorded series is at
//! hand, and by tests that need an outbreak with a known answer.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, LogNormal};

use crate::domain::{ObservedSeries, SirParams};
use crate::error::AppError;
use crate::models::TrajectoryModel;

/// How to perturb the noiseless trajectory.
#[derive(Debug, Clone, Copy)]
pub struct NoiseSpec {
    /// Log-space standard deviation of the multiplicative noise on daily increments.
    pub sigma: f64,
    pub seed: u64,
}

/// Simulate `days` cumulative counts starting at day 0.
///
/// Each daily increment is scaled by a mean-one log-normal factor when
/// `noise` is given. Counts are rounded to whole cases, so the series stays
/// non-decreasing.
pub fn simulate_series<T: TrajectoryModel + ?Sized>(
    model: &T,
    params: &SirParams,
    days: usize,
    noise: Option<NoiseSpec>,
) -> Result<ObservedSeries, AppError> {
    if days == 0 {
        return Err(AppError::config("Simulation needs at least one day."));
    }
    let times: Vec<f64> = (0..days).map(|d| d as f64).collect();
    let clean = model.reported(&times, params)?;

    let mut rng_and_dist = match noise {
        Some(settings) if settings.sigma > 0.0 => {
            if !settings.sigma.is_finite() {
                return Err(AppError::config(format!("Noise sigma must be finite (got {}).", settings.sigma)));
            }
            let dist = LogNormal::new(-0.5 * settings.sigma * settings.sigma, settings.sigma)
                .map_err(|e| AppError::config(format!("Noise distribution error: {e}")))?;
            Some((StdRng::seed_from_u64(settings.seed), dist))
        }
        _ => None,
    };

    let mut values = Vec::with_capacity(days);
    let mut total = clean[0].max(0.0);
    values.push(total.round());
    for k in 1..days {
        let mut step = (clean[k] - clean[k - 1]).max(0.0);
        if let Some((rng, dist)) = rng_and_dist.as_mut() {
            step *= dist.sample(rng);
        }
        total += step;
        values.push(total.round());
    }

    log::info!("simulated {days} days, final count {}", total.round());
    ObservedSeries::new(values)
}

/// Write a series as a headerless one-column CSV.
pub fn write_series_csv(path: &Path, series: &ObservedSeries) -> Result<(), AppError> {
    let mut file = File::create(path).map_err(|e| AppError::export(format!("Failed to create series CSV: {e}")))?;
    for v in series.values() {
        writeln!(file, "{v}").map_err(|e| AppError::export(format!("Failed to write series CSV: {e}")))?;
    }
    Ok(())
}
