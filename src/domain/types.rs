//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - reloaded later for plotting or comparisons

use std::path::PathBuf;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Population used to normalize the transmission term (Brazil, 2020-06-25, IBGE clock).
pub const DEFAULT_POPULATION: f64 = 211_696_880.0;

/// Cumulative confirmed cases through 2020-06-23.
pub const DEFAULT_DATA_PATH: &str = "data/acumulados-23-06.csv";

/// Day of the first recorded case in the default series (day 0).
pub const DEFAULT_FIRST_CASE_DATE: &str = "2020-02-26";

/// Projection horizon used when rendering the fitted curve.
pub const DEFAULT_HORIZON_DAYS: usize = 200;

/// Upper bound of the transmission rate.
pub const GAMMA_MAX: f64 = 50.0;

/// Upper bound of the removal rate.
pub const ALPHA_MAX: f64 = 1.0;

/// Number of free parameters: `(gamma, alpha, s_0, i_0, a_0)`.
pub const PARAM_COUNT: usize = 5;

pub const PARAM_NAMES: [&str; PARAM_COUNT] = ["gamma", "alpha", "s_0", "i_0", "a_0"];

/// Compartment sizes at one point in time.
///
/// `s + i` need not equal the population: `a` accumulates one-way and is never
/// drained, so the three do not form a partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SirState {
    /// Susceptible.
    pub s: f64,
    /// Actively infected.
    pub i: f64,
    /// Cumulative reported (removed) cases.
    pub a: f64,
}

impl SirState {
    pub fn new(s: f64, i: f64, a: f64) -> Self {
        Self { s, i, a }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.s, self.i, self.a]
    }

    /// Build from the first three entries of an integrator state slice.
    pub fn from_slice(y: &[f64]) -> Self {
        Self {
            s: y[0],
            i: y[1],
            a: y[2],
        }
    }
}

/// The five fitted parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SirParams {
    /// Transmission rate.
    pub gamma: f64,
    /// Removal rate.
    pub alpha: f64,
    #[serde(rename = "s_0")]
    pub s0: f64,
    #[serde(rename = "i_0")]
    pub i0: f64,
    #[serde(rename = "a_0")]
    pub a0: f64,
}

impl SirParams {
    pub fn to_array(self) -> [f64; PARAM_COUNT] {
        [self.gamma, self.alpha, self.s0, self.i0, self.a0]
    }

    /// Build from a parameter vector in `PARAM_NAMES` order.
    pub fn from_slice(values: &[f64]) -> Result<Self, AppError> {
        if values.len() != PARAM_COUNT {
            return Err(AppError::fit(format!(
                "Expected {PARAM_COUNT} parameters (gamma, alpha, s_0, i_0, a_0), got {}.",
                values.len()
            )));
        }
        Ok(Self {
            gamma: values[0],
            alpha: values[1],
            s0: values[2],
            i0: values[3],
            a0: values[4],
        })
    }

    pub fn initial_state(&self) -> SirState {
        SirState::new(self.s0, self.i0, self.a0)
    }

    /// Initial effective reproduction number `gamma * s_0 / (M * alpha)`.
    ///
    /// `None` when `alpha = 0` (infections never clear) or `M <= 0`.
    pub fn reproduction_number(&self, population: f64) -> Option<f64> {
        if self.alpha <= 0.0 || population <= 0.0 {
            return None;
        }
        let r = self.gamma * self.s0 / (population * self.alpha);
        r.is_finite().then_some(r)
    }
}

/// Box constraints for a parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self { lower, upper }
    }

    /// `gamma ∈ [0, 50]`, `alpha ∈ [0, 1]`, `s_0, i_0, a_0 ∈ [0, M]`.
    pub fn sir(population: f64) -> Self {
        Self {
            lower: vec![0.0; PARAM_COUNT],
            upper: vec![GAMMA_MAX, ALPHA_MAX, population, population, population],
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Reject mismatched lengths, non-finite limits, and `lower > upper`.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.lower.len() != self.upper.len() {
            return Err(AppError::fit(format!(
                "Bounds length mismatch: lower has {}, upper has {}.",
                self.lower.len(),
                self.upper.len()
            )));
        }
        for (j, (&lo, &hi)) in self.lower.iter().zip(self.upper.iter()).enumerate() {
            if !(lo.is_finite() && hi.is_finite()) {
                return Err(AppError::fit(format!(
                    "Infeasible bounds for parameter {j}: [{lo}, {hi}] must be finite."
                )));
            }
            if lo > hi {
                return Err(AppError::fit(format!(
                    "Infeasible bounds for parameter {j}: lower {lo} > upper {hi}."
                )));
            }
        }
        Ok(())
    }

    pub fn contains(&self, x: &[f64]) -> bool {
        x.len() == self.lower.len()
            && x
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(&v, (&lo, &hi))| v >= lo && v <= hi)
    }

    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&v, (&lo, &hi))| v.clamp(lo, hi))
            .collect()
    }

    pub fn midpoint(&self) -> Vec<f64> {
        self.lower
            .iter()
            .zip(self.upper.iter())
            .map(|(&lo, &hi)| 0.5 * (lo + hi))
            .collect()
    }
}

/// Daily cumulative case counts; index = days since the first recorded case.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedSeries {
    values: Vec<f64>,
}

impl ObservedSeries {
    /// Validate and wrap a series. Values must be finite and non-negative.
    pub fn new(values: Vec<f64>) -> Result<Self, AppError> {
        if values.is_empty() {
            return Err(AppError::input_load("Observed series is empty."));
        }
        if let Some((day, v)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(AppError::input_load(format!(
                "Invalid count {v} at day {day} (must be finite and >= 0)."
            )));
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The time axis `0, 1, …, n-1`.
    pub fn days(&self) -> Vec<f64> {
        (0..self.values.len()).map(|d| d as f64).collect()
    }

    pub fn last(&self) -> f64 {
        self.values.last().copied().unwrap_or(0.0)
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    /// Day-over-day differences (`n - 1` values).
    pub fn increments(&self) -> Vec<f64> {
        self.values.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn is_non_decreasing(&self) -> bool {
        self.values.windows(2).all(|w| w[1] >= w[0])
    }
}

/// How the optimizer's starting point is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InitialGuess {
    /// Data-driven guess from the early growth of the series.
    Auto,
    /// Midpoint of the parameter box.
    Midpoint,
    /// All ones, clipped into the box (the classic curve-fitting default).
    Ones,
    /// User-supplied vector (`--p0`).
    Explicit,
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Relative cost reduction fell below tolerance.
    CostTolerance,
    /// An accepted step was smaller than the relative step tolerance.
    StepTolerance,
    /// Projected gradient fell below tolerance.
    GradientTolerance,
    /// Residuals are exactly zero.
    ExactFit,
    /// Damping saturated with every trial step rejected; the point is not stationary.
    Stalled,
    MaxIterations,
    MaxEvaluations,
}

impl Termination {
    pub fn converged(self) -> bool {
        !matches!(
            self,
            Termination::Stalled | Termination::MaxIterations | Termination::MaxEvaluations
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            Termination::CostTolerance => "cost tolerance",
            Termination::StepTolerance => "step tolerance",
            Termination::GradientTolerance => "gradient tolerance",
            Termination::ExactFit => "exact fit",
            Termination::Stalled => "stalled (no descent step found)",
            Termination::MaxIterations => "iteration budget exhausted",
            Termination::MaxEvaluations => "evaluation budget exhausted",
        }
    }
}

/// Parameter covariance estimate.
///
/// Rank-deficient Jacobians give a finite pseudo-inverse estimate. Entries are
/// `+inf` only when no estimate exists: no more observations than parameters,
/// an all-zero Jacobian, or a non-finite SSE.
#[derive(Debug, Clone, PartialEq)]
pub struct Covariance {
    rows: Vec<Vec<f64>>,
}

impl Covariance {
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn unestimable(n: usize) -> Self {
        Self {
            rows: vec![vec![f64::INFINITY; n]; n],
        }
    }

    pub fn dim(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.rows[i][j]
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn is_finite(&self) -> bool {
        self.rows.iter().flatten().all(|v| v.is_finite())
    }

    /// Square roots of the diagonal (`+inf` where not estimable).
    pub fn std_errors(&self) -> Vec<f64> {
        (0..self.rows.len())
            .map(|i| {
                let v = self.rows[i][i];
                if v.is_finite() { v.max(0.0).sqrt() } else { f64::INFINITY }
            })
            .collect()
    }

    /// JSON has no infinity; non-finite entries become `null`.
    pub fn to_nullable_rows(&self) -> Vec<Vec<Option<f64>>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|&v| v.is_finite().then_some(v)).collect())
            .collect()
    }

    pub fn from_nullable_rows(rows: &[Vec<Option<f64>>]) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|row| row.iter().map(|v| v.unwrap_or(f64::INFINITY)).collect())
                .collect(),
        }
    }
}

/// Fit quality diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitQuality {
    pub sse: f64,
    pub rmse: f64,
    pub bic: f64,
    pub n: usize,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

/// Final fitted parameters with uncertainty and diagnostics.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub params: SirParams,
    pub covariance: Covariance,
    pub quality: FitQuality,
    /// Index of the multistart candidate that produced this fit (0 = primary guess).
    pub start_index: usize,
}

/// Observed vs fitted value for one day (used for rankings and exports).
#[derive(Debug, Clone, PartialEq)]
pub struct DayResidual {
    pub day: usize,
    pub observed: f64,
    pub fitted: f64,
    pub residual: f64,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags and environment (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub data_path: PathBuf,
    /// Population constant `M`.
    pub population: f64,
    /// Calendar date of day 0.
    pub first_case_date: NaiveDate,

    pub initial_guess: InitialGuess,
    /// Explicit starting vector (required when `initial_guess = explicit`).
    pub p0: Option<SirParams>,
    /// Grid steps per dimension for extra starting points (0 disables multistart).
    pub multistart_steps: usize,
    pub max_iterations: usize,
    pub max_evaluations: usize,

    /// Integrator tolerances.
    pub rtol: f64,
    pub atol: f64,

    pub horizon_days: usize,
    pub top_n: usize,
    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
    /// Data coordinate `(day, cases)` of the parameter annotation.
    pub annotate_at: (f64, f64),

    pub export_results: Option<PathBuf>,
    pub export_curve: Option<PathBuf>,
    pub debug_bundle: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            population: DEFAULT_POPULATION,
            first_case_date: NaiveDate::from_ymd_opt(2020, 2, 26).unwrap_or_default(),
            initial_guess: InitialGuess::Auto,
            p0: None,
            multistart_steps: 3,
            max_iterations: 300,
            max_evaluations: 4000,
            rtol: 1e-8,
            atol: 1e-8,
            horizon_days: DEFAULT_HORIZON_DAYS,
            top_n: 5,
            plot: true,
            plot_width: 100,
            plot_height: 25,
            annotate_at: (150.0, 100_000.0),
            export_results: None,
            export_curve: None,
            debug_bundle: false,
        }
    }
}

impl FitConfig {
    pub fn bounds(&self) -> Bounds {
        Bounds::sir(self.population)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.population.is_finite() && self.population > 0.0) {
            return Err(AppError::config(format!(
                "Population must be finite and > 0 (got {}).",
                self.population
            )));
        }
        if self.horizon_days < 2 {
            return Err(AppError::config("Horizon must be at least 2 days."));
        }
        if !(self.rtol.is_finite() && self.rtol > 0.0 && self.atol.is_finite() && self.atol > 0.0) {
            return Err(AppError::config(format!(
                "Integrator tolerances must be finite and > 0 (rtol={}, atol={}).",
                self.rtol, self.atol
            )));
        }
        if self.max_iterations == 0 || self.max_evaluations == 0 {
            return Err(AppError::config("Optimizer budgets must be > 0."));
        }
        if self.initial_guess == InitialGuess::Explicit && self.p0.is_none() {
            return Err(AppError::config("`--guess explicit` requires `--p0 gamma,alpha,s_0,i_0,a_0`."));
        }
        Ok(())
    }

    /// Calendar date of a (possibly fractional) day offset.
    pub fn date_for_day(&self, day: f64) -> NaiveDate {
        let offset = if day.is_finite() { day.round() as i64 } else { 0 };
        self.first_case_date
            .checked_add_signed(Duration::days(offset))
            .unwrap_or(self.first_case_date)
    }
}

/// A saved curve file (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveFile {
    pub tool: String,
    pub generated: DateTime<FixedOffset>,
    pub first_case_date: NaiveDate,
    pub population: f64,
    pub params: SirParams,
    pub std_errors: Vec<Option<f64>>,
    pub covariance: Vec<Vec<Option<f64>>>,
    pub quality: FitQuality,
    pub observed: Vec<f64>,
    pub grid: CurveGrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveGrid {
    pub day: Vec<f64>,
    pub reported: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sir_bounds_follow_population() {
        let b = Bounds::sir(1000.0);
        assert_eq!(b.lower, vec![0.0; 5]);
        assert_eq!(b.upper, vec![50.0, 1.0, 1000.0, 1000.0, 1000.0]);
        assert!(b.validate().is_ok());
        assert!(b.contains(&[1.0, 0.5, 10.0, 1.0, 0.0]));
        assert!(!b.contains(&[51.0, 0.5, 10.0, 1.0, 0.0]));
    }

    #[test]
    fn inverted_bounds_are_infeasible() {
        let b = Bounds::new(vec![0.0, 2.0], vec![1.0, 1.0]);
        let err = b.validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fit);
    }

    #[test]
    fn series_rejects_negative_counts() {
        assert!(ObservedSeries::new(vec![1.0, -2.0]).is_err());
        assert!(ObservedSeries::new(vec![]).is_err());
        let s = ObservedSeries::new(vec![1.0, 3.0, 3.0]).unwrap();
        assert_eq!(s.days(), vec![0.0, 1.0, 2.0]);
        assert_eq!(s.increments(), vec![2.0, 0.0]);
        assert!(s.is_non_decreasing());
    }

    #[test]
    fn covariance_nullable_roundtrip_keeps_infinity() {
        let cov = Covariance::from_rows(vec![vec![4.0, f64::INFINITY], vec![f64::INFINITY, 9.0]]);
        let rows = cov.to_nullable_rows();
        assert_eq!(rows[0][1], None);
        let back = Covariance::from_nullable_rows(&rows);
        assert_eq!(back, cov);
        assert_eq!(cov.std_errors(), vec![2.0, 3.0]);
        assert!(!cov.is_finite());
    }

    #[test]
    fn day_offsets_map_to_calendar_dates() {
        let config = FitConfig::default();
        assert_eq!(config.date_for_day(118.0), NaiveDate::from_ymd_opt(2020, 6, 23).unwrap());
    }

    #[test]
    fn only_tolerance_stops_count_as_converged() {
        assert!(Termination::CostTolerance.converged());
        assert!(Termination::StepTolerance.converged());
        assert!(!Termination::Stalled.converged());
        assert!(!Termination::MaxIterations.converged());
        assert!(!Termination::MaxEvaluations.converged());
    }

    #[test]
    fn reproduction_number_requires_removal() {
        let p = SirParams { gamma: 0.3, alpha: 0.1, s0: 500.0, i0: 1.0, a0: 0.0 };
        assert!((p.reproduction_number(1000.0).unwrap() - 1.5).abs() < 1e-12);
        let p = SirParams { alpha: 0.0, ..p };
        assert!(p.reproduction_number(1000.0).is_none());
    }
}
