//! Command-line parsing for the SIR curve fitter.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::domain::{DEFAULT_DATA_PATH, DEFAULT_FIRST_CASE_DATE, DEFAULT_HORIZON_DAYS, DEFAULT_POPULATION, InitialGuess};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "sirfit", version, about = "SIR model curve fitter for cumulative case counts")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the series and open the interactive chart.
    ///
    /// This is the default when no subcommand is given.
    Show(FitArgs),
    /// Fit the series, print diagnostics and misfit tables, and optionally plot/export.
    Fit(FitArgs),
    /// Plot a previously exported curve JSON.
    Plot(PlotArgs),
    /// Write a synthetic cumulative-case series from known parameters.
    Simulate(SimulateArgs),
}

/// Common options for fitting.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Headerless CSV of cumulative counts, one row per day.
    #[arg(short = 'd', long, env = "SIRFIT_DATA", default_value = DEFAULT_DATA_PATH)]
    pub data: PathBuf,

    /// Population constant M.
    #[arg(short = 'm', long, env = "SIRFIT_POPULATION", default_value_t = DEFAULT_POPULATION)]
    pub population: f64,

    /// Calendar date of day 0 (YYYY-MM-DD).
    #[arg(long, env = "SIRFIT_FIRST_CASE_DATE", default_value = DEFAULT_FIRST_CASE_DATE)]
    pub first_case_date: String,

    /// How to choose the optimizer's primary starting point.
    #[arg(long, value_enum, default_value_t = InitialGuess::Auto)]
    pub guess: InitialGuess,

    /// Explicit start `gamma,alpha,s_0,i_0,a_0` (implies `--guess explicit`).
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub p0: Option<Vec<f64>>,

    /// Grid steps per dimension for extra starting points (0 disables).
    #[arg(long, default_value_t = 3)]
    pub multistart: usize,

    /// Optimizer iteration budget per start.
    #[arg(long, default_value_t = 300)]
    pub max_iterations: usize,

    /// Residual evaluation budget per start.
    #[arg(long, default_value_t = 4000)]
    pub max_evaluations: usize,

    /// Integrator relative tolerance.
    #[arg(long, default_value_t = 1e-8)]
    pub rtol: f64,

    /// Integrator absolute tolerance.
    #[arg(long, default_value_t = 1e-8)]
    pub atol: f64,

    /// Projection horizon in days.
    #[arg(long, default_value_t = DEFAULT_HORIZON_DAYS)]
    pub horizon: usize,

    /// Show top-N over- and under-fit days.
    #[arg(long, default_value_t = 5)]
    pub top: usize,

    /// Render an ASCII plot in the terminal (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Day coordinate of the parameter label.
    #[arg(long, default_value_t = 150.0)]
    pub annotate_day: f64,

    /// Case-count coordinate of the parameter label.
    #[arg(long, default_value_t = 100_000.0)]
    pub annotate_cases: f64,

    /// Export per-day fitted values and residuals to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export curve (params + covariance + fitted grid) to JSON.
    #[arg(long = "export-curve")]
    pub export_curve: Option<PathBuf>,

    /// Write a markdown debug bundle under `debug/`.
    #[arg(long)]
    pub debug: bool,
}

/// Options for plotting a saved curve.
#[derive(Debug, Args)]
pub struct PlotArgs {
    /// Curve JSON file produced by `sirfit fit --export-curve`.
    #[arg(long, value_name = "JSON")]
    pub curve: PathBuf,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

/// Options for writing a synthetic series.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Transmission rate.
    #[arg(long, default_value_t = 0.5)]
    pub gamma: f64,

    /// Removal rate.
    #[arg(long, default_value_t = 0.2)]
    pub alpha: f64,

    /// Initial susceptible count.
    #[arg(long = "s0", default_value_t = 6000.0)]
    pub s0: f64,

    /// Initial infected count.
    #[arg(long = "i0", default_value_t = 5.0)]
    pub i0: f64,

    /// Initial cumulative reported count.
    #[arg(long = "a0", default_value_t = 5.0)]
    pub a0: f64,

    /// Population constant M.
    #[arg(short = 'm', long, default_value_t = 10_000.0)]
    pub population: f64,

    /// Number of days to write.
    #[arg(long, default_value_t = 120)]
    pub days: usize,

    /// Log-normal noise sigma on daily increments (0 = noiseless).
    #[arg(long, default_value_t = 0.0)]
    pub noise: f64,

    /// Random seed for the noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Output CSV path.
    #[arg(long, short = 'o')]
    pub out: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p0_parses_as_comma_list() {
        let cli = Cli::try_parse_from(["sirfit", "fit", "--p0", "0.5,0.2,6000,5,5"]).unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.p0, Some(vec![0.5, 0.2, 6000.0, 5.0, 5.0]));
    }

    #[test]
    fn verbosity_counts() {
        let cli = Cli::try_parse_from(["sirfit", "-vv", "plot", "--curve", "c.json"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
