//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments (with `.env` fallbacks)
//! - sets up logging
//! - runs the fit pipeline with the chosen renderer
//! - writes optional exports

use std::path::Path;

use chrono::NaiveDate;
use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use crate::cli::{Command, FitArgs, PlotArgs, SimulateArgs};
use crate::domain::{CurveGrid, FitConfig, InitialGuess, SirParams};
use crate::error::AppError;

pub mod pipeline;

use pipeline::{CsvSeriesLoader, MultistartFitter, RunOutput, TextRenderer, run_with, solver_for};

/// Directory the debug bundle is written to.
const DEBUG_DIR: &str = "debug";

/// Entry point for the `sirfit` binary.
pub fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();

    // We want `sirfit` and `sirfit --population 1e6` to behave like `sirfit show ...`.
    //
    // Clap requires a subcommand name, so we do a small, explicit rewrite of the
    // argv list before parsing.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);
    init_logging(cli.verbose);

    match cli.command {
        Command::Show(args) => handle_show(args),
        Command::Fit(args) => handle_fit(args),
        Command::Plot(args) => handle_plot(args),
        Command::Simulate(args) => handle_simulate(args),
    }
}

fn init_logging(verbose: u8) {
    let mut logger = SimpleLogger::new().with_level(LevelFilter::Warn).env();
    match verbose {
        0 => {}
        1 => logger = logger.with_level(LevelFilter::Info),
        _ => logger = logger.with_level(LevelFilter::Debug),
    }
    // A logger may already be installed (e.g. when embedded); keep going without ours.
    let _ = logger.init();
}

fn handle_show(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args)?;
    let run = run_configured(&config, &mut crate::tui::TuiRenderer)?;
    write_exports(&run, &config)
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args)?;
    let mut renderer = TextRenderer {
        out: std::io::stdout(),
    };
    let run = run_configured(&config, &mut renderer)?;
    write_exports(&run, &config)
}

fn run_configured(config: &FitConfig, renderer: &mut dyn pipeline::Renderer) -> Result<RunOutput, AppError> {
    let loader = CsvSeriesLoader {
        path: config.data_path.clone(),
    };
    let model = solver_for(config);
    let run = run_with(&loader, &model, &MultistartFitter, renderer, config)?;
    log::info!(
        "fit done: sse={:.6e}, {}",
        run.selection.best.quality.sse,
        run.selection.best.quality.termination.label()
    );
    Ok(run)
}

fn write_exports(run: &RunOutput, config: &FitConfig) -> Result<(), AppError> {
    if let Some(path) = &config.export_results {
        crate::io::export::write_results_csv(path, &run.residuals, config)?;
        println!("Wrote results: {}", path.display());
    }
    if let Some(path) = &config.export_curve {
        let grid = CurveGrid {
            day: run.projection.days.clone(),
            reported: run.projection.reported.clone(),
        };
        let curve = crate::io::curve::build_curve_file(&run.selection.best, &run.series, grid, config);
        crate::io::curve::write_curve_json(path, &curve)?;
        println!("Wrote curve: {}", path.display());
    }
    if config.debug_bundle {
        let path = crate::debug::write_debug_bundle(Path::new(DEBUG_DIR), run, config)?;
        println!("Wrote debug bundle: {}", path.display());
    }
    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let curve = crate::io::curve::read_curve_json(&args.curve)?;
    let plot = crate::plot::render_ascii_plot_from_curve_file(&curve, args.width, args.height);
    println!("{plot}");
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let params = SirParams {
        gamma: args.gamma,
        alpha: args.alpha,
        s0: args.s0,
        i0: args.i0,
        a0: args.a0,
    };
    let model = crate::models::SirSolver::new(args.population);
    let noise = (args.noise > 0.0).then_some(crate::data::NoiseSpec {
        sigma: args.noise,
        seed: args.seed,
    });

    let series = crate::data::simulate_series(&model, &params, args.days, noise)?;
    crate::data::write_series_csv(&args.out, &series)?;
    println!(
        "Wrote {} days to {} (last={})",
        series.len(),
        args.out.display(),
        series.last()
    );
    Ok(())
}

pub fn fit_config_from_args(args: &FitArgs) -> Result<FitConfig, AppError> {
    let first_case_date = NaiveDate::parse_from_str(&args.first_case_date, "%Y-%m-%d").map_err(|e| {
        AppError::config(format!(
            "Invalid first-case date '{}' (expected YYYY-MM-DD): {e}",
            args.first_case_date
        ))
    })?;

    let p0 = match &args.p0 {
        Some(values) => Some(
            SirParams::from_slice(values).map_err(|e| AppError::config(format!("--p0: {}", e.message())))?,
        ),
        None => None,
    };
    let initial_guess = if p0.is_some() { InitialGuess::Explicit } else { args.guess };

    let config = FitConfig {
        data_path: args.data.clone(),
        population: args.population,
        first_case_date,
        initial_guess,
        p0,
        multistart_steps: args.multistart,
        max_iterations: args.max_iterations,
        max_evaluations: args.max_evaluations,
        rtol: args.rtol,
        atol: args.atol,
        horizon_days: args.horizon,
        top_n: args.top,
        plot: args.plot && !args.no_plot,
        plot_width: args.width,
        plot_height: args.height,
        annotate_at: (args.annotate_day, args.annotate_cases),
        export_results: args.export.clone(),
        export_curve: args.export_curve.clone(),
        debug_bundle: args.debug,
    };
    config.validate()?;
    Ok(config)
}

/// Rewrite argv so `sirfit` defaults to `sirfit show`.
///
/// Rules:
/// - `sirfit`                        -> `sirfit show`
/// - `sirfit --population 1e6 ...`   -> `sirfit show --population 1e6 ...`
/// - `sirfit --help/--version/-h`    -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("show".to_string());
        return argv;
    };

    let is_top_level_help_or_version = matches!(arg1.as_str(), "-h" | "--help" | "-V" | "--version" | "help");
    if is_top_level_help_or_version {
        return argv;
    }

    // Global flags may precede the subcommand (`sirfit -v fit`).
    let has_subcommand = argv
        .iter()
        .skip(1)
        .any(|a| matches!(a.as_str(), "show" | "fit" | "plot" | "simulate"));
    if has_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "show flags".
    if arg1.starts_with('-') {
        argv.insert(1, "show".to_string());
        return argv;
    }

    argv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn fit_args(extra: &[&str]) -> FitArgs {
        let mut argv = vec!["sirfit", "fit"];
        argv.extend_from_slice(extra);
        match crate::cli::Cli::try_parse_from(argv).unwrap().command {
            Command::Fit(a) => a,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn bare_invocation_defaults_to_show() {
        assert_eq!(rewrite_args(args(&["sirfit"])), args(&["sirfit", "show"]));
        assert_eq!(
            rewrite_args(args(&["sirfit", "--population", "1000"])),
            args(&["sirfit", "show", "--population", "1000"])
        );
        assert_eq!(rewrite_args(args(&["sirfit", "--help"])), args(&["sirfit", "--help"]));
        assert_eq!(rewrite_args(args(&["sirfit", "fit"])), args(&["sirfit", "fit"]));
        assert_eq!(rewrite_args(args(&["sirfit", "-v", "fit"])), args(&["sirfit", "-v", "fit"]));
    }

    #[test]
    fn p0_implies_explicit_guess() {
        let config = fit_config_from_args(&fit_args(&["--p0", "0.5,0.2,6000,5,5", "--population", "10000"])).unwrap();
        assert_eq!(config.initial_guess, InitialGuess::Explicit);
        assert_eq!(config.p0.map(|p| p.s0), Some(6000.0));
    }

    #[test]
    fn bad_inputs_are_config_errors() {
        let err = fit_config_from_args(&fit_args(&["--first-case-date", "26/02/2020"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = fit_config_from_args(&fit_args(&["--p0", "1,2,3"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = fit_config_from_args(&fit_args(&["--population", "0"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn no_plot_wins() {
        let config = fit_config_from_args(&fit_args(&["--no-plot", "--annotate-day", "20"])).unwrap();
        assert!(!config.plot);
        assert_eq!(config.annotate_at, (20.0, 100_000.0));
    }
}
