//! Shared "fit pipeline" logic used by both CLI and TUI front-ends.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load series -> fit (multistart) -> residuals -> rankings -> projection -> render
//!
//! Every stage sits behind a small trait so tests can swap in stand-ins and run
//! the pipeline without touching the filesystem or the terminal.

use std::io::Write;
use std::path::PathBuf;

use crate::domain::{FitConfig, ObservedSeries};
use crate::error::AppError;
use crate::fit::selection::{FitSelection, fit_sir};
use crate::models::SirSolver;
use crate::report::{
    Projection, Rankings, chart_title, compute_residuals, format_rankings, format_run_summary,
    parameter_annotation, project, rank_misfits,
};

pub use crate::models::TrajectoryModel;

/// Produces the observed series.
pub trait SeriesLoader {
    fn load(&self) -> Result<ObservedSeries, AppError>;
}

/// Fits the model parameters to a series.
pub trait ParameterFitter {
    fn fit(
        &self,
        model: &dyn TrajectoryModel,
        series: &ObservedSeries,
        config: &FitConfig,
    ) -> Result<FitSelection, AppError>;
}

/// Presents a finished run.
pub trait Renderer {
    fn render(&mut self, run: &RunOutput, model: &dyn TrajectoryModel, config: &FitConfig) -> Result<(), AppError>;
}

/// Headerless CSV on disk.
#[derive(Debug, Clone)]
pub struct CsvSeriesLoader {
    pub path: PathBuf,
}

impl SeriesLoader for CsvSeriesLoader {
    fn load(&self) -> Result<ObservedSeries, AppError> {
        crate::io::ingest::load_series(&self.path)
    }
}

/// Bounded least squares from the configured guess plus the multistart grid.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultistartFitter;

impl ParameterFitter for MultistartFitter {
    fn fit(
        &self,
        model: &dyn TrajectoryModel,
        series: &ObservedSeries,
        config: &FitConfig,
    ) -> Result<FitSelection, AppError> {
        fit_sir(model, series, config)
    }
}

/// Prints the summary, misfit tables, and an ASCII chart.
pub struct TextRenderer<W: Write> {
    pub out: W,
}

impl<W: Write> Renderer for TextRenderer<W> {
    fn render(&mut self, run: &RunOutput, _model: &dyn TrajectoryModel, config: &FitConfig) -> Result<(), AppError> {
        let mut text = format_run_summary(&config.data_path, &run.series, &run.selection, &run.projection, config);
        text.push('\n');
        text.push_str(&format_rankings(&run.rankings, config));

        if config.plot {
            text.push('\n');
            text.push_str(&chart_title(config, run.series.len()));
            text.push('\n');
            let curve: Vec<(f64, f64)> = run
                .projection
                .days
                .iter()
                .copied()
                .zip(run.projection.reported.iter().copied())
                .collect();
            let annotation = parameter_annotation(&run.selection.best.params);
            text.push_str(&crate::plot::render_ascii_plot(
                run.series.values(),
                &curve,
                &annotation,
                config.plot_width,
                config.plot_height,
            ));
        }

        writeln!(self.out, "{text}").map_err(|e| AppError::render(format!("Failed to write output: {e}")))?;
        self.out
            .flush()
            .map_err(|e| AppError::render(format!("Failed to flush output: {e}")))
    }
}

/// All computed outputs of a single run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub series: ObservedSeries,
    pub selection: FitSelection,
    /// Model values at the observed days.
    pub fitted: Vec<f64>,
    pub residuals: Vec<crate::domain::DayResidual>,
    pub rankings: Rankings,
    pub projection: Projection,
}

/// The solver configured from the run settings.
pub fn solver_for(config: &FitConfig) -> SirSolver {
    SirSolver::new(config.population).with_tolerances(config.rtol, config.atol)
}

/// Execute the full fitting pipeline (no rendering) from the configured CSV.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    config.validate()?;
    let loader = CsvSeriesLoader {
        path: config.data_path.clone(),
    };
    let series = loader.load()?;
    run_on_series(series, &solver_for(config), config)
}

/// Execute the fitting pipeline on an already-loaded series.
///
/// This is useful for the TUI where we want to re-project without re-reading.
pub fn run_on_series<T: TrajectoryModel>(
    series: ObservedSeries,
    model: &T,
    config: &FitConfig,
) -> Result<RunOutput, AppError> {
    compute(series, model, &MultistartFitter, config)
}

/// Execute load -> fit -> render with every stage injected.
pub fn run_with(
    loader: &dyn SeriesLoader,
    model: &dyn TrajectoryModel,
    fitter: &dyn ParameterFitter,
    renderer: &mut dyn Renderer,
    config: &FitConfig,
) -> Result<RunOutput, AppError> {
    config.validate()?;
    let series = loader.load()?;
    let run = compute(series, model, fitter, config)?;
    renderer.render(&run, model, config)?;
    Ok(run)
}

fn compute(
    series: ObservedSeries,
    model: &dyn TrajectoryModel,
    fitter: &dyn ParameterFitter,
    config: &FitConfig,
) -> Result<RunOutput, AppError> {
    let selection = fitter.fit(model, &series, config)?;
    let params = selection.best.params;

    let fitted = model.reported(&series.days(), &params)?;
    let residuals = compute_residuals(&series, &fitted)?;
    let rankings = rank_misfits(&residuals, config.top_n);
    let projection = project(model, &params, config.horizon_days.max(series.len()))?;

    Ok(RunOutput {
        series,
        selection,
        fitted,
        residuals,
        rankings,
        projection,
    })
}

/// Recompute the projection of a finished run over a new horizon.
pub fn reproject<T: TrajectoryModel + ?Sized>(
    run: &mut RunOutput,
    model: &T,
    horizon_days: usize,
) -> Result<(), AppError> {
    run.projection = project(model, &run.selection.best.params, horizon_days.max(run.series.len()))?;
    Ok(())
}
