//! Read/write curve JSON files.
//!
//! Curve JSON is the "portable" representation of a fit:
//! - fitted parameters, standard errors and covariance
//! - run metadata (population, first-case date, fit quality)
//! - the observed series and a precomputed fitted grid for quick plotting
//!
//! The schema is defined by `domain::CurveFile`. JSON has no infinity, so
//! non-estimable covariance entries are written as `null`.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::Local;

use crate::domain::{CurveFile, CurveGrid, FitConfig, FitResult, ObservedSeries};
use crate::error::AppError;

pub const TOOL_NAME: &str = "sirfit";

/// Assemble a curve file from a fit and its evaluated horizon grid.
pub fn build_curve_file(
    best: &FitResult,
    series: &ObservedSeries,
    grid: CurveGrid,
    config: &FitConfig,
) -> CurveFile {
    CurveFile {
        tool: TOOL_NAME.to_string(),
        generated: Local::now().fixed_offset(),
        first_case_date: config.first_case_date,
        population: config.population,
        params: best.params,
        std_errors: best
            .covariance
            .std_errors()
            .into_iter()
            .map(|v| v.is_finite().then_some(v))
            .collect(),
        covariance: best.covariance.to_nullable_rows(),
        quality: best.quality.clone(),
        observed: series.values().to_vec(),
        grid,
    }
}

/// Write a curve JSON file.
pub fn write_curve_json(path: &Path, curve: &CurveFile) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| {
        AppError::export(format!("Failed to create curve JSON '{}': {e}", path.display()))
    })?;

    write_curve(file, curve)?;

    log::info!("wrote curve to {}", path.display());
    Ok(())
}

/// Serialize through a buffer and flush it, so a failing final write is reported.
fn write_curve<W: Write>(sink: W, curve: &CurveFile) -> Result<(), AppError> {
    let mut out = BufWriter::new(sink);
    serde_json::to_writer_pretty(&mut out, curve)
        .map_err(|e| AppError::export(format!("Failed to write curve JSON: {e}")))?;
    out.flush()
        .map_err(|e| AppError::export(format!("Failed to flush curve JSON: {e}")))
}

/// Read a curve JSON file.
pub fn read_curve_json(path: &Path) -> Result<CurveFile, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::input_load(format!("Failed to open curve JSON '{}': {e}", path.display()))
    })?;
    let curve: CurveFile = serde_json::from_reader(file)
        .map_err(|e| AppError::input_load(format!("Invalid curve JSON '{}': {e}", path.display())))?;

    if curve.grid.day.len() != curve.grid.reported.len() {
        return Err(AppError::input_load(format!(
            "Invalid curve JSON '{}': grid has {} days but {} values.",
            path.display(),
            curve.grid.day.len(),
            curve.grid.reported.len()
        )));
    }
    Ok(curve)
}
