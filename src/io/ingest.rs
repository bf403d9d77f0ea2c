//! CSV ingest for the cumulative case series.
//!
//! The input is a headerless, single-column file: one cumulative count per
//! row, row position = days since the first recorded case. There is no date
//! column and no missing-value handling; any malformed row is fatal.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::ObservedSeries;
use crate::error::AppError;

/// Summary stats about the loaded series (for logs and debug bundles).
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesStats {
    pub n_days: usize,
    pub first: f64,
    pub last: f64,
    pub max: f64,
    pub max_daily_increase: f64,
    /// Days on which the cumulative count went down.
    pub decreases: usize,
}

/// Load a series from a file on disk.
pub fn load_series(path: &Path) -> Result<ObservedSeries, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::input_load(format!("Failed to open series CSV '{}': {e}", path.display()))
    })?;
    let series = read_series(file, &path.display().to_string())?;
    log::info!("loaded {} days from {}", series.len(), path.display());
    Ok(series)
}

/// Read a series from any reader; `source` names it in error messages.
pub fn read_series<R: Read>(reader: R, source: &str) -> Result<ObservedSeries, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut values = Vec::new();
    let mut record = StringRecord::new();
    loop {
        let more = reader
            .read_record(&mut record)
            .map_err(|e| AppError::input_load(format!("Failed to read '{source}': {e}")))?;
        if !more {
            break;
        }
        let line = record.position().map(|p| p.line()).unwrap_or(values.len() as u64 + 1);
        values.push(parse_row(&record, source, line)?);
    }

    if values.is_empty() {
        return Err(AppError::input_load(format!("'{source}' contains no rows.")));
    }

    let series = ObservedSeries::new(values)?;
    if !series.is_non_decreasing() {
        let stats = series_stats(&series);
        log::warn!(
            "'{source}' is not non-decreasing: the count drops on {} day(s); cumulative counts are expected",
            stats.decreases
        );
    }
    Ok(series)
}

fn parse_row(record: &StringRecord, source: &str, line: u64) -> Result<f64, AppError> {
    if record.len() != 1 {
        return Err(AppError::input_load(format!(
            "'{source}' line {line}: expected exactly one value, found {} fields.",
            record.len()
        )));
    }
    let cell = record.get(0).unwrap_or_default();
    if cell.is_empty() {
        return Err(AppError::input_load(format!("'{source}' line {line}: empty value.")));
    }
    let value: f64 = cell.parse().map_err(|_| {
        AppError::input_load(format!("'{source}' line {line}: '{cell}' is not a number."))
    })?;
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::input_load(format!(
            "'{source}' line {line}: count must be finite and >= 0 (got {value})."
        )));
    }
    Ok(value)
}

pub fn series_stats(series: &ObservedSeries) -> SeriesStats {
    let increments = series.increments();
    SeriesStats {
        n_days: series.len(),
        first: series.values().first().copied().unwrap_or(0.0),
        last: series.last(),
        max: series.max(),
        max_daily_increase: increments.iter().copied().fold(0.0, f64::max),
        decreases: increments.iter().filter(|d| **d < 0.0).count(),
    }
}
