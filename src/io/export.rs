//! Export per-day results to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::{DayResidual, FitConfig};
use crate::error::AppError;

/// Write `day,date,observed,fitted,residual` rows to a CSV file.
pub fn write_results_csv(path: &Path, residuals: &[DayResidual], config: &FitConfig) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| {
        AppError::export(format!("Failed to create export CSV '{}': {e}", path.display()))
    })?;
    let mut out = BufWriter::new(file);

    writeln!(out, "day,date,observed,fitted,residual")
        .map_err(|e| AppError::export(format!("Failed to write export CSV header: {e}")))?;

    for r in residuals {
        writeln!(
            out,
            "{},{},{},{:.4},{:.4}",
            r.day,
            config.date_for_day(r.day as f64),
            r.observed,
            r.fitted,
            r.residual,
        )
        .map_err(|e| AppError::export(format!("Failed to write export CSV row: {e}")))?;
    }

    out.flush()
        .map_err(|e| AppError::export(format!("Failed to flush export CSV '{}': {e}", path.display())))?;
    log::info!("wrote {} rows to {}", residuals.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_header_and_dated_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let rows = vec![
            DayResidual { day: 0, observed: 1.0, fitted: 1.5, residual: -0.5 },
            DayResidual { day: 118, observed: 10.0, fitted: 9.0, residual: 1.0 },
        ];
        write_results_csv(&path, &rows, &FitConfig::default()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "day,date,observed,fitted,residual");
        assert_eq!(lines[1], "0,2020-02-26,1,1.5000,-0.5000");
        assert_eq!(lines[2], "118,2020-06-23,10,9.0000,1.0000");
    }

    #[test]
    fn unwritable_path_is_an_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.csv");
        let err = write_results_csv(&path, &[], &FitConfig::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Export);
    }
}
