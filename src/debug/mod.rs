//! Debug bundle writer for inspecting the input series and every fit start.

use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::app::pipeline::RunOutput;
use crate::domain::{FitConfig, PARAM_NAMES};
use crate::error::AppError;
use crate::io::ingest::series_stats;

/// Write a markdown bundle under `dir` and return its path.
pub fn write_debug_bundle(dir: &Path, run: &RunOutput, config: &FitConfig) -> Result<PathBuf, AppError> {
    create_dir_all(dir).map_err(|e| AppError::export(format!("Failed to create debug dir: {e}")))?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!(
        "sirfit_debug_{}_n{}_{ts}.md",
        config.first_case_date.format("%Y%m%d"),
        run.series.len()
    ));

    let text = render_bundle(run, config);
    let mut file =
        File::create(&path).map_err(|e| AppError::export(format!("Failed to create debug file: {e}")))?;
    file.write_all(text.as_bytes())
        .map_err(|e| AppError::export(format!("Failed to write debug file: {e}")))?;

    log::info!("wrote debug bundle {}", path.display());
    Ok(path)
}

fn render_bundle(run: &RunOutput, config: &FitConfig) -> String {
    let mut out = String::new();

    out.push_str("# sirfit debug bundle\n");
    out.push_str(&format!("- generated: {}\n", Local::now().to_rfc3339()));
    out.push_str(&format!("- data: {}\n", config.data_path.display()));
    out.push_str(&format!("- population: {}\n", config.population));
    out.push_str(&format!("- first_case_date: {}\n", config.first_case_date));
    out.push_str(&format!(
        "- initial_guess: {:?} (p0={:?}), multistart_steps: {}\n",
        config.initial_guess, config.p0, config.multistart_steps
    ));
    out.push_str(&format!(
        "- budgets: max_iterations={}, max_evaluations={}; ode rtol={:e}, atol={:e}\n",
        config.max_iterations, config.max_evaluations, config.rtol, config.atol
    ));

    let stats = series_stats(&run.series);
    out.push_str("\n## Series\n");
    out.push_str(&format!(
        "n_days={} first={} last={} max={} max_daily_increase={} decreases={}\n",
        stats.n_days, stats.first, stats.last, stats.max, stats.max_daily_increase, stats.decreases
    ));

    out.push_str("\n## Starts\n");
    out.push_str(&format!("Columns: {}\n\n", PARAM_NAMES.join(", ")));
    out.push_str("| # | start | end | sse | iterations | evaluations | status |\n");
    out.push_str("| - | - | - | - | - | - | - |\n");
    for c in &run.selection.candidates {
        match &c.result {
            Ok(fit) => out.push_str(&format!(
                "| {} | {} | {} | {:.6e} | {} | {} | {} |\n",
                c.index,
                fmt_vec(&c.start),
                fmt_vec(&fit.params),
                fit.sse,
                fit.iterations,
                fit.evaluations,
                fit.termination.label()
            )),
            Err(err) => out.push_str(&format!(
                "| {} | {} | - | - | - | - | failed: {} |\n",
                c.index,
                fmt_vec(&c.start),
                err
            )),
        }
    }
    out.push_str(&format!("\nChosen start: {}\n", run.selection.best.start_index));

    out.push_str("\n## Fitted vs observed\n");
    out.push_str("| day | date | observed | fitted | residual |\n");
    out.push_str("| - | - | - | - | - |\n");
    for r in &run.residuals {
        out.push_str(&format!(
            "| {} | {} | {} | {:.3} | {:.3} |\n",
            r.day,
            config.date_for_day(r.day as f64),
            r.observed,
            r.fitted,
            r.residual
        ));
    }

    out
}

fn fmt_vec(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{v:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::run_on_series;
    use crate::domain::ObservedSeries;
    use crate::models::SirSolver;

    #[test]
    fn bundle_lists_starts_and_days() {
        let dir = tempfile::tempdir().unwrap();
        let config = FitConfig {
            population: 1000.0,
            multistart_steps: 0,
            ..FitConfig::default()
        };
        let series = ObservedSeries::new(vec![1.0, 2.0, 4.0]).unwrap();
        let run = run_on_series(series, &SirSolver::new(1000.0), &config).unwrap();

        let path = write_debug_bundle(dir.path(), &run, &config).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();

        assert!(text.starts_with("# sirfit debug bundle"));
        assert!(text.contains("| 0 | ["));
        assert!(text.contains("| 2 | 2020-02-28 | 4 |"));
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("sirfit_debug_20200226_n3_"));
    }
}
