//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the math/fitting code stays clean and testable
//! - output changes are localized (the renderers share the annotation text)

use std::path::Path;

use crate::domain::{DayResidual, FitConfig, ObservedSeries, PARAM_NAMES, SirParams};
use crate::fit::selection::FitSelection;
use crate::report::{Projection, Rankings};

/// The two-line parameter label drawn on the chart.
///
/// Rates are shown with one and two decimals; compartment sizes are truncated
/// to whole people.
pub fn parameter_annotation(p: &SirParams) -> [String; 2] {
    [
        format!("gamma={:.1}, alpha={:.2}", p.gamma, p.alpha),
        format!(
            "s_0={}, i_0={}, a_0={}",
            whole(p.s0),
            whole(p.i0),
            whole(p.a0)
        ),
    ]
}

/// Chart title shared by the text and terminal renderers.
pub fn chart_title(config: &FitConfig, n_days: usize) -> String {
    let last_day = n_days.saturating_sub(1);
    format!(
        "SIR fit: cumulative cases (t = {last_day}, {})",
        config.date_for_day(last_day as f64)
    )
}

/// Format the full run summary (dataset + start diagnostics + chosen parameters).
pub fn format_run_summary(
    data_path: &Path,
    series: &ObservedSeries,
    selection: &FitSelection,
    projection: &Projection,
    config: &FitConfig,
) -> String {
    let mut out = String::new();
    let n = series.len();

    out.push_str("=== sirfit - SIR curve fit ===\n");
    out.push_str(&format!("Data: {}\n", data_path.display()));
    out.push_str(&format!(
        "Days: n={n} | {} .. {} | last={}\n",
        config.first_case_date,
        config.date_for_day(n.saturating_sub(1) as f64),
        whole(series.last())
    ));
    out.push_str(&format!("Population: M={}\n", whole(config.population)));
    out.push_str(&format!(
        "Initial guess: {:?} | starts={}\n",
        config.initial_guess,
        selection.candidates.len()
    ));

    out.push_str("\nStart diagnostics:\n");
    for c in &selection.candidates {
        let chosen = if c.index == selection.best.start_index { "*" } else { " " };
        match &c.result {
            Ok(fit) => out.push_str(&format!(
                "{chosen} #{:<3} SSE={:.6e} iters={:<4} ({})\n",
                c.index,
                fit.sse,
                fit.iterations,
                fit.termination.label()
            )),
            Err(err) => out.push_str(&format!("{chosen} #{:<3} failed: {err}\n", c.index)),
        }
    }

    let best = &selection.best;
    let values = best.params.to_array();
    let errors = best.covariance.std_errors();
    out.push_str("\nFitted parameters (± std error):\n");
    for (j, name) in PARAM_NAMES.iter().enumerate() {
        out.push_str(&format!(
            "- {name:<5} = {:>16.6} ± {}\n",
            values[j],
            fmt_std_error(errors.get(j).copied().unwrap_or(f64::INFINITY))
        ));
    }

    let q = &best.quality;
    out.push_str(&format!(
        "\nFit quality: SSE={:.6e} RMSE={:.3} BIC={:.3} | {} iterations, {} evaluations ({})\n",
        q.sse,
        q.rmse,
        q.bic,
        q.iterations,
        q.evaluations,
        q.termination.label()
    ));

    out.push_str("\nDerived:\n");
    match best.params.reproduction_number(config.population) {
        Some(r) => out.push_str(&format!("- R = gamma*s_0/(M*alpha) = {r:.3}\n")),
        None => out.push_str("- R = n/a (alpha = 0)\n"),
    }
    if let Some((day, size)) = projection.peak {
        out.push_str(&format!(
            "- infected peak: day {} ({}), {}\n",
            day,
            config.date_for_day(day),
            whole(size)
        ));
    }
    if let Some(&last_day) = projection.days.last() {
        out.push_str(&format!(
            "- reported at day {} ({}): {}\n",
            last_day,
            config.date_for_day(last_day),
            whole(projection.final_reported())
        ));
    }

    out
}

/// Format the largest misfit tables.
pub fn format_rankings(rankings: &Rankings, config: &FitConfig) -> String {
    let mut out = String::new();

    out.push_str("Largest under-fit days (observed above curve):\n");
    out.push_str(&format_table(&rankings.under, config));
    out.push('\n');

    out.push_str("Largest over-fit days (observed below curve):\n");
    out.push_str(&format_table(&rankings.over, config));

    out
}

fn format_table(rows: &[DayResidual], config: &FitConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>5} {:<10} {:>14} {:>14} {:>14}",
        "day", "date", "observed", "fitted", "residual"
    ));
    out.push('\n');
    out.push_str(&format!("{:->5} {:-<10} {:->14} {:->14} {:->14}", "", "", "", "", ""));
    out.push('\n');

    for r in rows {
        out.push_str(&format!(
            "{:>5} {:<10} {:>14.0} {:>14.1} {:>14.1}",
            r.day,
            config.date_for_day(r.day as f64),
            r.observed,
            r.fitted,
            r.residual
        ));
        out.push('\n');
    }

    out
}

fn fmt_std_error(v: f64) -> String {
    if v.is_finite() { format!("{v:.6}") } else { "inf".to_string() }
}

/// Truncate toward zero for display (`1234.9` -> `1234`).
fn whole(v: f64) -> String {
    if v.is_finite() { format!("{}", v.trunc() as i64) } else { format!("{v}") }
}
