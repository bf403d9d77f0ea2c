//! Ratatui-based terminal UI.
//!
//! Shows the observed series as a scatter, the fitted reported curve over the
//! projection horizon, and the parameter label. The call blocks until the user
//! quits (`q` / `Esc`).

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph},
};

use crate::app::pipeline::{Renderer, RunOutput, TrajectoryModel, reproject};
use crate::domain::{CurveGrid, FitConfig};
use crate::error::AppError;
use crate::report::{chart_title, parameter_annotation};

mod plotters_chart;

use plotters_chart::SirPlottersChart;

/// Days added/removed per arrow key press.
const HORIZON_STEP: usize = 10;

/// Default target of the `e` key when `--export-curve` was not given.
const DEFAULT_CURVE_PATH: &str = "sirfit_curve.json";

/// Renders a finished run in the terminal and waits for the user to quit.
#[derive(Debug, Clone, Copy, Default)]
pub struct TuiRenderer;

impl Renderer for TuiRenderer {
    fn render(&mut self, run: &RunOutput, model: &dyn TrajectoryModel, config: &FitConfig) -> Result<(), AppError> {
        run_interactive(run.clone(), model, config)
    }
}

/// Start the TUI on a finished run.
pub fn run_interactive(run: RunOutput, model: &dyn TrajectoryModel, config: &FitConfig) -> Result<(), AppError> {
    let _guard = TerminalGuard::new()?;

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal =
        Terminal::new(backend).map_err(|e| AppError::render(format!("Failed to initialize terminal: {e}")))?;

    let mut app = App {
        horizon: run.projection.days.len(),
        run,
        config: config.clone(),
        status: "Ready.".to_string(),
    };
    app.event_loop(&mut terminal, model)
}

/// Ensures the terminal is restored (raw mode, alternate screen) on exit.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, AppError> {
        enable_raw_mode().map_err(|e| AppError::render(format!("Failed to enable raw mode: {e}")))?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(AppError::render(format!("Failed to enter alternate screen: {e}")));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

struct App {
    run: RunOutput,
    config: FitConfig,
    horizon: usize,
    status: String,
}

impl App {
    fn event_loop<B: ratatui::backend::Backend>(
        &mut self,
        terminal: &mut Terminal<B>,
        model: &dyn TrajectoryModel,
    ) -> Result<(), AppError> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal
                    .draw(|f| self.draw(f))
                    .map_err(|e| AppError::render(format!("Terminal draw error: {e}")))?;
                needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(100))
                .map_err(|e| AppError::render(format!("Event poll error: {e}")))?
            {
                continue;
            }

            match event::read().map_err(|e| AppError::render(format!("Event read error: {e}")))? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key.code, model) {
                        break;
                    }
                    needs_redraw = true;
                }
                Event::Resize(_, _) => {
                    needs_redraw = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns `true` when the user asked to quit.
    fn handle_key(&mut self, code: KeyCode, model: &dyn TrajectoryModel) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Left => {
                let min = self.run.series.len().max(2);
                self.set_horizon(self.horizon.saturating_sub(HORIZON_STEP).max(min), model);
            }
            KeyCode::Right => {
                self.set_horizon(self.horizon.saturating_add(HORIZON_STEP), model);
            }
            KeyCode::Char('e') => {
                let path = self
                    .config
                    .export_curve
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CURVE_PATH));
                self.status = match self.export_curve(&path) {
                    Ok(()) => format!("Wrote curve: {}", path.display()),
                    Err(err) => format!("Curve export failed: {err}"),
                };
            }
            KeyCode::Char('d') => {
                self.status = match crate::debug::write_debug_bundle(Path::new("debug"), &self.run, &self.config) {
                    Ok(path) => format!("Wrote debug bundle: {}", path.display()),
                    Err(err) => format!("Debug write failed: {err}"),
                };
            }
            _ => {}
        }
        false
    }

    fn set_horizon(&mut self, horizon: usize, model: &dyn TrajectoryModel) {
        if horizon == self.horizon {
            return;
        }
        match reproject(&mut self.run, model, horizon) {
            Ok(()) => {
                self.horizon = horizon;
                self.status = format!("horizon: {horizon} days");
            }
            Err(err) => {
                self.status = format!("Projection failed: {err}");
            }
        }
    }

    fn export_curve(&self, path: &Path) -> Result<(), AppError> {
        let grid = CurveGrid {
            day: self.run.projection.days.clone(),
            reported: self.run.projection.reported.clone(),
        };
        let curve = crate::io::curve::build_curve_file(&self.run.selection.best, &self.run.series, grid, &self.config);
        crate::io::curve::write_curve_json(path, &curve)
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let size = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(5), Constraint::Min(0), Constraint::Length(3)])
            .split(size);

        self.draw_header(frame, chunks[0]);
        self.draw_chart(frame, chunks[1]);
        self.draw_footer(frame, chunks[2]);
    }

    fn draw_header(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let best = &self.run.selection.best;
        let [params_line, sizes_line] = parameter_annotation(&best.params);
        let r = best
            .params
            .reproduction_number(self.config.population)
            .map(|r| format!("{r:.3}"))
            .unwrap_or_else(|| "n/a".to_string());

        let lines = vec![
            Line::from(vec![
                Span::styled("sirfit", Style::default().fg(Color::Cyan)),
                Span::raw(format!(
                    " SIR fit | {} | n={} days | M={}",
                    self.config.data_path.display(),
                    self.run.series.len(),
                    self.config.population
                )),
            ]),
            Line::from(Span::styled(
                format!("{params_line} | {sizes_line} | R={r}"),
                Style::default().fg(Color::Gray),
            )),
            Line::from(Span::styled(
                format!(
                    "sse={:.4e} | rmse={:.2} | bic={:.3} | {} | horizon={} days",
                    best.quality.sse,
                    best.quality.rmse,
                    best.quality.bic,
                    best.quality.termination.label(),
                    self.horizon
                ),
                Style::default().fg(Color::Gray),
            )),
        ];

        let p = Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }

    fn draw_chart(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let block = Block::default().title("Cumulative cases").borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        frame.render_widget(Clear, inner);

        let (curve, points, x_bounds, y_bounds) = chart_series(&self.run);
        let title = chart_title(&self.config, self.run.series.len());
        let annotation = parameter_annotation(&self.run.selection.best.params);

        let widget = SirPlottersChart {
            curve: &curve,
            points: &points,
            x_bounds,
            y_bounds,
            title: &title,
            x_label: "days since first case",
            y_label: "cases",
            annotation: &annotation,
            annotate_at: self.config.annotate_at,
            fmt_x: fmt_axis_x,
            fmt_y: fmt_axis_y,
        };

        frame.render_widget(widget, inner);
    }

    fn draw_footer(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let help = "←/→ horizon  e export curve  d debug  q/Esc quit";
        let line = Line::from(vec![
            Span::styled(help, Style::default().fg(Color::Gray)),
            Span::raw(" | "),
            Span::styled(&self.status, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }
}

/// Build chart series and bounds for Plotters.
fn chart_series(run: &RunOutput) -> (Vec<(f64, f64)>, Vec<(f64, f64)>, [f64; 2], [f64; 2]) {
    let points: Vec<(f64, f64)> = run
        .series
        .values()
        .iter()
        .enumerate()
        .map(|(d, &y)| (d as f64, y))
        .collect();
    let curve: Vec<(f64, f64)> = run
        .projection
        .days
        .iter()
        .copied()
        .zip(run.projection.reported.iter().copied())
        .filter(|(_, y)| y.is_finite())
        .collect();

    let x_max = curve
        .iter()
        .map(|p| p.0)
        .chain(points.iter().map(|p| p.0))
        .fold(1.0, f64::max);
    let x_bounds = [0.0, x_max];

    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(_, y) in points.iter().chain(curve.iter()) {
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    if !y_min.is_finite() || !y_max.is_finite() || y_max <= y_min {
        y_min = 0.0;
        y_max = y_max.max(1.0);
    }

    let pad = ((y_max - y_min).abs() * 0.05).max(1e-12);
    let y_bounds = [y_min.min(0.0), y_max + pad];

    (curve, points, x_bounds, y_bounds)
}

fn fmt_axis_x(v: f64) -> String {
    format!("{v:.0}")
}

fn fmt_axis_y(v: f64) -> String {
    if v.abs() >= 1e6 {
        format!("{:.1}M", v / 1e6)
    } else if v.abs() >= 1e3 {
        format!("{:.0}k", v / 1e3)
    } else {
        format!("{v:.0}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_labels_are_compact() {
        assert_eq!(fmt_axis_y(1_250_000.0), "1.2M");
        assert_eq!(fmt_axis_y(25_000.0), "25k");
        assert_eq!(fmt_axis_y(12.0), "12");
        assert_eq!(fmt_axis_x(118.4), "118");
    }

    #[test]
    fn chart_bounds_cover_data_and_projection() {
        use crate::domain::ObservedSeries;
        use crate::models::SirSolver;

        let config = FitConfig {
            population: 1000.0,
            multistart_steps: 0,
            horizon_days: 30,
            ..FitConfig::default()
        };
        let series = ObservedSeries::new(vec![1.0, 2.0, 4.0]).unwrap();
        let run = crate::app::pipeline::run_on_series(series, &SirSolver::new(1000.0), &config).unwrap();

        let (curve, points, x_bounds, y_bounds) = chart_series(&run);
        assert_eq!(points.len(), 3);
        assert_eq!(x_bounds, [0.0, 29.0]);
        assert!(y_bounds[0] <= 0.0);
        assert!(curve.iter().chain(points.iter()).all(|&(_, y)| y < y_bounds[1]));
    }
}
