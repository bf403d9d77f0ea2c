//! ASCII chart of the observed series and the fitted curve.
//!
//! A fixed character grid keeps the output byte-for-byte reproducible, which
//! the golden tests rely on. `o` marks observed days, `-` traces the fitted
//! curve, and the parameter label is printed under the grid.

use crate::domain::CurveFile;
use crate::report::parameter_annotation;

/// Render observed counts (index = day) and a fitted curve `(day, reported)`.
pub fn render_ascii_plot(
    observed: &[f64],
    curve: &[(f64, f64)],
    annotation: &[String],
    width: usize,
    height: usize,
) -> String {
    let days = [0.0, last_day(observed, curve)];
    let cases = case_range(observed, curve);
    let mut canvas = Canvas::new(width.max(10), height.max(5), days, cases);

    canvas.polyline(curve, '-');
    for (day, &y) in observed.iter().enumerate() {
        canvas.stamp(day as f64, y, 'o');
    }

    let mut out = format!(
        "Plot: day=[{:.0}, {:.0}] | cases=[{:.1}, {:.1}]\n",
        days[0], days[1], cases[0], cases[1]
    );
    out.push_str(&canvas.into_text());
    for line in annotation {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Render a plot from a saved curve JSON file.
pub fn render_ascii_plot_from_curve_file(curve: &CurveFile, width: usize, height: usize) -> String {
    let fitted: Vec<(f64, f64)> = curve
        .grid
        .day
        .iter()
        .copied()
        .zip(curve.grid.reported.iter().copied())
        .collect();
    render_ascii_plot(
        &curve.observed,
        &fitted,
        &parameter_annotation(&curve.params),
        width,
        height,
    )
}

/// Last day shown: the end of the curve or of the data, whichever is later.
fn last_day(observed: &[f64], curve: &[(f64, f64)]) -> f64 {
    let end = curve
        .iter()
        .map(|&(t, _)| t)
        .filter(|t| t.is_finite())
        .fold(observed.len().saturating_sub(1) as f64, f64::max);
    if end > 0.0 { end } else { 1.0 }
}

/// Case-count range with a 5% margin on both sides.
fn case_range(observed: &[f64], curve: &[(f64, f64)]) -> [f64; 2] {
    let finite = observed
        .iter()
        .copied()
        .chain(curve.iter().map(|&(_, y)| y))
        .filter(|y| y.is_finite());
    let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), y| (lo.min(y), hi.max(y)));

    let (lo, hi) = if !lo.is_finite() {
        (0.0, 1.0)
    } else if hi > lo {
        (lo, hi)
    } else {
        (lo - 1.0, hi + 1.0)
    };
    let margin = ((hi - lo) * 0.05).max(1e-12);
    [lo - margin, hi + margin]
}

/// Character grid with a linear day/case to cell mapping (row 0 is the top).
struct Canvas {
    cells: Vec<Vec<char>>,
    days: [f64; 2],
    cases: [f64; 2],
}

impl Canvas {
    fn new(width: usize, height: usize, days: [f64; 2], cases: [f64; 2]) -> Self {
        Self {
            cells: vec![vec![' '; width]; height],
            days,
            cases,
        }
    }

    fn width(&self) -> usize {
        self.cells[0].len()
    }

    fn height(&self) -> usize {
        self.cells.len()
    }

    fn cell(&self, day: f64, y: f64) -> Option<(usize, usize)> {
        if !(day.is_finite() && y.is_finite()) {
            return None;
        }
        let u = ((day - self.days[0]) / (self.days[1] - self.days[0])).clamp(0.0, 1.0);
        let v = ((y - self.cases[0]) / (self.cases[1] - self.cases[0])).clamp(0.0, 1.0);
        let col = (u * (self.width() - 1) as f64).round() as usize;
        let row = ((1.0 - v) * (self.height() - 1) as f64).round() as usize;
        Some((col, row))
    }

    /// Overwrite one cell.
    fn stamp(&mut self, day: f64, y: f64, ch: char) {
        if let Some((col, row)) = self.cell(day, y) {
            self.cells[row][col] = ch;
        }
    }

    /// Connect consecutive finite points, filling only blank cells.
    fn polyline(&mut self, points: &[(f64, f64)], ch: char) {
        if points.len() < 2 {
            return;
        }
        let cells: Vec<(usize, usize)> = points.iter().filter_map(|&(t, y)| self.cell(t, y)).collect();
        if let Some(&(col, row)) = cells.first() {
            self.fill_blank(col, row, ch);
        }
        for pair in cells.windows(2) {
            self.segment(pair[0], pair[1], ch);
        }
    }

    fn segment(&mut self, from: (usize, usize), to: (usize, usize), ch: char) {
        let (c0, r0) = (from.0 as f64, from.1 as f64);
        let (dc, dr) = (to.0 as f64 - c0, to.1 as f64 - r0);
        let steps = dc.abs().max(dr.abs()) as usize;
        for k in 0..=steps {
            let f = if steps == 0 { 0.0 } else { k as f64 / steps as f64 };
            let col = (c0 + f * dc).round() as usize;
            let row = (r0 + f * dr).round() as usize;
            self.fill_blank(col, row, ch);
        }
    }

    fn fill_blank(&mut self, col: usize, row: usize, ch: char) {
        if let Some(cell) = self.cells.get_mut(row).and_then(|r| r.get_mut(col)) {
            if *cell == ' ' {
                *cell = ch;
            }
        }
    }

    fn into_text(self) -> String {
        let mut text = String::with_capacity(self.cells.len() * (self.width() + 1));
        for row in self.cells {
            text.extend(row);
            text.push('\n');
        }
        text
    }
}
