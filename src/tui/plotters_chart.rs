//! Plotters-powered SIR fit chart widget for Ratatui.
//!
//! Plotters gives us axes, a legend, and free-positioned text, which the
//! built-in Ratatui `Chart` widget lacks. We render Plotters output into the
//! Ratatui buffer using `plotters-ratatui-backend`.

use plotters::prelude::*;
use plotters_ratatui_backend::widget_fn;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    widgets::Widget,
};

/// A lightweight, render-only chart description.
///
/// All series and bounds are computed outside the render call.
pub struct SirPlottersChart<'a> {
    /// Fitted reported curve over the horizon.
    pub curve: &'a [(f64, f64)],
    /// Observed cumulative counts `(day, cases)`.
    pub points: &'a [(f64, f64)],
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
    pub title: &'a str,
    pub x_label: &'a str,
    pub y_label: &'a str,
    /// Parameter label lines and their anchor in data coordinates.
    pub annotation: &'a [String],
    pub annotate_at: (f64, f64),
    pub fmt_x: fn(f64) -> String,
    pub fmt_y: fn(f64) -> String,
}

impl<'a> Widget for SirPlottersChart<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // When the available area is too small, Plotters may fail to build a chart.
        // In that case, we render a small hint rather than panicking.
        if area.width < 20 || area.height < 8 {
            buf.set_string(
                area.x,
                area.y,
                "Chart area too small (resize terminal).",
                Style::default().fg(Color::Yellow),
            );
            return;
        }

        let [x0, x1] = self.x_bounds;
        let [y0, y1] = self.y_bounds;

        if !(x0.is_finite() && x1.is_finite() && y0.is_finite() && y1.is_finite()) || x1 <= x0 || y1 <= y0 {
            return;
        }

        let (ax, ay) = annotation_anchor(self.annotate_at, self.x_bounds, self.y_bounds);
        let line_step = (y1 - y0) * 0.07;

        let widget = widget_fn(move |root| {
            let mut chart = ChartBuilder::on(&root)
                .caption(self.title, ("sans-serif", 10).into_font().color(&WHITE))
                .margin(1)
                // Terminal cells are low-res, so keep label areas compact.
                .set_label_area_size(LabelAreaPosition::Left, 6)
                .set_label_area_size(LabelAreaPosition::Bottom, 3)
                .build_cartesian_2d(x0..x1, y0..y1)?;

            chart
                .configure_mesh()
                .disable_x_mesh()
                .disable_y_mesh()
                .x_desc(self.x_label)
                .y_desc(self.y_label)
                .x_labels(5)
                .y_labels(5)
                .x_label_formatter(&|v| (self.fmt_x)(*v))
                .y_label_formatter(&|v| (self.fmt_y)(*v))
                .label_style(("sans-serif", 10).into_font().color(&WHITE))
                .axis_style(&WHITE)
                .bold_line_style(&WHITE)
                .draw()?;

            let curve_color = RGBColor(0, 255, 255); // cyan
            let points_color = YELLOW;

            chart
                .draw_series(LineSeries::new(self.curve.iter().copied(), &curve_color))?
                .label("fitted a(t)")
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], curve_color));

            // `Circle` radii are mis-scaled by the ratatui backend; a `Pixel` is a clean dot.
            chart
                .draw_series(self.points.iter().map(|&(x, y)| Pixel::new((x, y), points_color)))?
                .label("observed")
                .legend(move |(x, y)| Pixel::new((x + 5, y), points_color));

            let text_style = ("sans-serif", 10).into_font().color(&WHITE);
            chart.draw_series(self.annotation.iter().enumerate().map(|(k, line)| {
                Text::new(line.clone(), (ax, ay - k as f64 * line_step), text_style.clone())
            }))?;

            chart
                .configure_series_labels()
                .position(SeriesLabelPosition::UpperLeft)
                .background_style(&BLACK)
                .border_style(&WHITE)
                .label_font(("sans-serif", 10).into_font().color(&WHITE))
                .draw()?;

            Ok(())
        });

        widget.render(area, buf);
    }
}

/// Clamp the requested annotation anchor into the visible plot area.
///
/// The label is anchored at its top-left corner, so we keep a margin on the
/// right and bottom for the text itself.
pub fn annotation_anchor(at: (f64, f64), x_bounds: [f64; 2], y_bounds: [f64; 2]) -> (f64, f64) {
    let [x0, x1] = x_bounds;
    let [y0, y1] = y_bounds;
    let x_hi = x0 + 0.7 * (x1 - x0);
    let y_lo = y0 + 0.2 * (y1 - y0);
    let x = if at.0.is_finite() { at.0.clamp(x0, x_hi) } else { x0 };
    let y = if at.1.is_finite() { at.1.clamp(y_lo, y1) } else { y1 };
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_inside_view_is_kept() {
        assert_eq!(annotation_anchor((50.0, 500.0), [0.0, 200.0], [0.0, 1000.0]), (50.0, 500.0));
    }

    #[test]
    fn anchor_outside_view_is_clamped() {
        // Small epidemic: the fixed (150, 100000) label would sit far above the data.
        let (x, y) = annotation_anchor((150.0, 100_000.0), [0.0, 199.0], [0.0, 50.0]);
        assert!((x - 139.3).abs() < 1e-9);
        assert_eq!(y, 50.0);
    }
}
