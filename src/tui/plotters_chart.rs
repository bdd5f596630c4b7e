//! Plotters-powered ribbon chart widget for Ratatui.
//!
//! We render Plotters output into the Ratatui buffer using `plotters-ratatui-backend`.

use plotters::prelude::*;
use plotters_ratatui_backend::widget_fn;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Style},
    widgets::Widget,
};

/// Lower and upper bound lines of one interval width.
pub struct IntervalLines {
    pub width: f64,
    pub lower: Vec<(f64, f64)>,
    pub upper: Vec<(f64, f64)>,
}

/// A lightweight, render-only chart description.
///
/// All series and bounds are computed outside the render call, so `render()`
/// only draws.
pub struct RibbonChart<'a> {
    pub median: &'a [(f64, f64)],
    /// Widest interval first.
    pub intervals: &'a [IntervalLines],
    /// Observed counts rescaled to the grid exposure.
    pub points: &'a [(f64, f64)],
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
    pub x_label: &'a str,
    pub y_label: String,
    pub fmt_x: fn(f64) -> String,
    pub fmt_y: fn(f64) -> String,
}

/// Interval line colour: wider intervals are dimmer.
fn interval_color(width: f64) -> RGBColor {
    if width >= 0.95 {
        RGBColor(70, 70, 140)
    } else if width >= 0.8 {
        RGBColor(100, 110, 200)
    } else {
        RGBColor(140, 170, 255)
    }
}

impl<'a> Widget for RibbonChart<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        // When the available area is too small, Plotters may fail to build a chart.
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

        let widget = widget_fn(move |root| {
            let mut chart = ChartBuilder::on(&root)
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
                .y_desc(&self.y_label)
                .x_labels(5)
                .y_labels(5)
                .x_label_formatter(&|v| (self.fmt_x)(*v))
                .y_label_formatter(&|v| (self.fmt_y)(*v))
                .label_style(("sans-serif", 10).into_font().color(&WHITE))
                .axis_style(&WHITE)
                .bold_line_style(&WHITE)
                .draw()?;

            for lines in self.intervals {
                let color = interval_color(lines.width);
                chart.draw_series(LineSeries::new(lines.lower.iter().copied(), &color))?;
                chart.draw_series(LineSeries::new(lines.upper.iter().copied(), &color))?;
            }

            // Avoid `Circle` markers: the backend maps circle radii to canvas
            // units incorrectly and draws huge circles. A `Pixel` reads as a dot.
            chart.draw_series(
                self.points
                    .iter()
                    .map(|&(x, y)| Pixel::new((x, y), RGBColor(200, 200, 200))),
            )?;

            chart.draw_series(LineSeries::new(self.median.iter().copied(), &RGBColor(0, 255, 255)))?;

            Ok(())
        });

        widget.render(area, buf);
    }
}
