//! Ratatui-based terminal UI.
//!
//! Shows the frequentist (bootstrap) and Bayesian (posterior) ribbons side by
//! side for one forest level. `l` switches the level, `v` switches between the
//! parameter-only and group-variance variants, `q` quits.

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, Paragraph},
};

use crate::app::pipeline::{RibbonSet, RunOutput, run_analysis};
use crate::domain::{AnalysisConfig, BucketLevel, IntervalBand};
use crate::error::AppError;

mod plotters_chart;

use plotters_chart::{IntervalLines, RibbonChart};

/// Run the pipeline, then start the TUI.
pub fn run(config: AnalysisConfig) -> Result<(), AppError> {
    // Fit before entering raw mode so progress logs and errors print normally.
    let run = run_analysis(&config)?;

    let _guard = TerminalGuard::new()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)
        .map_err(|e| AppError::numeric(format!("Failed to initialize terminal: {e}")))?;

    let mut app = App::new(config, run);
    app.event_loop(&mut terminal)
}

/// Ensures the terminal is restored (raw mode, alternate screen) on exit.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, AppError> {
        enable_raw_mode().map_err(|e| AppError::numeric(format!("Failed to enable raw mode: {e}")))?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(AppError::numeric(format!("Failed to enter alternate screen: {e}")));
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
    config: AnalysisConfig,
    run: RunOutput,
    level: BucketLevel,
    /// Index into `run.bootstrap` / `run.bayes`.
    variant: usize,
    status: String,
}

impl App {
    fn new(config: AnalysisConfig, run: RunOutput) -> Self {
        let status = if run.glmm.converged {
            "Ready.".to_string()
        } else {
            "Warning: variance-component search did not converge.".to_string()
        };
        Self {
            config,
            run,
            level: BucketLevel::Low,
            variant: 0,
            status,
        }
    }

    fn event_loop<B: ratatui::backend::Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<(), AppError> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal
                    .draw(|f| self.draw(f))
                    .map_err(|e| AppError::numeric(format!("Terminal draw error: {e}")))?;
                needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(100))
                .map_err(|e| AppError::numeric(format!("Event poll error: {e}")))?
            {
                continue;
            }

            match event::read().map_err(|e| AppError::numeric(format!("Event read error: {e}")))? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key.code) {
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

    /// Returns `true` when the app should exit.
    fn handle_key(&mut self, code: KeyCode) -> bool {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return true,
            KeyCode::Char('l') => {
                self.level = match self.level {
                    BucketLevel::Low => BucketLevel::High,
                    BucketLevel::High => BucketLevel::Low,
                };
                self.status = format!("forest level: {}", self.level.label());
            }
            KeyCode::Char('v') => {
                self.variant = (self.variant + 1) % self.run.bootstrap.len();
                self.status = format!("variant: {}", self.run.bootstrap[self.variant].label);
            }
            _ => {}
        }
        false
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let size = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(5), Constraint::Min(0), Constraint::Length(3)])
            .split(size);

        self.draw_header(frame, chunks[0]);
        self.draw_body(frame, chunks[1]);
        self.draw_footer(frame, chunks[2]);
    }

    fn draw_header(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let run = &self.run;
        let stats = &run.ingest.stats;
        let mut lines: Vec<Line> = Vec::new();
        lines.push(Line::from(vec![
            Span::styled("bands", Style::default().fg(Color::Cyan)),
            Span::raw(" - bootstrap vs Bayesian uncertainty"),
        ]));
        lines.push(Line::from(Span::styled(
            format!(
                "n={} | sites={} | observers={} | grid={}x{} @ exposure {} | level: {}",
                stats.n_rows,
                stats.n_sites,
                stats.n_observers,
                self.config.grid_steps,
                BucketLevel::ALL.len(),
                self.config.grid_exposure,
                self.level.label(),
            ),
            Style::default().fg(Color::Gray),
        )));
        lines.push(Line::from(Span::styled(
            format!(
                "AIC={:.2} | sd(site)={:.3} sd(observer)={:.3} | resamples={} | draws={}",
                run.glmm.aic,
                run.glmm.sd[0],
                run.glmm.sd[1],
                run.bootstrap[0].samples.n_draws(),
                run.posterior.n_draws(),
            ),
            Style::default().fg(Color::Gray),
        )));

        let p = Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }

    fn draw_body(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area);

        let left = &self.run.bootstrap[self.variant];
        let right = &self.run.bayes[self.variant];
        let y_bounds = shared_y_bounds(&[left, right], self.level);

        self.draw_chart(frame, chunks[0], left, y_bounds);
        self.draw_chart(frame, chunks[1], right, y_bounds);
    }

    fn draw_chart(&self, frame: &mut ratatui::Frame<'_>, area: Rect, set: &RibbonSet, y_bounds: [f64; 2]) {
        let block = Block::default().title(set.label.as_str()).borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        frame.render_widget(Clear, inner);

        let bands: Vec<&IntervalBand> = set.bands.iter().filter(|b| b.forest_level == self.level).collect();
        if bands.is_empty() {
            let msg = Paragraph::new("No bands for this level.").style(Style::default().fg(Color::Yellow));
            frame.render_widget(msg, inner);
            return;
        }

        let (median, intervals) = ribbon_series(&bands);
        let points = observed_points(&self.run, self.level, self.config.grid_exposure);
        let x_bounds = [bands[0].temp_z, bands[bands.len() - 1].temp_z];

        let (chart_rect, insets) = chart_layout(inner);
        let widget = RibbonChart {
            median: &median,
            intervals: &intervals,
            points: &points,
            x_bounds,
            y_bounds,
            x_label: "temp_z",
            y_label: "expected count".to_string(),
            fmt_x: fmt_axis_x,
            fmt_y: fmt_axis_y,
        };

        frame.render_widget(widget, chart_rect);
        if let Some(insets) = insets {
            draw_axis_ticks(frame, inner, chart_rect, insets, x_bounds, y_bounds);
        }
    }

    fn draw_footer(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let help = "l level  v variant  q quit";
        let line = Line::from(vec![
            Span::styled(help, Style::default().fg(Color::Gray)),
            Span::raw(" | "),
            Span::styled(&self.status, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }
}

/// Median line plus lower/upper lines per interval width (widest first).
fn ribbon_series(bands: &[&IntervalBand]) -> (Vec<(f64, f64)>, Vec<IntervalLines>) {
    let median = bands.iter().map(|b| (b.temp_z, b.median)).collect();
    let mut widths: Vec<f64> = bands[0].intervals.iter().map(|&(w, _, _)| w).collect();
    widths.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let intervals = widths
        .into_iter()
        .map(|width| {
            let (lower, upper) = bands
                .iter()
                .filter_map(|b| b.interval(width).map(|(lo, hi)| ((b.temp_z, lo), (b.temp_z, hi))))
                .unzip();
            IntervalLines { width, lower, upper }
        })
        .collect();

    (median, intervals)
}

/// Observed counts of one level, rescaled to the grid exposure.
fn observed_points(run: &RunOutput, level: BucketLevel, exposure: f64) -> Vec<(f64, f64)> {
    run.data
        .observations
        .iter()
        .filter(|o| o.forest_level == level)
        .map(|o| (o.temp_z, o.count as f64 / o.exposure * exposure))
        .collect()
}

/// Y-range covering the widest interval of every set, so panels compare directly.
fn shared_y_bounds(sets: &[&RibbonSet], level: BucketLevel) -> [f64; 2] {
    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for set in sets {
        for b in set.bands.iter().filter(|b| b.forest_level == level) {
            for &(_, lo, hi) in &b.intervals {
                y_min = y_min.min(lo);
                y_max = y_max.max(hi);
            }
        }
    }
    if !y_min.is_finite() || !y_max.is_finite() || y_max <= y_min {
        return [0.0, 1.0];
    }
    let pad = ((y_max - y_min) * 0.05).max(1e-12);
    [(y_min - pad).max(0.0), y_max + pad]
}

fn fmt_axis_x(v: f64) -> String {
    format!("{v:.1}")
}

fn fmt_axis_y(v: f64) -> String {
    format!("{v:.1}")
}

#[derive(Debug, Clone, Copy)]
struct AxisInsets {
    left: u16,
    right: u16,
    top: u16,
    bottom: u16,
}

fn chart_layout(inner: Rect) -> (Rect, Option<AxisInsets>) {
    let insets = AxisInsets {
        left: 8,
        right: 2,
        top: 1,
        bottom: 2,
    };

    if inner.width <= insets.left + insets.right + 10 || inner.height <= insets.top + insets.bottom + 5 {
        return (inner, None);
    }

    let rect = Rect {
        x: inner.x + insets.left,
        y: inner.y + insets.top,
        width: inner.width - insets.left - insets.right,
        height: inner.height - insets.top - insets.bottom,
    };

    (rect, Some(insets))
}

fn draw_axis_ticks(
    frame: &mut ratatui::Frame<'_>,
    inner: Rect,
    chart: Rect,
    insets: AxisInsets,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
) {
    let ticks = 5usize;
    let style = Style::default().fg(Color::Gray);

    for i in 0..ticks {
        let u = i as f64 / (ticks as f64 - 1.0);
        let x_val = x_bounds[0] + u * (x_bounds[1] - x_bounds[0]);
        let x = chart.x + ((chart.width - 1) as f64 * u).round() as u16;
        let label = fmt_axis_x(x_val);
        let label_len = label.len() as u16;
        let start = x.saturating_sub((label.len() / 2) as u16);
        let y = chart.y + chart.height;
        if y >= inner.y + inner.height - 1 {
            continue;
        }
        frame.render_widget(
            Paragraph::new(label).style(style),
            Rect {
                x: start,
                y,
                width: label_len,
                height: 1,
            },
        );
    }

    for i in 0..ticks {
        let u = i as f64 / (ticks as f64 - 1.0);
        let y_val = y_bounds[0] + u * (y_bounds[1] - y_bounds[0]);
        let y = chart.y + (chart.height - 1) - ((chart.height - 1) as f64 * u).round() as u16;
        let label = fmt_axis_y(y_val);
        let label_len = label.len() as u16;
        let x = inner.x + insets.left.saturating_sub(1);
        let start = x.saturating_sub(label.len() as u16);
        if start < inner.x {
            continue;
        }
        frame.render_widget(
            Paragraph::new(label).style(style),
            Rect {
                x: start,
                y,
                width: label_len,
                height: 1,
            },
        );
    }

    let x_label = Paragraph::new("temp_z")
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Gray));
    let x_rect = Rect {
        x: chart.x,
        y: chart.y + chart.height + 1,
        width: chart.width,
        height: 1,
    };
    if x_rect.y < inner.y + inner.height {
        frame.render_widget(x_label, x_rect);
    }

    let y_label = Paragraph::new("count").style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));
    let y_rect = Rect {
        x: inner.x,
        y: inner.y,
        width: insets.left.saturating_sub(1),
        height: 1,
    };
    frame.render_widget(y_label, y_rect);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(temp_z: f64, level: BucketLevel, scale: f64) -> IntervalBand {
        IntervalBand {
            temp_z,
            forest_level: level,
            median: 5.0 * scale,
            intervals: vec![
                (0.5, 4.0 * scale, 6.0 * scale),
                (0.8, 3.0 * scale, 7.0 * scale),
                (0.95, 2.0 * scale, 8.0 * scale),
            ],
        }
    }

    #[test]
    fn ribbon_series_orders_widest_first() {
        let bands = [band(-1.0, BucketLevel::Low, 1.0), band(1.0, BucketLevel::Low, 1.0)];
        let refs: Vec<&IntervalBand> = bands.iter().collect();
        let (median, intervals) = ribbon_series(&refs);
        assert_eq!(median, vec![(-1.0, 5.0), (1.0, 5.0)]);
        assert_eq!(intervals.len(), 3);
        assert_eq!(intervals[0].width, 0.95);
        assert_eq!(intervals[0].lower, vec![(-1.0, 2.0), (1.0, 2.0)]);
        assert_eq!(intervals[2].upper, vec![(-1.0, 6.0), (1.0, 6.0)]);
    }

    #[test]
    fn chart_layout_reserves_axis_space_only_when_room() {
        let (rect, insets) = chart_layout(Rect::new(0, 0, 80, 30));
        assert!(insets.is_some());
        assert_eq!(rect.x, 8);
        let (small, none) = chart_layout(Rect::new(0, 0, 15, 6));
        assert!(none.is_none());
        assert_eq!(small, Rect::new(0, 0, 15, 6));
    }
}
