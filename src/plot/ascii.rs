//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - observed rates: `l` (low forest), `h` (high forest), `*` where both land
//! - residuals: `o`, with a `-` zero line
//! - ribbons: `.` 95%, `:` 80%, `#` 50%, `*` median

use crate::domain::{BucketLevel, IntervalBand, ModelData};
use crate::report::Residual;

const RIBBON_CHARS: [(f64, char); 3] = [(0.95, '.'), (0.80, ':'), (0.50, '#')];

/// Observed rate (count per exposure unit) against `temp_z`, by forest level.
pub fn render_scatter(data: &ModelData, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let points: Vec<(f64, f64, BucketLevel)> = data
        .observations
        .iter()
        .map(|o| (o.temp_z, o.count as f64 / o.exposure, o.forest_level))
        .collect();

    let (x_min, x_max) = range(points.iter().map(|p| p.0)).unwrap_or((-1.0, 1.0));
    let (y_min, y_max) = range(points.iter().map(|p| p.1)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];
    for &(x, y, level) in &points {
        let cx = map_x(x, x_min, x_max, width);
        let cy = map_y(y, y_min, y_max, height);
        let ch = match level {
            BucketLevel::Low => 'l',
            BucketLevel::High => 'h',
        };
        let cell = &mut grid[cy][cx];
        *cell = if *cell == ' ' || *cell == ch { ch } else { '*' };
    }

    let mut out = format!(
        "Observed rate: temp_z=[{x_min:.2}, {x_max:.2}] | count/n_points=[{y_min:.3}, {y_max:.3}] (l=low h=high)\n"
    );
    push_grid(&mut out, grid);
    out
}

/// Pearson residuals against fitted values, with a zero line.
pub fn render_residuals(residuals: &[Residual], width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (x_min, x_max) = range(residuals.iter().map(|r| r.fitted)).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = range(residuals.iter().map(|r| r.pearson).chain([0.0])).unwrap_or((-1.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];
    let zero = map_y(0.0, y_min, y_max, height);
    draw_line(&mut grid, 0, zero, width - 1, zero, '-');
    for r in residuals {
        let cx = map_x(r.fitted, x_min, x_max, width);
        let cy = map_y(r.pearson, y_min, y_max, height);
        grid[cy][cx] = 'o';
    }

    let mut out = format!(
        "Pearson residuals: fitted=[{x_min:.2}, {x_max:.2}] | residual=[{y_min:.2}, {y_max:.2}]\n"
    );
    push_grid(&mut out, grid);
    out
}

/// One panel per forest level: nested interval ribbons and the median curve.
///
/// Panels share a y-range so levels can be compared by eye.
pub fn render_ribbons(title: &str, bands: &[IntervalBand], width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (y_min, y_max) = range(bands.iter().flat_map(|b| {
        b.intervals
            .iter()
            .flat_map(|&(_, lo, hi)| [lo, hi])
            .chain([b.median])
    }))
    .unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut out = String::new();
    for level in BucketLevel::ALL {
        let mut curve: Vec<&IntervalBand> = bands.iter().filter(|b| b.forest_level == level).collect();
        if curve.is_empty() {
            continue;
        }
        curve.sort_by(|a, b| a.temp_z.partial_cmp(&b.temp_z).unwrap_or(std::cmp::Ordering::Equal));
        let (x_min, x_max) = (curve[0].temp_z, curve[curve.len() - 1].temp_z);

        let mut grid = vec![vec![' '; width]; height];
        for cx in 0..width {
            let u = cx as f64 / (width as f64 - 1.0);
            let x = x_min + u * (x_max - x_min);
            for (w, ch) in RIBBON_CHARS {
                let lo = interpolate(&curve, x, |b| b.interval(w).map(|(lo, _)| lo));
                let hi = interpolate(&curve, x, |b| b.interval(w).map(|(_, hi)| hi));
                if let (Some(lo), Some(hi)) = (lo, hi) {
                    let top = map_y(hi, y_min, y_max, height);
                    let bottom = map_y(lo, y_min, y_max, height);
                    for row in grid.iter_mut().take(bottom + 1).skip(top) {
                        row[cx] = ch;
                    }
                }
            }
            if let Some(m) = interpolate(&curve, x, |b| Some(b.median)) {
                grid[map_y(m, y_min, y_max, height)][cx] = '*';
            }
        }

        out.push_str(&format!(
            "{title} [{}]: temp_z=[{x_min:.2}, {x_max:.2}] | y=[{y_min:.2}, {y_max:.2}]\n",
            level.label()
        ));
        push_grid(&mut out, grid);
    }
    out
}

/// Join two multi-line blocks column-wise, left block padded to its widest line.
pub fn side_by_side(left: &str, right: &str, gap: usize) -> String {
    let left_lines: Vec<&str> = left.lines().collect();
    let right_lines: Vec<&str> = right.lines().collect();
    let left_width = left_lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);

    let mut out = String::new();
    for i in 0..left_lines.len().max(right_lines.len()) {
        let l = left_lines.get(i).copied().unwrap_or("");
        let r = right_lines.get(i).copied().unwrap_or("");
        let pad = left_width - l.chars().count() + gap;
        let line = format!("{l}{}{r}", " ".repeat(pad));
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn push_grid(out: &mut String, grid: Vec<Vec<char>>) {
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
}

/// Linear interpolation of a band quantity along `temp_z` (curve sorted by `temp_z`).
fn interpolate<F>(curve: &[&IntervalBand], x: f64, value: F) -> Option<f64>
where
    F: Fn(&IntervalBand) -> Option<f64>,
{
    let first = curve.first()?;
    if curve.len() == 1 || x <= first.temp_z {
        return value(first);
    }
    for pair in curve.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if x <= b.temp_z {
            let span = b.temp_z - a.temp_z;
            let t = if span > 0.0 { (x - a.temp_z) / span } else { 0.0 };
            let (va, vb) = (value(a)?, value(b)?);
            return Some(va + t * (vb - va));
        }
    }
    value(curve[curve.len() - 1])
}

fn range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values.filter(|v| v.is_finite()) {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() && max.is_finite() && max > min {
        Some((min, max))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::transform_survey;
    use crate::domain::SurveyRecord;

    fn flat_band(temp_z: f64) -> IntervalBand {
        IntervalBand {
            temp_z,
            forest_level: BucketLevel::Low,
            median: 5.0,
            intervals: vec![(0.5, 4.0, 6.0), (0.8, 3.0, 7.0), (0.95, 2.0, 8.0)],
        }
    }

    #[test]
    fn ribbon_golden_snapshot_small() {
        let bands = vec![flat_band(-1.0), flat_band(1.0)];
        let txt = render_ribbons("test", &bands, 10, 7);
        let expected = concat!(
            "test [low]: temp_z=[-1.00, 1.00] | y=[1.70, 8.30]\n",
            "..........\n",
            "::::::::::\n",
            "##########\n",
            "**********\n",
            "##########\n",
            "::::::::::\n",
            "..........\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn ribbons_render_one_panel_per_level() {
        let mut bands = vec![flat_band(-1.0), flat_band(1.0)];
        for b in bands.clone() {
            bands.push(IntervalBand {
                forest_level: BucketLevel::High,
                ..b
            });
        }
        let txt = render_ribbons("fit", &bands, 30, 8);
        assert_eq!(txt.lines().count(), 2 * (1 + 8));
        assert!(txt.contains("[low]") && txt.contains("[high]"));
    }

    #[test]
    fn scatter_and_residuals_have_requested_size() {
        let records: Vec<SurveyRecord> = (0..8)
            .map(|i| SurveyRecord {
                site: format!("S{}", i % 3),
                observer: format!("O{}", i % 2),
                date: None,
                temperature: 10.0 + i as f64,
                forest: if i % 2 == 0 { 0.2 } else { 0.8 },
                exposure: 16.0,
                response: i,
            })
            .collect();
        let data = transform_survey(&records, 0.5).unwrap();

        let scatter = render_scatter(&data, 40, 12);
        let lines: Vec<&str> = scatter.lines().collect();
        assert_eq!(lines.len(), 13);
        assert!(lines[1..].iter().all(|l| l.chars().count() == 40));
        assert!(scatter.contains('l') && scatter.contains('h'));

        let residuals: Vec<Residual> = (0..5)
            .map(|i| Residual {
                observed: i as f64,
                fitted: 2.0 + i as f64,
                pearson: (i as f64 - 2.0) / 2.0,
            })
            .collect();
        let plot = render_residuals(&residuals, 30, 9);
        assert_eq!(plot.lines().count(), 10);
        assert!(plot.contains('-') && plot.contains('o'));
    }

    #[test]
    fn side_by_side_pads_left_block() {
        let joined = side_by_side("ab\nabcd\n", "X\nY\nZ\n", 2);
        assert_eq!(joined, "ab    X\nabcd  Y\n      Z\n");
    }
}
