//! Point predictions from a frequentist fit.

use crate::domain::{GridRow, GroupFactor, PredictionGrid, ReForm};
use crate::fit::mle::GlmmFit;
use crate::models::fixed_eta;

/// Linear predictor (log expected count) for each grid row.
///
/// Random effects enter only for the factors `re` includes, and only when the
/// row names a level seen during fitting. Unknown or absent levels contribute
/// zero, i.e. the population-level value for that factor.
pub fn predict_link(fit: &GlmmFit, grid: &PredictionGrid, re: ReForm) -> Vec<f64> {
    grid.rows.iter().map(|row| row_link(fit, row, re)).collect()
}

/// Expected count for each grid row at the row's exposure.
pub fn predict(fit: &GlmmFit, grid: &PredictionGrid, re: ReForm) -> Vec<f64> {
    predict_link(fit, grid, re).into_iter().map(f64::exp).collect()
}

fn row_link(fit: &GlmmFit, row: &GridRow, re: ReForm) -> f64 {
    let mut eta = fixed_eta(&fit.beta, row.temp_z, row.forest_level) + row.exposure.ln();
    for factor in GroupFactor::ALL {
        if !re.includes(factor) {
            continue;
        }
        if let Some(level) = &row.levels[factor.index()] {
            eta += fit.random_effect(factor, level).unwrap_or(0.0);
        }
    }
    eta
}
