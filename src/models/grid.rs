//! Prediction grid construction.
//!
//! The grid is the cross product of equally spaced standardized-temperature
//! values and both forest levels, at a fixed exposure. Temperature varies
//! fastest, so the first `steps` rows are `low` and the next `steps` are `high`.

use crate::domain::{BucketLevel, GridRow, PredictionGrid};
use crate::error::AppError;

pub fn build_grid(temp_z_range: (f64, f64), steps: usize, exposure: f64) -> Result<PredictionGrid, AppError> {
    let (lo, hi) = temp_z_range;
    if !(lo.is_finite() && hi.is_finite()) || hi < lo {
        return Err(AppError::input("Invalid temperature range for the prediction grid."));
    }
    if steps < 2 {
        return Err(AppError::input("Prediction grid needs at least two temperature steps."));
    }
    if !(exposure.is_finite() && exposure > 0.0) {
        return Err(AppError::input("Prediction grid exposure must be finite and > 0."));
    }

    let mut rows = Vec::with_capacity(steps * BucketLevel::ALL.len());
    for level in BucketLevel::ALL {
        for i in 0..steps {
            let u = i as f64 / (steps as f64 - 1.0);
            rows.push(GridRow {
                temp_z: lo + u * (hi - lo),
                forest_level: level,
                exposure,
                levels: [None, None],
            });
        }
    }

    Ok(PredictionGrid { rows })
}
