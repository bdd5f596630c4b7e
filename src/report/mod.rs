//! Reporting utilities: residuals, dispersion, interval bands, and formatted output.

pub mod format;

pub use format::*;

use crate::domain::{INTERVAL_WIDTHS, IntervalBand, ModelData, PredictionGrid, SampleMatrix};
use crate::error::AppError;
use crate::fit::GlmmFit;
use crate::math::{quantile_sorted, sorted_finite};
use crate::models::N_FIXED;

/// Observed count against its conditional fitted mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Residual {
    pub observed: f64,
    pub fitted: f64,
    /// `(y - mu) / sqrt(mu)`
    pub pearson: f64,
}

/// Pearson chi-square over residual degrees of freedom.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Dispersion {
    pub pearson_chi2: f64,
    pub df: usize,
    /// Values well above 1 suggest overdispersion relative to the Poisson.
    pub ratio: f64,
}

/// Pearson residuals of every observation against the conditional fit.
pub fn pearson_residuals(data: &ModelData, fit: &GlmmFit) -> Result<Vec<Residual>, AppError> {
    if fit.fitted.len() != data.observations.len() {
        return Err(AppError::numeric("Fitted values do not match the observations."));
    }
    let mut out = Vec::with_capacity(fit.fitted.len());
    for (o, &mu) in data.observations.iter().zip(fit.fitted.iter()) {
        if !(mu.is_finite() && mu > 0.0) {
            return Err(AppError::numeric("Non-positive fitted mean during residual computation."));
        }
        let observed = o.count as f64;
        out.push(Residual {
            observed,
            fitted: mu,
            pearson: (observed - mu) / mu.sqrt(),
        });
    }
    Ok(out)
}

/// Residual dispersion, counting fixed effects and both variance components as parameters.
pub fn dispersion(residuals: &[Residual]) -> Option<Dispersion> {
    let n_params = N_FIXED + 2;
    if residuals.len() <= n_params {
        return None;
    }
    let pearson_chi2: f64 = residuals.iter().map(|r| r.pearson * r.pearson).sum();
    let df = residuals.len() - n_params;
    Some(Dispersion {
        pearson_chi2,
        df,
        ratio: pearson_chi2 / df as f64,
    })
}

/// Median and central intervals of every sample column.
pub fn compute_bands(samples: &SampleMatrix, grid: &PredictionGrid) -> Result<Vec<IntervalBand>, AppError> {
    if samples.n_columns() != grid.len() {
        return Err(AppError::numeric(format!(
            "Sample matrix has {} columns but the grid has {} rows.",
            samples.n_columns(),
            grid.len()
        )));
    }

    let mut out = Vec::with_capacity(grid.len());
    for (j, row) in grid.rows.iter().enumerate() {
        let sorted = sorted_finite(&samples.column(j));
        let q = |p: f64| {
            quantile_sorted(&sorted, p)
                .ok_or_else(|| AppError::numeric(format!("Grid column {j} has no finite samples.")))
        };
        let median = q(0.5)?;
        let mut intervals = Vec::with_capacity(INTERVAL_WIDTHS.len());
        for width in INTERVAL_WIDTHS {
            let tail = (1.0 - width) / 2.0;
            intervals.push((width, q(tail)?, q(1.0 - tail)?));
        }
        out.push(IntervalBand {
            temp_z: row.temp_z,
            forest_level: row.forest_level,
            median,
            intervals,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::build_grid;

    #[test]
    fn bands_are_nested_and_ordered() {
        let grid = build_grid((-1.0, 1.0), 2, 16.0).unwrap();
        let rows: Vec<Vec<f64>> = (0..200)
            .map(|i| {
                let v = i as f64;
                vec![v, 2.0 * v, v + 1.0, 1000.0 - v]
            })
            .collect();
        let samples = SampleMatrix::from_rows(&rows, 4).unwrap();
        let bands = compute_bands(&samples, &grid).unwrap();
        assert_eq!(bands.len(), 4);
        for band in &bands {
            let (lo50, hi50) = band.interval(0.5).unwrap();
            let (lo80, hi80) = band.interval(0.8).unwrap();
            let (lo95, hi95) = band.interval(0.95).unwrap();
            assert!(lo95 <= lo80 && lo80 <= lo50 && lo50 <= band.median);
            assert!(band.median <= hi50 && hi50 <= hi80 && hi80 <= hi95);
        }
        assert!((bands[0].median - 99.5).abs() < 1e-12);
    }

    #[test]
    fn band_count_must_match_grid() {
        let grid = build_grid((-1.0, 1.0), 2, 16.0).unwrap();
        let samples = SampleMatrix::from_rows(&[vec![1.0, 2.0]], 2).unwrap();
        assert!(compute_bands(&samples, &grid).is_err());
    }

    #[test]
    fn dispersion_of_exact_fit_is_zero() {
        let residuals: Vec<Residual> = (0..10)
            .map(|i| Residual {
                observed: i as f64 + 1.0,
                fitted: i as f64 + 1.0,
                pearson: 0.0,
            })
            .collect();
        let d = dispersion(&residuals).unwrap();
        assert_eq!(d.df, 4);
        assert_eq!(d.ratio, 0.0);
        assert!(dispersion(&residuals[..6]).is_none());
    }
}
