//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - produced by ingest and the feature transformer
//! - consumed by both the frequentist and the Bayesian fitters
//! - exported to CSV/JSON for later inspection

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Interval widths rendered for every uncertainty ribbon.
pub const INTERVAL_WIDTHS: [f64; 3] = [0.50, 0.80, 0.95];

/// Default forest-cover threshold separating the two bucket levels.
pub const DEFAULT_BUCKET_THRESHOLD: f64 = 0.5;

/// Default number of standardized-temperature values in the prediction grid.
pub const DEFAULT_GRID_STEPS: usize = 20;

/// Default exposure (point counts per survey) used for grid predictions.
pub const DEFAULT_GRID_EXPOSURE: f64 = 16.0;

/// Random-intercept grouping factors of the model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum GroupFactor {
    Site,
    Observer,
}

impl GroupFactor {
    pub const ALL: [GroupFactor; 2] = [GroupFactor::Site, GroupFactor::Observer];

    /// Position of this factor in per-factor arrays.
    pub fn index(self) -> usize {
        match self {
            GroupFactor::Site => 0,
            GroupFactor::Observer => 1,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            GroupFactor::Site => "site",
            GroupFactor::Observer => "observer",
        }
    }
}

/// Two-level bucketing of forest cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketLevel {
    /// `forest < threshold`
    Low,
    /// `forest >= threshold`
    High,
}

impl BucketLevel {
    pub const ALL: [BucketLevel; 2] = [BucketLevel::Low, BucketLevel::High];

    pub fn label(self) -> &'static str {
        match self {
            BucketLevel::Low => "low",
            BucketLevel::High => "high",
        }
    }

    /// Treatment-coded indicator (`Low` is the reference level).
    pub fn indicator(self) -> f64 {
        match self {
            BucketLevel::Low => 0.0,
            BucketLevel::High => 1.0,
        }
    }
}

/// Input column names. Header matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMap {
    pub site: String,
    pub observer: String,
    /// Optional survey date column.
    pub date: String,
    pub temperature: String,
    pub forest: String,
    /// Exposure (number of point counts); enters the model as `log(exposure)`.
    pub exposure: String,
    /// Raw response column, renamed to `count` by the transformer.
    pub response: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            site: "site".to_string(),
            observer: "observer".to_string(),
            date: "date".to_string(),
            temperature: "temperature".to_string(),
            forest: "forest".to_string(),
            exposure: "n_points".to_string(),
            response: "abundance".to_string(),
        }
    }
}

/// One validated survey event as read from the input file.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyRecord {
    pub site: String,
    pub observer: String,
    pub date: Option<NaiveDate>,
    pub temperature: f64,
    pub forest: f64,
    /// Strictly positive.
    pub exposure: f64,
    pub response: u64,
}

/// A survey event after the feature transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Dense level index per grouping factor, ordered as `GroupFactor::ALL`.
    pub groups: [usize; 2],
    pub temp_z: f64,
    pub forest_level: BucketLevel,
    pub exposure: f64,
    pub count: u64,
}

/// Dense indexing of one grouping factor's levels.
#[derive(Debug, Clone, Default)]
pub struct GroupIndex {
    /// Level names in first-seen order.
    pub levels: Vec<String>,
    lookup: HashMap<String, usize>,
    /// Observation rows belonging to each level.
    pub rows: Vec<Vec<usize>>,
}

impl GroupIndex {
    /// Return the level's index, registering it if unseen.
    pub fn intern(&mut self, level: &str) -> usize {
        if let Some(&idx) = self.lookup.get(level) {
            return idx;
        }
        let idx = self.levels.len();
        self.levels.push(level.to_string());
        self.lookup.insert(level.to_string(), idx);
        self.rows.push(Vec::new());
        idx
    }

    pub fn get(&self, level: &str) -> Option<usize> {
        self.lookup.get(level).copied()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Mean and standard deviation used to standardize a covariate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub mean: f64,
    pub sd: f64,
}

impl Standardizer {
    pub fn apply(&self, value: f64) -> f64 {
        (value - self.mean) / self.sd
    }

    pub fn invert(&self, z: f64) -> f64 {
        z * self.sd + self.mean
    }
}

/// Model-ready data produced by the feature transformer.
#[derive(Debug, Clone)]
pub struct ModelData {
    pub observations: Vec<Observation>,
    /// Indexed as `GroupFactor::index()`.
    pub groups: [GroupIndex; 2],
    pub temperature: Standardizer,
    pub bucket_threshold: f64,
}

impl ModelData {
    pub fn group(&self, factor: GroupFactor) -> &GroupIndex {
        &self.groups[factor.index()]
    }

    /// Observed range of the standardized temperature.
    pub fn temp_z_range(&self) -> Option<(f64, f64)> {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for o in &self.observations {
            lo = lo.min(o.temp_z);
            hi = hi.max(o.temp_z);
        }
        if lo.is_finite() && hi.is_finite() {
            Some((lo, hi))
        } else {
            None
        }
    }
}

/// Summary stats about the rows actually used for fitting.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetStats {
    pub n_rows: usize,
    pub n_sites: usize,
    pub n_observers: usize,
    pub count_min: u64,
    pub count_max: u64,
    pub exposure_min: f64,
    pub exposure_max: f64,
    pub temperature_min: f64,
    pub temperature_max: f64,
    pub date_min: Option<NaiveDate>,
    pub date_max: Option<NaiveDate>,
}

/// Which random effects enter a frequentist point prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReForm {
    /// Every grouping factor.
    All,
    /// Only the named grouping factor.
    Group(GroupFactor),
    /// Population level (fixed effects and offset only).
    None,
}

impl ReForm {
    pub fn includes(self, factor: GroupFactor) -> bool {
        match self {
            ReForm::All => true,
            ReForm::Group(g) => g == factor,
            ReForm::None => false,
        }
    }
}

/// Bootstrap flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BootstrapVariant {
    /// Refit-and-predict at population level only.
    ParameterOnly,
    /// Additionally perturb each grid cell's linear predictor with
    /// `N(0, sigma^2)` where `sigma^2` is the named factor's variance component.
    WithGroupVariance(GroupFactor),
}

impl BootstrapVariant {
    pub fn display_name(self) -> String {
        match self {
            BootstrapVariant::ParameterOnly => "parameters".to_string(),
            BootstrapVariant::WithGroupVariance(g) => format!("parameters + {} variance", g.display_name()),
        }
    }
}

/// Random-effect switch for posterior predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BayesReForm {
    None,
    All { allow_new_levels: bool },
}

/// Scale of posterior predictive draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictKind {
    /// Expected count `exp(eta)`; always strictly positive.
    Expected,
    /// A Poisson draw around the expected count.
    Response,
}

/// One row of the synthetic prediction grid.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    pub temp_z: f64,
    pub forest_level: BucketLevel,
    pub exposure: f64,
    /// Optional level labels, indexed as `GroupFactor::index()`.
    pub levels: [Option<String>; 2],
}

/// Covariate combinations used for out-of-sample predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionGrid {
    pub rows: Vec<GridRow>,
}

impl PredictionGrid {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Resampled or posterior-drawn predictions: one row per draw, one column per grid row.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMatrix {
    pub values: DMatrix<f64>,
}

impl SampleMatrix {
    pub fn from_rows(rows: &[Vec<f64>], ncols: usize) -> Result<Self, AppError> {
        if rows.iter().any(|r| r.len() != ncols) {
            return Err(AppError::numeric("Sample rows have inconsistent lengths."));
        }
        let values = DMatrix::from_fn(rows.len(), ncols, |i, j| rows[i][j]);
        Ok(Self { values })
    }

    pub fn n_draws(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.values.ncols()
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        self.values.column(j).iter().copied().collect()
    }
}

/// Quantile summary of one sample-matrix column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalBand {
    pub temp_z: f64,
    pub forest_level: BucketLevel,
    pub median: f64,
    /// `(width, lower, upper)` for each of `INTERVAL_WIDTHS`.
    pub intervals: Vec<(f64, f64, f64)>,
}

impl IntervalBand {
    pub fn interval(&self, width: f64) -> Option<(f64, f64)> {
        self.intervals
            .iter()
            .find(|(w, _, _)| (w - width).abs() < 1e-9)
            .map(|&(_, lo, hi)| (lo, hi))
    }
}

/// Everything a run needs, resolved from CLI arguments and the environment.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub data_path: PathBuf,
    pub columns: ColumnMap,
    pub bucket_threshold: f64,
    pub grid_steps: usize,
    pub grid_exposure: f64,

    pub n_boot: usize,
    /// Grouping factor whose variance perturbs the second bootstrap variant.
    pub landscape_group: GroupFactor,

    pub chains: usize,
    pub iterations: usize,
    pub warmup: usize,
    pub thin: usize,
    pub seed: u64,

    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,
    pub export_bands: Option<PathBuf>,
    pub export_summary: Option<PathBuf>,
}

impl AnalysisConfig {
    /// Check settings that would otherwise fail deep inside a stage.
    pub fn validate(&self) -> Result<(), AppError> {
        if !(self.bucket_threshold.is_finite()) {
            return Err(AppError::input("Bucket threshold must be finite."));
        }
        if self.grid_steps < 2 {
            return Err(AppError::input("Grid steps must be >= 2."));
        }
        if !(self.grid_exposure.is_finite() && self.grid_exposure > 0.0) {
            return Err(AppError::input("Grid exposure must be finite and > 0."));
        }
        if self.n_boot == 0 {
            return Err(AppError::input("Bootstrap count must be > 0."));
        }
        if self.chains == 0 {
            return Err(AppError::input("Chain count must be > 0."));
        }
        if self.thin == 0 {
            return Err(AppError::input("Thinning interval must be > 0."));
        }
        if self.warmup >= self.iterations {
            return Err(AppError::input("Warmup must be smaller than the iteration count."));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_index_interns_in_first_seen_order() {
        let mut idx = GroupIndex::default();
        assert_eq!(idx.intern("B"), 0);
        assert_eq!(idx.intern("A"), 1);
        assert_eq!(idx.intern("B"), 0);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.get("A"), Some(1));
        assert_eq!(idx.get("C"), None);
    }

    #[test]
    fn reform_inclusion() {
        assert!(ReForm::All.includes(GroupFactor::Observer));
        assert!(ReForm::Group(GroupFactor::Site).includes(GroupFactor::Site));
        assert!(!ReForm::Group(GroupFactor::Site).includes(GroupFactor::Observer));
        assert!(!ReForm::None.includes(GroupFactor::Site));
    }

    #[test]
    fn sample_matrix_rejects_ragged_rows() {
        let rows = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(SampleMatrix::from_rows(&rows, 2).is_err());
        let ok = SampleMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]], 2).unwrap();
        assert_eq!(ok.n_draws(), 2);
        assert_eq!(ok.column(1), vec![2.0, 4.0]);
    }
}
