//! Command-line parsing for the bird-count uncertainty comparison.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::{
    AnalysisConfig, ColumnMap, DEFAULT_BUCKET_THRESHOLD, DEFAULT_GRID_EXPOSURE, DEFAULT_GRID_STEPS, GroupFactor,
};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "bands",
    version,
    about = "Poisson GLMM of bird counts: bootstrap vs Bayesian uncertainty bands"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit both ways, print summaries and ribbon plots, and optionally export.
    Fit(FitArgs),
    /// Launch the interactive TUI.
    ///
    /// This runs the same pipeline as `bands fit`, then renders the
    /// frequentist and Bayesian ribbons side by side using Ratatui.
    Tui(FitArgs),
    /// Write a synthetic survey file with known parameters.
    Simulate(SimulateArgs),
}

/// Common options for fitting.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Semicolon-delimited survey file.
    #[arg(short = 'd', long, env = "BANDS_DATA", value_name = "CSV")]
    pub data: PathBuf,

    /// Site column.
    #[arg(long, default_value = "site")]
    pub site_col: String,

    /// Observer column.
    #[arg(long, default_value = "observer")]
    pub observer_col: String,

    /// Optional survey date column.
    #[arg(long, default_value = "date")]
    pub date_col: String,

    /// Temperature column (standardized to `temp_z`).
    #[arg(long, default_value = "temperature")]
    pub temperature_col: String,

    /// Forest-cover column (bucketed into low/high).
    #[arg(long, default_value = "forest")]
    pub forest_col: String,

    /// Exposure column (number of point counts).
    #[arg(long, default_value = "n_points")]
    pub exposure_col: String,

    /// Count column.
    #[arg(long, default_value = "abundance")]
    pub response_col: String,

    /// Forest cover at or above this value is "high".
    #[arg(long, default_value_t = DEFAULT_BUCKET_THRESHOLD)]
    pub threshold: f64,

    /// Number of temp_z values in the prediction grid.
    #[arg(long, default_value_t = DEFAULT_GRID_STEPS)]
    pub grid_steps: usize,

    /// Exposure used for grid predictions.
    #[arg(long, default_value_t = DEFAULT_GRID_EXPOSURE)]
    pub grid_exposure: f64,

    /// Bootstrap resamples per variant.
    #[arg(short = 'n', long, default_value_t = 200)]
    pub n_boot: usize,

    /// Grouping factor whose variance widens the second bootstrap variant.
    #[arg(long, value_enum, default_value_t = GroupFactor::Site)]
    pub landscape_group: GroupFactor,

    /// MCMC chains.
    #[arg(long, default_value_t = 4)]
    pub chains: usize,

    /// Iterations per chain, warmup included.
    #[arg(long, default_value_t = 2000)]
    pub iterations: usize,

    /// Warmup iterations per chain.
    #[arg(long, default_value_t = 1000)]
    pub warmup: usize,

    /// Keep every `thin`-th post-warmup draw.
    #[arg(long, default_value_t = 1)]
    pub thin: usize,

    /// Seed for bootstrap resampling, MCMC and posterior prediction.
    #[arg(long, env = "BANDS_SEED", default_value_t = 42)]
    pub seed: u64,

    /// Disable the terminal plots.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 60)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 16)]
    pub height: usize,

    /// Export every ribbon (median and interval bounds per grid row) to CSV.
    #[arg(long = "export-bands", value_name = "CSV")]
    pub export_bands: Option<PathBuf>,

    /// Export fit summaries and diagnostics to JSON.
    #[arg(long = "export-summary", value_name = "JSON")]
    pub export_summary: Option<PathBuf>,
}

impl FitArgs {
    pub fn to_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            data_path: self.data.clone(),
            columns: ColumnMap {
                site: self.site_col.clone(),
                observer: self.observer_col.clone(),
                date: self.date_col.clone(),
                temperature: self.temperature_col.clone(),
                forest: self.forest_col.clone(),
                exposure: self.exposure_col.clone(),
                response: self.response_col.clone(),
            },
            bucket_threshold: self.threshold,
            grid_steps: self.grid_steps,
            grid_exposure: self.grid_exposure,
            n_boot: self.n_boot,
            landscape_group: self.landscape_group,
            chains: self.chains,
            iterations: self.iterations,
            warmup: self.warmup,
            thin: self.thin,
            seed: self.seed,
            plot: !self.no_plot,
            plot_width: self.width,
            plot_height: self.height,
            export_bands: self.export_bands.clone(),
            export_summary: self.export_summary.clone(),
        }
    }
}

/// Options for writing a synthetic survey.
#[derive(Debug, Parser)]
pub struct SimulateArgs {
    /// Output file (semicolon-delimited).
    #[arg(short = 'o', long, value_name = "CSV")]
    pub out: PathBuf,

    #[arg(long, default_value_t = 40)]
    pub sites: usize,

    #[arg(long, default_value_t = 8)]
    pub observers: usize,

    /// Surveys per site.
    #[arg(long, default_value_t = 6)]
    pub visits: usize,

    #[arg(long, env = "BANDS_SEED", default_value_t = 42)]
    pub seed: u64,
}
