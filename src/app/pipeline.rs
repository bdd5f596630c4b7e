//! Shared analysis pipeline used by both CLI and TUI front-ends.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! ingest -> transform -> GLMM fit -> grid -> bootstrap bands -> posterior -> posterior bands
//!
//! The CLI and the TUI can then focus on presentation (printing vs widgets).

use crate::bayes::{PosteriorFit, SamplerOptions, posterior_epred, sample_posterior};
use crate::data::transform_survey;
use crate::domain::{
    AnalysisConfig, BayesReForm, BootstrapVariant, IntervalBand, ModelData, PredictKind, PredictionGrid,
    ReForm, SampleMatrix,
};
use crate::error::AppError;
use crate::fit::{BootstrapOptions, FitOptions, GlmmFit, bootstrap_predictions, fit_glmm, predict};
use crate::io::ingest::{IngestedSurvey, load_survey};
use crate::models::build_grid;
use crate::report::{Dispersion, Residual, compute_bands, dispersion, pearson_residuals};

/// One uncertainty representation of the grid predictions.
#[derive(Debug, Clone)]
pub struct RibbonSet {
    pub label: String,
    pub samples: SampleMatrix,
    pub bands: Vec<IntervalBand>,
}

/// All computed outputs of a single analysis run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub ingest: IngestedSurvey,
    pub data: ModelData,
    pub grid: PredictionGrid,
    pub glmm: GlmmFit,
    pub residuals: Vec<Residual>,
    pub dispersion: Option<Dispersion>,
    /// Population-level expected counts on the grid.
    pub point_prediction: Vec<f64>,
    /// Parameter-only, then with the landscape group's variance.
    pub bootstrap: [RibbonSet; 2],
    pub posterior: PosteriorFit,
    /// Population level, then with (new-level) group effects.
    pub bayes: [RibbonSet; 2],
}

/// Execute the full pipeline from the configured survey file.
pub fn run_analysis(config: &AnalysisConfig) -> Result<RunOutput, AppError> {
    config.validate()?;
    let ingest = load_survey(&config.data_path, &config.columns)?;
    run_with_ingest(ingest, config)
}

/// Execute the pipeline on already-ingested records.
pub fn run_with_ingest(ingest: IngestedSurvey, config: &AnalysisConfig) -> Result<RunOutput, AppError> {
    config.validate()?;
    tracing::info!(
        rows = ingest.rows_used,
        skipped = ingest.row_errors.len(),
        "survey loaded"
    );

    let data = transform_survey(&ingest.records, config.bucket_threshold)?;
    let glmm = fit_glmm(&data, &FitOptions::default())?;
    let residuals = pearson_residuals(&data, &glmm)?;
    let dispersion = dispersion(&residuals);

    let range = data
        .temp_z_range()
        .ok_or_else(|| AppError::no_data("No temperature values to span the prediction grid."))?;
    let grid = build_grid(range, config.grid_steps, config.grid_exposure)?;
    let point_prediction = predict(&glmm, &grid, ReForm::None);

    let variants = [
        BootstrapVariant::ParameterOnly,
        BootstrapVariant::WithGroupVariance(config.landscape_group),
    ];
    let mut boot = Vec::with_capacity(variants.len());
    for (i, variant) in variants.into_iter().enumerate() {
        let opts = BootstrapOptions::new(config.n_boot, config.seed.wrapping_add(i as u64), variant);
        let samples = bootstrap_predictions(&glmm, &data, &grid, &opts)?;
        boot.push(ribbon(format!("bootstrap: {}", variant.display_name()), samples, &grid)?);
    }

    let sampler = SamplerOptions {
        chains: config.chains,
        iterations: config.iterations,
        warmup: config.warmup,
        thin: config.thin,
        seed: config.seed,
        ..SamplerOptions::default()
    };
    let posterior = sample_posterior(&data, &sampler)?;

    let reforms = [
        ("posterior: fixed effects", BayesReForm::None),
        (
            "posterior: + new-level group effects",
            BayesReForm::All { allow_new_levels: true },
        ),
    ];
    let mut bayes = Vec::with_capacity(reforms.len());
    for (i, (label, re)) in reforms.into_iter().enumerate() {
        let samples = posterior_epred(
            &posterior,
            &grid,
            re,
            PredictKind::Expected,
            config.seed.wrapping_add(100 + i as u64),
        )?;
        bayes.push(ribbon(label.to_string(), samples, &grid)?);
    }

    Ok(RunOutput {
        ingest,
        data,
        grid,
        glmm,
        residuals,
        dispersion,
        point_prediction,
        bootstrap: pair(boot)?,
        posterior,
        bayes: pair(bayes)?,
    })
}

fn ribbon(label: String, samples: SampleMatrix, grid: &PredictionGrid) -> Result<RibbonSet, AppError> {
    let bands = compute_bands(&samples, grid)?;
    Ok(RibbonSet { label, samples, bands })
}

fn pair(sets: Vec<RibbonSet>) -> Result<[RibbonSet; 2], AppError> {
    sets.try_into()
        .map_err(|_| AppError::numeric("Expected exactly two ribbon sets."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SimulationConfig, simulate_survey, write_survey_csv};
    use crate::domain::{ColumnMap, GroupFactor};
    use crate::io::export::{write_bands_csv, write_summary_json};

    fn small_config(data_path: std::path::PathBuf) -> AnalysisConfig {
        AnalysisConfig {
            data_path,
            columns: ColumnMap::default(),
            bucket_threshold: 0.5,
            grid_steps: 20,
            grid_exposure: 16.0,
            n_boot: 5,
            landscape_group: GroupFactor::Site,
            chains: 2,
            iterations: 400,
            warmup: 200,
            thin: 1,
            seed: 7,
            plot: false,
            plot_width: 40,
            plot_height: 10,
            export_bands: None,
            export_summary: None,
        }
    }

    #[test]
    fn end_to_end_on_simulated_survey() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("survey.csv");
        let records = simulate_survey(&SimulationConfig {
            n_sites: 16,
            n_observers: 4,
            visits_per_site: 4,
            seed: 3,
            ..SimulationConfig::default()
        })
        .unwrap();
        write_survey_csv(&path, &records, &ColumnMap::default()).unwrap();

        let run = run_analysis(&small_config(path)).unwrap();

        assert_eq!(run.grid.len(), 40);
        assert_eq!(run.point_prediction.len(), 40);
        for set in run.bootstrap.iter().chain(run.bayes.iter()) {
            assert_eq!(set.samples.n_columns(), 40);
            assert_eq!(set.bands.len(), 40);
        }
        for set in &run.bootstrap {
            assert_eq!(set.samples.n_draws(), 5);
        }
        assert_eq!(run.posterior.n_draws(), 2 * 200);
        assert!(run.bayes.iter().all(|s| s.samples.values.iter().all(|v| *v > 0.0)));

        let bands_path = dir.path().join("bands.csv");
        let summary_path = dir.path().join("summary.json");
        write_bands_csv(&bands_path, &run).unwrap();
        write_summary_json(&summary_path, &run).unwrap();

        let csv = std::fs::read_to_string(&bands_path).unwrap();
        assert_eq!(csv.lines().count(), 1 + 4 * 40);
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
        assert!(json.get("frequentist").is_some());
    }

    #[test]
    fn rejects_invalid_config_before_reading() {
        let mut config = small_config("does-not-exist.csv".into());
        config.n_boot = 0;
        assert_eq!(run_analysis(&config).unwrap_err().exit_code(), 2);
    }
}
