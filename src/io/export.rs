//! Export ribbons to CSV and run summaries to JSON.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::app::pipeline::RunOutput;
use crate::bayes::{AcceptanceRates, ParameterSummary};
use crate::domain::{DatasetStats, Standardizer};
use crate::error::AppError;
use crate::fit::VarianceComponent;
use crate::models::FIXED_EFFECT_NAMES;
use crate::report::Dispersion;

/// Write every ribbon (bootstrap and posterior) to one CSV file.
pub fn write_bands_csv(path: &Path, run: &RunOutput) -> Result<(), AppError> {
    let mut file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create bands CSV '{}': {e}", path.display())))?;

    writeln!(
        file,
        "ribbon,temp_z,temperature,forest_level,median,lo50,hi50,lo80,hi80,lo95,hi95"
    )
    .map_err(|e| AppError::input(format!("Failed to write bands CSV header: {e}")))?;

    for set in run.bootstrap.iter().chain(run.bayes.iter()) {
        for band in &set.bands {
            let mut bounds = String::new();
            for (_, lo, hi) in &band.intervals {
                bounds.push_str(&format!(",{lo:.6},{hi:.6}"));
            }
            writeln!(
                file,
                "{},{:.6},{:.4},{},{:.6}{bounds}",
                set.label,
                band.temp_z,
                run.data.temperature.invert(band.temp_z),
                band.forest_level.label(),
                band.median,
            )
            .map_err(|e| AppError::input(format!("Failed to write bands CSV row: {e}")))?;
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct Coefficient {
    term: &'static str,
    estimate: f64,
    std_error: f64,
}

#[derive(Debug, Serialize)]
struct FrequentistSummary {
    fixed_effects: Vec<Coefficient>,
    variance_components: Vec<VarianceComponent>,
    log_likelihood: f64,
    aic: f64,
    bic: f64,
    converged: bool,
    dispersion: Option<Dispersion>,
}

#[derive(Debug, Serialize)]
struct BayesianSummary {
    chains: usize,
    draws: usize,
    parameters: Vec<ParameterSummary>,
    acceptance: Vec<AcceptanceRates>,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    tool: &'static str,
    dataset: &'a DatasetStats,
    temperature: Standardizer,
    bucket_threshold: f64,
    grid_rows: usize,
    bootstrap_resamples: usize,
    frequentist: FrequentistSummary,
    bayesian: BayesianSummary,
}

/// Write fit summaries and diagnostics as pretty JSON.
pub fn write_summary_json(path: &Path, run: &RunOutput) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create summary JSON '{}': {e}", path.display())))?;

    let fixed_effects = FIXED_EFFECT_NAMES
        .iter()
        .zip(run.glmm.beta.iter().zip(run.glmm.std_errors()))
        .map(|(&term, (&estimate, std_error))| Coefficient {
            term,
            estimate,
            std_error,
        })
        .collect();

    let summary = RunSummary {
        tool: "bands",
        dataset: &run.ingest.stats,
        temperature: run.data.temperature,
        bucket_threshold: run.data.bucket_threshold,
        grid_rows: run.grid.len(),
        bootstrap_resamples: run.bootstrap[0].samples.n_draws(),
        frequentist: FrequentistSummary {
            fixed_effects,
            variance_components: run.glmm.variance_components(),
            log_likelihood: run.glmm.log_likelihood,
            aic: run.glmm.aic,
            bic: run.glmm.bic,
            converged: run.glmm.converged,
            dispersion: run.dispersion,
        },
        bayesian: BayesianSummary {
            chains: run.posterior.chains.len(),
            draws: run.posterior.n_draws(),
            parameters: run.posterior.summary.clone(),
            acceptance: run.posterior.chains.iter().map(|c| c.acceptance).collect(),
        },
    };

    serde_json::to_writer_pretty(file, &summary)
        .map_err(|e| AppError::input(format!("Failed to write summary JSON: {e}")))?;

    Ok(())
}
