//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and initializes logging
//! - parses CLI arguments
//! - runs the analysis pipeline
//! - prints reports/plots and writes optional exports

use std::sync::Once;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, FitArgs, SimulateArgs};
use crate::data::{SimulationConfig, simulate_survey, write_survey_csv};
use crate::domain::{AnalysisConfig, ColumnMap};
use crate::error::AppError;

pub mod pipeline;

static TRACING: Once = Once::new();

/// Entry point for the `bands` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is fine; flags and the process environment still apply.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Fit(args) => handle_fit(&args),
        Command::Tui(args) => handle_tui(&args),
        Command::Simulate(args) => handle_simulate(&args),
    }
}

/// Logs go to stderr, filtered by `BANDS_LOG` (then `RUST_LOG`), default `info`.
fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env("BANDS_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("glmm_bands=info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}

fn handle_fit(args: &FitArgs) -> Result<(), AppError> {
    let config = args.to_config();
    let run = pipeline::run_analysis(&config)?;

    println!("{}", crate::report::format_dataset_summary(&run.ingest, &run.data));
    let skipped = crate::report::format_row_errors(&run.ingest.row_errors, 10);
    if !skipped.is_empty() {
        println!("{skipped}");
    }
    println!("{}", crate::report::format_glmm_summary(&run.glmm));
    println!("{}", crate::report::format_dispersion(run.dispersion.as_ref()));
    println!("{}", crate::report::format_posterior_summary(&run.posterior));
    for set in run.bootstrap.iter().chain(run.bayes.iter()) {
        println!("{}", crate::report::format_band_summary(&set.label, &set.bands));
    }

    if config.plot {
        print_plots(&run, &config);
    }

    if let Some(path) = &config.export_bands {
        crate::io::export::write_bands_csv(path, &run)?;
        tracing::info!(path = %path.display(), "wrote bands CSV");
    }
    if let Some(path) = &config.export_summary {
        crate::io::export::write_summary_json(path, &run)?;
        tracing::info!(path = %path.display(), "wrote summary JSON");
    }

    Ok(())
}

fn print_plots(run: &pipeline::RunOutput, config: &AnalysisConfig) {
    let (w, h) = (config.plot_width, config.plot_height);
    println!("{}", crate::plot::render_scatter(&run.data, w, h));
    println!("{}", crate::plot::render_residuals(&run.residuals, w, h));

    for (freq, bayes) in run.bootstrap.iter().zip(run.bayes.iter()) {
        let left = crate::plot::render_ribbons(&freq.label, &freq.bands, w, h);
        let right = crate::plot::render_ribbons(&bayes.label, &bayes.bands, w, h);
        println!("{}", crate::plot::side_by_side(&left, &right, 4));
    }
    println!("legend: . 95%  : 80%  # 50%  * median");
}

fn handle_tui(args: &FitArgs) -> Result<(), AppError> {
    crate::tui::run(args.to_config())
}

fn handle_simulate(args: &SimulateArgs) -> Result<(), AppError> {
    let config = SimulationConfig {
        n_sites: args.sites,
        n_observers: args.observers,
        visits_per_site: args.visits,
        seed: args.seed,
        ..SimulationConfig::default()
    };
    let records = simulate_survey(&config)?;
    write_survey_csv(&args.out, &records, &ColumnMap::default())?;
    println!(
        "Wrote {} surveys ({} sites x {} visits) to {}",
        records.len(),
        args.sites,
        args.visits,
        args.out.display()
    );
    Ok(())
}
