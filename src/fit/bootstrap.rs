//! Parametric bootstrap of grid predictions.
//!
//! Each resample:
//! 1. draws fresh random intercepts `b* ~ N(0, σ̂²)` for every level,
//! 2. simulates `y* ~ Poisson(exp(Xβ̂ + Zb* + offset))`,
//! 3. refits the GLMM (warm-started at the original estimate),
//! 4. predicts the grid at population level.
//!
//! Resamples are independent and run on the rayon pool. Each owns a `StdRng`
//! seeded from `(seed, index)`, and results are collected in index order, so the
//! matrix is identical for a given seed whatever the thread count.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Normal, Poisson};
use rayon::prelude::*;

use crate::domain::{BootstrapVariant, GroupFactor, ModelData, PredictionGrid, ReForm, SampleMatrix};
use crate::error::AppError;
use crate::fit::mle::{FitOptions, GlmmFit, WarmStart, fit_design};
use crate::fit::predict::predict_link;
use crate::math::{ETA_MAX, NelderMeadOptions};
use crate::models::Design;

/// Golden-ratio stride between per-resample seeds.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub n: usize,
    pub seed: u64,
    pub variant: BootstrapVariant,
    /// Options for each refit. `start` is overwritten with the original estimate.
    pub fit: FitOptions,
}

impl BootstrapOptions {
    pub fn new(n: usize, seed: u64, variant: BootstrapVariant) -> Self {
        Self {
            n,
            seed,
            variant,
            fit: FitOptions {
                outer: NelderMeadOptions {
                    step: 0.25,
                    max_evals: 200,
                    ..NelderMeadOptions::default()
                },
                ..FitOptions::default()
            },
        }
    }
}

pub(crate) fn resample_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_add((index as u64 + 1).wrapping_mul(SEED_STRIDE))
}

/// `opts.n x grid.len()` matrix of bootstrapped expected counts.
pub fn bootstrap_predictions(
    fit: &GlmmFit,
    data: &ModelData,
    grid: &PredictionGrid,
    opts: &BootstrapOptions,
) -> Result<SampleMatrix, AppError> {
    if opts.n == 0 {
        return Err(AppError::input("Bootstrap count must be > 0."));
    }
    if grid.is_empty() {
        return Err(AppError::input("Prediction grid is empty."));
    }

    let design = Design::from_data(data)?;
    let refit_opts = FitOptions {
        start: Some(WarmStart {
            log_sd: fit.sd.map(f64::ln),
            beta: fit.beta.clone(),
        }),
        ..opts.fit.clone()
    };

    tracing::info!(
        resamples = opts.n,
        variant = %opts.variant.display_name(),
        "running parametric bootstrap"
    );

    let rows: Vec<Vec<f64>> = (0..opts.n)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(resample_seed(opts.seed, i));
            one_resample(fit, data, &design, grid, opts.variant, &refit_opts, &mut rng)
                .map_err(|e| AppError::new(e.exit_code(), format!("Bootstrap resample {i}: {}", e.message())))
        })
        .collect::<Result<_, _>>()?;

    SampleMatrix::from_rows(&rows, grid.len())
}

fn one_resample(
    fit: &GlmmFit,
    data: &ModelData,
    design: &Design,
    grid: &PredictionGrid,
    variant: BootstrapVariant,
    refit_opts: &FitOptions,
    rng: &mut StdRng,
) -> Result<Vec<f64>, AppError> {
    let b_star = draw_group_effects(design, fit.sd, rng)?;
    let eta = design.linear_predictor(&fit.beta, &b_star);
    let y_star = eta
        .iter()
        .map(|&e| poisson_draw(e, rng))
        .collect::<Result<Vec<u64>, AppError>>()?;

    let refit = fit_design(&design.with_response(y_star), &data.groups, refit_opts)?;
    let mut link = predict_link(&refit, grid, ReForm::None);

    if let BootstrapVariant::WithGroupVariance(factor) = variant {
        let noise = normal(refit.sd[factor.index()])?;
        for v in link.iter_mut() {
            *v += noise.sample(rng);
        }
    }

    Ok(link.into_iter().map(f64::exp).collect())
}

fn draw_group_effects(design: &Design, sd: [f64; 2], rng: &mut StdRng) -> Result<Vec<f64>, AppError> {
    let mut b = Vec::with_capacity(design.n_random());
    for factor in GroupFactor::ALL {
        let dist = normal(sd[factor.index()])?;
        b.extend((0..design.n_levels(factor)).map(|_| dist.sample(rng)));
    }
    Ok(b)
}

fn normal(sd: f64) -> Result<Normal<f64>, AppError> {
    Normal::new(0.0, sd).map_err(|e| AppError::numeric(format!("Invalid group standard deviation {sd}: {e}")))
}

pub(crate) fn poisson_draw(eta: f64, rng: &mut StdRng) -> Result<u64, AppError> {
    let lambda = eta.min(ETA_MAX).exp();
    let dist = Poisson::new(lambda).map_err(|e| AppError::numeric(format!("Invalid Poisson mean {lambda}: {e}")))?;
    let draw: f64 = dist.sample(rng);
    Ok(draw as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SimulationConfig, simulate_survey, transform_survey};
    use crate::fit::mle::fit_glmm;
    use crate::models::build_grid;
    use crate::report::compute_bands;

    fn setup() -> (ModelData, GlmmFit, PredictionGrid) {
        let config = SimulationConfig {
            n_sites: 20,
            n_observers: 5,
            visits_per_site: 5,
            seed: 21,
            ..SimulationConfig::default()
        };
        let records = simulate_survey(&config).unwrap();
        let data = transform_survey(&records, config.bucket_threshold).unwrap();
        let fit = fit_glmm(&data, &FitOptions::default()).unwrap();
        let grid = build_grid((-1.5, 1.5), 5, 16.0).unwrap();
        (data, fit, grid)
    }

    #[test]
    fn matrix_shape_is_resamples_by_grid_rows() {
        let (data, fit, grid) = setup();
        let opts = BootstrapOptions::new(6, 7, BootstrapVariant::ParameterOnly);
        let m = bootstrap_predictions(&fit, &data, &grid, &opts).unwrap();
        assert_eq!(m.n_draws(), 6);
        assert_eq!(m.n_columns(), grid.len());
        assert!(m.values.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn same_seed_gives_identical_matrix() {
        let (data, fit, grid) = setup();
        let opts = BootstrapOptions::new(4, 99, BootstrapVariant::WithGroupVariance(GroupFactor::Site));
        let a = bootstrap_predictions(&fit, &data, &grid, &opts).unwrap();
        let b = bootstrap_predictions(&fit, &data, &grid, &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn group_variance_widens_the_ribbon() {
        let (data, fit, _) = setup();
        let grid = build_grid((-1.5, 1.5), 20, 16.0).unwrap();
        let width95 = |variant| {
            let opts = BootstrapOptions::new(40, 3, variant);
            let m = bootstrap_predictions(&fit, &data, &grid, &opts).unwrap();
            let total: f64 = compute_bands(&m, &grid)
                .unwrap()
                .iter()
                .filter_map(|b| b.interval(0.95).map(|(lo, hi)| hi - lo))
                .sum();
            (m, total)
        };

        let (params, params_width) = width95(BootstrapVariant::ParameterOnly);
        let (with_site, with_site_width) = width95(BootstrapVariant::WithGroupVariance(GroupFactor::Site));
        assert_ne!(params, with_site);
        assert!(
            with_site_width > params_width,
            "with site variance {with_site_width}, parameters only {params_width}"
        );
    }

    #[test]
    fn zero_resamples_is_an_input_error() {
        let (data, fit, grid) = setup();
        let opts = BootstrapOptions::new(0, 1, BootstrapVariant::ParameterOnly);
        let err = bootstrap_predictions(&fit, &data, &grid, &opts).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn resample_seeds_are_distinct() {
        let seeds: Vec<u64> = (0..100).map(|i| resample_seed(42, i)).collect();
        let mut sorted = seeds.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), seeds.len());
    }
}
