//! Posterior predictive draws on a grid.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Normal, Poisson};

use crate::bayes::sampler::{PosteriorDraw, PosteriorFit};
use crate::domain::{BayesReForm, GridRow, GroupFactor, PredictKind, PredictionGrid, SampleMatrix};
use crate::error::AppError;
use crate::models::fixed_eta;

/// One row per retained posterior draw, one column per grid row.
///
/// With `BayesReForm::All`, rows naming a level seen in fitting use that
/// level's draw; other rows (unknown or no level) draw a fresh
/// `N(0, sd_draw²)` intercept when `allow_new_levels` is set and fail otherwise.
pub fn posterior_epred(
    fit: &PosteriorFit,
    grid: &PredictionGrid,
    re: BayesReForm,
    kind: PredictKind,
    seed: u64,
) -> Result<SampleMatrix, AppError> {
    if grid.is_empty() {
        return Err(AppError::input("Prediction grid is empty."));
    }
    if fit.n_draws() == 0 {
        return Err(AppError::numeric("Posterior has no retained draws."));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(fit.n_draws());
    for draw in fit.draws() {
        let mut out = Vec::with_capacity(grid.len());
        for row in &grid.rows {
            let eta = row_link(fit, draw, row, re, &mut rng)?;
            let mu = eta.exp();
            let value = match kind {
                PredictKind::Expected => mu,
                PredictKind::Response => {
                    let dist = Poisson::new(mu)
                        .map_err(|e| AppError::numeric(format!("Invalid Poisson mean {mu}: {e}")))?;
                    dist.sample(&mut rng)
                }
            };
            out.push(value);
        }
        rows.push(out);
    }

    SampleMatrix::from_rows(&rows, grid.len())
}

fn row_link(
    fit: &PosteriorFit,
    draw: &PosteriorDraw,
    row: &GridRow,
    re: BayesReForm,
    rng: &mut StdRng,
) -> Result<f64, AppError> {
    let mut eta = fixed_eta(&draw.beta, row.temp_z, row.forest_level) + row.exposure.ln();
    let BayesReForm::All { allow_new_levels } = re else {
        return Ok(eta);
    };

    for factor in GroupFactor::ALL {
        let known = row.levels[factor.index()]
            .as_deref()
            .and_then(|level| fit.random_effect(draw, factor, level));
        eta += match known {
            Some(b) => b,
            None if allow_new_levels => {
                let sd = draw.sd[factor.index()];
                let dist = Normal::new(0.0, sd)
                    .map_err(|e| AppError::numeric(format!("Invalid group standard deviation {sd}: {e}")))?;
                dist.sample(rng)
            }
            None => {
                return Err(AppError::input(format!(
                    "Grid row has no known {} level; enable new levels to predict for it.",
                    factor.display_name()
                )));
            }
        };
    }
    Ok(eta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayes::priors::Priors;
    use crate::bayes::sampler::{AcceptanceRates, ChainSamples};
    use crate::domain::{BucketLevel, GroupIndex};
    use crate::models::build_grid;

    fn toy_posterior() -> PosteriorFit {
        let mut sites = GroupIndex::default();
        sites.intern("S1");
        let mut observers = GroupIndex::default();
        observers.intern("O1");
        let draws = vec![
            PosteriorDraw {
                beta: vec![-1.0, 0.3, 0.5, -0.2],
                sd: [0.5, 0.3],
                b: vec![0.2, -0.1],
            },
            PosteriorDraw {
                beta: vec![-1.1, 0.25, 0.6, -0.1],
                sd: [0.4, 0.2],
                b: vec![0.1, 0.0],
            },
            PosteriorDraw {
                beta: vec![-0.9, 0.35, 0.4, -0.3],
                sd: [0.6, 0.3],
                b: vec![0.3, -0.2],
            },
        ];
        PosteriorFit {
            chains: vec![ChainSamples {
                draws,
                acceptance: AcceptanceRates::default(),
            }],
            groups: [sites, observers],
            re_start: [0, 1],
            priors: Priors {
                intercept: crate::bayes::priors::StudentT {
                    df: 3.0,
                    location: 0.0,
                    scale: 2.5,
                },
                slope_sd: 5.0,
                group_sd: crate::bayes::priors::StudentT {
                    df: 3.0,
                    location: 0.0,
                    scale: 2.5,
                },
            },
            summary: Vec::new(),
        }
    }

    #[test]
    fn expected_values_are_positive_with_one_row_per_draw() {
        let fit = toy_posterior();
        let grid = build_grid((-2.0, 2.0), 20, 16.0).unwrap();
        let m = posterior_epred(&fit, &grid, BayesReForm::None, PredictKind::Expected, 1).unwrap();
        assert_eq!(m.n_draws(), 3);
        assert_eq!(m.n_columns(), 40);
        assert!(m.values.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn population_level_is_deterministic() {
        let fit = toy_posterior();
        let grid = build_grid((-1.0, 1.0), 3, 16.0).unwrap();
        let a = posterior_epred(&fit, &grid, BayesReForm::None, PredictKind::Expected, 1).unwrap();
        let b = posterior_epred(&fit, &grid, BayesReForm::None, PredictKind::Expected, 2).unwrap();
        assert_eq!(a, b);
        let expected = (-1.0 - 0.3 + 16.0_f64.ln()).exp();
        assert!((a.values[(0, 0)] - expected).abs() < 1e-9);
    }

    #[test]
    fn known_levels_use_their_draws() {
        let fit = toy_posterior();
        let grid = PredictionGrid {
            rows: vec![GridRow {
                temp_z: 0.0,
                forest_level: BucketLevel::Low,
                exposure: 1.0,
                levels: [Some("S1".to_string()), Some("O1".to_string())],
            }],
        };
        let re = BayesReForm::All { allow_new_levels: false };
        let m = posterior_epred(&fit, &grid, re, PredictKind::Expected, 1).unwrap();
        assert!((m.values[(0, 0)] - (-1.0_f64 + 0.2 - 0.1).exp()).abs() < 1e-12);
    }

    #[test]
    fn new_levels_require_opt_in() {
        let fit = toy_posterior();
        let grid = build_grid((-1.0, 1.0), 3, 16.0).unwrap();
        let strict = BayesReForm::All { allow_new_levels: false };
        let err = posterior_epred(&fit, &grid, strict, PredictKind::Expected, 1).unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let open = BayesReForm::All { allow_new_levels: true };
        let m = posterior_epred(&fit, &grid, open, PredictKind::Expected, 1).unwrap();
        assert!(m.values.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn response_draws_are_counts() {
        let fit = toy_posterior();
        let grid = build_grid((-1.0, 1.0), 3, 16.0).unwrap();
        let m = posterior_epred(&fit, &grid, BayesReForm::None, PredictKind::Response, 4).unwrap();
        assert!(m.values.iter().all(|v| *v >= 0.0 && v.fract() == 0.0));
    }
}
