//! Laplace-approximate maximum likelihood for the Poisson GLMM.
//!
//! Given the standard deviations `σ = (σ_site, σ_observer)` of the random
//! intercepts, we find the joint mode of
//!
//! ```text
//! h(β, b) = Σ_i [y_i η_i − exp(η_i)] − ½ Σ_k b_k² / σ²_g(k),    η = Xβ + Zb + offset
//! ```
//!
//! by penalized IRLS (Newton steps with step halving). The Laplace
//! approximation of the marginal log-likelihood around that mode is
//!
//! ```text
//! ℓ(σ) ≈ log p(y | β̂, b̂) − ½ b̂'Λ⁻¹b̂ − ½ log|Λ| − ½ log|Z'WZ + Λ⁻¹|
//! ```
//!
//! and an outer Nelder–Mead search over `log σ` minimizes the deviance `−2ℓ`.
//!
//! Inner failures (singular curvature, non-finite likelihood) are errors.
//! Outer non-convergence is a warning: the best estimate found is returned with
//! `converged = false`.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;

use crate::domain::{GroupFactor, GroupIndex, ModelData};
use crate::error::AppError;
use crate::math::{
    ETA_MAX, NelderMeadOptions, cholesky_with_ridge, log_det, nelder_mead, poisson_log_kernel, poisson_log_pmf, solve_spd,
};
use crate::models::{Design, N_FIXED};

/// Bounds on `log σ` explored by the outer search.
const LOG_SD_MIN: f64 = -12.0;
const LOG_SD_MAX: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct FitOptions {
    pub pirls_max_iter: usize,
    /// Relative change in the penalized objective that counts as converged.
    pub pirls_tol: f64,
    pub outer: NelderMeadOptions,
    /// Warm start for the outer search and the first inner solve.
    pub start: Option<WarmStart>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            pirls_max_iter: 50,
            pirls_tol: 1e-10,
            outer: NelderMeadOptions::default(),
            start: None,
        }
    }
}

/// Starting values taken from a previous fit.
#[derive(Debug, Clone)]
pub struct WarmStart {
    pub log_sd: [f64; 2],
    pub beta: Vec<f64>,
}

/// Estimated variance of one grouping factor's random intercepts.
#[derive(Debug, Clone, Serialize)]
pub struct VarianceComponent {
    pub factor: GroupFactor,
    pub n_levels: usize,
    pub variance: f64,
    pub sd: f64,
}

/// A fitted frequentist GLMM. Read-only after construction.
#[derive(Debug, Clone)]
pub struct GlmmFit {
    pub beta: Vec<f64>,
    /// Covariance of `beta` conditional on the variance components.
    pub beta_cov: DMatrix<f64>,
    /// Indexed as `GroupFactor::index()`.
    pub sd: [f64; 2],
    /// Conditional modes of the random effects, flat (`Design::re_start` layout).
    pub b: Vec<f64>,
    pub re_start: [usize; 2],
    pub groups: [GroupIndex; 2],
    /// Conditional means of the fitted observations (all random effects included).
    pub fitted: Vec<f64>,
    pub log_likelihood: f64,
    pub deviance: f64,
    pub aic: f64,
    pub bic: f64,
    pub n_obs: usize,
    pub converged: bool,
    pub evaluations: usize,
}

impl GlmmFit {
    pub fn variance(&self, factor: GroupFactor) -> f64 {
        let sd = self.sd[factor.index()];
        sd * sd
    }

    pub fn variance_components(&self) -> Vec<VarianceComponent> {
        GroupFactor::ALL
            .iter()
            .map(|&factor| VarianceComponent {
                factor,
                n_levels: self.groups[factor.index()].len(),
                variance: self.variance(factor),
                sd: self.sd[factor.index()],
            })
            .collect()
    }

    /// Conditional mode of a named level, if the level was seen in fitting.
    pub fn random_effect(&self, factor: GroupFactor, level: &str) -> Option<f64> {
        let idx = self.groups[factor.index()].get(level)?;
        self.b.get(self.re_start[factor.index()] + idx).copied()
    }

    pub fn std_errors(&self) -> Vec<f64> {
        (0..self.beta.len())
            .map(|j| self.beta_cov[(j, j)].max(0.0).sqrt())
            .collect()
    }
}

/// Fit the GLMM to transformed survey data.
pub fn fit_glmm(data: &ModelData, opts: &FitOptions) -> Result<GlmmFit, AppError> {
    let design = Design::from_data(data)?;
    let fit = fit_design(&design, &data.groups, opts)?;
    if fit.converged {
        tracing::info!(
            deviance = fit.deviance,
            evaluations = fit.evaluations,
            "frequentist fit converged"
        );
    } else {
        tracing::warn!(
            deviance = fit.deviance,
            evaluations = fit.evaluations,
            "variance-component search hit its evaluation cap; using the best estimate found"
        );
    }
    Ok(fit)
}

/// Fit the GLMM to a prepared design (the bootstrap refits through here).
pub fn fit_design(design: &Design, groups: &[GroupIndex; 2], opts: &FitOptions) -> Result<GlmmFit, AppError> {
    let total: u64 = design.y.iter().sum();
    if total == 0 {
        return Err(AppError::numeric("All counts are zero; the Poisson rate is not identifiable."));
    }

    let (theta0, beta0) = match &opts.start {
        Some(s) => (s.log_sd.to_vec(), s.beta.clone()),
        None => {
            let exposure: f64 = design.offset.iter().map(|o| o.exp()).sum();
            let mut beta = vec![0.0; N_FIXED];
            beta[0] = (total as f64 / exposure).ln();
            (vec![0.5_f64.ln(), 0.5_f64.ln()], beta)
        }
    };

    let mut warm = PirlsStart {
        beta: beta0,
        b: vec![0.0; design.n_random()],
    };

    let result = nelder_mead(
        |theta| {
            let sd = sd_from_theta(theta);
            match pirls(design, sd, &warm, opts) {
                Ok(mode) => {
                    warm = PirlsStart {
                        beta: mode.beta.clone(),
                        b: mode.b.clone(),
                    };
                    -2.0 * mode.laplace_log_lik
                }
                Err(_) => f64::INFINITY,
            }
        },
        &theta0,
        opts.outer,
    );

    if !result.f.is_finite() {
        return Err(AppError::numeric(
            "Penalized IRLS failed for every variance-component candidate.",
        ));
    }

    let sd = sd_from_theta(&result.x);
    let mode = pirls(design, sd, &warm, opts)?;
    let beta_cov = fixed_effect_covariance(&mode.hessian)?;

    let n = design.n_obs();
    let log_likelihood = mode.laplace_log_lik;
    let deviance = -2.0 * log_likelihood;
    let k = (N_FIXED + GroupFactor::ALL.len()) as f64;

    Ok(GlmmFit {
        fitted: mode.eta.iter().map(|e| e.min(ETA_MAX).exp()).collect(),
        beta: mode.beta,
        beta_cov,
        sd,
        b: mode.b,
        re_start: [
            design.re_start(GroupFactor::Site),
            design.re_start(GroupFactor::Observer),
        ],
        groups: groups.clone(),
        log_likelihood,
        deviance,
        aic: deviance + 2.0 * k,
        bic: deviance + k * (n as f64).ln(),
        n_obs: n,
        converged: result.converged,
        evaluations: result.evals,
    })
}

fn sd_from_theta(theta: &[f64]) -> [f64; 2] {
    [
        theta[0].clamp(LOG_SD_MIN, LOG_SD_MAX).exp(),
        theta[1].clamp(LOG_SD_MIN, LOG_SD_MAX).exp(),
    ]
}

#[derive(Debug, Clone)]
pub(crate) struct PirlsStart {
    pub beta: Vec<f64>,
    pub b: Vec<f64>,
}

/// Joint mode of fixed and random effects for fixed `sd`.
#[derive(Debug, Clone)]
pub(crate) struct PirlsMode {
    pub beta: Vec<f64>,
    pub b: Vec<f64>,
    pub eta: Vec<f64>,
    /// Negative Hessian of the penalized objective at the mode.
    pub hessian: DMatrix<f64>,
    pub laplace_log_lik: f64,
}

pub(crate) fn pirls(
    design: &Design,
    sd: [f64; 2],
    start: &PirlsStart,
    opts: &FitOptions,
) -> Result<PirlsMode, AppError> {
    let p = N_FIXED;
    let q = design.n_random();
    let precision = re_precision(design, sd);

    let mut u: Vec<f64> = start.beta.iter().chain(start.b.iter()).copied().collect();
    if u.len() != p + q {
        return Err(AppError::numeric("Warm start has the wrong number of coefficients."));
    }

    let mut obj = penalized_objective(design, &u, &precision);
    if !obj.is_finite() {
        // A poor warm start can overflow; fall back to the null start.
        u.iter_mut().for_each(|v| *v = 0.0);
        obj = penalized_objective(design, &u, &precision);
    }

    for _ in 0..opts.pirls_max_iter {
        let eta = design.linear_predictor(&u[..p], &u[p..]);
        let (grad, hess) = gradient_and_hessian(design, &eta, &u, &precision);
        let delta = solve_spd(&hess, &grad)
            .ok_or_else(|| AppError::numeric("Singular curvature matrix in penalized IRLS."))?;

        let mut step = 1.0;
        let mut accepted = None;
        for _ in 0..30 {
            let cand: Vec<f64> = u.iter().zip(delta.iter()).map(|(a, d)| a + step * d).collect();
            let cand_obj = penalized_objective(design, &cand, &precision);
            if cand_obj.is_finite() && cand_obj >= obj - 1e-12 * obj.abs().max(1.0) {
                accepted = Some((cand, cand_obj));
                break;
            }
            step *= 0.5;
        }

        let Some((cand, cand_obj)) = accepted else {
            // No ascent direction left at machine precision.
            break;
        };
        let change = (cand_obj - obj).abs();
        u = cand;
        obj = cand_obj;
        if change <= opts.pirls_tol * (obj.abs() + opts.pirls_tol) {
            break;
        }
    }

    if !obj.is_finite() {
        return Err(AppError::numeric("Non-finite penalized log-likelihood."));
    }

    let eta = design.linear_predictor(&u[..p], &u[p..]);
    let (_, hessian) = gradient_and_hessian(design, &eta, &u, &precision);

    let h_bb = hessian.view((p, p), (q, q)).into_owned();
    let chol_bb = cholesky_with_ridge(&h_bb)
        .ok_or_else(|| AppError::numeric("Random-effect curvature is not positive definite."))?;

    let log_lik: f64 = design
        .y
        .iter()
        .zip(eta.iter())
        .map(|(&y, &e)| poisson_log_pmf(y, e.min(ETA_MAX)))
        .sum();
    let penalty: f64 = u[p..].iter().zip(precision.iter()).map(|(b, w)| b * b * w).sum();
    let log_det_lambda: f64 = precision.iter().map(|w| -w.ln()).sum();
    let laplace_log_lik = log_lik - 0.5 * penalty - 0.5 * log_det_lambda - 0.5 * log_det(&chol_bb);

    Ok(PirlsMode {
        beta: u[..p].to_vec(),
        b: u[p..].to_vec(),
        eta,
        hessian,
        laplace_log_lik,
    })
}

/// Prior precision `1/σ²` of each flat random-effect column.
fn re_precision(design: &Design, sd: [f64; 2]) -> Vec<f64> {
    let mut precision = Vec::with_capacity(design.n_random());
    for factor in GroupFactor::ALL {
        let s = sd[factor.index()];
        precision.extend(std::iter::repeat_n(1.0 / (s * s), design.n_levels(factor)));
    }
    precision
}

/// Penalized log-likelihood without the `ln y!` constant.
fn penalized_objective(design: &Design, u: &[f64], precision: &[f64]) -> f64 {
    let p = N_FIXED;
    let eta = design.linear_predictor(&u[..p], &u[p..]);
    let ll: f64 = design
        .y
        .iter()
        .zip(eta.iter())
        .map(|(&y, &e)| poisson_log_kernel(y, e))
        .sum();
    let penalty: f64 = u[p..].iter().zip(precision.iter()).map(|(b, w)| b * b * w).sum();
    ll - 0.5 * penalty
}

fn gradient_and_hessian(
    design: &Design,
    eta: &[f64],
    u: &[f64],
    precision: &[f64],
) -> (DVector<f64>, DMatrix<f64>) {
    let p = N_FIXED;
    let m = p + design.n_random();
    let mut grad = DVector::<f64>::zeros(m);
    let mut hess = DMatrix::<f64>::zeros(m, m);

    for i in 0..design.n_obs() {
        let mu = eta[i].min(ETA_MAX).exp();
        let resid = design.y[i] as f64 - mu;
        let cols = [
            design.re_column(GroupFactor::Site, i) + p,
            design.re_column(GroupFactor::Observer, i) + p,
        ];

        for j in 0..p {
            let xij = design.x[(i, j)];
            grad[j] += xij * resid;
            for l in j..p {
                hess[(j, l)] += mu * xij * design.x[(i, l)];
            }
            for &c in &cols {
                hess[(j, c)] += mu * xij;
            }
        }
        for &c in &cols {
            grad[c] += resid;
        }
        hess[(cols[0], cols[0])] += mu;
        hess[(cols[1], cols[1])] += mu;
        let (a, b) = (cols[0].min(cols[1]), cols[0].max(cols[1]));
        hess[(a, b)] += mu;
    }

    for (k, w) in precision.iter().enumerate() {
        grad[p + k] -= w * u[p + k];
        hess[(p + k, p + k)] += w;
    }

    // Only the upper triangle was accumulated.
    for j in 0..m {
        for l in (j + 1)..m {
            hess[(l, j)] = hess[(j, l)];
        }
    }

    (grad, hess)
}

/// Top-left block of the inverse curvature: covariance of the fixed effects.
pub(crate) fn fixed_effect_covariance(hessian: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
    let chol = cholesky_with_ridge(hessian)
        .ok_or_else(|| AppError::numeric("Curvature at the optimum is not positive definite."))?;
    let inv = chol.inverse();
    Ok(inv.view((0, 0), (N_FIXED, N_FIXED)).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SimulationConfig, simulate_survey, transform_survey};

    fn simulated(seed: u64) -> ModelData {
        let config = SimulationConfig {
            n_sites: 30,
            n_observers: 6,
            visits_per_site: 6,
            seed,
            ..SimulationConfig::default()
        };
        let records = simulate_survey(&config).unwrap();
        transform_survey(&records, config.bucket_threshold).unwrap()
    }

    #[test]
    fn recovers_fixed_effects_on_simulated_survey() {
        let data = simulated(11);
        let fit = fit_glmm(&data, &FitOptions::default()).unwrap();

        assert!(fit.deviance.is_finite());
        assert_eq!(fit.beta.len(), N_FIXED);
        // Intercept on the log rate-per-point scale: truth is -1.2 (temp_z is
        // re-standardized on the sample, so only the intercept and forest
        // contrast are compared loosely).
        assert!((fit.beta[0] - (-1.2)).abs() < 0.6, "intercept {}", fit.beta[0]);
        assert!(fit.beta[2] > 0.0, "forest contrast {}", fit.beta[2]);
        assert!(fit.std_errors().iter().all(|s| s.is_finite() && *s > 0.0));
        assert!(fit.sd.iter().all(|s| s.is_finite() && *s >= 0.0));
        assert!(fit.aic < fit.bic);
    }

    #[test]
    fn fitted_values_are_positive_and_random_effects_lookup() {
        let data = simulated(5);
        let fit = fit_glmm(&data, &FitOptions::default()).unwrap();
        assert_eq!(fit.fitted.len(), data.observations.len());
        assert!(fit.fitted.iter().all(|m| *m > 0.0));

        let first_site = data.group(GroupFactor::Site).levels[0].clone();
        assert!(fit.random_effect(GroupFactor::Site, &first_site).is_some());
        assert!(fit.random_effect(GroupFactor::Site, "nowhere").is_none());
        assert_eq!(fit.variance_components().len(), 2);
    }

    #[test]
    fn all_zero_counts_are_rejected() {
        let data = simulated(3);
        let design = Design::from_data(&data).unwrap();
        let zeros = design.with_response(vec![0; design.n_obs()]);
        let err = fit_design(&zeros, &data.groups, &FitOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn pirls_mode_has_zero_gradient() {
        let data = simulated(8);
        let design = Design::from_data(&data).unwrap();
        let start = PirlsStart {
            beta: vec![-1.0, 0.0, 0.0, 0.0],
            b: vec![0.0; design.n_random()],
        };
        let sd = [0.5, 0.3];
        let mode = pirls(&design, sd, &start, &FitOptions::default()).unwrap();
        let u: Vec<f64> = mode.beta.iter().chain(mode.b.iter()).copied().collect();
        let precision = re_precision(&design, sd);
        let (grad, _) = gradient_and_hessian(&design, &mode.eta, &u, &precision);
        assert!(grad.amax() < 1e-4, "max gradient {}", grad.amax());
    }
}
