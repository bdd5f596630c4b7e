//! Adaptive random-walk Metropolis-within-Gibbs for the Poisson GLMM.
//!
//! Each iteration updates, in order:
//! 1. the fixed effects as one block, proposing `β + s·Lz` where `LL'` is the
//!    curvature-based covariance of `β` at a penalized-IRLS mode,
//! 2. every random intercept with its own scalar random walk (only the rows of
//!    that level are re-evaluated, using a cached linear predictor),
//! 3. each group standard deviation on the log scale (with the Jacobian term).
//!
//! During warmup the proposal scales adapt every `adaptation_interval`
//! iterations towards an acceptance band. Chains are independent: each owns
//! its RNG and state, and they run in parallel on the rayon pool.

use nalgebra::{DMatrix, DVector};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::Serialize;

use crate::bayes::diagnostics::{ParameterSummary, summarize_parameter, warn_on_problems};
use crate::bayes::priors::Priors;
use crate::domain::{GroupFactor, GroupIndex, ModelData};
use crate::error::AppError;
use crate::fit::mle::{FitOptions, PirlsStart, fixed_effect_covariance, pirls};
use crate::math::{ETA_MAX, cholesky_with_ridge, poisson_log_kernel};
use crate::models::{Design, FIXED_EFFECT_NAMES, N_FIXED};

/// Group standard deviation at which the starting mode is computed.
const INITIAL_SD: f64 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct ProposalTuning {
    /// Minimum allowed proposal scale.
    pub min_scale: f64,
    /// Adapt every `adaptation_interval` iterations during warmup.
    pub adaptation_interval: usize,
    pub acceptance_target_low: f64,
    pub acceptance_target_high: f64,
    pub scale_decrease_factor: f64,
    pub scale_increase_factor: f64,
    /// Initial multiplier on the Cholesky factor of the fixed-effect covariance.
    pub beta_scale: f64,
    pub effect_scale: f64,
    pub log_sd_scale: f64,
    /// Seed offset between consecutive chains.
    pub seed_stride: u64,
}

impl Default for ProposalTuning {
    fn default() -> Self {
        Self {
            min_scale: 1.0e-3,
            adaptation_interval: 50,
            acceptance_target_low: 0.2,
            acceptance_target_high: 0.35,
            scale_decrease_factor: 0.9,
            scale_increase_factor: 1.1,
            beta_scale: 1.0,
            effect_scale: 0.3,
            log_sd_scale: 0.3,
            seed_stride: 1_000_003,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamplerOptions {
    pub chains: usize,
    /// Total iterations per chain, warmup included.
    pub iterations: usize,
    pub warmup: usize,
    pub thin: usize,
    pub seed: u64,
    pub tuning: ProposalTuning,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            chains: 4,
            iterations: 2000,
            warmup: 1000,
            thin: 1,
            seed: 42,
            tuning: ProposalTuning::default(),
        }
    }
}

impl SamplerOptions {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.chains == 0 {
            return Err(AppError::input("Chain count must be > 0."));
        }
        if self.thin == 0 {
            return Err(AppError::input("Thinning interval must be > 0."));
        }
        if self.warmup >= self.iterations {
            return Err(AppError::input(format!(
                "Warmup ({}) must be smaller than the iteration count ({}).",
                self.warmup, self.iterations
            )));
        }
        if self.tuning.adaptation_interval == 0 {
            return Err(AppError::input("Adaptation interval must be > 0."));
        }
        Ok(())
    }

    /// Retained draws per chain after warmup and thinning.
    pub fn draws_per_chain(&self) -> usize {
        (self.iterations - self.warmup).div_ceil(self.thin)
    }
}

/// One retained state of a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorDraw {
    pub beta: Vec<f64>,
    /// Indexed as `GroupFactor::index()`.
    pub sd: [f64; 2],
    /// Random intercepts, flat (`Design::re_start` layout).
    pub b: Vec<f64>,
}

/// Post-warmup acceptance rate of each update block.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AcceptanceRates {
    pub beta: f64,
    pub effects: [f64; 2],
    pub sd: [f64; 2],
}

#[derive(Debug, Clone)]
pub struct ChainSamples {
    pub draws: Vec<PosteriorDraw>,
    pub acceptance: AcceptanceRates,
}

/// Posterior draws from all chains plus their convergence summary.
#[derive(Debug, Clone)]
pub struct PosteriorFit {
    pub chains: Vec<ChainSamples>,
    pub groups: [GroupIndex; 2],
    pub re_start: [usize; 2],
    pub priors: Priors,
    pub summary: Vec<ParameterSummary>,
}

impl PosteriorFit {
    /// All retained draws, chain by chain.
    pub fn draws(&self) -> impl Iterator<Item = &PosteriorDraw> {
        self.chains.iter().flat_map(|c| c.draws.iter())
    }

    pub fn n_draws(&self) -> usize {
        self.chains.iter().map(|c| c.draws.len()).sum()
    }

    /// A level's random intercept in `draw`, if the level was seen in fitting.
    pub fn random_effect(&self, draw: &PosteriorDraw, factor: GroupFactor, level: &str) -> Option<f64> {
        let idx = self.groups[factor.index()].get(level)?;
        draw.b.get(self.re_start[factor.index()] + idx).copied()
    }

    /// Names of the summarized scalar parameters, in `summary` order.
    pub fn parameter_names() -> Vec<String> {
        FIXED_EFFECT_NAMES
            .iter()
            .map(|s| s.to_string())
            .chain(GroupFactor::ALL.iter().map(|f| format!("sd({})", f.display_name())))
            .collect()
    }

    fn traces<F: Fn(&PosteriorDraw) -> f64>(&self, extract: F) -> Vec<Vec<f64>> {
        self.chains
            .iter()
            .map(|c| c.draws.iter().map(&extract).collect())
            .collect()
    }
}

/// Sample the posterior with the default priors.
pub fn sample_posterior(data: &ModelData, opts: &SamplerOptions) -> Result<PosteriorFit, AppError> {
    let design = Design::from_data(data)?;
    let priors = Priors::for_design(&design);
    sample_posterior_with_priors(data, &design, priors, opts)
}

pub fn sample_posterior_with_priors(
    data: &ModelData,
    design: &Design,
    priors: Priors,
    opts: &SamplerOptions,
) -> Result<PosteriorFit, AppError> {
    opts.validate()?;
    if !priors.is_valid() {
        return Err(AppError::input("Prior hyperparameters must be positive."));
    }
    let total: u64 = design.y.iter().sum();
    if total == 0 {
        return Err(AppError::numeric("All counts are zero; the Poisson rate is not identifiable."));
    }

    let exposure: f64 = design.offset.iter().map(|o| o.exp()).sum();
    let mut beta0 = vec![0.0; N_FIXED];
    beta0[0] = (total as f64 / exposure).ln();
    let start = PirlsStart {
        beta: beta0,
        b: vec![0.0; design.n_random()],
    };
    let mode = pirls(design, [INITIAL_SD; 2], &start, &FitOptions::default())?;
    let cov = fixed_effect_covariance(&mode.hessian)?;
    let chol = cholesky_with_ridge(&cov)
        .ok_or_else(|| AppError::numeric("Fixed-effect proposal covariance is not positive definite."))?;

    let ctx = ChainContext {
        design,
        priors,
        proposal_l: chol.l(),
        opts,
    };

    tracing::info!(
        chains = opts.chains,
        iterations = opts.iterations,
        warmup = opts.warmup,
        thin = opts.thin,
        "sampling posterior"
    );

    let chains: Vec<ChainSamples> = (0..opts.chains)
        .into_par_iter()
        .map(|c| {
            let seed = opts
                .seed
                .wrapping_add((c as u64).wrapping_mul(opts.tuning.seed_stride));
            run_chain(&ctx, &mode.beta, &mode.b, seed)
                .map_err(|e| AppError::new(e.exit_code(), format!("Chain {}: {}", c + 1, e.message())))
        })
        .collect::<Result<_, _>>()?;

    for (c, chain) in chains.iter().enumerate() {
        tracing::debug!(
            chain = c + 1,
            beta = chain.acceptance.beta,
            site = chain.acceptance.effects[0],
            observer = chain.acceptance.effects[1],
            "acceptance rates"
        );
    }

    let mut fit = PosteriorFit {
        chains,
        groups: data.groups.clone(),
        re_start: [
            design.re_start(GroupFactor::Site),
            design.re_start(GroupFactor::Observer),
        ],
        priors,
        summary: Vec::new(),
    };

    let names = PosteriorFit::parameter_names();
    let mut summary = Vec::with_capacity(names.len());
    for j in 0..N_FIXED {
        summary.push(summarize_parameter(&names[j], &fit.traces(|d| d.beta[j])));
    }
    for factor in GroupFactor::ALL {
        let k = factor.index();
        summary.push(summarize_parameter(&names[N_FIXED + k], &fit.traces(|d| d.sd[k])));
    }
    warn_on_problems(&summary);
    fit.summary = summary;

    Ok(fit)
}

struct ChainContext<'a> {
    design: &'a Design,
    priors: Priors,
    proposal_l: DMatrix<f64>,
    opts: &'a SamplerOptions,
}

#[derive(Debug, Clone)]
struct ChainState {
    beta: Vec<f64>,
    b: Vec<f64>,
    log_sd: [f64; 2],
    eta: Vec<f64>,
    log_lik: f64,
}

impl ChainState {
    fn draw(&self) -> PosteriorDraw {
        PosteriorDraw {
            beta: self.beta.clone(),
            sd: self.log_sd.map(f64::exp),
            b: self.b.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BlockCounter {
    accepted: usize,
    proposed: usize,
}

impl BlockCounter {
    fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    fn rate(self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    beta: BlockCounter,
    effects: [BlockCounter; 2],
    sd: [BlockCounter; 2],
}

#[derive(Debug, Clone, Copy)]
struct Scales {
    beta: f64,
    effects: [f64; 2],
    log_sd: [f64; 2],
}

fn run_chain(ctx: &ChainContext<'_>, beta0: &[f64], b0: &[f64], seed: u64) -> Result<ChainSamples, AppError> {
    let opts = ctx.opts;
    let tuning = opts.tuning;
    let mut rng = StdRng::seed_from_u64(seed);

    // Overdispersed start around the mode.
    let beta: Vec<f64> = beta0.iter().map(|v| v + 0.1 * std_normal(&mut rng)).collect();
    let b = b0.to_vec();
    let log_sd = [
        INITIAL_SD.ln() + 0.2 * std_normal(&mut rng),
        INITIAL_SD.ln() + 0.2 * std_normal(&mut rng),
    ];
    let eta = ctx.design.linear_predictor(&beta, &b);
    let log_lik = poisson_log_lik(&ctx.design.y, &eta);
    if !log_lik.is_finite() {
        return Err(AppError::numeric("Initial log-likelihood is not finite."));
    }
    let mut state = ChainState {
        beta,
        b,
        log_sd,
        eta,
        log_lik,
    };

    let mut scales = Scales {
        beta: tuning.beta_scale,
        effects: [tuning.effect_scale; 2],
        log_sd: [tuning.log_sd_scale; 2],
    };
    let mut window = Counters::default();
    let mut kept = Counters::default();
    let mut draws = Vec::with_capacity(opts.draws_per_chain());

    for iter in 0..opts.iterations {
        let mut step = Counters::default();

        step.beta.record(update_beta(ctx, &mut state, scales.beta, &mut rng));
        for factor in GroupFactor::ALL {
            let k = factor.index();
            update_effects(ctx, &mut state, factor, scales.effects[k], &mut step.effects[k], &mut rng);
            step.sd[k].record(update_log_sd(ctx, &mut state, factor, scales.log_sd[k], &mut rng));
        }

        if !state.log_lik.is_finite() {
            return Err(AppError::numeric(format!("Log-likelihood became non-finite at iteration {iter}.")));
        }

        if iter < opts.warmup {
            accumulate(&mut window, &step);
            if (iter + 1) % tuning.adaptation_interval == 0 {
                scales.beta = adapt_scalar_scale(scales.beta, window.beta.rate(), tuning);
                for k in 0..2 {
                    scales.effects[k] = adapt_scalar_scale(scales.effects[k], window.effects[k].rate(), tuning);
                    scales.log_sd[k] = adapt_scalar_scale(scales.log_sd[k], window.sd[k].rate(), tuning);
                }
                window = Counters::default();
            }
        } else {
            accumulate(&mut kept, &step);
            if (iter - opts.warmup) % opts.thin == 0 {
                draws.push(state.draw());
            }
        }
    }

    Ok(ChainSamples {
        draws,
        acceptance: AcceptanceRates {
            beta: kept.beta.rate(),
            effects: [kept.effects[0].rate(), kept.effects[1].rate()],
            sd: [kept.sd[0].rate(), kept.sd[1].rate()],
        },
    })
}

fn accumulate(total: &mut Counters, step: &Counters) {
    let add = |t: &mut BlockCounter, s: BlockCounter| {
        t.accepted += s.accepted;
        t.proposed += s.proposed;
    };
    add(&mut total.beta, step.beta);
    for k in 0..2 {
        add(&mut total.effects[k], step.effects[k]);
        add(&mut total.sd[k], step.sd[k]);
    }
}

fn update_beta(ctx: &ChainContext<'_>, state: &mut ChainState, scale: f64, rng: &mut StdRng) -> bool {
    let z = DVector::<f64>::from_fn(N_FIXED, |_, _| std_normal(rng));
    let step = &ctx.proposal_l * z * scale;
    let proposal: Vec<f64> = state.beta.iter().zip(step.iter()).map(|(b, s)| b + s).collect();

    let x = &ctx.design.x;
    let eta: Vec<f64> = state
        .eta
        .iter()
        .enumerate()
        .map(|(i, e)| e + (0..N_FIXED).map(|j| x[(i, j)] * step[j]).sum::<f64>())
        .collect();
    let log_lik = poisson_log_lik(&ctx.design.y, &eta);

    let log_acc = log_lik - state.log_lik + ctx.priors.log_beta(&proposal) - ctx.priors.log_beta(&state.beta);
    if log_acc.is_finite() && should_accept(log_acc, rng) {
        state.beta = proposal;
        state.eta = eta;
        state.log_lik = log_lik;
        true
    } else {
        false
    }
}

fn update_effects(
    ctx: &ChainContext<'_>,
    state: &mut ChainState,
    factor: GroupFactor,
    scale: f64,
    counter: &mut BlockCounter,
    rng: &mut StdRng,
) {
    let design = ctx.design;
    let sd = state.log_sd[factor.index()].exp();
    let start = design.re_start(factor);

    for (level, rows) in design.level_rows[factor.index()].iter().enumerate() {
        let col = start + level;
        let current = state.b[col];
        let proposal = current + scale * std_normal(rng);
        let delta = proposal - current;

        let mut ll_diff = 0.0;
        for &i in rows {
            let old = state.eta[i];
            let new = old + delta;
            if new > ETA_MAX {
                ll_diff = f64::NEG_INFINITY;
                break;
            }
            ll_diff += design.y[i] as f64 * delta - (new.exp() - old.exp());
        }
        let prior_diff = (current * current - proposal * proposal) / (2.0 * sd * sd);
        let log_acc = ll_diff + prior_diff;

        let accepted = log_acc.is_finite() && should_accept(log_acc, rng);
        if accepted {
            state.b[col] = proposal;
            for &i in rows {
                state.eta[i] += delta;
            }
            state.log_lik += ll_diff;
        }
        counter.record(accepted);
    }
}

fn update_log_sd(
    ctx: &ChainContext<'_>,
    state: &mut ChainState,
    factor: GroupFactor,
    scale: f64,
    rng: &mut StdRng,
) -> bool {
    let k = factor.index();
    let start = ctx.design.re_start(factor);
    let n = ctx.design.n_levels(factor);
    let ss: f64 = state.b[start..start + n].iter().map(|v| v * v).sum();

    let target = |log_sd: f64| {
        let sd = log_sd.exp();
        -(n as f64) * log_sd - ss / (2.0 * sd * sd) + ctx.priors.log_group_sd(sd) + log_sd
    };

    let current = state.log_sd[k];
    let proposal = current + scale * std_normal(rng);
    let log_acc = target(proposal) - target(current);
    if log_acc.is_finite() && should_accept(log_acc, rng) {
        state.log_sd[k] = proposal;
        true
    } else {
        false
    }
}

/// Poisson log-likelihood without the `ln y!` constant.
fn poisson_log_lik(y: &[u64], eta: &[f64]) -> f64 {
    y.iter()
        .zip(eta.iter())
        .map(|(&y, &e)| poisson_log_kernel(y, e))
        .sum()
}

fn std_normal(rng: &mut StdRng) -> f64 {
    rng.sample(StandardNormal)
}

fn should_accept(log_acceptance: f64, rng: &mut StdRng) -> bool {
    log_acceptance >= 0.0 || rng.r#gen::<f64>().ln() < log_acceptance
}

fn adapt_scalar_scale(scale: f64, acceptance: f64, tuning: ProposalTuning) -> f64 {
    (scale * adaptation_factor(acceptance, tuning)).max(tuning.min_scale)
}

fn adaptation_factor(acceptance: f64, tuning: ProposalTuning) -> f64 {
    if acceptance < tuning.acceptance_target_low {
        tuning.scale_decrease_factor
    } else if acceptance > tuning.acceptance_target_high {
        tuning.scale_increase_factor
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SimulationConfig, simulate_survey, transform_survey};

    fn simulated() -> ModelData {
        let config = SimulationConfig {
            n_sites: 24,
            n_observers: 5,
            visits_per_site: 5,
            seed: 17,
            ..SimulationConfig::default()
        };
        let records = simulate_survey(&config).unwrap();
        transform_survey(&records, config.bucket_threshold).unwrap()
    }

    fn short_run(seed: u64) -> SamplerOptions {
        SamplerOptions {
            chains: 2,
            iterations: 600,
            warmup: 300,
            thin: 2,
            seed,
            tuning: ProposalTuning::default(),
        }
    }

    #[test]
    fn draws_have_expected_count_and_shape() {
        let data = simulated();
        let opts = short_run(3);
        let fit = sample_posterior(&data, &opts).unwrap();
        assert_eq!(fit.chains.len(), 2);
        assert_eq!(fit.n_draws(), 2 * opts.draws_per_chain());
        assert_eq!(opts.draws_per_chain(), 150);

        let n_random = data.group(GroupFactor::Site).len() + data.group(GroupFactor::Observer).len();
        for draw in fit.draws() {
            assert_eq!(draw.beta.len(), N_FIXED);
            assert_eq!(draw.b.len(), n_random);
            assert!(draw.sd.iter().all(|s| *s > 0.0));
        }
        assert_eq!(fit.summary.len(), N_FIXED + 2);
    }

    #[test]
    fn posterior_mean_intercept_is_plausible() {
        let data = simulated();
        let fit = sample_posterior(&data, &short_run(9)).unwrap();
        let intercept = &fit.summary[0];
        assert!((intercept.mean - (-1.2)).abs() < 0.8, "intercept {}", intercept.mean);
        assert!(fit.chains.iter().all(|c| c.acceptance.beta > 0.0));
    }

    #[test]
    fn same_seed_is_reproducible() {
        let data = simulated();
        let opts = SamplerOptions {
            chains: 2,
            iterations: 120,
            warmup: 60,
            thin: 1,
            seed: 5,
            tuning: ProposalTuning::default(),
        };
        let a = sample_posterior(&data, &opts).unwrap();
        let b = sample_posterior(&data, &opts).unwrap();
        let da: Vec<&PosteriorDraw> = a.draws().collect();
        let db: Vec<&PosteriorDraw> = b.draws().collect();
        assert_eq!(da, db);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let data = simulated();
        let opts = SamplerOptions {
            warmup: 500,
            iterations: 500,
            ..SamplerOptions::default()
        };
        assert_eq!(sample_posterior(&data, &opts).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn adaptation_moves_scale_towards_band() {
        let tuning = ProposalTuning::default();
        assert!(adapt_scalar_scale(1.0, 0.05, tuning) < 1.0);
        assert!(adapt_scalar_scale(1.0, 0.9, tuning) > 1.0);
        assert_eq!(adapt_scalar_scale(1.0, 0.25, tuning), 1.0);
        assert_eq!(adapt_scalar_scale(1.0e-4, 0.0, tuning), tuning.min_scale);
    }
}
