//! MCMC convergence diagnostics.

use serde::Serialize;

use crate::math::{mean, quantile_sorted, sample_sd, sorted_finite};

/// Convergence is flagged above this split R-hat.
pub const RHAT_WARN: f64 = 1.05;
/// Convergence is flagged below this bulk effective sample size.
pub const ESS_WARN: f64 = 100.0;

/// Lag-`k` autocorrelation for a scalar chain.
pub fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    if series.is_empty() || lag >= series.len() {
        return 0.0;
    }
    let m = series.iter().sum::<f64>() / series.len() as f64;
    let denominator: f64 = series.iter().map(|v| (v - m) * (v - m)).sum();
    if denominator <= 0.0 {
        return 0.0;
    }
    let numerator: f64 = (0..series.len() - lag)
        .map(|i| (series[i] - m) * (series[i + lag] - m))
        .sum();
    numerator / denominator
}

/// Effective sample size of one chain, truncating the autocorrelation sum at
/// the first non-positive lag.
pub fn effective_sample_size(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return n as f64;
    }
    let mut rho_sum = 0.0;
    for lag in 1..n {
        let rho = autocorrelation(series, lag);
        if rho <= 0.0 {
            break;
        }
        rho_sum += rho;
    }
    n as f64 / (1.0 + 2.0 * rho_sum).max(1.0)
}

/// Split R-hat over chains truncated to a common even length.
///
/// Returns `None` when fewer than four draws per chain are available.
pub fn split_rhat(chains: &[Vec<f64>]) -> Option<f64> {
    let min_len = chains.iter().map(Vec::len).min()?;
    let used = min_len - min_len % 2;
    if used < 4 {
        return None;
    }
    let half = used / 2;
    let halves: Vec<&[f64]> = chains
        .iter()
        .flat_map(|c| [&c[..half], &c[half..used]])
        .collect();

    let n = half as f64;
    let m = halves.len() as f64;
    let means: Vec<f64> = halves.iter().map(|h| h.iter().sum::<f64>() / n).collect();
    let within = halves
        .iter()
        .zip(means.iter())
        .map(|(h, mu)| h.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / (n - 1.0))
        .sum::<f64>()
        / m;
    let grand = means.iter().sum::<f64>() / m;
    let between = n * means.iter().map(|mu| (mu - grand) * (mu - grand)).sum::<f64>() / (m - 1.0);

    if !(within.is_finite() && within > 0.0 && between.is_finite()) {
        return Some(1.0);
    }
    let var_plus = (n - 1.0) / n * within + between / n;
    Some((var_plus / within).sqrt().max(1.0))
}

/// Posterior summary of one scalar parameter across all chains.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub q025: f64,
    pub q975: f64,
    pub rhat: Option<f64>,
    pub ess: f64,
}

impl ParameterSummary {
    pub fn is_flagged(&self) -> bool {
        self.rhat.is_some_and(|r| r > RHAT_WARN) || self.ess < ESS_WARN
    }
}

/// Summarize a parameter given its per-chain traces.
pub fn summarize_parameter(name: &str, chains: &[Vec<f64>]) -> ParameterSummary {
    let pooled: Vec<f64> = chains.iter().flatten().copied().collect();
    let sorted = sorted_finite(&pooled);
    ParameterSummary {
        name: name.to_string(),
        mean: mean(&pooled).unwrap_or(f64::NAN),
        sd: sample_sd(&pooled).unwrap_or(f64::NAN),
        q025: quantile_sorted(&sorted, 0.025).unwrap_or(f64::NAN),
        q975: quantile_sorted(&sorted, 0.975).unwrap_or(f64::NAN),
        rhat: split_rhat(chains),
        ess: chains.iter().map(|c| effective_sample_size(c)).sum(),
    }
}

/// Log a warning for each parameter with poor mixing. Returns how many were flagged.
pub fn warn_on_problems(summaries: &[ParameterSummary]) -> usize {
    let mut flagged = 0;
    for s in summaries.iter().filter(|s| s.is_flagged()) {
        flagged += 1;
        tracing::warn!(
            parameter = %s.name,
            rhat = s.rhat.unwrap_or(f64::NAN),
            ess = s.ess,
            "posterior draws may not have converged"
        );
    }
    flagged
}
