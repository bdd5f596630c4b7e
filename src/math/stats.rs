//! Small descriptive-statistics helpers shared by fitters and reports.

use std::cmp::Ordering;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample variance with the `n - 1` denominator.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0))
}

pub fn sample_sd(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Sort a copy of `values`, dropping non-finite entries.
pub fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    out
}

/// Quantile of already-sorted values with linear interpolation between order
/// statistics (the "type 7" definition).
pub fn quantile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() || !p.is_finite() {
        return None;
    }
    let p = p.clamp(0.0, 1.0);
    let h = (sorted.len() as f64 - 1.0) * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    let frac = h - lo as f64;
    Some(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

/// `ln(k!)`.
pub fn ln_factorial(k: u64) -> f64 {
    statrs::function::factorial::ln_factorial(k)
}

/// Linear predictors above this are treated as overflow.
pub const ETA_MAX: f64 = 50.0;

/// Poisson log-likelihood kernel `y·η − exp(η)` (no `ln y!`); `-inf` past `ETA_MAX`.
pub fn poisson_log_kernel(y: u64, eta: f64) -> f64 {
    if eta > ETA_MAX {
        f64::NEG_INFINITY
    } else {
        y as f64 * eta - eta.exp()
    }
}

/// Poisson log-probability of `y` at log-mean `eta`.
pub fn poisson_log_pmf(y: u64, eta: f64) -> f64 {
    poisson_log_kernel(y, eta) - ln_factorial(y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_matches_type7_definition() {
        let v = sorted_finite(&[4.0, 1.0, 3.0, 2.0, f64::NAN]);
        assert_eq!(v, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(quantile_sorted(&v, 0.0), Some(1.0));
        assert_eq!(quantile_sorted(&v, 1.0), Some(4.0));
        assert!((quantile_sorted(&v, 0.5).unwrap() - 2.5).abs() < 1e-12);
        assert!((quantile_sorted(&v, 0.25).unwrap() - 1.75).abs() < 1e-12);
        assert_eq!(quantile_sorted(&[], 0.5), None);
    }

    #[test]
    fn ln_factorial_small_and_large() {
        assert_eq!(ln_factorial(0), 0.0);
        assert!((ln_factorial(5) - 120.0_f64.ln()).abs() < 1e-12);
        let exact: f64 = (2..=300u64).map(|i| (i as f64).ln()).sum();
        assert!((ln_factorial(300) - exact).abs() < 1e-8);
    }

    #[test]
    fn poisson_pmf_sums_to_one() {
        let eta = 1.3_f64;
        let total: f64 = (0..60).map(|y| poisson_log_pmf(y, eta).exp()).sum();
        assert!((total - 1.0).abs() < 1e-10);
    }

    #[test]
    fn poisson_kernel_rejects_overflowing_rate() {
        assert_eq!(poisson_log_kernel(3, ETA_MAX + 1.0), f64::NEG_INFINITY);
        assert_eq!(poisson_log_pmf(3, ETA_MAX + 1.0), f64::NEG_INFINITY);
        let eta = 0.7_f64;
        assert!((poisson_log_pmf(3, eta) - (poisson_log_kernel(3, eta) - 6.0_f64.ln())).abs() < 1e-12);
        assert!(poisson_log_kernel(0, ETA_MAX).is_finite());
    }

    #[test]
    fn variance_uses_n_minus_one() {
        assert_eq!(sample_variance(&[1.0, 3.0]), Some(2.0));
        assert_eq!(sample_variance(&[1.0]), None);
    }
}
