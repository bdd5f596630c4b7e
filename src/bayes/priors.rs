//! Prior specifications and log-density helpers.

use statrs::distribution::{Continuous, Normal, StudentsT};

use crate::models::{Design, N_FIXED};

/// Location-scale Student-t hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudentT {
    pub df: f64,
    pub location: f64,
    pub scale: f64,
}

/// Weakly informative priors on the log-rate scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Priors {
    pub intercept: StudentT,
    /// Standard deviation of the `Normal(0, sd)` prior on every slope.
    pub slope_sd: f64,
    /// Half-Student-t on each group standard deviation (`location` is ignored).
    pub group_sd: StudentT,
}

impl Priors {
    /// Default priors, centring the intercept on the observed log rate per exposure unit.
    pub fn for_design(design: &Design) -> Self {
        let total: f64 = design.y.iter().map(|&y| y as f64).sum();
        let exposure: f64 = design.offset.iter().map(|o| o.exp()).sum();
        let location = (total / exposure).ln();
        Self {
            intercept: StudentT {
                df: 3.0,
                location: if location.is_finite() { location } else { 0.0 },
                scale: 2.5,
            },
            slope_sd: 5.0,
            group_sd: StudentT {
                df: 3.0,
                location: 0.0,
                scale: 2.5,
            },
        }
    }

    pub fn is_valid(&self) -> bool {
        self.intercept.df > 0.0
            && self.intercept.scale > 0.0
            && self.slope_sd > 0.0
            && self.group_sd.df > 0.0
            && self.group_sd.scale > 0.0
    }

    pub fn log_beta(&self, beta: &[f64]) -> f64 {
        debug_assert_eq!(beta.len(), N_FIXED);
        let t = self.intercept;
        let mut lp = log_student_t_density(beta[0], t.df, t.location, t.scale);
        for &slope in &beta[1..] {
            lp += log_normal_density(slope, 0.0, self.slope_sd);
        }
        lp
    }

    pub fn log_group_sd(&self, sd: f64) -> f64 {
        log_half_student_t_density(sd, self.group_sd.df, self.group_sd.scale)
    }
}

/// Log-density for `Normal(mean, sd)`.
pub fn log_normal_density(value: f64, mean: f64, sd: f64) -> f64 {
    Normal::new(mean, sd).map_or(f64::NEG_INFINITY, |d| d.ln_pdf(value))
}

/// Log-density for a location-scale Student-t.
pub fn log_student_t_density(value: f64, df: f64, location: f64, scale: f64) -> f64 {
    StudentsT::new(location, scale, df).map_or(f64::NEG_INFINITY, |d| d.ln_pdf(value))
}

/// Student-t folded at zero; `-inf` for negative values.
pub fn log_half_student_t_density(value: f64, df: f64, scale: f64) -> f64 {
    if value < 0.0 {
        return f64::NEG_INFINITY;
    }
    std::f64::consts::LN_2 + log_student_t_density(value, df, 0.0, scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_density_matches_closed_form() {
        let lp = log_normal_density(1.0, 0.0, 1.0);
        assert!((lp - (-0.5 * std::f64::consts::TAU.ln() - 0.5)).abs() < 1e-12);
        assert_eq!(log_normal_density(0.0, 0.0, 0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn student_t_with_one_df_is_cauchy() {
        // Cauchy(0, 1) at 0 has density 1 / pi.
        let lp = log_student_t_density(0.0, 1.0, 0.0, 1.0);
        assert!((lp - (1.0 / std::f64::consts::PI).ln()).abs() < 1e-10);
    }

    #[test]
    fn invalid_hyperparameters_have_no_density() {
        assert_eq!(log_student_t_density(0.0, 0.0, 0.0, 1.0), f64::NEG_INFINITY);
        assert_eq!(log_student_t_density(0.0, 3.0, 0.0, -1.0), f64::NEG_INFINITY);
        assert_eq!(log_normal_density(0.0, 0.0, -1.0), f64::NEG_INFINITY);
    }

    #[test]
    fn student_t_narrows_towards_normal() {
        let t = log_student_t_density(0.5, 1.0e6, 0.0, 1.0);
        assert!((t - log_normal_density(0.5, 0.0, 1.0)).abs() < 1e-5);
    }

    #[test]
    fn half_student_t_integrates_to_one() {
        let h = 0.001;
        let total: f64 = (0..200_000)
            .map(|i| (i as f64 + 0.5) * h)
            .map(|x| log_half_student_t_density(x, 3.0, 2.5).exp() * h)
            .sum();
        assert!((total - 1.0).abs() < 1e-3, "mass {total}");
        assert_eq!(log_half_student_t_density(-0.1, 3.0, 2.5), f64::NEG_INFINITY);
    }
}
