//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting and sampling code stays clean and testable
//! - output changes are localized

use statrs::distribution::{ContinuousCDF, Normal};

use crate::bayes::PosteriorFit;
use crate::domain::{BucketLevel, IntervalBand, ModelData};
use crate::fit::GlmmFit;
use crate::io::ingest::{IngestedSurvey, RowError};
use crate::models::FIXED_EFFECT_NAMES;
use crate::report::Dispersion;

/// Dataset overview: rows used, grouping sizes, ranges, survey period.
pub fn format_dataset_summary(ingest: &IngestedSurvey, data: &ModelData) -> String {
    let s = &ingest.stats;
    let mut out = String::new();

    out.push_str("=== bands - bird counts, bootstrap vs Bayesian uncertainty ===\n");
    out.push_str(&format!(
        "Rows: used={} read={} skipped={}\n",
        ingest.rows_used,
        ingest.rows_read,
        ingest.row_errors.len()
    ));
    out.push_str(&format!("Groups: sites={} observers={}\n", s.n_sites, s.n_observers));
    out.push_str(&format!(
        "Counts: [{}, {}] | exposure=[{:.1}, {:.1}] | temperature=[{:.1}, {:.1}]\n",
        s.count_min, s.count_max, s.exposure_min, s.exposure_max, s.temperature_min, s.temperature_max
    ));
    if let (Some(lo), Some(hi)) = (s.date_min, s.date_max) {
        out.push_str(&format!("Survey period: {lo} .. {hi}\n"));
    }
    out.push_str(&format!(
        "temp_z = (temperature - {:.3}) / {:.3}; forest >= {:.2} is '{}'\n",
        data.temperature.mean,
        data.temperature.sd,
        data.bucket_threshold,
        BucketLevel::High.label()
    ));

    let high = data
        .observations
        .iter()
        .filter(|o| o.forest_level == BucketLevel::High)
        .count();
    out.push_str(&format!(
        "Forest levels: low={} high={}\n",
        data.observations.len() - high,
        high
    ));

    out
}

/// The first `max_rows` row errors, with a count of the rest.
pub fn format_row_errors(errors: &[RowError], max_rows: usize) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    out.push_str(&format!("Skipped rows ({}):\n", errors.len()));
    for e in errors.iter().take(max_rows) {
        out.push_str(&format!("  line {:>5}: {}\n", e.line, e.message));
    }
    if errors.len() > max_rows {
        out.push_str(&format!("  ... and {} more\n", errors.len() - max_rows));
    }
    out
}

/// Coefficient table, variance components and fit criteria.
pub fn format_glmm_summary(fit: &GlmmFit) -> String {
    let mut out = String::new();

    out.push_str("\nFrequentist GLMM (Laplace approximation)\n");
    out.push_str("count ~ temp_z * forest_level + (1 | site) + (1 | observer) + offset(log(n_points))\n");
    out.push_str(&format!(
        "logLik={:.3} deviance={:.3} AIC={:.3} BIC={:.3} n={}{}\n",
        fit.log_likelihood,
        fit.deviance,
        fit.aic,
        fit.bic,
        fit.n_obs,
        if fit.converged { "" } else { " (NOT CONVERGED)" }
    ));

    out.push_str("\nFixed effects:\n");
    out.push_str(&table_header(&["term", "estimate", "std.error", "z", "Pr(>|z|)"]));
    let std_normal = Normal::new(0.0, 1.0).ok();
    for (j, se) in fit.std_errors().iter().enumerate() {
        let est = fit.beta[j];
        let z = est / se;
        let p = std_normal
            .as_ref()
            .map(|n| 2.0 * (1.0 - n.cdf(z.abs())))
            .unwrap_or(f64::NAN);
        out.push_str(
            format!(
                "{:<24} {:>10.4} {:>10.4} {:>10.3} {:>10}\n",
                FIXED_EFFECT_NAMES[j],
                est,
                se,
                z,
                fmt_p(p)
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out.push_str("\nRandom effects:\n");
    out.push_str(&table_header(&["group", "levels", "variance", "std.dev"]));
    for vc in fit.variance_components() {
        out.push_str(
            format!(
                "{:<24} {:>10} {:>10.4} {:>10.4}\n",
                vc.factor.display_name(),
                vc.n_levels,
                vc.variance,
                vc.sd
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

pub fn format_dispersion(dispersion: Option<&Dispersion>) -> String {
    match dispersion {
        Some(d) => format!(
            "\nResidual dispersion: Pearson chi2={:.2} df={} ratio={:.3}\n",
            d.pearson_chi2, d.df, d.ratio
        ),
        None => "\nResidual dispersion: not enough observations\n".to_string(),
    }
}

/// Posterior summaries, convergence diagnostics and acceptance rates.
pub fn format_posterior_summary(fit: &PosteriorFit) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "\nBayesian GLMM (chains={}, draws={})\n",
        fit.chains.len(),
        fit.n_draws()
    ));
    out.push_str(&table_header(&["parameter", "mean", "sd", "2.5%", "97.5%", "Rhat", "ESS"]));
    for s in &fit.summary {
        let rhat = s.rhat.map(|r| format!("{r:.3}")).unwrap_or_else(|| "-".to_string());
        let flag = if s.is_flagged() { " !" } else { "" };
        out.push_str(
            format!(
                "{:<24} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10} {:>10.0}{flag}\n",
                truncate(&s.name, 24),
                s.mean,
                s.sd,
                s.q025,
                s.q975,
                rhat,
                s.ess
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out.push_str("\nAcceptance rates (beta | site | observer | sd):\n");
    for (c, chain) in fit.chains.iter().enumerate() {
        let a = chain.acceptance;
        out.push_str(&format!(
            "  chain {}: {:.2} | {:.2} | {:.2} | {}\n",
            c + 1,
            a.beta,
            a.effects[0],
            a.effects[1],
            fmt_vec(&a.sd)
        ));
    }

    out
}

/// Median and interval bounds at the ends and middle of each forest level's curve.
pub fn format_band_summary(label: &str, bands: &[IntervalBand]) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{label}\n"));
    out.push_str(&table_header(&["level", "temp_z", "median", "50%", "80%", "95%"]));

    for level in BucketLevel::ALL {
        let rows: Vec<&IntervalBand> = bands.iter().filter(|b| b.forest_level == level).collect();
        if rows.is_empty() {
            continue;
        }
        let mut picks = vec![0, rows.len() / 2, rows.len() - 1];
        picks.dedup();
        for i in picks {
            let b = rows[i];
            let cell = |w: f64| {
                b.interval(w)
                    .map(|(lo, hi)| format!("{lo:.2}-{hi:.2}"))
                    .unwrap_or_default()
            };
            out.push_str(
                format!(
                    "{:<24} {:>10.2} {:>10.2} {:>14} {:>14} {:>14}\n",
                    level.label(),
                    b.temp_z,
                    b.median,
                    cell(0.5),
                    cell(0.8),
                    cell(0.95)
                )
                .trim_end(),
            );
            out.push('\n');
        }
    }

    out
}

fn table_header(columns: &[&str]) -> String {
    let mut head = format!("{:<24}", columns[0]);
    let mut rule = format!("{:-<24}", "");
    for c in &columns[1..] {
        head.push_str(&format!(" {c:>10}"));
        rule.push_str(&format!(" {:-<10}", ""));
    }
    format!("{}\n{}\n", head.trim_end(), rule.trim_end())
}

fn fmt_p(p: f64) -> String {
    if !p.is_finite() {
        "-".to_string()
    } else if p < 1e-4 {
        "<1e-4".to_string()
    } else {
        format!("{p:.4}")
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.2}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DatasetStats, GroupIndex};
    use nalgebra::DMatrix;

    fn toy_fit() -> GlmmFit {
        let mut sites = GroupIndex::default();
        sites.intern("S1");
        let mut observers = GroupIndex::default();
        observers.intern("O1");
        GlmmFit {
            beta: vec![-1.2, 0.35, 0.6, -0.25],
            beta_cov: DMatrix::from_diagonal_element(4, 4, 0.01),
            sd: [0.5, 0.3],
            b: vec![0.0, 0.0],
            re_start: [0, 1],
            groups: [sites, observers],
            fitted: Vec::new(),
            log_likelihood: -500.0,
            deviance: 1000.0,
            aic: 1012.0,
            bic: 1030.0,
            n_obs: 240,
            converged: false,
            evaluations: 400,
        }
    }

    #[test]
    fn glmm_summary_lists_terms_and_flags_non_convergence() {
        let text = format_glmm_summary(&toy_fit());
        for name in FIXED_EFFECT_NAMES {
            assert!(text.contains(name), "missing {name}");
        }
        assert!(text.contains("NOT CONVERGED"));
        assert!(text.contains("observer"));
        // z = -1.2 / 0.1 = -12
        assert!(text.contains("-12.000"));
    }

    #[test]
    fn row_errors_are_capped() {
        let errors: Vec<RowError> = (0..5)
            .map(|i| RowError {
                line: i + 2,
                message: format!("bad {i}"),
            })
            .collect();
        let text = format_row_errors(&errors, 2);
        assert!(text.contains("Skipped rows (5)"));
        assert!(text.contains("... and 3 more"));
        assert!(!text.contains("bad 4"));
        assert_eq!(format_row_errors(&[], 2), "");
    }

    #[test]
    fn dataset_summary_reports_period() {
        let stats = DatasetStats {
            n_rows: 2,
            n_sites: 1,
            n_observers: 1,
            count_min: 0,
            count_max: 4,
            exposure_min: 8.0,
            exposure_max: 16.0,
            temperature_min: 10.0,
            temperature_max: 20.0,
            date_min: chrono::NaiveDate::from_ymd_opt(2021, 4, 15),
            date_max: chrono::NaiveDate::from_ymd_opt(2021, 6, 1),
        };
        let ingest = IngestedSurvey {
            records: Vec::new(),
            stats,
            row_errors: Vec::new(),
            rows_read: 2,
            rows_used: 2,
        };
        let data = ModelData {
            observations: Vec::new(),
            groups: [GroupIndex::default(), GroupIndex::default()],
            temperature: crate::domain::Standardizer { mean: 15.0, sd: 5.0 },
            bucket_threshold: 0.5,
        };
        let text = format_dataset_summary(&ingest, &data);
        assert!(text.contains("Survey period: 2021-04-15 .. 2021-06-01"));
        assert!(text.contains("used=2 read=2 skipped=0"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
