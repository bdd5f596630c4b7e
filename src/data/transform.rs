//! Feature transform: survey records -> model-ready observations.
//!
//! Three derived columns:
//!
//! - `temp_z`: standardized temperature (sample mean 0, sample sd 1)
//! - `count`: the raw response column under its model name
//! - `forest_level`: forest cover bucketed at a fixed threshold
//!
//! All functions here are pure; running the transform twice on the same
//! records yields identical output.

use crate::domain::{BucketLevel, GroupFactor, GroupIndex, ModelData, Observation, Standardizer, SurveyRecord};
use crate::error::AppError;
use crate::math::{mean, sample_sd};

/// Standardize values with their sample mean and sample standard deviation (n - 1).
pub fn standardize(values: &[f64]) -> Result<(Vec<f64>, Standardizer), AppError> {
    if values.len() < 2 {
        return Err(AppError::no_data("Need at least two rows to standardize a covariate."));
    }
    let (Some(mean), Some(sd)) = (mean(values), sample_sd(values)) else {
        return Err(AppError::no_data("Need at least two rows to standardize a covariate."));
    };
    if !(sd.is_finite() && sd > 0.0) {
        return Err(AppError::input("Covariate has zero variance; cannot standardize."));
    }

    let scaler = Standardizer { mean, sd };
    Ok((values.iter().map(|&v| scaler.apply(v)).collect(), scaler))
}

/// Bucket a continuous value; the threshold itself maps to `High`.
pub fn bucket(value: f64, threshold: f64) -> BucketLevel {
    if value < threshold {
        BucketLevel::Low
    } else {
        BucketLevel::High
    }
}

/// Build observations and group indices from validated records.
pub fn transform_survey(records: &[SurveyRecord], bucket_threshold: f64) -> Result<ModelData, AppError> {
    let temps: Vec<f64> = records.iter().map(|r| r.temperature).collect();
    let (temp_z, temperature) = standardize(&temps)?;

    let mut groups = [GroupIndex::default(), GroupIndex::default()];
    let mut observations = Vec::with_capacity(records.len());

    for (row, (r, z)) in records.iter().zip(temp_z).enumerate() {
        let site = groups[GroupFactor::Site.index()].intern(&r.site);
        let observer = groups[GroupFactor::Observer.index()].intern(&r.observer);
        groups[GroupFactor::Site.index()].rows[site].push(row);
        groups[GroupFactor::Observer.index()].rows[observer].push(row);

        observations.push(Observation {
            groups: [site, observer],
            temp_z: z,
            forest_level: bucket(r.forest, bucket_threshold),
            exposure: r.exposure,
            count: r.response,
        });
    }

    let high = observations
        .iter()
        .filter(|o| o.forest_level == BucketLevel::High)
        .count();
    if high == 0 || high == observations.len() {
        // The interaction term is not identifiable with a single level.
        return Err(AppError::input(format!(
            "Forest threshold {bucket_threshold} puts every row into one bucket."
        )));
    }

    tracing::debug!(
        mean = temperature.mean,
        sd = temperature.sd,
        high_rows = high,
        "feature transform complete"
    );

    Ok(ModelData {
        observations,
        groups,
        temperature,
        bucket_threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(site: &str, observer: &str, temperature: f64, forest: f64, count: u64) -> SurveyRecord {
        SurveyRecord {
            site: site.to_string(),
            observer: observer.to_string(),
            date: None,
            temperature,
            forest,
            exposure: 16.0,
            response: count,
        }
    }

    #[test]
    fn standardized_values_have_zero_mean_unit_sd() {
        let values = [3.0, 7.5, 12.0, 18.25, 4.0, 9.0];
        let (z, scaler) = standardize(&values).unwrap();
        let n = z.len() as f64;
        let mean = z.iter().sum::<f64>() / n;
        let sd = (z.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
        assert!(mean.abs() < 1e-12);
        assert!((sd - 1.0).abs() < 1e-12);
        assert!((scaler.invert(z[2]) - 12.0).abs() < 1e-12);
        assert_eq!(Some(scaler.mean), crate::math::mean(&values));
        assert_eq!(Some(scaler.sd), sample_sd(&values));
    }

    #[test]
    fn constant_covariate_cannot_be_standardized() {
        assert!(standardize(&[2.0, 2.0, 2.0]).is_err());
        assert!(standardize(&[2.0]).is_err());
    }

    #[test]
    fn bucketing_is_total_and_boundary_goes_high() {
        assert_eq!(bucket(0.49, 0.5), BucketLevel::Low);
        assert_eq!(bucket(0.5, 0.5), BucketLevel::High);
        assert_eq!(bucket(0.51, 0.5), BucketLevel::High);
        assert_eq!(bucket(f64::NEG_INFINITY, 0.5), BucketLevel::Low);
        assert_eq!(bucket(f64::INFINITY, 0.5), BucketLevel::High);
    }

    #[test]
    fn transform_is_idempotent_and_indexes_groups() {
        let records = vec![
            record("S1", "O1", 10.0, 0.2, 3),
            record("S2", "O1", 14.0, 0.8, 5),
            record("S1", "O2", 12.0, 0.5, 0),
        ];
        let a = transform_survey(&records, 0.5).unwrap();
        let b = transform_survey(&records, 0.5).unwrap();
        assert_eq!(a.observations, b.observations);

        assert_eq!(a.group(GroupFactor::Site).len(), 2);
        assert_eq!(a.group(GroupFactor::Observer).len(), 2);
        assert_eq!(a.group(GroupFactor::Site).rows[0], vec![0, 2]);
        assert_eq!(a.observations[2].groups, [0, 1]);
        assert_eq!(a.observations[2].forest_level, BucketLevel::High);
        assert_eq!(a.observations[1].count, 5);
    }

    #[test]
    fn single_bucket_is_rejected() {
        let records = vec![record("S1", "O1", 10.0, 0.9, 3), record("S2", "O1", 14.0, 0.8, 5)];
        assert!(transform_survey(&records, 0.5).is_err());
    }
}
