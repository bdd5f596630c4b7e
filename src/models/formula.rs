//! Model structure for the survey GLMM.
//!
//! ```text
//! count ~ temp_z * forest_level + (1 | site) + (1 | observer) + offset(log(n_points))
//! family = poisson(link = "log")
//! ```
//!
//! Both fitters rely on two primitive operations:
//! - build a fixed-effect design row for a covariate combination
//! - evaluate the linear predictor given fixed and random effects
//!
//! Random effects are stored in one flat vector: all site levels first, then
//! all observer levels (`Design::re_start`).

use nalgebra::DMatrix;

use crate::domain::{BucketLevel, GroupFactor, ModelData};
use crate::error::AppError;

pub const N_FIXED: usize = 4;

/// Fixed-effect column names, treatment coded with `low` as reference.
pub const FIXED_EFFECT_NAMES: [&str; N_FIXED] = [
    "(Intercept)",
    "temp_z",
    "forest_levelhigh",
    "temp_z:forest_levelhigh",
];

/// Fixed-effect design row for one covariate combination.
pub fn fixed_row(temp_z: f64, level: BucketLevel) -> [f64; N_FIXED] {
    let high = level.indicator();
    [1.0, temp_z, high, temp_z * high]
}

/// Fixed-effect part of the linear predictor.
pub fn fixed_eta(beta: &[f64], temp_z: f64, level: BucketLevel) -> f64 {
    fixed_row(temp_z, level)
        .iter()
        .zip(beta.iter())
        .map(|(x, b)| x * b)
        .sum()
}

/// Model matrices and grouping structure for one response vector.
#[derive(Debug, Clone)]
pub struct Design {
    /// `n x N_FIXED` fixed-effect design.
    pub x: DMatrix<f64>,
    /// `log(exposure)` per row.
    pub offset: Vec<f64>,
    pub y: Vec<u64>,
    /// Level index of each row, per factor.
    pub row_levels: [Vec<usize>; 2],
    /// Rows belonging to each level, per factor.
    pub level_rows: [Vec<Vec<usize>>; 2],
}

impl Design {
    pub fn from_data(data: &ModelData) -> Result<Self, AppError> {
        let n = data.observations.len();
        if n <= N_FIXED {
            return Err(AppError::no_data(format!(
                "Need more than {N_FIXED} observations to fit the model (got {n})."
            )));
        }

        let mut x = DMatrix::<f64>::zeros(n, N_FIXED);
        let mut offset = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        let mut row_levels = [Vec::with_capacity(n), Vec::with_capacity(n)];

        for (i, o) in data.observations.iter().enumerate() {
            if !(o.exposure > 0.0 && o.exposure.is_finite()) {
                return Err(AppError::input(format!(
                    "Row {i}: exposure must be > 0 to form a log-offset."
                )));
            }
            for (j, v) in fixed_row(o.temp_z, o.forest_level).iter().enumerate() {
                x[(i, j)] = *v;
            }
            offset.push(o.exposure.ln());
            y.push(o.count);
            for factor in GroupFactor::ALL {
                row_levels[factor.index()].push(o.groups[factor.index()]);
            }
        }

        let level_rows = [
            data.group(GroupFactor::Site).rows.clone(),
            data.group(GroupFactor::Observer).rows.clone(),
        ];

        Ok(Self {
            x,
            offset,
            y,
            row_levels,
            level_rows,
        })
    }

    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_levels(&self, factor: GroupFactor) -> usize {
        self.level_rows[factor.index()].len()
    }

    /// Total number of random effects across factors.
    pub fn n_random(&self) -> usize {
        GroupFactor::ALL.iter().map(|&f| self.n_levels(f)).sum()
    }

    /// Position of a factor's first level in the flat random-effect vector.
    pub fn re_start(&self, factor: GroupFactor) -> usize {
        match factor {
            GroupFactor::Site => 0,
            GroupFactor::Observer => self.n_levels(GroupFactor::Site),
        }
    }

    /// Flat random-effect column of row `i` for `factor`.
    pub fn re_column(&self, factor: GroupFactor, i: usize) -> usize {
        self.re_start(factor) + self.row_levels[factor.index()][i]
    }

    /// Same structure, different response (used by the parametric bootstrap).
    pub fn with_response(&self, y: Vec<u64>) -> Self {
        Self { y, ..self.clone() }
    }

    /// Linear predictor of every row: `X beta + Z b + offset`.
    pub fn linear_predictor(&self, beta: &[f64], b: &[f64]) -> Vec<f64> {
        (0..self.n_obs()).map(|i| self.row_eta(i, beta, b)).collect()
    }

    pub fn row_eta(&self, i: usize, beta: &[f64], b: &[f64]) -> f64 {
        let mut eta = self.offset[i];
        for (j, bj) in beta.iter().enumerate() {
            eta += self.x[(i, j)] * bj;
        }
        for factor in GroupFactor::ALL {
            eta += b[self.re_column(factor, i)];
        }
        eta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::transform_survey;
    use crate::domain::SurveyRecord;

    fn data() -> ModelData {
        let rows = [
            ("S1", "O1", 10.0, 0.2, 16.0, 3),
            ("S2", "O1", 14.0, 0.8, 8.0, 5),
            ("S1", "O2", 12.0, 0.5, 12.0, 0),
            ("S3", "O2", 9.0, 0.1, 16.0, 1),
            ("S3", "O1", 11.0, 0.9, 20.0, 7),
            ("S2", "O2", 13.0, 0.6, 10.0, 2),
        ];
        let records: Vec<SurveyRecord> = rows
            .iter()
            .map(|&(s, o, t, f, e, c)| SurveyRecord {
                site: s.to_string(),
                observer: o.to_string(),
                date: None,
                temperature: t,
                forest: f,
                exposure: e,
                response: c,
            })
            .collect();
        transform_survey(&records, 0.5).unwrap()
    }

    #[test]
    fn fixed_row_is_treatment_coded() {
        assert_eq!(fixed_row(1.5, BucketLevel::Low), [1.0, 1.5, 0.0, 0.0]);
        assert_eq!(fixed_row(1.5, BucketLevel::High), [1.0, 1.5, 1.0, 1.5]);
        let beta = [0.1, 0.2, 0.3, 0.4];
        assert!((fixed_eta(&beta, 2.0, BucketLevel::High) - (0.1 + 0.4 + 0.3 + 0.8)).abs() < 1e-12);
    }

    #[test]
    fn design_layout_and_linear_predictor() {
        let design = Design::from_data(&data()).unwrap();
        assert_eq!(design.n_obs(), 6);
        assert_eq!(design.n_levels(GroupFactor::Site), 3);
        assert_eq!(design.n_levels(GroupFactor::Observer), 2);
        assert_eq!(design.n_random(), 5);
        assert_eq!(design.re_start(GroupFactor::Observer), 3);
        // Row 2 is site S1 (level 0), observer O2 (level 1).
        assert_eq!(design.re_column(GroupFactor::Observer, 2), 4);

        let beta = [0.5, 0.0, 0.0, 0.0];
        let b = [0.1, 0.2, 0.3, -0.1, 0.05];
        let eta = design.linear_predictor(&beta, &b);
        let expected = 12.0_f64.ln() + 0.5 + 0.1 + 0.05;
        assert!((eta[2] - expected).abs() < 1e-12);
    }

    #[test]
    fn with_response_keeps_structure() {
        let design = Design::from_data(&data()).unwrap();
        let swapped = design.with_response(vec![1; 6]);
        assert_eq!(swapped.y, vec![1; 6]);
        assert_eq!(swapped.offset, design.offset);
    }
}
