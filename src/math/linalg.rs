//! Symmetric positive-definite solves.
//!
//! Every Newton step in this crate solves a system of the form
//!
//! ```text
//! H Δ = g,    H = [X Z]' W [X Z] + blockdiag(0, Λ⁻¹)
//! ```
//!
//! where `H` is symmetric and positive definite whenever the data identify the
//! fixed effects. We solve with a Cholesky factorization; when the factorization
//! fails (near-singular `H`) we retry with a progressively larger ridge on the
//! diagonal rather than giving up on the first attempt.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Diagonal ridges tried in order when the plain factorization fails.
const RIDGES: [f64; 4] = [0.0, 1e-10, 1e-8, 1e-6];

/// Cholesky-factorize `h`, adding a small ridge if needed.
///
/// Returns `None` if the matrix cannot be factorized even with the largest ridge.
pub fn cholesky_with_ridge(h: &DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    let scale = h.diagonal().iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    for &ridge in &RIDGES {
        let mut m = h.clone();
        if ridge > 0.0 {
            for i in 0..m.nrows() {
                m[(i, i)] += ridge * scale;
            }
        }
        if let Some(chol) = Cholesky::new(m) {
            if chol.l().iter().all(|v| v.is_finite()) {
                return Some(chol);
            }
        }
    }
    None
}

/// Solve `h x = g` for symmetric positive-definite `h`.
pub fn solve_spd(h: &DMatrix<f64>, g: &DVector<f64>) -> Option<DVector<f64>> {
    let chol = cholesky_with_ridge(h)?;
    let x = chol.solve(g);
    if x.iter().all(|v| v.is_finite()) { Some(x) } else { None }
}

/// `log |h|` from a Cholesky factor.
pub fn log_det(chol: &Cholesky<f64, Dyn>) -> f64 {
    2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_small_spd_system() {
        let h = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let g = DVector::from_row_slice(&[1.0, 2.0]);
        let x = solve_spd(&h, &g).unwrap();
        let back = &h * &x;
        assert!((back[0] - 1.0).abs() < 1e-12);
        assert!((back[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn log_det_matches_direct_determinant() {
        let h = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let chol = cholesky_with_ridge(&h).unwrap();
        assert!((log_det(&chol) - 11.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn ridge_rescues_semidefinite_matrix() {
        // Rank-deficient but PSD: plain Cholesky fails, the ridge succeeds.
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(cholesky_with_ridge(&h).is_some());
        let neg = DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -1.0]);
        assert!(cholesky_with_ridge(&neg).is_none());
    }
}
