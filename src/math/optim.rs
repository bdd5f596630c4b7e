//! Derivative-free minimization (Nelder–Mead).
//!
//! Used for the outer optimization of the variance components, where the
//! objective (a Laplace-approximate deviance) is cheap to evaluate but has no
//! convenient analytic gradient. The search dimension is tiny (one log standard
//! deviation per grouping factor).

/// Stopping rules for `nelder_mead`.
#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    /// Initial simplex edge length.
    pub step: f64,
    /// Converged when the spread of objective values across the simplex is below this.
    pub f_tol: f64,
    /// Converged when every vertex lies within this distance of the best vertex.
    pub x_tol: f64,
    pub max_evals: usize,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            step: 0.5,
            f_tol: 1e-8,
            x_tol: 1e-6,
            max_evals: 400,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NelderMeadResult {
    pub x: Vec<f64>,
    pub f: f64,
    pub evals: usize,
    pub converged: bool,
}

/// Minimize `f` starting from `x0`.
///
/// Non-finite objective values are treated as `+inf`, which steers the simplex
/// away from regions where the inner fit fails.
pub fn nelder_mead<F>(mut f: F, x0: &[f64], opts: NelderMeadOptions) -> NelderMeadResult
where
    F: FnMut(&[f64]) -> f64,
{
    let n = x0.len();
    let mut evals = 0usize;
    let mut eval = |x: &[f64], evals: &mut usize| -> f64 {
        *evals += 1;
        let v = f(x);
        if v.is_finite() { v } else { f64::INFINITY }
    };

    // Standard coefficients: reflection, expansion, contraction, shrink.
    let (alpha, gamma, rho, sigma) = (1.0, 2.0, 0.5, 0.5);

    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(n + 1);
    let f0 = eval(x0, &mut evals);
    simplex.push((x0.to_vec(), f0));
    for i in 0..n {
        let mut x = x0.to_vec();
        x[i] += opts.step;
        let fx = eval(&x, &mut evals);
        simplex.push((x, fx));
    }

    let mut converged = false;
    while evals < opts.max_evals {
        simplex.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let f_best = simplex[0].1;
        let f_worst = simplex[n].1;
        let x_spread = simplex[1..]
            .iter()
            .map(|(x, _)| {
                x.iter()
                    .zip(simplex[0].0.iter())
                    .map(|(a, b)| (a - b).abs())
                    .fold(0.0, f64::max)
            })
            .fold(0.0, f64::max);
        if f_best.is_finite() && (f_worst - f_best).abs() <= opts.f_tol && x_spread <= opts.x_tol {
            converged = true;
            break;
        }

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|(x, _)| x[j]).sum::<f64>() / n as f64)
            .collect();
        let along = |coef: f64, worst: &[f64]| -> Vec<f64> {
            centroid
                .iter()
                .zip(worst.iter())
                .map(|(c, w)| c + coef * (c - w))
                .collect()
        };

        let worst = simplex[n].0.clone();
        let xr = along(alpha, &worst);
        let fr = eval(&xr, &mut evals);

        if fr < simplex[0].1 {
            let xe = along(gamma, &worst);
            let fe = eval(&xe, &mut evals);
            simplex[n] = if fe < fr { (xe, fe) } else { (xr, fr) };
            continue;
        }
        if fr < simplex[n - 1].1 {
            simplex[n] = (xr, fr);
            continue;
        }

        // Contraction: outside if the reflection improved on the worst point, inside otherwise.
        let (xc, fc) = if fr < f_worst {
            let xc = along(rho, &worst);
            let fc = eval(&xc, &mut evals);
            (xc, fc)
        } else {
            let xc = along(-rho, &worst);
            let fc = eval(&xc, &mut evals);
            (xc, fc)
        };
        if fc < f_worst.min(fr) {
            simplex[n] = (xc, fc);
            continue;
        }

        let best = simplex[0].0.clone();
        for vertex in simplex.iter_mut().skip(1) {
            let x: Vec<f64> = best
                .iter()
                .zip(vertex.0.iter())
                .map(|(b, v)| b + sigma * (v - b))
                .collect();
            let fx = eval(&x, &mut evals);
            *vertex = (x, fx);
        }
    }

    simplex.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    let (x, f) = simplex.swap_remove(0);
    NelderMeadResult { x, f, evals, converged }
}
