//! Linear least squares and covariance helpers.
//!
//! The nonlinear fitter repeatedly solves small damped linear problems of the form:
//!
//! ```text
//! minimize ‖J δ + r‖² + λ Σ d_j δ_j²
//! ```
//!
//! which we write as one stacked ordinary least-squares problem and hand to SVD.
//!
//! Implementation choices:
//! - SVD keeps the solve robust when columns are nearly collinear (e.g. `gamma`
//!   and `s_0` trade off against each other early in an epidemic).
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)
//! - Parameter dimension is tiny (5 columns), so SVD cost is negligible next to
//!   the ODE integrations that produce each Jacobian.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Solve the damped step `min ‖J δ + r‖² + λ Σ d_j δ_j²`.
///
/// `damping[j]` is the per-column Marquardt scale (usually `‖J_j‖²`).
pub fn solve_damped_step(
    jac: &DMatrix<f64>,
    residuals: &DVector<f64>,
    damping: &[f64],
    lambda: f64,
) -> Option<DVector<f64>> {
    let (m, n) = jac.shape();
    let mut a = DMatrix::<f64>::zeros(m + n, n);
    let mut b = DVector::<f64>::zeros(m + n);

    a.view_mut((0, 0), (m, n)).copy_from(jac);
    for i in 0..m {
        b[i] = -residuals[i];
    }
    for j in 0..n {
        a[(m + j, j)] = (lambda * damping[j]).sqrt();
    }

    solve_least_squares(&a, &b)
}

/// Parameter covariance `pinv(JᵀJ) · SSE / (m − n)` from the Jacobian at the optimum.
///
/// Singular values below `eps · max(m, n) · s_max` are dropped (pseudo-inverse).
/// Returns `None` when the covariance cannot be estimated: `m <= n`, or the
/// decomposition fails.
pub fn covariance_from_jacobian(jac: &DMatrix<f64>, sse: f64) -> Option<DMatrix<f64>> {
    let (m, n) = jac.shape();
    if m <= n || !sse.is_finite() {
        return None;
    }

    let svd = jac.clone().svd(false, true);
    let v_t = svd.v_t?;
    let s = &svd.singular_values;

    let s_max = s.iter().copied().fold(0.0, f64::max);
    if s_max <= 0.0 {
        return None;
    }
    let threshold = f64::EPSILON * m.max(n) as f64 * s_max;

    let mut cov = DMatrix::<f64>::zeros(n, n);
    for k in 0..s.len() {
        if s[k] <= threshold {
            continue;
        }
        let inv_sq = 1.0 / (s[k] * s[k]);
        for i in 0..n {
            for j in 0..n {
                cov[(i, j)] += v_t[(k, i)] * v_t[(k, j)] * inv_sq;
            }
        }
    }

    let s_sq = sse / (m - n) as f64;
    Some(cov * s_sq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn zero_damping_reduces_to_gauss_newton() {
        // r = Jx - y at x = 0, so the step should land on the OLS solution.
        let j = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let r = DVector::from_row_slice(&[-2.0, -5.0, -8.0]);
        let step = solve_damped_step(&j, &r, &[1.0, 1.0], 0.0).unwrap();
        assert!((step[0] - 2.0).abs() < 1e-9);
        assert!((step[1] - 3.0).abs() < 1e-9);

        let damped = solve_damped_step(&j, &r, &[1.0, 1.0], 100.0).unwrap();
        assert!(damped.norm() < step.norm());
    }

    #[test]
    fn covariance_of_straight_line_fit() {
        // Design for y = b0 + b1 x at x = 0..4; residual variance s² = sse/(5-2).
        let x: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let mut rows = Vec::new();
        for &xi in &x {
            rows.push(1.0);
            rows.push(xi);
        }
        let j = DMatrix::from_row_slice(5, 2, &rows);
        let cov = covariance_from_jacobian(&j, 3.0).unwrap();

        // (XᵀX)^-1 = [[0.6, -0.2], [-0.2, 0.1]], s² = 1.
        assert!((cov[(0, 0)] - 0.6).abs() < 1e-10);
        assert!((cov[(0, 1)] + 0.2).abs() < 1e-10);
        assert!((cov[(1, 1)] - 0.1).abs() < 1e-10);
    }

    #[test]
    fn rank_deficient_jacobian_gets_a_finite_pseudo_inverse() {
        // Two identical columns: only the direction (1, 1)/sqrt(2) is identified.
        let j = DMatrix::from_row_slice(3, 2, &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        let cov = covariance_from_jacobian(&j, 1.0).unwrap();

        // v vᵀ / s² with s² = 6, scaled by sse / (3 - 2) = 1.
        for &(a, b) in &[(0, 0), (0, 1), (1, 0), (1, 1)] {
            assert!((cov[(a, b)] - 1.0 / 12.0).abs() < 1e-12, "{cov}");
        }
    }

    #[test]
    fn zero_jacobian_has_no_covariance() {
        let j = DMatrix::<f64>::zeros(4, 2);
        assert!(covariance_from_jacobian(&j, 1.0).is_none());
    }

    #[test]
    fn covariance_needs_more_rows_than_columns() {
        let j = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        assert!(covariance_from_jacobian(&j, 1.0).is_none());
    }
}
