//! Bounded Levenberg–Marquardt for small nonlinear least-squares problems.
//!
//! Given a residual function `r(x)` and a box `lower <= x <= upper`, we minimize
//! `‖r(x)‖²` as follows:
//!
//! - work in unit-box coordinates `u = (x - lower) / (upper - lower)`, so that
//!   parameters of wildly different magnitude (a rate near 0.1 next to a
//!   population near 2e8) get comparable finite-difference steps and damping
//! - forward-difference Jacobian in `u`, stepping inward at the upper bound
//! - variables sitting on a bound whose gradient pushes outward are frozen for
//!   the step; all others take a Marquardt-damped Gauss–Newton step that is
//!   then projected back into the box
//! - a trial point whose residuals cannot be evaluated (e.g. the integrator
//!   fails) is treated like a rejected step
//!
//! The returned Jacobian is expressed in the original `x` coordinates so it can
//! feed the covariance estimate directly.

use nalgebra::{DMatrix, DVector};

use crate::domain::{Bounds, Termination};
use crate::error::AppError;
use crate::math::ols::solve_damped_step;

const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e16;

/// Optimizer tolerances and budgets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmOptions {
    pub max_iterations: usize,
    /// Residual evaluations, including finite-difference probes.
    pub max_evaluations: usize,
    /// Stop when an accepted step reduces the SSE by less than `ftol · SSE`.
    pub ftol: f64,
    /// Stop when the step in unit coordinates is below `xtol · (xtol + ‖u‖)`.
    pub xtol: f64,
    /// Stop when the projected gradient is below `gtol · SSE`.
    pub gtol: f64,
    pub initial_lambda: f64,
    /// Finite-difference step in unit coordinates.
    pub fd_step: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            max_evaluations: 4000,
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-10,
            initial_lambda: 1e-3,
            fd_step: 1e-6,
        }
    }
}

/// Result of one optimizer run.
#[derive(Debug, Clone)]
pub struct LmOutcome {
    pub x: Vec<f64>,
    pub residuals: Vec<f64>,
    pub sse: f64,
    /// Jacobian of the residuals at `x`, in original coordinates.
    pub jacobian: DMatrix<f64>,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: Termination,
}

struct UnitBox {
    lower: Vec<f64>,
    width: Vec<f64>,
}

impl UnitBox {
    fn new(bounds: &Bounds) -> Self {
        Self {
            lower: bounds.lower.clone(),
            width: bounds
                .upper
                .iter()
                .zip(bounds.lower.iter())
                .map(|(hi, lo)| hi - lo)
                .collect(),
        }
    }

    fn to_x(&self, u: &[f64]) -> Vec<f64> {
        u.iter()
            .enumerate()
            .map(|(j, &uj)| self.lower[j] + uj * self.width[j])
            .collect()
    }

    fn to_unit(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .enumerate()
            .map(|(j, &xj)| {
                if self.width[j] > 0.0 {
                    ((xj - self.lower[j]) / self.width[j]).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect()
    }
}

struct Problem<F> {
    residual: F,
    unit: UnitBox,
    evaluations: usize,
}

impl<F> Problem<F>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, AppError>,
{
    fn eval(&mut self, u: &[f64]) -> Result<DVector<f64>, AppError> {
        self.evaluations += 1;
        let x = self.unit.to_x(u);
        let r = (self.residual)(&x)?;
        if r.iter().any(|v| !v.is_finite()) {
            return Err(AppError::fit("Residuals are not finite at the evaluated parameters."));
        }
        Ok(DVector::from_vec(r))
    }

    /// Forward-difference Jacobian in unit coordinates.
    fn jacobian(&mut self, u: &[f64], r: &DVector<f64>, h: f64) -> Result<DMatrix<f64>, AppError> {
        let n = u.len();
        let m = r.len();
        let mut jac = DMatrix::<f64>::zeros(m, n);
        let mut probe = u.to_vec();

        for j in 0..n {
            if self.unit.width[j] <= 0.0 {
                continue;
            }
            let step = if u[j] + h <= 1.0 { h } else { -h };
            probe[j] = u[j] + step;
            let (r_probe, step) = match self.eval(&probe) {
                Ok(rp) => (rp, step),
                Err(first) => {
                    probe[j] = u[j] - step;
                    if !(0.0..=1.0).contains(&probe[j]) {
                        return Err(first);
                    }
                    (self.eval(&probe)?, -step)
                }
            };
            probe[j] = u[j];

            if r_probe.len() != m {
                return Err(AppError::fit("Residual length changed between evaluations."));
            }
            for i in 0..m {
                jac[(i, j)] = (r_probe[i] - r[i]) / step;
            }
        }

        Ok(jac)
    }
}

/// Minimize `‖residual(x)‖²` subject to `bounds`, starting from `x0`.
///
/// # Errors
/// - infeasible bounds, or `x0` with the wrong length / outside the box
/// - residual evaluation failure (or non-finite residuals) at `x0`
/// - residual evaluation failure while building a Jacobian at an accepted point
///
/// Budget exhaustion and stalls (damping saturated with every trial step
/// rejected) are *not* errors here: they are reported through
/// [`LmOutcome::termination`] so callers can decide.
pub fn minimize_bounded<F>(
    residual: F,
    x0: &[f64],
    bounds: &Bounds,
    opts: &LmOptions,
) -> Result<LmOutcome, AppError>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, AppError>,
{
    bounds.validate()?;
    if x0.len() != bounds.len() {
        return Err(AppError::fit(format!(
            "Initial guess has {} entries, bounds have {}.",
            x0.len(),
            bounds.len()
        )));
    }
    if !bounds.contains(x0) {
        return Err(AppError::fit(format!(
            "Initial guess {x0:?} lies outside the parameter bounds."
        )));
    }

    let n = x0.len();
    let mut problem = Problem {
        residual,
        unit: UnitBox::new(bounds),
        evaluations: 0,
    };

    let mut u = problem.unit.to_unit(x0);
    let mut r = problem.eval(&u)?;
    let mut sse = r.norm_squared();
    let mut lambda = opts.initial_lambda.max(LAMBDA_MIN);
    let mut iterations = 0usize;

    let termination = 'outer: loop {
        if sse == 0.0 {
            break Termination::ExactFit;
        }
        if iterations >= opts.max_iterations {
            break Termination::MaxIterations;
        }
        if problem.evaluations + n > opts.max_evaluations {
            break Termination::MaxEvaluations;
        }
        iterations += 1;

        let jac = problem.jacobian(&u, &r, opts.fd_step)?;
        let grad = jac.transpose() * &r;

        let free: Vec<bool> = (0..n)
            .map(|j| {
                problem.unit.width[j] > 0.0
                    && !((u[j] <= 0.0 && grad[j] > 0.0) || (u[j] >= 1.0 && grad[j] < 0.0))
            })
            .collect();

        let pg_max = (0..n)
            .filter(|&j| free[j])
            .map(|j| grad[j].abs())
            .fold(0.0, f64::max);
        if pg_max <= opts.gtol * sse {
            break Termination::GradientTolerance;
        }

        let mut jac_free = jac;
        let mut damping = vec![1.0; n];
        for j in 0..n {
            if free[j] {
                damping[j] = jac_free.column(j).norm_squared().max(1e-12);
            } else {
                jac_free.column_mut(j).fill(0.0);
            }
        }

        let u_norm = u.iter().map(|v| v * v).sum::<f64>().sqrt();

        loop {
            if problem.evaluations >= opts.max_evaluations {
                break 'outer Termination::MaxEvaluations;
            }
            // Every damped step was rejected: the point is not stationary but
            // no descent could be found.
            if lambda > LAMBDA_MAX {
                break 'outer Termination::Stalled;
            }

            let Some(delta) = solve_damped_step(&jac_free, &r, &damping, lambda) else {
                lambda *= 10.0;
                continue;
            };

            let u_new: Vec<f64> = (0..n)
                .map(|j| if free[j] { (u[j] + delta[j]).clamp(0.0, 1.0) } else { u[j] })
                .collect();
            let step_norm = u_new
                .iter()
                .zip(u.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();

            match problem.eval(&u_new) {
                Ok(r_new) => {
                    let sse_new = r_new.norm_squared();
                    if sse_new < sse {
                        let reduction = sse - sse_new;
                        let sse_old = sse;
                        u = u_new;
                        r = r_new;
                        sse = sse_new;
                        lambda = (lambda / 10.0).max(LAMBDA_MIN);
                        if reduction <= opts.ftol * sse_old {
                            break 'outer Termination::CostTolerance;
                        }
                        if step_norm <= opts.xtol * (opts.xtol + u_norm) {
                            break 'outer Termination::StepTolerance;
                        }
                        break;
                    }
                    lambda *= 10.0;
                }
                Err(_) => {
                    lambda *= 10.0;
                }
            }
        }
    };

    let jac_u = problem.jacobian(&u, &r, opts.fd_step)?;
    let mut jacobian = jac_u;
    for j in 0..n {
        let w = problem.unit.width[j];
        if w > 0.0 {
            jacobian.column_mut(j).scale_mut(1.0 / w);
        } else {
            jacobian.column_mut(j).fill(0.0);
        }
    }

    Ok(LmOutcome {
        x: problem.unit.to_x(&u),
        residuals: r.iter().copied().collect(),
        sse,
        jacobian,
        iterations,
        evaluations: problem.evaluations,
        termination,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exp_model(x: &[f64], t: &[f64]) -> Vec<f64> {
        t.iter().map(|&ti| x[0] * (x[1] * ti).exp()).collect()
    }

    #[test]
    fn recovers_exponential_growth() {
        let t: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y = exp_model(&[3.0, 0.25], &t);
        let bounds = Bounds::new(vec![0.0, 0.0], vec![100.0, 2.0]);

        let out = minimize_bounded(
            |x| Ok(exp_model(x, &t).iter().zip(y.iter()).map(|(a, b)| a - b).collect()),
            &[1.0, 0.5],
            &bounds,
            &LmOptions::default(),
        )
        .unwrap();

        assert!(out.termination.converged(), "{:?}", out.termination);
        assert!((out.x[0] - 3.0).abs() < 1e-5, "{:?}", out.x);
        assert!((out.x[1] - 0.25).abs() < 1e-6, "{:?}", out.x);
        assert!(out.sse < 1e-8);
    }

    #[test]
    fn solution_stays_inside_active_bound() {
        // Unconstrained optimum is x = -2; the box forces x = 0.
        let bounds = Bounds::new(vec![0.0], vec![10.0]);
        let out = minimize_bounded(|x| Ok(vec![x[0] + 2.0]), &[5.0], &bounds, &LmOptions::default())
            .unwrap();
        assert!(out.x[0].abs() < 1e-9, "{:?}", out.x);
        assert!(out.termination.converged());
    }

    #[test]
    fn start_outside_bounds_is_rejected() {
        let bounds = Bounds::new(vec![0.0], vec![1.0]);
        let err = minimize_bounded(|x| Ok(vec![x[0]]), &[2.0], &bounds, &LmOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Fit);
    }

    #[test]
    fn budget_exhaustion_is_reported_not_raised() {
        let t: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y = exp_model(&[3.0, 0.25], &t);
        let bounds = Bounds::new(vec![0.0, 0.0], vec![100.0, 2.0]);
        let opts = LmOptions { max_iterations: 1, ..LmOptions::default() };

        let out = minimize_bounded(
            |x| Ok(exp_model(x, &t).iter().zip(y.iter()).map(|(a, b)| a - b).collect()),
            &[1.0, 0.5],
            &bounds,
            &opts,
        )
        .unwrap();
        assert_eq!(out.termination, Termination::MaxIterations);
        assert!(!out.termination.converged());
    }

    #[test]
    fn saturated_damping_is_a_stall_not_convergence() {
        // A kink at the start: the forward-difference slope points uphill on
        // both sides, so every trial step is rejected until damping saturates.
        let bounds = Bounds::new(vec![0.0], vec![1.0]);
        let out = minimize_bounded(
            |x| Ok(vec![(x[0] - 0.5).abs() + 1.0]),
            &[0.5],
            &bounds,
            &LmOptions::default(),
        )
        .unwrap();

        assert_eq!(out.termination, Termination::Stalled);
        assert!(!out.termination.converged());
        assert_eq!(out.x, vec![0.5]);
        assert_eq!(out.sse, 1.0);
    }

    #[test]
    fn jacobian_is_reported_in_original_coordinates() {
        // r(x) = 4x - 8 has dr/dx = 4 regardless of the box width.
        let bounds = Bounds::new(vec![0.0], vec![1000.0]);
        let out = minimize_bounded(|x| Ok(vec![4.0 * x[0] - 8.0]), &[1.0], &bounds, &LmOptions::default())
            .unwrap();
        assert!((out.x[0] - 2.0).abs() < 1e-6);
        assert!((out.jacobian[(0, 0)] - 4.0).abs() < 1e-3);
    }
}
