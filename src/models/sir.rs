//! SIR dynamics with a cumulative reported compartment.
//!
//! ```text
//! ds/dt = -gamma · (s/M) · i
//! di/dt =  gamma · (s/M) · i - alpha · i
//! da/dt =  gamma · (s/M) · i
//! ```
//!
//! `a` accumulates every new infection and never drains, so it is the model
//! counterpart of a cumulative confirmed-case series. Only `a` is compared
//! against observations; `s` and `i` are internal.

use crate::domain::{SirParams, SirState};
use crate::error::AppError;
use crate::math::{OdeOptions, OdeSystem, integrate};

/// Anything that maps a time grid and a parameter vector to reported counts.
///
/// The fitter and the renderers only need this; tests substitute closed-form
/// stand-ins.
pub trait TrajectoryModel: Sync {
    /// The reported (`a`) compartment at each requested time.
    fn reported(&self, times: &[f64], params: &SirParams) -> Result<Vec<f64>, AppError>;

    /// All compartments at each requested time.
    fn trajectory(&self, times: &[f64], params: &SirParams) -> Result<Vec<SirState>, AppError>;
}

/// Right-hand side of the system. `t` is unused; the system is autonomous.
pub fn derivative(state: SirState, _t: f64, gamma: f64, alpha: f64, population: f64) -> SirState {
    let infections = gamma * (state.s / population) * state.i;
    SirState {
        s: -infections,
        i: infections - alpha * state.i,
        a: infections,
    }
}

/// The system with fixed rates, in the form the integrator expects.
#[derive(Debug, Clone, Copy)]
pub struct SirSystem {
    pub gamma: f64,
    pub alpha: f64,
    pub population: f64,
}

impl OdeSystem for SirSystem {
    fn dim(&self) -> usize {
        3
    }

    fn derivative(&self, t: f64, y: &[f64], dy: &mut [f64]) {
        let d = derivative(SirState::from_slice(y), t, self.gamma, self.alpha, self.population);
        dy[0] = d.s;
        dy[1] = d.i;
        dy[2] = d.a;
    }
}

/// Integrates the system from `times[0]` through every later requested time.
#[derive(Debug, Clone, Copy)]
pub struct SirSolver {
    pub population: f64,
    pub ode: OdeOptions,
}

impl SirSolver {
    pub fn new(population: f64) -> Self {
        Self {
            population,
            ode: OdeOptions::default(),
        }
    }

    pub fn with_tolerances(mut self, rtol: f64, atol: f64) -> Self {
        self.ode.rtol = rtol;
        self.ode.atol = atol;
        self
    }

    fn system(&self, params: &SirParams) -> Result<SirSystem, AppError> {
        if !(self.population.is_finite() && self.population > 0.0) {
            return Err(AppError::integration(format!(
                "Population must be finite and > 0 (got {}).",
                self.population
            )));
        }
        Ok(SirSystem {
            gamma: params.gamma,
            alpha: params.alpha,
            population: self.population,
        })
    }
}

impl TrajectoryModel for SirSolver {
    fn reported(&self, times: &[f64], params: &SirParams) -> Result<Vec<f64>, AppError> {
        Ok(self.trajectory(times, params)?.into_iter().map(|s| s.a).collect())
    }

    fn trajectory(&self, times: &[f64], params: &SirParams) -> Result<Vec<SirState>, AppError> {
        let system = self.system(params)?;
        let y0 = params.initial_state().to_array();
        let states = integrate(&system, &y0, times, &self.ode)?;
        Ok(states.iter().map(|y| SirState::from_slice(y)).collect())
    }
}

/// Day and size of the infected peak on a trajectory sampled at `times`.
///
/// Returns `None` for an empty trajectory.
pub fn infected_peak(times: &[f64], states: &[SirState]) -> Option<(f64, f64)> {
    times
        .iter()
        .zip(states.iter())
        .fold(None, |best: Option<(f64, f64)>, (&t, s)| match best {
            Some((_, i)) if i >= s.i => best,
            _ => Some((t, s.i)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(n: usize) -> Vec<f64> {
        (0..n).map(|d| d as f64).collect()
    }

    fn params() -> SirParams {
        SirParams {
            gamma: 0.5,
            alpha: 0.2,
            s0: 6_000.0,
            i0: 5.0,
            a0: 5.0,
        }
    }

    #[test]
    fn derivative_conserves_s_plus_a() {
        let d = derivative(SirState::new(900.0, 50.0, 10.0), 0.0, 0.4, 0.1, 1000.0);
        assert!((d.s + d.a).abs() < 1e-12);
        assert!((d.a - 18.0).abs() < 1e-12);
        assert!((d.i - 13.0).abs() < 1e-12);
    }

    #[test]
    fn reported_is_non_decreasing() {
        let solver = SirSolver::new(10_000.0);
        let a = solver.reported(&days(200), &params()).unwrap();
        for w in a.windows(2) {
            assert!(w[1] >= w[0] - 1e-9, "{} -> {}", w[0], w[1]);
        }
        assert!(a[199] > a[0]);
    }

    #[test]
    fn susceptible_is_non_increasing_and_non_negative() {
        let solver = SirSolver::new(10_000.0);
        let states = solver.trajectory(&days(200), &params()).unwrap();
        for w in states.windows(2) {
            assert!(w[1].s <= w[0].s + 1e-9);
        }
        assert!(states.iter().all(|s| s.s >= 0.0));
    }

    #[test]
    fn monotone_compartments_at_every_box_corner() {
        let m = crate::domain::DEFAULT_POPULATION;
        let solver = SirSolver::new(m);
        let t = days(200);

        for gamma in [0.0, 50.0] {
            for alpha in [0.0, 1.0] {
                for s0 in [1.0, m] {
                    for i0 in [1.0, m] {
                        let p = SirParams { gamma, alpha, s0, i0, a0: 0.0 };
                        let states = solver.trajectory(&t, &p).unwrap();

                        // Slack at the integrator's accuracy: relative to the largest
                        // magnitude on the path, plus its absolute floor.
                        let scale = states.iter().map(|x| x.a.abs().max(x.s.abs())).fold(0.0, f64::max);
                        let tol = 1e-9 * scale + 1e-7;
                        for w in states.windows(2) {
                            assert!(w[1].a >= w[0].a - tol, "{p:?}: a {} -> {}", w[0].a, w[1].a);
                            assert!(w[1].s <= w[0].s + tol, "{p:?}: s {} -> {}", w[0].s, w[1].s);
                        }
                        assert!(states.iter().all(|x| x.s >= -tol), "{p:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn zero_transmission_keeps_reported_constant() {
        let solver = SirSolver::new(1_000.0);
        let p = SirParams { gamma: 0.0, ..params() };
        let a = solver.reported(&days(50), &p).unwrap();
        assert!(a.iter().all(|&v| v == p.a0));
    }

    #[test]
    fn no_susceptibles_keeps_reported_constant() {
        let solver = SirSolver::new(1_000.0);
        let p = SirParams { s0: 0.0, gamma: 10.0, ..params() };
        let a = solver.reported(&days(50), &p).unwrap();
        assert!(a.iter().all(|&v| v == p.a0));
    }

    #[test]
    fn accepts_off_grid_times() {
        let solver = SirSolver::new(10_000.0);
        let coarse = solver.reported(&[0.0, 10.0, 20.0], &params()).unwrap();
        let fine = solver.reported(&days(21), &params()).unwrap();
        assert!((coarse[1] - fine[10]).abs() < 1e-4 * fine[10]);
        assert!((coarse[2] - fine[20]).abs() < 1e-4 * fine[20]);
    }

    #[test]
    fn peak_is_found_inside_the_horizon() {
        let solver = SirSolver::new(10_000.0);
        let t = days(200);
        let states = solver.trajectory(&t, &params()).unwrap();
        let (day, size) = infected_peak(&t, &states).unwrap();
        assert!(day > 0.0 && day < 199.0);
        assert!(size > params().i0);
    }

    #[test]
    fn bad_population_is_an_integration_error() {
        let solver = SirSolver::new(0.0);
        let err = solver.reported(&days(3), &params()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integration);
    }
}
