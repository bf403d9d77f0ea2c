//! Adaptive Dormand–Prince 5(4) integrator for small ODE systems.
//!
//! The integrator marches from `times[0]` and lands exactly on every requested
//! output time (steps are truncated at each target), so callers can ask for
//! daily values, a 200-day projection, or any other non-decreasing grid.
//!
//! Step control follows the usual embedded-pair scheme:
//! - local error is measured against `atol + rtol * max(|y|, |y_new|)`
//! - accepted steps grow by at most 5x, rejected steps shrink by at most 5x
//! - the first step size is chosen from the scale of `y0` and `f(t0, y0)`

use crate::error::AppError;

/// A first-order system `dy/dt = f(t, y)`.
pub trait OdeSystem {
    /// Number of state components.
    fn dim(&self) -> usize;

    /// Write `f(t, y)` into `dy` (same length as `y`).
    fn derivative(&self, t: f64, y: &[f64], dy: &mut [f64]);
}

/// Integrator tolerances and budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdeOptions {
    pub rtol: f64,
    pub atol: f64,
    /// Total number of attempted steps across the whole call.
    pub max_steps: usize,
}

impl Default for OdeOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-8,
            max_steps: 100_000,
        }
    }
}

const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// 5th-order weights (also the last stage row, FSAL).
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Difference between 5th- and 4th-order weights.
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

/// Workspace for allocation-free steps.
struct Workspace {
    k1: Vec<f64>,
    k2: Vec<f64>,
    k3: Vec<f64>,
    k4: Vec<f64>,
    k5: Vec<f64>,
    k6: Vec<f64>,
    k7: Vec<f64>,
    ytmp: Vec<f64>,
    ynew: Vec<f64>,
}

impl Workspace {
    fn new(n: usize) -> Self {
        Self {
            k1: vec![0.0; n],
            k2: vec![0.0; n],
            k3: vec![0.0; n],
            k4: vec![0.0; n],
            k5: vec![0.0; n],
            k6: vec![0.0; n],
            k7: vec![0.0; n],
            ytmp: vec![0.0; n],
            ynew: vec![0.0; n],
        }
    }
}

/// Integrate `system` from `y0` at `times[0]` and return the state at every
/// entry of `times`.
///
/// `times` must be finite and non-decreasing; repeated times return the same
/// state. An empty `times` yields an empty result.
pub fn integrate<S: OdeSystem>(
    system: &S,
    y0: &[f64],
    times: &[f64],
    opts: &OdeOptions,
) -> Result<Vec<Vec<f64>>, AppError> {
    let n = system.dim();
    if y0.len() != n {
        return Err(AppError::integration(format!(
            "Initial state has {} components, system expects {n}.",
            y0.len()
        )));
    }
    if y0.iter().any(|v| !v.is_finite()) {
        return Err(AppError::integration("Initial state contains non-finite values."));
    }
    if times.iter().any(|t| !t.is_finite()) {
        return Err(AppError::integration("Requested time points must be finite."));
    }
    if times.windows(2).any(|w| w[1] < w[0]) {
        return Err(AppError::integration("Requested time points must be non-decreasing."));
    }
    if !(opts.rtol > 0.0 && opts.atol > 0.0) {
        return Err(AppError::integration("Integrator tolerances must be > 0."));
    }

    let Some(&t_start) = times.first() else {
        return Ok(Vec::new());
    };

    let mut ws = Workspace::new(n);
    let mut out = Vec::with_capacity(times.len());
    let mut y = y0.to_vec();
    let mut t = t_start;

    system.derivative(t, &y, &mut ws.k1);
    ensure_finite(&ws.k1, t)?;

    let t_end = times[times.len() - 1];
    let mut h = initial_step(system, t, &y, t_end - t, opts, &mut ws);
    let mut steps = 0usize;

    for &target in times {
        while t < target {
            steps += 1;
            if steps > opts.max_steps {
                return Err(AppError::integration(format!(
                    "Step budget of {} exhausted at t={t:.6} (target t={target:.6}); the system may be stiff.",
                    opts.max_steps
                )));
            }

            let remaining = target - t;
            let h_try = h.min(remaining);
            let min_step = 1e-12 * t.abs().max(1.0);
            if h_try < min_step && h_try < remaining {
                return Err(AppError::integration(format!(
                    "Step size underflow at t={t:.6} (h={h_try:e})."
                )));
            }

            dopri_step(system, t, &y, h_try, &mut ws);
            let err = error_norm(&ws, &y, h_try, opts);
            if !err.is_finite() {
                // A blow-up inside a trial step counts as a rejection.
                h = h_try * MIN_FACTOR;
                continue;
            }

            if err <= 1.0 {
                t = if h_try >= remaining { target } else { t + h_try };
                std::mem::swap(&mut y, &mut ws.ynew);
                std::mem::swap(&mut ws.k1, &mut ws.k7);
                let factor = if err == 0.0 {
                    MAX_FACTOR
                } else {
                    (SAFETY * err.powf(-0.2)).clamp(MIN_FACTOR, MAX_FACTOR)
                };
                // Do not let a truncated landing step shrink the next step.
                h = (h_try * factor).max(if h_try < h { h } else { 0.0 });
            } else {
                let factor = (SAFETY * err.powf(-0.2)).clamp(MIN_FACTOR, 1.0);
                h = h_try * factor;
            }
        }
        out.push(y.clone());
    }

    Ok(out)
}

/// One Dormand–Prince step of size `h`; fills `ws.ynew` and `ws.k2..k7`.
fn dopri_step<S: OdeSystem>(system: &S, t: f64, y: &[f64], h: f64, ws: &mut Workspace) {
    let n = y.len();

    for i in 0..n {
        ws.ytmp[i] = y[i] + h * A21 * ws.k1[i];
    }
    system.derivative(t + C2 * h, &ws.ytmp, &mut ws.k2);

    for i in 0..n {
        ws.ytmp[i] = y[i] + h * (A31 * ws.k1[i] + A32 * ws.k2[i]);
    }
    system.derivative(t + C3 * h, &ws.ytmp, &mut ws.k3);

    for i in 0..n {
        ws.ytmp[i] = y[i] + h * (A41 * ws.k1[i] + A42 * ws.k2[i] + A43 * ws.k3[i]);
    }
    system.derivative(t + C4 * h, &ws.ytmp, &mut ws.k4);

    for i in 0..n {
        ws.ytmp[i] =
            y[i] + h * (A51 * ws.k1[i] + A52 * ws.k2[i] + A53 * ws.k3[i] + A54 * ws.k4[i]);
    }
    system.derivative(t + C5 * h, &ws.ytmp, &mut ws.k5);

    for i in 0..n {
        ws.ytmp[i] = y[i]
            + h * (A61 * ws.k1[i] + A62 * ws.k2[i] + A63 * ws.k3[i] + A64 * ws.k4[i] + A65 * ws.k5[i]);
    }
    system.derivative(t + h, &ws.ytmp, &mut ws.k6);

    for i in 0..n {
        ws.ynew[i] = y[i]
            + h * (B1 * ws.k1[i] + B3 * ws.k3[i] + B4 * ws.k4[i] + B5 * ws.k5[i] + B6 * ws.k6[i]);
    }
    system.derivative(t + h, &ws.ynew, &mut ws.k7);
}

fn error_norm(ws: &Workspace, y: &[f64], h: f64, opts: &OdeOptions) -> f64 {
    let n = y.len();
    if n == 0 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let e = h
            * (E1 * ws.k1[i] + E3 * ws.k3[i] + E4 * ws.k4[i] + E5 * ws.k5[i] + E6 * ws.k6[i]
                + E7 * ws.k7[i]);
        let sc = opts.atol + opts.rtol * y[i].abs().max(ws.ynew[i].abs());
        let r = e / sc;
        acc += r * r;
    }
    if ws.ynew.iter().any(|v| !v.is_finite()) {
        return f64::INFINITY;
    }
    (acc / n as f64).sqrt()
}

/// Starting step size (Hairer, Nørsett & Wanner, "Solving ODEs I", II.4).
fn initial_step<S: OdeSystem>(
    system: &S,
    t: f64,
    y: &[f64],
    span: f64,
    opts: &OdeOptions,
    ws: &mut Workspace,
) -> f64 {
    if span <= 0.0 {
        return 1.0;
    }
    let n = y.len().max(1) as f64;
    let scale = |i: usize| opts.atol + opts.rtol * y[i].abs();

    let d0 = (y.iter().enumerate().map(|(i, v)| (v / scale(i)).powi(2)).sum::<f64>() / n).sqrt();
    let d1 = (ws.k1.iter().enumerate().map(|(i, v)| (v / scale(i)).powi(2)).sum::<f64>() / n).sqrt();

    let h0 = if d0 < 1e-5 || d1 < 1e-5 { 1e-6 } else { 0.01 * d0 / d1 };
    let h0 = h0.min(span);

    for i in 0..y.len() {
        ws.ytmp[i] = y[i] + h0 * ws.k1[i];
    }
    system.derivative(t + h0, &ws.ytmp, &mut ws.k2);
    let d2 = (ws
        .k2
        .iter()
        .zip(ws.k1.iter())
        .enumerate()
        .map(|(i, (a, b))| ((a - b) / scale(i)).powi(2))
        .sum::<f64>()
        / n)
        .sqrt()
        / h0;

    let dmax = d1.max(d2);
    let h1 = if !dmax.is_finite() {
        h0 * 1e-3
    } else if dmax <= 1e-15 {
        (h0 * 1e-3).max(1e-6)
    } else {
        (0.01 / dmax).powf(0.2)
    };

    (100.0 * h0).min(h1).min(span).max(1e-12)
}

fn ensure_finite(dy: &[f64], t: f64) -> Result<(), AppError> {
    if dy.iter().any(|v| !v.is_finite()) {
        return Err(AppError::integration(format!("Non-finite derivative at t={t:.6}.")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay {
        k: f64,
    }

    impl OdeSystem for Decay {
        fn dim(&self) -> usize {
            1
        }

        fn derivative(&self, _t: f64, y: &[f64], dy: &mut [f64]) {
            dy[0] = -self.k * y[0];
        }
    }

    struct Oscillator;

    impl OdeSystem for Oscillator {
        fn dim(&self) -> usize {
            2
        }

        fn derivative(&self, _t: f64, y: &[f64], dy: &mut [f64]) {
            dy[0] = y[1];
            dy[1] = -y[0];
        }
    }

    #[test]
    fn exponential_decay_matches_closed_form() {
        let times: Vec<f64> = (0..=10).map(|i| i as f64 * 0.5).collect();
        let out = integrate(&Decay { k: 0.7 }, &[2.0], &times, &OdeOptions::default()).unwrap();
        assert_eq!(out.len(), times.len());
        for (t, y) in times.iter().zip(out.iter()) {
            let exact = 2.0 * (-0.7 * t).exp();
            assert!((y[0] - exact).abs() < 1e-7, "t={t}: {} vs {exact}", y[0]);
        }
    }

    #[test]
    fn harmonic_oscillator_keeps_phase() {
        let times = [0.0, std::f64::consts::PI, 2.0 * std::f64::consts::PI];
        let out = integrate(&Oscillator, &[1.0, 0.0], &times, &OdeOptions::default()).unwrap();
        assert!((out[1][0] + 1.0).abs() < 1e-6);
        assert!((out[2][0] - 1.0).abs() < 1e-6);
        assert!(out[2][1].abs() < 1e-6);
    }

    #[test]
    fn first_output_is_initial_state_and_repeats_are_allowed() {
        let out = integrate(&Decay { k: 1.0 }, &[3.0], &[0.0, 0.0, 1.0, 1.0], &OdeOptions::default())
            .unwrap();
        assert_eq!(out[0][0], 3.0);
        assert_eq!(out[1][0], 3.0);
        assert_eq!(out[2][0], out[3][0]);
    }

    #[test]
    fn decreasing_times_are_rejected() {
        let err = integrate(&Decay { k: 1.0 }, &[1.0], &[0.0, 2.0, 1.0], &OdeOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integration);
    }

    #[test]
    fn exhausted_step_budget_is_an_error() {
        let opts = OdeOptions { max_steps: 3, ..OdeOptions::default() };
        let err = integrate(&Decay { k: 50.0 }, &[1.0], &[0.0, 100.0], &opts).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integration);
    }

    #[test]
    fn empty_time_grid_yields_empty_output() {
        let out = integrate(&Decay { k: 1.0 }, &[1.0], &[], &OdeOptions::default()).unwrap();
        assert!(out.is_empty());
    }
}
