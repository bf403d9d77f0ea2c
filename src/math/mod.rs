//! Numerical building blocks: ODE integration and (non)linear least squares.

pub mod lm;
pub mod ode;
pub mod ols;

pub use lm::*;
pub use ode::*;
pub use ols::*;
