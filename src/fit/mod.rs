//! Parameter fitting.
//!
//! Responsibilities:
//!
//! - bounded curve fitting with covariance (`fitter`)
//! - starting points: explicit, data-driven, multistart grid (`starts`)
//! - fitting the SIR model and picking the best start (`selection`)

pub mod fitter;
pub mod selection;
pub mod starts;

pub use fitter::*;
pub use selection::*;
pub use starts::*;
