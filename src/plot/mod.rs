//! Text rendering of the fitted curve.

pub mod ascii;

pub use ascii::*;
