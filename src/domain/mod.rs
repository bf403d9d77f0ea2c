//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the observed series and the SIR state/parameter vectors
//! - parameter bounds and the initial-guess strategy
//! - fit outputs (`FitResult`, `Covariance`, `FitQuality`, etc.)

pub mod types;

pub use types::*;
