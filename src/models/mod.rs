//! Epidemic model implementations.
//!
//! The model is a small pure function plus a solver wrapper, so that fitting
//! and rendering code can stay generic over [`TrajectoryModel`].

pub mod sir;

pub use sir::*;
