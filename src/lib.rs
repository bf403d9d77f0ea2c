//! `sir-fit` library crate.
//!
//! The binary (`sirfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - every pipeline stage can be swapped (see `app::pipeline`)

pub mod app;
pub mod cli;
pub mod data;
pub mod debug;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
pub mod tui;
