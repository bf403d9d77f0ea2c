//! Input generation that does not come from a recorded CSV.

pub mod synthetic;

pub use synthetic::*;
