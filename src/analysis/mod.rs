//! Dependence analysis.

pub mod dependence;

pub use dependence::{compute_deps, compute_schedule_validity};
