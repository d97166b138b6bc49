//! Nonlinear least-squares fitting of circuit models to measured sweeps.

pub mod engine;
pub mod problem;
pub mod solver;

pub use engine::{FitEngine, FitKind, FitRequest, FitResult, FitStatus};
pub use problem::Problem;
pub use solver::{LevenbergMarquardt, LmConfig, LmResult};
