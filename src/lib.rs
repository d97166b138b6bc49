//! # zarcfit
//!
//! Equivalent-circuit fitting of measured rock impedance spectra.
//!
//! The library provides:
//! - Closed-form circuit models (series and parallel composition of
//!   relaxation arcs, instrument terms and an electrode CPE)
//! - A parameter system with bounds, enable/disable flags and the sign /
//!   wrap conventions of the slider UI
//! - A bound-constrained Levenberg-Marquardt fit in Cartesian (Cole) or
//!   polar (Bode) coordinates
//! - A time-domain pulse reconstruction of the rock impedance
//! - A session layer tying it together: manual evaluation, single-fit
//!   scheduling with cooperative cancellation, export and recovery
//!
//! ## Basic usage
//!
//! ```
//! use zarcfit::{
//!     CircuitVariant, FitKind, FrequencyWindow, ImpedanceSweep, Session, StartupConfig,
//! };
//!
//! # fn main() -> zarcfit::Result<()> {
//! let config = StartupConfig::default();
//! let mut session = Session::new(&config, CircuitVariant::Series)?;
//!
//! let sweep = ImpedanceSweep::from_arrays(
//!     &[1.0, 10.0, 100.0],
//!     &[1300.0, 1250.0, 1100.0],
//!     &[-20.0, -80.0, -150.0],
//! )?;
//! session.set_sweep(sweep, "sample-001");
//!
//! let report = session.evaluate_manual()?;
//! assert_eq!(report.z_model.len(), 3);
//!
//! let task = session.begin_fit(FitKind::Cole, FrequencyWindow::Full)?;
//! match task.run() {
//!     Ok(result) => session.apply_fit(&result)?,
//!     Err(err) => eprintln!("fit failed: {err}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;

// Parameter system
pub mod parameters;

// Circuit models
pub mod circuit;

// Measured data
pub mod data;

// Least-squares fitting
pub mod fit;

// Time-domain reconstruction
pub mod timedomain;

// Startup configuration
pub mod config;

// Export rows and recovery
pub mod results;

// Coordinating session
pub mod session;

// Re-exports for convenience
pub use circuit::{CircuitModel, CircuitVariant, SecondaryParams};
pub use config::StartupConfig;
pub use data::{FrequencyWindow, ImpedanceSample, ImpedanceSweep};
pub use error::{Result, ZarcError};
pub use fit::{FitEngine, FitKind, FitRequest, FitResult, LevenbergMarquardt};
pub use parameters::{Parameter, ParameterSet, ParameterStore};
pub use results::{JsonLinesLog, MemoryLog, ResultsLog, ResultsRow};
pub use session::{FitTask, ManualReport, Session};
pub use timedomain::{PulseResponse, TimeDomainTransform};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
