//! Circuit impedance models: element primitives and the two composed
//! variants (series and parallel) of the arc/electrode vocabulary.

pub mod elements;
pub mod model;

pub use elements::{cpe, inductor, parallel, q_from_f0};
pub use model::{CircuitModel, CircuitVariant, SecondaryParams, PARAMETER_NAMES};
