//! Parameter system: named bounded values shared between the UI sliders,
//! the circuit model and the fit engine.

pub mod bounds;
pub mod parameter;
pub mod store;

pub use bounds::{Bounds, BoundsError, BoundsTransform};
pub use parameter::{wrap_angle, Parameter, ParameterGroup, SliderKind};
pub use store::{ParameterSet, ParameterStore, StoreEvent};
