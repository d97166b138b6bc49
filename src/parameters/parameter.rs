//! Parameter definition
//!
//! A [`Parameter`] is the unit of state shared between the sliders, the
//! circuit model and the fit engine: a named value with bounds, an
//! enabled/disabled flag, and the two boundary-transform designations
//! (sign inversion for the external resistance, wrap-on-output for the
//! electrode phase angle).
//!
//! The stored `value` is always the UI-facing one. Sign and wrap transforms
//! are applied at the model-evaluation and fit-result boundaries, never to
//! the stored value itself.

use serde::{Deserialize, Serialize};

use crate::parameters::bounds::{Bounds, BoundsError, BoundsTransform};

/// Presentation group a parameter belongs to. Used by the UI collaborator
/// for layout/color only; irrelevant to model evaluation and fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterGroup {
    HighFrequency,
    MidFrequency,
    LowFrequency,
    External,
}

/// How a UI control position maps to the parameter value, and consequently
/// how the fit engine scales the value into optimizer space: exponential
/// sliders optimize in log10, linear sliders in a x10 linear scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SliderKind {
    Exponential,
    Linear,
}

/// A named circuit-model parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Name of the parameter
    pub name: String,

    /// Current UI-facing value of the parameter
    value: f64,

    /// Default value from configuration (for reset operations)
    default_value: f64,

    /// Whether this parameter is included in the fit's variable vector.
    /// A disabled parameter still feeds the model at its stored value.
    enabled: bool,

    /// Minimum and maximum bounds for the parameter value
    bounds: Bounds,

    /// Presentation group
    pub group: ParameterGroup,

    /// Slider/scaling kind
    pub slider: SliderKind,

    /// Whether this parameter carries the sign-inversion designation
    /// (the high-frequency external resistance, `Rinf`).
    sign_designated: bool,

    /// Whether the sign transform is currently active. Only meaningful on
    /// the designated parameter.
    sign_active: bool,

    /// Whether this parameter optimizes unbounded and wraps its result
    /// into the canonical angle range (the electrode phase `Pei`).
    wrap_output: bool,
}

impl Parameter {
    /// Create a new enabled parameter with the given name and value,
    /// unbounded, in the external group with a linear slider.
    pub fn new(name: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            value,
            default_value: value,
            enabled: true,
            bounds: Bounds::default(),
            group: ParameterGroup::External,
            slider: SliderKind::Linear,
            sign_designated: false,
            sign_active: false,
            wrap_output: false,
        }
    }

    /// Create a new parameter with bounds. The value is clamped into them.
    pub fn with_bounds(name: &str, value: f64, min: f64, max: f64) -> Result<Self, BoundsError> {
        let bounds = Bounds::new(min, max)?;
        let value = bounds.clamp(value);

        let mut param = Self::new(name, value);
        param.default_value = value;
        param.bounds = bounds;
        Ok(param)
    }

    /// Builder-style group assignment.
    pub fn in_group(mut self, group: ParameterGroup) -> Self {
        self.group = group;
        self
    }

    /// Builder-style slider kind assignment.
    pub fn with_slider(mut self, slider: SliderKind) -> Self {
        self.slider = slider;
        self
    }

    /// Mark this parameter as the sign-transform carrier (`Rinf`).
    pub fn with_sign_designation(mut self) -> Self {
        self.sign_designated = true;
        self
    }

    /// Mark this parameter as wrap-on-output (`Pei`).
    pub fn with_wrap_output(mut self) -> Self {
        self.wrap_output = true;
        self
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Set the value; errors if outside bounds.
    pub fn set_value(&mut self, value: f64) -> Result<(), BoundsError> {
        if !self.bounds.is_within_bounds(value) {
            return Err(BoundsError::ValueOutsideBounds {
                value,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }

        self.value = value;
        Ok(())
    }

    /// Write a fit result value. The wrap-output parameter bypasses the
    /// bounds check here: its raw optimizer value is legitimately
    /// unbounded and has already been wrapped into the canonical range.
    pub(crate) fn set_value_unchecked(&mut self, value: f64) {
        self.value = value;
    }

    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    /// Reset the parameter to its configured default.
    pub fn reset(&mut self) {
        self.value = self.bounds.clamp(self.default_value);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn set_bounds(&mut self, min: f64, max: f64) -> Result<(), BoundsError> {
        let bounds = Bounds::new(min, max)?;
        self.bounds = bounds;
        self.value = bounds.clamp(self.value);
        Ok(())
    }

    /// Create a bounds transform for this parameter.
    pub fn bounds_transform(&self) -> BoundsTransform {
        BoundsTransform::new(self.bounds)
    }

    pub fn is_sign_designated(&self) -> bool {
        self.sign_designated
    }

    pub fn sign_transform_active(&self) -> bool {
        self.sign_active
    }

    pub(crate) fn set_sign_active(&mut self, active: bool) {
        self.sign_active = active;
    }

    pub fn wraps_output(&self) -> bool {
        self.wrap_output
    }

    /// The value the circuit model sees: the stored UI value with an
    /// active sign transform resolved.
    pub fn model_value(&self) -> f64 {
        if self.sign_designated && self.sign_active {
            -self.value
        } else {
            self.value
        }
    }
}

/// Wrap a raw optimizer result onto the canonical period-4 angle domain
/// `[-1, 3)`. Idempotent on that range.
pub fn wrap_angle(value: f64) -> f64 {
    (value + 1.0).rem_euclid(4.0) - 1.0
}
