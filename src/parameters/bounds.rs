//! Parameter bounds and the internal/external transform
//!
//! Bounds are stored in the slider's (UI-facing) value space. During a fit
//! the solver works with unconstrained internal variables; the Minuit-style
//! transform below maps between the two so that any internal value the
//! solver tries corresponds to an external value inside the bounds.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when working with parameter bounds
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundsError {
    #[error("Invalid bounds: min ({min}) must be less than max ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("Parameter value {value} is outside bounds: [{min}, {max}]")]
    ValueOutsideBounds { value: f64, min: f64, max: f64 },

    #[error("Infinite parameter value is not allowed")]
    InfiniteValue,
}

/// The bounds constraints on a parameter. An infinite min or max means
/// "unbounded on that side"; absent values in serialized form mean the same.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum allowed value for the parameter
    pub min: f64,

    /// Maximum allowed value for the parameter
    pub max: f64,
}

impl Serialize for Bounds {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("Bounds", 2)?;

        // Infinite bounds round-trip as null
        if self.min.is_infinite() && self.min.is_sign_negative() {
            state.serialize_field("min", &serde_json::Value::Null)?;
        } else {
            state.serialize_field("min", &self.min)?;
        }

        if self.max.is_infinite() && self.max.is_sign_positive() {
            state.serialize_field("max", &serde_json::Value::Null)?;
        } else {
            state.serialize_field("max", &self.max)?;
        }

        state.end()
    }
}

impl<'de> Deserialize<'de> for Bounds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct BoundsHelper {
            #[serde(default)]
            min: Option<f64>,

            #[serde(default)]
            max: Option<f64>,
        }

        let helper = BoundsHelper::deserialize(deserializer)?;

        let min = helper.min.unwrap_or(f64::NEG_INFINITY);
        let max = helper.max.unwrap_or(f64::INFINITY);

        Ok(Bounds { min, max })
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }
}

impl Bounds {
    /// Create a new bounds constraint, or an error if min > max.
    pub fn new(min: f64, max: f64) -> Result<Self, BoundsError> {
        if min > max {
            return Err(BoundsError::InvalidBounds { min, max });
        }

        Ok(Self { min, max })
    }

    /// An unbounded constraint (negative infinity to positive infinity).
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Check if a value is within the bounds.
    pub fn is_within_bounds(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn has_lower_bound(&self) -> bool {
        self.min.is_finite()
    }

    pub fn has_upper_bound(&self) -> bool {
        self.max.is_finite()
    }

    /// Clamp a value to be within the bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Minuit-style parameter transformation for handling bounds constraints.
///
/// The optimizer works with unbounded internal values; `to_external` maps any
/// internal value onto the bounded interval (sine for two-sided bounds,
/// sqrt-shifted for one-sided), and `to_internal` inverts it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundsTransform {
    bounds: Bounds,
}

impl BoundsTransform {
    pub fn new(bounds: Bounds) -> Self {
        Self { bounds }
    }

    /// Transform an internal solver value to an external (bounded) value.
    pub fn to_external(&self, internal_value: f64) -> f64 {
        if !self.bounds.has_lower_bound() && !self.bounds.has_upper_bound() {
            return internal_value;
        }

        if self.bounds.has_lower_bound() && !self.bounds.has_upper_bound() {
            return self.bounds.min - 1.0 + (internal_value * internal_value + 1.0).sqrt();
        }

        if !self.bounds.has_lower_bound() && self.bounds.has_upper_bound() {
            return self.bounds.max + 1.0 - (internal_value * internal_value + 1.0).sqrt();
        }

        let bound_range = self.bounds.max - self.bounds.min;
        self.bounds.min + (internal_value.sin() + 1.0) * bound_range / 2.0
    }

    /// Transform an external value to an internal one, or an error if the
    /// external value is outside bounds.
    pub fn to_internal(&self, external_value: f64) -> Result<f64, BoundsError> {
        if !external_value.is_finite() {
            return Err(BoundsError::InfiniteValue);
        }

        if !self.bounds.is_within_bounds(external_value) {
            return Err(BoundsError::ValueOutsideBounds {
                value: external_value,
                min: self.bounds.min,
                max: self.bounds.max,
            });
        }

        if !self.bounds.has_lower_bound() && !self.bounds.has_upper_bound() {
            return Ok(external_value);
        }

        if self.bounds.has_lower_bound() && !self.bounds.has_upper_bound() {
            return Ok(((external_value - self.bounds.min + 1.0).powi(2) - 1.0).sqrt());
        }

        if !self.bounds.has_lower_bound() && self.bounds.has_upper_bound() {
            return Ok(((self.bounds.max - external_value + 1.0).powi(2) - 1.0).sqrt());
        }

        let bound_range = self.bounds.max - self.bounds.min;
        let scaled = 2.0 * (external_value - self.bounds.min) / bound_range - 1.0;

        // asin needs [-1, 1]; values on the boundary can drift out by an ulp
        let scaled = scaled.clamp(-1.0, 1.0);
        Ok(scaled.asin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_bounds_creation() {
        let bounds = Bounds::new(0.0, 10.0).unwrap();
        assert_eq!(bounds.min, 0.0);
        assert_eq!(bounds.max, 10.0);

        assert!(Bounds::new(10.0, 0.0).is_err());

        let bounds = Bounds::unbounded();
        assert_eq!(bounds.min, f64::NEG_INFINITY);
        assert_eq!(bounds.max, f64::INFINITY);
    }

    #[test]
    fn test_is_within_bounds() {
        let bounds = Bounds::new(0.0, 10.0).unwrap();

        assert!(bounds.is_within_bounds(0.0));
        assert!(bounds.is_within_bounds(5.0));
        assert!(bounds.is_within_bounds(10.0));

        assert!(!bounds.is_within_bounds(-1.0));
        assert!(!bounds.is_within_bounds(11.0));
    }

    #[test]
    fn test_clamp() {
        let bounds = Bounds::new(0.0, 10.0).unwrap();

        assert_eq!(bounds.clamp(-5.0), 0.0);
        assert_eq!(bounds.clamp(5.0), 5.0);
        assert_eq!(bounds.clamp(15.0), 10.0);
    }

    #[test]
    fn test_transform_unbounded_is_identity() {
        let transform = BoundsTransform::new(Bounds::unbounded());

        for &value in &[-10.0, -1.0, 0.0, 1.0, 10.0] {
            assert_eq!(transform.to_external(value), value);
            assert_eq!(transform.to_internal(value).unwrap(), value);
        }
    }

    #[test]
    fn test_transform_round_trip_two_sided() {
        let transform = BoundsTransform::new(Bounds::new(0.0, 20.0).unwrap());

        for &value in &[0.0, 0.5, 10.0, 19.5, 20.0] {
            let internal = transform.to_internal(value).unwrap();
            let external = transform.to_external(internal);
            assert_relative_eq!(external, value, epsilon = 1e-10);
        }

        // Any internal value stays inside the bounds
        for &internal in &[-100.0, -3.0, 0.0, 3.0, 100.0] {
            let external = transform.to_external(internal);
            assert!((0.0..=20.0).contains(&external));
        }
    }

    #[test]
    fn test_transform_round_trip_one_sided() {
        let transform = BoundsTransform::new(Bounds {
            min: 1.0,
            max: f64::INFINITY,
        });

        for &value in &[1.0, 2.0, 100.0] {
            let internal = transform.to_internal(value).unwrap();
            assert_relative_eq!(transform.to_external(internal), value, epsilon = 1e-10);
        }

        assert!(transform.to_external(-50.0) >= 1.0);
    }

    #[test]
    fn test_transform_rejects_out_of_bounds() {
        let transform = BoundsTransform::new(Bounds::new(0.0, 1.0).unwrap());
        assert!(transform.to_internal(2.0).is_err());
        assert!(transform.to_internal(f64::INFINITY).is_err());
    }

    #[test]
    fn test_bounds_serde_infinite_as_null() {
        let bounds = Bounds {
            min: 0.0,
            max: f64::INFINITY,
        };
        let json = serde_json::to_string(&bounds).unwrap();
        assert!(json.contains("null"));

        let back: Bounds = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bounds);
    }
}
