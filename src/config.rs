//! Startup configuration.
//!
//! The parameter vocabulary (defaults, bounds, slider kinds, groups) is
//! defined in an explicit configuration object built once at startup and
//! passed to whoever needs it. The built-in table mirrors the exponential
//! slider convention: resistances, frequencies and coefficients move in
//! powers of ten, phase exponents move linearly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::circuit::PARAMETER_NAMES;
use crate::error::{Result, ZarcError};
use crate::parameters::{Parameter, ParameterGroup, ParameterSet, ParameterStore, SliderKind};

/// Configuration entry for one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub default: f64,
    pub min: f64,
    pub max: f64,
    pub slider: SliderKind,
    pub group: ParameterGroup,

    /// Start excluded from the fit's variable vector.
    #[serde(default)]
    pub disabled: bool,
}

impl ParameterSpec {
    fn new(
        name: &str,
        default: f64,
        min: f64,
        max: f64,
        slider: SliderKind,
        group: ParameterGroup,
    ) -> Self {
        Self {
            name: name.to_string(),
            default,
            min,
            max,
            slider,
            group,
            disabled: false,
        }
    }
}

/// Top-level startup configuration. Loaded from JSON, or built from the
/// default table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    pub parameters: Vec<ParameterSpec>,

    /// Gaussian-prior strength handed to fits when the prior is requested.
    #[serde(default)]
    pub prior_weight: Option<f64>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        use ParameterGroup::*;
        use SliderKind::*;

        let table = [
            ParameterSpec::new("Rinf", 10.0, 1e-2, 1e5, Exponential, External),
            ParameterSpec::new("Linf", 1e-4, 1e-8, 1.0, Exponential, External),
            ParameterSpec::new("Rh", 100.0, 1e-1, 1e7, Exponential, HighFrequency),
            ParameterSpec::new("Fh", 1e3, 1e-2, 1e7, Exponential, HighFrequency),
            ParameterSpec::new("Ph", 0.8, 0.0, 1.0, Linear, HighFrequency),
            ParameterSpec::new("Rm", 100.0, 1e-1, 1e7, Exponential, MidFrequency),
            ParameterSpec::new("Fm", 10.0, 1e-3, 1e6, Exponential, MidFrequency),
            ParameterSpec::new("Pm", 0.7, 0.0, 1.0, Linear, MidFrequency),
            ParameterSpec::new("Rl", 100.0, 1e-1, 1e7, Exponential, LowFrequency),
            ParameterSpec::new("Fl", 0.1, 1e-4, 1e5, Exponential, LowFrequency),
            ParameterSpec::new("Pl", 0.6, 0.0, 1.0, Linear, LowFrequency),
            ParameterSpec::new("Re", 1e3, 1e-1, 1e8, Exponential, External),
            ParameterSpec::new("Qe", 1e-3, 1e-9, 1e2, Exponential, External),
            ParameterSpec::new("Pef", 0.8, 0.0, 1.0, Linear, External),
            ParameterSpec::new("Pei", 0.5, -1.0, 3.0, Linear, External),
        ];
        Self {
            parameters: table.to_vec(),
            prior_weight: None,
        }
    }
}

impl StartupConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StartupConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The full vocabulary must be present exactly once.
    pub fn validate(&self) -> Result<()> {
        for name in PARAMETER_NAMES {
            let count = self.parameters.iter().filter(|p| p.name == name).count();
            if count == 0 {
                return Err(ZarcError::ConfigError(format!(
                    "configuration is missing parameter '{}'",
                    name
                )));
            }
            if count > 1 {
                return Err(ZarcError::ConfigError(format!(
                    "parameter '{}' is defined {} times",
                    name, count
                )));
            }
        }
        for spec in &self.parameters {
            if !PARAMETER_NAMES.contains(&spec.name.as_str()) {
                return Err(ZarcError::ConfigError(format!(
                    "unknown parameter '{}' in configuration",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Build the ordered parameter set, attaching the sign and wrap
    /// designations to their carriers.
    pub fn build_parameter_set(&self) -> Result<ParameterSet> {
        self.validate()?;
        let mut set = ParameterSet::new();
        for spec in &self.parameters {
            let mut param = Parameter::with_bounds(&spec.name, spec.default, spec.min, spec.max)?
                .in_group(spec.group)
                .with_slider(spec.slider);
            if spec.name == "Rinf" {
                param = param.with_sign_designation();
            }
            if spec.name == "Pei" {
                param = param.with_wrap_output();
            }
            param.set_enabled(!spec.disabled);
            set.add(param)?;
        }
        Ok(set)
    }

    pub fn build_store(&self) -> Result<ParameterStore> {
        Ok(ParameterStore::new(self.build_parameter_set()?))
    }
}
