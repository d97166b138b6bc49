//! Parameter set and store
//!
//! [`ParameterSet`] is an ordered name→parameter mapping covering the full
//! vocabulary of the active circuit model. [`ParameterStore`] owns the live
//! set, serializes all mutation through its public operations, and hands out
//! immutable snapshots so an in-flight fit never observes concurrent slider
//! changes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZarcError};
use crate::fit::FitResult;
use crate::parameters::parameter::{wrap_angle, Parameter};

/// An ordered collection of parameters.
///
/// Order is insertion order (the configuration order), which also fixes the
/// layout of the fit engine's variable vector. Lookup is linear; the
/// vocabulary is small and fixed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    params: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Add a parameter. Errors if the name is already present.
    pub fn add(&mut self, param: Parameter) -> Result<()> {
        if self.contains(param.name()) {
            return Err(ZarcError::ConfigError(format!(
                "duplicate parameter '{}'",
                param.name()
            )));
        }
        self.params.push(param);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.params.iter().map(|p| p.name().to_string()).collect()
    }

    /// The subset that participates in the optimization variable vector.
    pub fn enabled(&self) -> Vec<&Parameter> {
        self.params.iter().filter(|p| p.enabled()).collect()
    }

    /// The subset held constant during a fit.
    pub fn frozen(&self) -> Vec<&Parameter> {
        self.params.iter().filter(|p| !p.enabled()).collect()
    }

    /// UI-facing values by name.
    pub fn values(&self) -> HashMap<String, f64> {
        self.params
            .iter()
            .map(|p| (p.name().to_string(), p.value()))
            .collect()
    }

    /// Model-facing values by name, with the sign transform resolved.
    /// This is the only path by which circuit evaluation receives numbers.
    pub fn model_values(&self) -> HashMap<String, f64> {
        self.params
            .iter()
            .map(|p| (p.name().to_string(), p.model_value()))
            .collect()
    }
}

/// Observable store mutations, delivered to subscribed listeners for visual
/// feedback. Notification never triggers recomputation by itself.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ValueChanged { name: String, value: f64 },
    DisabledChanged { names: Vec<String>, disabled: bool },
    SignTransformChanged { name: String, active: bool },
    ResultApplied,
    Reset,
}

type Listener = Box<dyn FnMut(&StoreEvent) + Send>;

/// The live, mutable registry of parameters.
pub struct ParameterStore {
    set: ParameterSet,
    listeners: Vec<Listener>,
}

impl std::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("set", &self.set)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ParameterStore {
    pub fn new(set: ParameterSet) -> Self {
        Self {
            set,
            listeners: Vec::new(),
        }
    }

    /// Subscribe to store mutations.
    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    fn notify(&mut self, event: StoreEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    /// An immutable copy for evaluation or fitting. Concurrent mutation of
    /// the store cannot affect a snapshot.
    pub fn snapshot(&self) -> ParameterSet {
        self.set.clone()
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.set.get(name)
    }

    /// Slider path: set a UI-facing value, bounds-checked.
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<()> {
        let param = self
            .set
            .get_mut(name)
            .ok_or_else(|| ZarcError::InvalidParameterSet(format!("unknown parameter '{}'", name)))?;
        param.set_value(value)?;
        self.notify(StoreEvent::ValueChanged {
            name: name.to_string(),
            value,
        });
        Ok(())
    }

    /// Mark parameters as excluded from (or re-included in) the fit's
    /// variable vector. Values are untouched; a disabled parameter keeps
    /// feeding the model at its stored value.
    pub fn set_disabled(&mut self, names: &[&str], disabled: bool) -> Result<()> {
        for name in names {
            if !self.set.contains(name) {
                return Err(ZarcError::InvalidParameterSet(format!(
                    "unknown parameter '{}'",
                    name
                )));
            }
        }
        for name in names {
            if let Some(param) = self.set.get_mut(name) {
                param.set_enabled(!disabled);
            }
        }
        self.notify(StoreEvent::DisabledChanged {
            names: names.iter().map(|s| s.to_string()).collect(),
            disabled,
        });
        Ok(())
    }

    /// Toggle the sign transform on the designated parameter. The stored
    /// positive UI value is untouched; only the model-facing value flips.
    pub fn set_sign_transform(&mut self, name: &str, active: bool) -> Result<()> {
        let param = self
            .set
            .get_mut(name)
            .ok_or_else(|| ZarcError::InvalidParameterSet(format!("unknown parameter '{}'", name)))?;
        if !param.is_sign_designated() {
            return Err(ZarcError::InvalidParameterSet(format!(
                "parameter '{}' does not carry the sign-transform designation",
                name
            )));
        }
        param.set_sign_active(active);
        self.notify(StoreEvent::SignTransformChanged {
            name: name.to_string(),
            active,
        });
        Ok(())
    }

    /// Fold a fit result into the store: best-fit values for the parameters
    /// that were enabled at request time, everything else untouched.
    ///
    /// All names are validated before any value is written, so a failing
    /// apply leaves the store exactly as it was.
    pub fn apply_result(&mut self, result: &FitResult) -> Result<()> {
        for name in &result.varied {
            if !self.set.contains(name) {
                return Err(ZarcError::InvalidParameterSet(format!(
                    "fit result names unknown parameter '{}'",
                    name
                )));
            }
            if !result.values.contains_key(name) {
                return Err(ZarcError::InvalidParameterSet(format!(
                    "fit result is missing a value for '{}'",
                    name
                )));
            }
        }

        for name in &result.varied {
            let value = result.values[name];
            let param = self.set.get_mut(name).expect("validated above");
            // The wrap-output parameter is stored post-wrap and may sit
            // outside any configured bounds; everything else was produced
            // inside its bounds by the solver transform.
            if param.wraps_output() {
                param.set_value_unchecked(wrap_angle(value));
            } else {
                param.set_value_unchecked(value);
            }
        }

        self.notify(StoreEvent::ResultApplied);
        Ok(())
    }

    /// Reset every parameter to its configured default value.
    pub fn reset_all(&mut self) {
        for name in self.set.names() {
            if let Some(param) = self.set.get_mut(&name) {
                param.reset();
            }
        }
        self.notify(StoreEvent::Reset);
    }
}
