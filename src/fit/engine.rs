//! Fit engine: from a parameter snapshot and a measured sweep to a
//! least-squares problem and back.
//!
//! The engine owns the scaling conventions. Exponential-slider parameters
//! optimize as `log10(value)`, linear-slider ones as `value × 10`; bounds
//! are scaled the same way and then folded into the solver through the
//! sine/sqrt bounds transform, so the Levenberg-Marquardt core itself runs
//! unconstrained. The electrode phase angle is carved out of the general
//! bound construction and optimizes fully unbounded; its raw result is
//! wrapped onto `[-1, 3)` afterwards.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;

use ndarray::Array1;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::circuit::CircuitModel;
use crate::data::{FrequencyWindow, ImpedanceSweep};
use crate::error::{Result, ZarcError};
use crate::fit::problem::Problem;
use crate::fit::solver::{LevenbergMarquardt, LmConfig};
use crate::parameters::{wrap_angle, Bounds, BoundsTransform, ParameterSet, SliderKind};

/// Residual value substituted when the circuit model cannot be evaluated at
/// a trial point; keeps the solver moving instead of aborting.
const EVAL_FAILURE_PENALTY: f64 = 1e6;

/// Scale factor on the relaxation-frequency ordering penalty.
const ORDERING_PENALTY_SCALE: f64 = 1e4;

/// Which coordinates the residuals are computed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitKind {
    /// Cartesian: real and imaginary parts of Z.
    Cole,
    /// Polar: log magnitude and log of the absolute phase in degrees.
    Bode,
}

/// Everything a fit needs, captured at request time. The snapshot decouples
/// the running fit from concurrent store mutation.
#[derive(Debug, Clone)]
pub struct FitRequest {
    pub kind: FitKind,
    pub window: FrequencyWindow,
    pub snapshot: ParameterSet,
    /// Gaussian-prior strength; `None` disables the prior and the ordering
    /// penalty.
    pub prior_weight: Option<f64>,
}

impl FitRequest {
    pub fn new(kind: FitKind, snapshot: ParameterSet) -> Self {
        Self {
            kind,
            window: FrequencyWindow::Full,
            snapshot,
            prior_weight: None,
        }
    }

    pub fn with_window(mut self, window: FrequencyWindow) -> Self {
        self.window = window;
        self
    }

    pub fn with_prior_weight(mut self, weight: f64) -> Self {
        self.prior_weight = Some(weight);
        self
    }
}

/// Solver outcome summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitStatus {
    pub iterations: usize,
    pub cost: f64,
    pub message: String,
}

/// Best-fit values for the full vocabulary (frozen parameters merged back
/// unchanged) plus the names that actually varied. Ephemeral; the store is
/// only updated through `ParameterStore::apply_result`.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub values: HashMap<String, f64>,
    pub varied: Vec<String>,
    pub status: FitStatus,
}

/// Map a UI-facing value into optimizer space.
fn scale_value(slider: SliderKind, name: &str, value: f64) -> Result<f64> {
    match slider {
        SliderKind::Linear => Ok(value * 10.0),
        SliderKind::Exponential => {
            if value <= 0.0 {
                Err(ZarcError::InvalidParameterSet(format!(
                    "parameter '{}' must be > 0 to optimize in log space, got {}",
                    name, value
                )))
            } else {
                Ok(value.log10())
            }
        }
    }
}

/// Inverse of [`scale_value`].
fn descale_value(slider: SliderKind, x: f64) -> f64 {
    match slider {
        SliderKind::Linear => x / 10.0,
        SliderKind::Exponential => 10f64.powf(x),
    }
}

/// Scale a bound endpoint. A non-positive endpoint of a log-scaled
/// parameter degenerates to an open side.
fn scale_bound(slider: SliderKind, bound: f64) -> f64 {
    match slider {
        SliderKind::Linear => {
            if bound.is_finite() {
                bound * 10.0
            } else {
                bound
            }
        }
        SliderKind::Exponential => {
            if !bound.is_finite() {
                bound
            } else if bound <= 0.0 {
                f64::NEG_INFINITY
            } else {
                bound.log10()
            }
        }
    }
}

/// One optimization variable: an enabled parameter with its scaling and
/// bound handling resolved.
#[derive(Debug, Clone)]
struct FitVariable {
    name: String,
    slider: SliderKind,
    wrap_output: bool,
    transform: BoundsTransform,
    x0_scaled: f64,
    scaled_range: f64,
}

/// The assembled least-squares problem over internal (unconstrained)
/// variables.
struct CircuitProblem<'a> {
    model: &'a CircuitModel,
    kind: FitKind,
    freqs: Vec<f64>,
    z_meas: Vec<Complex64>,
    vars: &'a [FitVariable],
    frozen: HashMap<String, f64>,
    negated: Vec<String>,
    prior_weight: Option<f64>,
}

impl<'a> CircuitProblem<'a> {
    /// UI-facing value map at an internal solver point.
    fn ui_values(&self, params: &Array1<f64>) -> HashMap<String, f64> {
        let mut full = self.frozen.clone();
        for (var, &internal) in self.vars.iter().zip(params.iter()) {
            let external = var.transform.to_external(internal);
            full.insert(var.name.clone(), descale_value(var.slider, external));
        }
        full
    }

    /// The same map with the sign transform resolved for the model.
    fn model_values(&self, ui: &HashMap<String, f64>) -> HashMap<String, f64> {
        let mut model = ui.clone();
        for name in &self.negated {
            if let Some(v) = model.get_mut(name) {
                *v = -*v;
            }
        }
        model
    }

    /// Residual down-weighting towards ideal (P → 1) arcs.
    fn weight(&self, values: &HashMap<String, f64>) -> f64 {
        ["Ph", "Pm", "Pl", "Pef"]
            .iter()
            .map(|name| values.get(*name).copied().unwrap_or(1.0))
            .map(|p| 1.0 + 3.0 * (-15.0 * p).exp())
            .product()
    }

    fn spectrum_residuals(&self, z_model: &[Complex64], weight: f64, out: &mut Vec<f64>) {
        match self.kind {
            FitKind::Cole => {
                for (zm, ze) in z_model.iter().zip(&self.z_meas) {
                    out.push((zm.re - ze.re) * weight);
                }
                for (zm, ze) in z_model.iter().zip(&self.z_meas) {
                    out.push((zm.im - ze.im) * weight);
                }
            }
            FitKind::Bode => {
                for (zm, ze) in z_model.iter().zip(&self.z_meas) {
                    out.push((zm.norm().log10() - ze.norm().log10()) * weight);
                }
                for (zm, ze) in z_model.iter().zip(&self.z_meas) {
                    let phase_model = zm.im.atan2(zm.re).to_degrees();
                    let phase_meas = ze.im.atan2(ze.re).to_degrees();
                    let res = (phase_model.abs() + 1e-10).log10() - (phase_meas.abs() + 1e-10).log10();
                    out.push(res * weight);
                }
            }
        }
    }

    fn prior_residuals(&self, params: &Array1<f64>, ui: &HashMap<String, f64>, out: &mut Vec<f64>) {
        let weight = match self.prior_weight {
            Some(w) => w,
            None => return,
        };

        // Gaussian pull towards the starting point, in scaled space, with a
        // sigma of five bound widths; unbounded variables feel no pull
        for (var, &internal) in self.vars.iter().zip(params.iter()) {
            let external = var.transform.to_external(internal);
            let res = if var.scaled_range.is_finite() {
                weight * (external - var.x0_scaled) / (5.0 * var.scaled_range)
            } else {
                0.0
            };
            out.push(res);
        }

        // Relaxation frequencies must stay ordered Fh >= Fm >= Fl
        let fh = ui.get("Fh").copied().unwrap_or(0.0);
        let fm = ui.get("Fm").copied().unwrap_or(0.0);
        let fl = ui.get("Fl").copied().unwrap_or(0.0);
        out.push((fm - fh).max(0.0) * ORDERING_PENALTY_SCALE * weight);
        out.push((fl - fm).max(0.0) * ORDERING_PENALTY_SCALE * weight);
    }
}

impl<'a> Problem for CircuitProblem<'a> {
    fn eval(&self, params: &Array1<f64>) -> Result<Array1<f64>> {
        let ui = self.ui_values(params);
        let model_values = self.model_values(&ui);

        let z_model = match self.model.evaluate(&model_values, &self.freqs) {
            Ok(z) => z,
            Err(_) => {
                return Ok(Array1::from_elem(self.residual_count(), EVAL_FAILURE_PENALTY));
            }
        };

        let weight = self.weight(&ui);
        let mut out = Vec::with_capacity(self.residual_count());
        self.spectrum_residuals(&z_model, weight, &mut out);
        self.prior_residuals(params, &ui, &mut out);
        Ok(Array1::from_vec(out))
    }

    fn parameter_count(&self) -> usize {
        self.vars.len()
    }

    fn residual_count(&self) -> usize {
        let prior = if self.prior_weight.is_some() {
            self.vars.len() + 2
        } else {
            0
        };
        2 * self.freqs.len() + prior
    }
}

/// Drives fits over snapshots of the parameter store.
#[derive(Debug, Clone, Default)]
pub struct FitEngine {
    config: LmConfig,
}

impl FitEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn fit(
        &self,
        model: &CircuitModel,
        request: &FitRequest,
        sweep: &ImpedanceSweep,
    ) -> Result<FitResult> {
        let never = AtomicBool::new(false);
        self.fit_with_cancel(model, request, sweep, &never)
    }

    /// Run the fit, polling the cancel token between solver iterations.
    /// Cancellation surfaces as `FitDidNotConverge` with the last iterate.
    pub fn fit_with_cancel(
        &self,
        model: &CircuitModel,
        request: &FitRequest,
        sweep: &ImpedanceSweep,
        cancel: &AtomicBool,
    ) -> Result<FitResult> {
        let windowed = sweep.windowed(&request.window)?;
        if windowed.is_empty() {
            return Err(ZarcError::DimensionMismatch(
                "cannot fit against an empty sweep".to_string(),
            ));
        }

        let enabled = request.snapshot.enabled();
        if enabled.is_empty() {
            return Err(ZarcError::InvalidParameterSet(
                "no enabled parameters to fit".to_string(),
            ));
        }

        let mut vars = Vec::with_capacity(enabled.len());
        let mut x0_internal = Vec::with_capacity(enabled.len());
        for param in &enabled {
            let slider = param.slider;
            let x0_scaled = scale_value(slider, param.name(), param.value())?;

            let scaled_bounds = if param.wraps_output() {
                // The phase angle optimizes unbounded; the result is
                // wrapped after the solve
                Bounds::unbounded()
            } else {
                Bounds::new(
                    scale_bound(slider, param.bounds().min),
                    scale_bound(slider, param.bounds().max),
                )?
            };

            let transform = BoundsTransform::new(scaled_bounds);
            let x0_clamped = scaled_bounds.clamp(x0_scaled);
            x0_internal.push(transform.to_internal(x0_clamped)?);
            vars.push(FitVariable {
                name: param.name().to_string(),
                slider,
                wrap_output: param.wraps_output(),
                transform,
                x0_scaled: x0_clamped,
                scaled_range: scaled_bounds.max - scaled_bounds.min,
            });
        }

        let frozen: HashMap<String, f64> = request
            .snapshot
            .frozen()
            .iter()
            .map(|p| (p.name().to_string(), p.value()))
            .collect();
        let negated: Vec<String> = request
            .snapshot
            .iter()
            .filter(|p| p.is_sign_designated() && p.sign_transform_active())
            .map(|p| p.name().to_string())
            .collect();

        let problem = CircuitProblem {
            model,
            kind: request.kind,
            freqs: windowed.frequencies(),
            z_meas: windowed.impedances(),
            vars: &vars,
            frozen: frozen.clone(),
            negated,
            prior_weight: request.prior_weight,
        };

        let solver = LevenbergMarquardt::with_config(self.config.clone());
        let lm = solver.minimize_with_cancel(&problem, Array1::from_vec(x0_internal), cancel)?;

        // Back to UI space: unscale, wrap the phase angle, merge frozen
        let mut values = frozen;
        let mut varied = Vec::with_capacity(vars.len());
        for (var, &internal) in vars.iter().zip(lm.params.iter()) {
            let external = var.transform.to_external(internal);
            let mut value = descale_value(var.slider, external);
            if var.wrap_output {
                value = wrap_angle(value);
            }
            values.insert(var.name.clone(), value);
            varied.push(var.name.clone());
        }

        if !lm.success {
            return Err(ZarcError::FitDidNotConverge {
                message: lm.message,
                last_iterate: values,
            });
        }

        Ok(FitResult {
            values,
            varied,
            status: FitStatus {
                iterations: lm.iterations,
                cost: lm.cost,
                message: lm.message,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitVariant;
    use crate::parameters::{Parameter, ParameterGroup};
    use approx::assert_relative_eq;

    fn param(
        name: &str,
        value: f64,
        min: f64,
        max: f64,
        slider: SliderKind,
        group: ParameterGroup,
    ) -> Parameter {
        Parameter::with_bounds(name, value, min, max)
            .unwrap()
            .with_slider(slider)
            .in_group(group)
    }

    fn full_snapshot() -> ParameterSet {
        use ParameterGroup::*;
        use SliderKind::*;

        let mut set = ParameterSet::new();
        let table = [
            ("Rinf", 10.0, 1e-1, 1e4, Exponential, External),
            ("Linf", 1e-3, 1e-7, 1.0, Exponential, External),
            ("Rh", 20.0, 1e-1, 1e6, Exponential, HighFrequency),
            ("Fh", 100.0, 1e-2, 1e6, Exponential, HighFrequency),
            ("Ph", 0.8, 0.0, 1.0, Linear, HighFrequency),
            ("Rm", 30.0, 1e-1, 1e6, Exponential, MidFrequency),
            ("Fm", 10.0, 1e-2, 1e6, Exponential, MidFrequency),
            ("Pm", 0.6, 0.0, 1.0, Linear, MidFrequency),
            ("Rl", 40.0, 1e-1, 1e6, Exponential, LowFrequency),
            ("Fl", 1.0, 1e-2, 1e6, Exponential, LowFrequency),
            ("Pl", 0.4, 0.0, 1.0, Linear, LowFrequency),
            ("Re", 50.0, 1e-1, 1e6, Exponential, External),
            ("Qe", 0.9, 1e-7, 1e2, Exponential, External),
            ("Pef", 0.7, 0.0, 1.0, Linear, External),
            ("Pei", 0.5, -1.0, 3.0, Linear, External),
        ];
        for (name, value, min, max, slider, group) in table {
            let mut p = param(name, value, min, max, slider, group);
            if name == "Rinf" {
                p = p.with_sign_designation();
            }
            if name == "Pei" {
                p = p.with_wrap_output();
            }
            set.add(p).unwrap();
        }
        set
    }

    fn synthetic_sweep(snapshot: &ParameterSet) -> ImpedanceSweep {
        let model = CircuitModel::new(CircuitVariant::Series);
        let freqs: Vec<f64> = (0..30).map(|i| 10f64.powf(-1.0 + i as f64 * 0.2)).collect();
        let z = model.evaluate(&snapshot.model_values(), &freqs).unwrap();
        let (re, im): (Vec<f64>, Vec<f64>) = z.iter().map(|z| (z.re, z.im)).unzip();
        ImpedanceSweep::from_arrays(&freqs, &re, &im).unwrap()
    }

    #[test]
    fn test_scaling_round_trip() {
        assert_relative_eq!(
            descale_value(SliderKind::Exponential, scale_value(SliderKind::Exponential, "R", 123.0).unwrap()),
            123.0,
            epsilon = 1e-10
        );
        assert_relative_eq!(
            descale_value(SliderKind::Linear, scale_value(SliderKind::Linear, "P", 0.7).unwrap()),
            0.7,
            epsilon = 1e-12
        );
        assert!(scale_value(SliderKind::Exponential, "R", -1.0).is_err());
    }

    #[test]
    fn test_recovers_perturbed_resistance() {
        let truth = full_snapshot();
        let sweep = synthetic_sweep(&truth);

        // Perturb Rm and fit it back with everything else frozen
        let mut start = truth.clone();
        start.get_mut("Rm").unwrap().set_value(45.0).unwrap();
        for name in start.names() {
            if name != "Rm" {
                start.get_mut(&name).unwrap().set_enabled(false);
            }
        }

        let model = CircuitModel::new(CircuitVariant::Series);
        let request = FitRequest::new(FitKind::Cole, start);
        let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

        assert_relative_eq!(result.values["Rm"], 30.0, max_relative = 0.01);
        assert_eq!(result.varied, vec!["Rm".to_string()]);
    }

    #[test]
    fn test_frozen_parameters_bit_identical() {
        let truth = full_snapshot();
        let sweep = synthetic_sweep(&truth);

        let mut start = truth.clone();
        start.get_mut("Rm").unwrap().set_value(45.0).unwrap();
        for name in start.names() {
            if name != "Rm" {
                start.get_mut(&name).unwrap().set_enabled(false);
            }
        }

        let model = CircuitModel::new(CircuitVariant::Series);
        let request = FitRequest::new(FitKind::Cole, start.clone());
        let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

        for p in start.frozen() {
            assert_eq!(result.values[p.name()].to_bits(), p.value().to_bits());
        }
    }

    #[test]
    fn test_enabled_results_stay_inside_bounds() {
        let truth = full_snapshot();
        let sweep = synthetic_sweep(&truth);

        let mut start = truth.clone();
        start.get_mut("Rh").unwrap().set_value(25.0).unwrap();
        start.get_mut("Rm").unwrap().set_value(35.0).unwrap();
        for name in start.names() {
            if name != "Rh" && name != "Rm" {
                start.get_mut(&name).unwrap().set_enabled(false);
            }
        }

        let model = CircuitModel::new(CircuitVariant::Series);
        let request = FitRequest::new(FitKind::Bode, start.clone());
        let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

        for name in &result.varied {
            let bounds = start.get(name).unwrap().bounds();
            assert!(bounds.is_within_bounds(result.values[name]), "{}", name);
        }
    }

    #[test]
    fn test_budget_exhaustion_carries_last_iterate() {
        let truth = full_snapshot();
        let sweep = synthetic_sweep(&truth);

        let mut start = truth.clone();
        start.get_mut("Rm").unwrap().set_value(45.0).unwrap();
        for name in start.names() {
            if name != "Rm" {
                start.get_mut(&name).unwrap().set_enabled(false);
            }
        }

        let mut config = LmConfig::default();
        config.max_iterations = 1;
        config.ftol = 0.0;
        config.xtol = 0.0;
        config.gtol = 0.0;

        let model = CircuitModel::new(CircuitVariant::Series);
        let request = FitRequest::new(FitKind::Cole, start);
        let err = FitEngine::with_config(config)
            .fit(&model, &request, &sweep)
            .unwrap_err();

        match err {
            ZarcError::FitDidNotConverge { last_iterate, .. } => {
                assert!(last_iterate.contains_key("Rm"));
                assert_eq!(last_iterate.len(), 15);
            }
            other => panic!("expected FitDidNotConverge, got {}", other),
        }
    }

    #[test]
    fn test_prior_adds_residuals() {
        let snapshot = full_snapshot();
        let sweep = synthetic_sweep(&snapshot);
        let model = CircuitModel::new(CircuitVariant::Series);

        let plain = FitRequest::new(FitKind::Cole, snapshot.clone());
        let with_prior = FitRequest::new(FitKind::Cole, snapshot).with_prior_weight(1.0);

        let engine = FitEngine::new();
        let r1 = engine.fit(&model, &plain, &sweep).unwrap();
        let r2 = engine.fit(&model, &with_prior, &sweep).unwrap();

        // Starting at the truth, both should stay there
        assert_relative_eq!(r1.values["Rm"], 30.0, max_relative = 0.01);
        assert_relative_eq!(r2.values["Rm"], 30.0, max_relative = 0.01);
    }

    #[test]
    fn test_pei_result_is_wrapped() {
        let truth = full_snapshot();
        let sweep = synthetic_sweep(&truth);

        let mut start = truth.clone();
        for name in start.names() {
            if name != "Pei" {
                start.get_mut(&name).unwrap().set_enabled(false);
            }
        }

        let model = CircuitModel::new(CircuitVariant::Series);
        let request = FitRequest::new(FitKind::Cole, start);
        let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

        let pei = result.values["Pei"];
        assert!((-1.0..3.0).contains(&pei), "Pei = {}", pei);
    }
}
