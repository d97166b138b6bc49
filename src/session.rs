//! Session: the coordinating owner of a measurement's fitting state.
//!
//! The session holds the parameter store, the active circuit variant, the
//! measured sweep and the engine settings. All mutation funnels through it;
//! fits run on snapshots handed out as [`FitTask`]s, with at most one in
//! flight. A task is `Send` and can run on any worker thread; dropping it
//! (finished or abandoned) releases the in-flight slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_complex::Complex64;

use crate::circuit::{CircuitModel, CircuitVariant, SecondaryParams};
use crate::config::StartupConfig;
use crate::data::{FrequencyWindow, ImpedanceSweep};
use crate::error::{Result, ZarcError};
use crate::fit::{FitEngine, FitKind, FitRequest, FitResult};
use crate::parameters::{ParameterStore, StoreEvent};
use crate::results::{ResultsLog, ResultsRow};
use crate::timedomain::{PulseResponse, TimeDomainTransform};

/// Prior strength used for Cole fits when the Gaussian prior is enabled.
const COLE_PRIOR_WEIGHT: f64 = 1e6;

/// Prior strength used for Bode fits when the Gaussian prior is enabled.
const BODE_PRIOR_WEIGHT: f64 = 400.0;

/// One marked point of the spectrum display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecialFrequency {
    pub freq_hz: f64,
    pub z: Complex64,
}

/// Everything a display needs after a manual evaluation.
#[derive(Debug, Clone)]
pub struct ManualReport {
    /// The sweep frequencies the curves are computed on
    pub freq: Vec<f64>,

    /// Total model impedance over the sweep
    pub z_model: Vec<Complex64>,

    /// Rock response estimated from the measurement by stripping the
    /// electrode and high-frequency arc contributions
    pub z_rock_estimated: Vec<Complex64>,

    /// The three relaxation frequencies plus the 0.1 Hz reference point
    /// (the latter evaluated with the electrode influence removed)
    pub special: Vec<SpecialFrequency>,

    /// Time-domain pulse of the model rock impedance
    pub pulse: PulseResponse,

    /// Secondary parameters at the current values
    pub secondary: SecondaryParams,

    /// `Σ |z_meas - z_model|²` over the sweep
    pub mismatch: f64,

    /// `|Re Z(0.1 Hz)|` of the full model
    pub res_0p1_hz: f64,

    /// `Re Z(0.1 Hz)` with the electrode removed; the reference resistance
    pub r01: f64,
}

/// A scheduled fit: snapshot, engine and cancel token, detached from the
/// session. Consuming `run` produces the result; dropping the task frees
/// the session's single fit slot either way.
#[derive(Debug)]
pub struct FitTask {
    model: CircuitModel,
    engine: FitEngine,
    request: FitRequest,
    sweep: ImpedanceSweep,
    cancel: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
}

impl FitTask {
    /// Run the fit to completion (or cancellation) on the calling thread.
    pub fn run(self) -> Result<FitResult> {
        self.engine
            .fit_with_cancel(&self.model, &self.request, &self.sweep, &self.cancel)
    }

    pub fn kind(&self) -> FitKind {
        self.request.kind
    }
}

impl Drop for FitTask {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// The coordinating owner.
pub struct Session {
    store: ParameterStore,
    variant: CircuitVariant,
    sweep: ImpedanceSweep,
    sample_id: String,
    engine: FitEngine,
    timedomain: TimeDomainTransform,
    gaussian_prior: bool,
    in_flight: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl Session {
    pub fn new(config: &StartupConfig, variant: CircuitVariant) -> Result<Self> {
        Ok(Self {
            store: config.build_store()?,
            variant,
            sweep: ImpedanceSweep::default(),
            sample_id: String::new(),
            engine: FitEngine::new(),
            timedomain: TimeDomainTransform::new(),
            gaussian_prior: false,
            in_flight: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ParameterStore {
        &mut self.store
    }

    /// Replace the measured sweep and the sample it came from.
    pub fn set_sweep(&mut self, sweep: ImpedanceSweep, sample_id: &str) {
        self.sweep = sweep;
        self.sample_id = sample_id.to_string();
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn variant(&self) -> CircuitVariant {
        self.variant
    }

    /// Change the dispatched circuit variant. Store and engine state are
    /// untouched; only subsequent evaluations see the new model.
    pub fn switch_variant(&mut self, variant: CircuitVariant) {
        self.variant = variant;
    }

    pub fn set_gaussian_prior(&mut self, enabled: bool) {
        self.gaussian_prior = enabled;
    }

    fn model(&self) -> CircuitModel {
        CircuitModel::new(self.variant)
    }

    /// Evaluate the full display report at the current store values.
    pub fn evaluate_manual(&self) -> Result<ManualReport> {
        if self.sweep.is_empty() {
            return Err(ZarcError::DimensionMismatch(
                "no sweep loaded".to_string(),
            ));
        }

        let model = self.model();
        let snapshot = self.store.snapshot();
        let values = snapshot.model_values();
        let freqs = self.sweep.frequencies();
        let z_meas = self.sweep.impedances();

        let z_model = model.evaluate(&values, &freqs)?;
        let z_rock_estimated = model.estimate_rock(&values, &freqs, &z_meas)?;
        let secondary = model.secondary_parameters(&values)?;

        // Relaxation-frequency markers on the model curve
        let mut special = Vec::with_capacity(4);
        for name in ["Fh", "Fm", "Fl"] {
            let f = values.get(name).copied().ok_or_else(|| {
                ZarcError::InvalidParameterSet(format!("missing parameter '{}'", name))
            })?;
            let z = model.evaluate(&values, &[f])?[0];
            special.push(SpecialFrequency { freq_hz: f, z });
        }

        // The 0.1 Hz reference is taken with the electrode influence
        // pushed out of the way
        let mut no_electrode = values.clone();
        no_electrode.insert("Re".to_string(), 1e8);
        no_electrode.insert("Qe".to_string(), 1e2);
        let r01 = model.evaluate(&no_electrode, &[0.1])?[0].re;
        special.push(SpecialFrequency {
            freq_hz: 0.1,
            z: Complex64::new(r01, 0.0),
        });

        let grid = self.timedomain.frequency_grid();
        let z_rock_grid = model.evaluate_rock(&values, &grid)?;
        let pulse = self.timedomain.to_time_domain(&z_rock_grid)?;

        let mismatch = z_meas
            .iter()
            .zip(&z_model)
            .map(|(ze, zm)| (ze - zm).norm_sqr())
            .sum();
        let res_0p1_hz = model.evaluate(&values, &[0.1])?[0].re.abs();

        Ok(ManualReport {
            freq: freqs,
            z_model,
            z_rock_estimated,
            special,
            pulse,
            secondary,
            mismatch,
            res_0p1_hz,
            r01,
        })
    }

    /// Schedule a fit. At most one task exists at a time; a second request
    /// while one is alive fails with `FitAlreadyRunning`.
    pub fn begin_fit(&mut self, kind: FitKind, window: FrequencyWindow) -> Result<FitTask> {
        if self.sweep.is_empty() {
            return Err(ZarcError::DimensionMismatch(
                "no sweep loaded".to_string(),
            ));
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(ZarcError::FitAlreadyRunning);
        }
        self.cancel.store(false, Ordering::Release);

        let mut request = FitRequest::new(kind, self.store.snapshot()).with_window(window);
        if self.gaussian_prior {
            request = request.with_prior_weight(match kind {
                FitKind::Cole => COLE_PRIOR_WEIGHT,
                FitKind::Bode => BODE_PRIOR_WEIGHT,
            });
        }

        Ok(FitTask {
            model: self.model(),
            engine: self.engine.clone(),
            request,
            sweep: self.sweep.clone(),
            cancel: Arc::clone(&self.cancel),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    /// Trip the cancel token of the in-flight fit, if any. The solver
    /// notices between iterations.
    pub fn cancel_fit(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn fit_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Fold a finished fit into the store, atomically.
    pub fn apply_fit(&mut self, result: &FitResult) -> Result<()> {
        self.store.apply_result(result)
    }

    /// Assemble the export row for the current state: parameter values in
    /// export convention plus secondary parameters and time-domain
    /// integral variables.
    pub fn export_row(&self) -> Result<ResultsRow> {
        let model = self.model();
        let snapshot = self.store.snapshot();
        let values = snapshot.model_values();

        let secondary = model.secondary_parameters(&values)?.to_map();
        let grid = self.timedomain.frequency_grid();
        let z_rock = model.evaluate_rock(&values, &grid)?;
        let pulse = self.timedomain.to_time_domain(&z_rock)?;

        Ok(ResultsRow::from_parameters(
            &self.sample_id,
            &snapshot,
            secondary,
            pulse.integral_variables,
        ))
    }

    /// Restore slider state from the latest stored row for the current
    /// sample. `NoMatchingSample` propagates so the caller can fall back
    /// to defaults.
    pub fn recover_from(&mut self, log: &dyn ResultsLog) -> Result<()> {
        let row = log.find_row(&self.sample_id)?;
        let (values, sign_active) = row.recovered_values();

        for name in self.store.snapshot().names() {
            if let Some(&value) = values.get(&name) {
                // Stored rows may predate a bounds change; clamp on the way in
                let clamped = self
                    .store
                    .get(&name)
                    .map(|p| p.bounds().clamp(value))
                    .unwrap_or(value);
                self.store.set_value(&name, clamped)?;
            }
        }
        self.store.set_sign_transform("Rinf", sign_active)?;
        Ok(())
    }

    /// Subscribe to store mutations, for display refresh.
    pub fn subscribe(&mut self, listener: Box<dyn FnMut(&StoreEvent) + Send>) {
        self.store.subscribe(listener);
    }
}
