//! Fit-engine recovery tests on synthetic spectra.
//!
//! A measurement is synthesized from known parameter values, the start
//! point is perturbed, and the fit must walk back to the truth while
//! honoring frozen parameters and bounds.

use approx::assert_relative_eq;
use zarcfit::error::ZarcError;
use zarcfit::fit::{FitEngine, FitKind, FitRequest};
use zarcfit::{CircuitModel, CircuitVariant, ImpedanceSweep, ParameterSet, StartupConfig};

fn truth_snapshot() -> ParameterSet {
    StartupConfig::default().build_parameter_set().unwrap()
}

fn synthetic_sweep(snapshot: &ParameterSet, variant: CircuitVariant) -> ImpedanceSweep {
    let model = CircuitModel::new(variant);
    let freqs: Vec<f64> = (0..40).map(|i| 10f64.powf(-2.0 + i as f64 * 0.18)).collect();
    let z = model.evaluate(&snapshot.model_values(), &freqs).unwrap();
    let (re, im): (Vec<f64>, Vec<f64>) = z.iter().map(|z| (z.re, z.im)).unzip();
    ImpedanceSweep::from_arrays(&freqs, &re, &im).unwrap()
}

/// Freeze everything except the given names.
fn enable_only(snapshot: &mut ParameterSet, names: &[&str]) {
    for name in snapshot.names() {
        let keep = names.contains(&name.as_str());
        snapshot.get_mut(&name).unwrap().set_enabled(keep);
    }
}

#[test]
fn cole_fit_recovers_mid_arc_within_one_percent() {
    let truth = truth_snapshot();
    let sweep = synthetic_sweep(&truth, CircuitVariant::Series);

    let mut start = truth.clone();
    start.get_mut("Rm").unwrap().set_value(150.0).unwrap();
    start.get_mut("Fm").unwrap().set_value(15.0).unwrap();
    enable_only(&mut start, &["Rm", "Fm"]);

    let model = CircuitModel::new(CircuitVariant::Series);
    let request = FitRequest::new(FitKind::Cole, start);
    let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

    assert_relative_eq!(result.values["Rm"], 100.0, max_relative = 0.01);
    assert_relative_eq!(result.values["Fm"], 10.0, max_relative = 0.01);
}

#[test]
fn bode_fit_recovers_perturbed_resistance() {
    let truth = truth_snapshot();
    let sweep = synthetic_sweep(&truth, CircuitVariant::Series);

    let mut start = truth.clone();
    start.get_mut("Rl").unwrap().set_value(160.0).unwrap();
    enable_only(&mut start, &["Rl"]);

    let model = CircuitModel::new(CircuitVariant::Series);
    let request = FitRequest::new(FitKind::Bode, start);
    let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

    assert_relative_eq!(result.values["Rl"], 100.0, max_relative = 0.01);
}

#[test]
fn frozen_parameters_survive_bit_identical() {
    let truth = truth_snapshot();
    let sweep = synthetic_sweep(&truth, CircuitVariant::Series);

    let mut start = truth.clone();
    start.get_mut("Rm").unwrap().set_value(150.0).unwrap();
    enable_only(&mut start, &["Rm"]);

    let model = CircuitModel::new(CircuitVariant::Series);
    let request = FitRequest::new(FitKind::Cole, start.clone());
    let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

    for param in start.frozen() {
        assert_eq!(
            result.values[param.name()].to_bits(),
            param.value().to_bits(),
            "{} drifted during the fit",
            param.name()
        );
    }
    assert_eq!(result.varied, vec!["Rm".to_string()]);
}

#[test]
fn enabled_results_respect_bounds() {
    let truth = truth_snapshot();
    let sweep = synthetic_sweep(&truth, CircuitVariant::Series);

    let mut start = truth.clone();
    start.get_mut("Rh").unwrap().set_value(140.0).unwrap();
    start.get_mut("Ph").unwrap().set_value(0.6).unwrap();
    enable_only(&mut start, &["Rh", "Ph"]);

    let model = CircuitModel::new(CircuitVariant::Series);
    let request = FitRequest::new(FitKind::Cole, start.clone());
    let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

    for name in &result.varied {
        let bounds = start.get(name).unwrap().bounds();
        assert!(
            bounds.is_within_bounds(result.values[name]),
            "{} = {} escaped [{}, {}]",
            name,
            result.values[name],
            bounds.min,
            bounds.max
        );
    }
}

#[test]
fn parallel_variant_fits_its_own_synthetic_data() {
    let truth = truth_snapshot();
    let sweep = synthetic_sweep(&truth, CircuitVariant::Parallel);

    let mut start = truth.clone();
    start.get_mut("Rm").unwrap().set_value(130.0).unwrap();
    enable_only(&mut start, &["Rm"]);

    let model = CircuitModel::new(CircuitVariant::Parallel);
    let request = FitRequest::new(FitKind::Cole, start);
    let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

    assert_relative_eq!(result.values["Rm"], 100.0, max_relative = 0.01);
}

#[test]
fn sign_transform_active_fit_keeps_ui_value_positive() {
    // Synthesize data with a negated Rinf, then fit with the flag on:
    // the optimizer works in positive space and the result stays positive
    let truth = truth_snapshot();
    let mut store = zarcfit::ParameterStore::new(truth);
    store.set_sign_transform("Rinf", true).unwrap();
    let truth = store.snapshot();

    let sweep = synthetic_sweep(&truth, CircuitVariant::Series);

    let mut start = truth.clone();
    start.get_mut("Rinf").unwrap().set_value(14.0).unwrap();
    enable_only(&mut start, &["Rinf"]);

    let model = CircuitModel::new(CircuitVariant::Series);
    let request = FitRequest::new(FitKind::Cole, start);
    let result = FitEngine::new().fit(&model, &request, &sweep).unwrap();

    assert!(result.values["Rinf"] > 0.0);
    assert_relative_eq!(result.values["Rinf"], 10.0, max_relative = 0.01);
}

#[test]
fn empty_variable_vector_is_rejected() {
    let truth = truth_snapshot();
    let sweep = synthetic_sweep(&truth, CircuitVariant::Series);

    let mut start = truth.clone();
    enable_only(&mut start, &[]);

    let model = CircuitModel::new(CircuitVariant::Series);
    let request = FitRequest::new(FitKind::Cole, start);
    let err = FitEngine::new().fit(&model, &request, &sweep).unwrap_err();
    assert!(matches!(err, ZarcError::InvalidParameterSet(_)));
}
