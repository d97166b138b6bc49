//! Circuit model evaluation
//!
//! Two variants of the same element vocabulary: a series composition of
//! relaxation arcs, and a parallel ladder built from derived secondary
//! parameters. Evaluation is pure: a name→value map plus a frequency array
//! in, complex impedances out. The model never sees sliders, transforms or
//! fit state; it receives final numeric values only.

use std::collections::HashMap;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::circuit::elements::{cpe, inductor, parallel, q_from_f0};
use crate::error::{Result, ZarcError};

/// The full parameter vocabulary both variants draw from.
pub const PARAMETER_NAMES: [&str; 15] = [
    "Rinf", "Linf", "Rh", "Fh", "Ph", "Rm", "Fm", "Pm", "Rl", "Fl", "Pl", "Re", "Qe", "Pef",
    "Pei",
];

/// Which composition of the element vocabulary to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitVariant {
    Series,
    Parallel,
}

fn get(values: &HashMap<String, f64>, name: &str) -> Result<f64> {
    values
        .get(name)
        .copied()
        .ok_or_else(|| ZarcError::InvalidParameterSet(format!("missing parameter '{}'", name)))
}

/// Derived quantities shared by both variants.
///
/// `qh/qm/ql` are the arc CPE coefficients recovered from the relaxation
/// frequencies. The `p_*` family is the series→parallel ladder equivalent
/// used by the parallel variant; the capacitances are display-only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondaryParams {
    pub qh: f64,
    pub qm: f64,
    pub ql: f64,
    pub r0: f64,
    pub p_rh: f64,
    pub p_qh: f64,
    pub p_rm: f64,
    pub p_qm: f64,
    pub p_rl: f64,
    pub p_ql: f64,
    pub ch: f64,
    pub p_ch: f64,
    pub cm: f64,
    pub p_cm: f64,
    pub cl: f64,
    pub p_cl: f64,
}

impl SecondaryParams {
    pub fn compute(values: &HashMap<String, f64>) -> Result<Self> {
        let rinf = get(values, "Rinf")?;
        let (rh, fh, ph) = (get(values, "Rh")?, get(values, "Fh")?, get(values, "Ph")?);
        let (rm, fm, pm) = (get(values, "Rm")?, get(values, "Fm")?, get(values, "Pm")?);
        let (rl, fl, pl) = (get(values, "Rl")?, get(values, "Fl")?, get(values, "Pl")?);

        let qh = q_from_f0(rh, fh, ph)?;
        let qm = q_from_f0(rm, fm, pm)?;
        let ql = q_from_f0(rl, fl, pl)?;

        // Cumulative series resistances seen from outside each arc
        let s_h = rinf + rh;
        let s_m = s_h + rm;
        let s_l = s_m + rl;

        let ch = 1.0 / (2.0 * PI * fh * rh);
        let cm = 1.0 / (2.0 * PI * fm * rm);
        let cl = 1.0 / (2.0 * PI * fl * rl);

        Ok(Self {
            qh,
            qm,
            ql,
            r0: s_l,
            p_rh: rinf * s_h / rh,
            p_qh: qh * (rh / s_h).powi(2),
            p_rm: s_h * s_m / rm,
            p_qm: qm * (rm / s_m).powi(2),
            p_rl: s_m * s_l / rl,
            p_ql: ql * (rl / s_l).powi(2),
            ch,
            p_ch: ch * (rh / s_h).powi(2),
            cm,
            p_cm: cm * (rm / s_m).powi(2),
            cl,
            p_cl: cl * (rl / s_l).powi(2),
        })
    }

    /// Name→value form for export rows.
    pub fn to_map(&self) -> HashMap<String, f64> {
        let mut map = HashMap::new();
        map.insert("Qh".to_string(), self.qh);
        map.insert("Qm".to_string(), self.qm);
        map.insert("Ql".to_string(), self.ql);
        map.insert("R0".to_string(), self.r0);
        map.insert("pRh".to_string(), self.p_rh);
        map.insert("pQh".to_string(), self.p_qh);
        map.insert("pRm".to_string(), self.p_rm);
        map.insert("pQm".to_string(), self.p_qm);
        map.insert("pRl".to_string(), self.p_rl);
        map.insert("pQl".to_string(), self.p_ql);
        map.insert("Ch".to_string(), self.ch);
        map.insert("pCh".to_string(), self.p_ch);
        map.insert("Cm".to_string(), self.cm);
        map.insert("pCm".to_string(), self.p_cm);
        map.insert("Cl".to_string(), self.cl);
        map.insert("pCl".to_string(), self.p_cl);
        map
    }
}

/// Pure impedance evaluator for one circuit variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitModel {
    variant: CircuitVariant,
}

impl CircuitModel {
    pub fn new(variant: CircuitVariant) -> Self {
        Self { variant }
    }

    pub fn variant(&self) -> CircuitVariant {
        self.variant
    }

    /// Check that every required name is present before evaluation.
    pub fn validate(&self, values: &HashMap<String, f64>) -> Result<()> {
        let missing: Vec<&str> = PARAMETER_NAMES
            .iter()
            .filter(|name| !values.contains_key(**name))
            .copied()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ZarcError::InvalidParameterSet(format!(
                "missing parameters: {}",
                missing.join(", ")
            )))
        }
    }

    /// Total circuit impedance over the frequency array.
    pub fn evaluate(&self, values: &HashMap<String, f64>, freqs: &[f64]) -> Result<Vec<Complex64>> {
        self.validate(values)?;
        let sec = SecondaryParams::compute(values)?;
        match self.variant {
            CircuitVariant::Series => self.series_total(values, &sec, freqs),
            CircuitVariant::Parallel => self.parallel_total(values, &sec, freqs),
        }
    }

    /// The rock-only sub-circuit (mid + low arcs; no instrument, high arc
    /// or electrode terms).
    pub fn evaluate_rock(
        &self,
        values: &HashMap<String, f64>,
        freqs: &[f64],
    ) -> Result<Vec<Complex64>> {
        self.validate(values)?;
        let sec = SecondaryParams::compute(values)?;
        match self.variant {
            CircuitVariant::Series => self.series_rock(values, &sec, freqs),
            CircuitVariant::Parallel => self.parallel_rock(values, &sec, freqs),
        }
    }

    /// Estimate the rock response hiding in a measured spectrum by
    /// subtracting the electrode and high-frequency arc contributions.
    pub fn estimate_rock(
        &self,
        values: &HashMap<String, f64>,
        freqs: &[f64],
        measured: &[Complex64],
    ) -> Result<Vec<Complex64>> {
        if freqs.len() != measured.len() {
            return Err(ZarcError::DimensionMismatch(format!(
                "{} frequencies but {} measured impedances",
                freqs.len(),
                measured.len()
            )));
        }
        self.validate(values)?;
        let sec = SecondaryParams::compute(values)?;

        let (qe, pef, pei) = (get(values, "Qe")?, get(values, "Pef")?, get(values, "Pei")?);
        let re = get(values, "Re")?;
        let (rh, ph) = (get(values, "Rh")?, get(values, "Ph")?);

        let mut estimated = Vec::with_capacity(freqs.len());
        for (&f, &z_meas) in freqs.iter().zip(measured) {
            let zarce = parallel(cpe(f, qe, pef, pei)?, Complex64::new(re, 0.0))?;
            let zarch = parallel(cpe(f, sec.qh, ph, ph)?, Complex64::new(rh, 0.0))?;
            estimated.push(z_meas - (zarch + zarce - rh));
        }
        Ok(estimated)
    }

    /// Secondary parameters for an already-validated value map.
    pub fn secondary_parameters(&self, values: &HashMap<String, f64>) -> Result<SecondaryParams> {
        self.validate(values)?;
        SecondaryParams::compute(values)
    }

    fn series_rock(
        &self,
        values: &HashMap<String, f64>,
        sec: &SecondaryParams,
        freqs: &[f64],
    ) -> Result<Vec<Complex64>> {
        let (rm, pm) = (get(values, "Rm")?, get(values, "Pm")?);
        let (rl, pl) = (get(values, "Rl")?, get(values, "Pl")?);

        let mut z = Vec::with_capacity(freqs.len());
        for &f in freqs {
            let zarcm = parallel(cpe(f, sec.qm, pm, pm)?, Complex64::new(rm, 0.0))?;
            let zarcl = parallel(cpe(f, sec.ql, pl, pl)?, Complex64::new(rl, 0.0))?;
            z.push(zarcm + zarcl);
        }
        Ok(z)
    }

    fn series_total(
        &self,
        values: &HashMap<String, f64>,
        sec: &SecondaryParams,
        freqs: &[f64],
    ) -> Result<Vec<Complex64>> {
        let rinf = get(values, "Rinf")?;
        let linf = get(values, "Linf")?;
        let (rh, ph) = (get(values, "Rh")?, get(values, "Ph")?);
        let (re, qe) = (get(values, "Re")?, get(values, "Qe")?);
        let (pef, pei) = (get(values, "Pef")?, get(values, "Pei")?);

        let z_rock = self.series_rock(values, sec, freqs)?;

        let mut z = Vec::with_capacity(freqs.len());
        for (&f, &zr) in freqs.iter().zip(&z_rock) {
            let zinf = inductor(f, linf)? + rinf;
            let zarch = parallel(cpe(f, sec.qh, ph, ph)?, Complex64::new(rh, 0.0))?;
            let zarce = parallel(cpe(f, qe, pef, pei)?, Complex64::new(re, 0.0))?;
            z.push(zinf + zarch + zr + zarce);
        }
        Ok(z)
    }

    fn parallel_rock(
        &self,
        values: &HashMap<String, f64>,
        sec: &SecondaryParams,
        freqs: &[f64],
    ) -> Result<Vec<Complex64>> {
        let pm = get(values, "Pm")?;
        let pl = get(values, "Pl")?;

        let mut z = Vec::with_capacity(freqs.len());
        for &f in freqs {
            let line_m = sec.p_rm + cpe(f, sec.p_qm, pm, pm)?;
            let line_l = sec.p_rl + cpe(f, sec.p_ql, pl, pl)?;
            let lines = parallel(line_m, line_l)?;
            z.push(parallel(lines, Complex64::new(sec.r0, 0.0))?);
        }
        Ok(z)
    }

    fn parallel_total(
        &self,
        values: &HashMap<String, f64>,
        sec: &SecondaryParams,
        freqs: &[f64],
    ) -> Result<Vec<Complex64>> {
        let linf = get(values, "Linf")?;
        let ph = get(values, "Ph")?;
        let (re, qe) = (get(values, "Re")?, get(values, "Qe")?);
        let (pef, pei) = (get(values, "Pef")?, get(values, "Pei")?);

        let z_rock = self.parallel_rock(values, sec, freqs)?;

        let mut z = Vec::with_capacity(freqs.len());
        for (&f, &zr) in freqs.iter().zip(&z_rock) {
            let line_h = sec.p_rh + cpe(f, sec.p_qh, ph, ph)?;
            let zarce = parallel(cpe(f, qe, pef, pei)?, Complex64::new(re, 0.0))?;
            z.push(inductor(f, linf)? + parallel(line_h, zr)? + zarce);
        }
        Ok(z)
    }
}
