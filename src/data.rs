//! Measured impedance data.
//!
//! A sweep is an ordered list of `(frequency, Z)` samples as produced by the
//! instrument loader collaborator. Fits and manual evaluation can restrict
//! themselves to an index window into the sweep.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZarcError};

/// One measured point of the spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpedanceSample {
    pub freq_hz: f64,
    pub z_real: f64,
    pub z_imag: f64,
}

impl ImpedanceSample {
    pub fn new(freq_hz: f64, z_real: f64, z_imag: f64) -> Self {
        Self {
            freq_hz,
            z_real,
            z_imag,
        }
    }

    pub fn impedance(&self) -> Complex64 {
        Complex64::new(self.z_real, self.z_imag)
    }
}

/// An ordered frequency sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpedanceSweep {
    samples: Vec<ImpedanceSample>,
}

impl ImpedanceSweep {
    pub fn new(samples: Vec<ImpedanceSample>) -> Self {
        Self { samples }
    }

    /// Build a sweep from parallel arrays; lengths must agree.
    pub fn from_arrays(freq: &[f64], z_real: &[f64], z_imag: &[f64]) -> Result<Self> {
        if freq.len() != z_real.len() || freq.len() != z_imag.len() {
            return Err(ZarcError::DimensionMismatch(format!(
                "{} frequencies, {} real and {} imaginary values",
                freq.len(),
                z_real.len(),
                z_imag.len()
            )));
        }
        Ok(Self {
            samples: freq
                .iter()
                .zip(z_real.iter().zip(z_imag))
                .map(|(&f, (&re, &im))| ImpedanceSample::new(f, re, im))
                .collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[ImpedanceSample] {
        &self.samples
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.freq_hz).collect()
    }

    pub fn impedances(&self) -> Vec<Complex64> {
        self.samples.iter().map(|s| s.impedance()).collect()
    }

    /// The samples inside a window, as a new sweep.
    pub fn windowed(&self, window: &FrequencyWindow) -> Result<ImpedanceSweep> {
        match *window {
            FrequencyWindow::Full => Ok(self.clone()),
            FrequencyWindow::Range { start, end } => {
                if start >= end || end > self.samples.len() {
                    return Err(ZarcError::DimensionMismatch(format!(
                        "window [{}, {}) does not fit a sweep of {} samples",
                        start,
                        end,
                        self.samples.len()
                    )));
                }
                Ok(ImpedanceSweep {
                    samples: self.samples[start..end].to_vec(),
                })
            }
        }
    }
}

/// Index window into a sweep: either everything, or `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrequencyWindow {
    Full,
    Range { start: usize, end: usize },
}

impl Default for FrequencyWindow {
    fn default() -> Self {
        FrequencyWindow::Full
    }
}
