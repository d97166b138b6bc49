//! Frequency→time-domain transform of the rock impedance.
//!
//! Works on the canonical uniform grid: `N = 2^14` time samples over
//! `T = 4 s`, which pins the single-sided spectrum to `N/2 + 1` bins at a
//! 0.25 Hz spacing. The DC bin is evaluated at a 1 mHz stand-in frequency
//! and forced real before the inverse real FFT. The rising voltage is the
//! cumulative sum of the impulse response with a leading zero; the falling
//! voltage restarts from the 2 s level.

use std::collections::HashMap;

use num_complex::Complex64;
use realfft::RealFftPlanner;

use crate::error::{Result, ZarcError};

/// Number of time samples (power of two).
pub const N: usize = 1 << 14;

/// Total time range of the transform, in seconds.
pub const T: f64 = 4.0;

/// Fixed sampling points on the falling curve, reported as display
/// variables alongside the fit parameters.
const INTEGRAL_POINTS: [(&str, f64); 9] = [
    ("V(.1ms)", 0.0001),
    ("V(1ms)", 0.001),
    ("V(10)", 0.01),
    ("V(100)", 0.1),
    ("V(200)", 0.2),
    ("V(400)", 0.4),
    ("V(800)", 0.8),
    ("V(1.2s)", 1.2),
    ("V(1.6s)", 1.6),
];

/// Time-domain pulse reconstruction, truncated at `T/2`.
#[derive(Debug, Clone)]
pub struct PulseResponse {
    /// The uniform frequency grid the spectrum was sampled on
    pub freq: Vec<f64>,

    /// Time axis, `0 ..= T/2`
    pub time: Vec<f64>,

    /// Falling (discharge) voltage curve
    pub volt_down: Vec<f64>,

    /// Rising (charge-up) voltage curve
    pub volt_up: Vec<f64>,

    /// Named samples of the falling curve at the fixed display times
    pub integral_variables: HashMap<String, f64>,
}

/// Stateless inverse-FFT pulse builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeDomainTransform;

impl TimeDomainTransform {
    pub fn new() -> Self {
        Self
    }

    /// The uniform grid impedances must be sampled on: `N/2 + 1` points at
    /// `df = 1/T`, with the zero bin nudged to 1 mHz so models with a
    /// diverging DC limit stay evaluable.
    pub fn frequency_grid(&self) -> Vec<f64> {
        let df = 1.0 / T;
        let mut grid: Vec<f64> = (0..=N / 2).map(|i| i as f64 * df).collect();
        grid[0] = 0.001;
        grid
    }

    /// Transform a single-sided impedance spectrum on [`frequency_grid`]
    /// into the time-domain pulse response.
    ///
    /// [`frequency_grid`]: TimeDomainTransform::frequency_grid
    pub fn to_time_domain(&self, z: &[Complex64]) -> Result<PulseResponse> {
        let n_bins = N / 2 + 1;
        if z.len() != n_bins {
            return Err(ZarcError::DimensionMismatch(format!(
                "expected {} spectrum bins, got {}",
                n_bins,
                z.len()
            )));
        }

        let mut spectrum: Vec<Complex64> = z.to_vec();
        // The DC and Nyquist bins of a real signal carry no phase
        spectrum[0] = Complex64::new(spectrum[0].re, 0.0);
        spectrum[n_bins - 1] = Complex64::new(spectrum[n_bins - 1].re, 0.0);

        let mut planner = RealFftPlanner::<f64>::new();
        let ifft = planner.plan_fft_inverse(N);
        let mut impulse = ifft.make_output_vec();
        ifft.process(&mut spectrum, &mut impulse)
            .map_err(|e| ZarcError::Other(format!("inverse FFT failed: {}", e)))?;

        // realfft leaves the result unnormalized
        let scale = 1.0 / N as f64;
        for v in &mut impulse {
            *v *= scale;
        }

        let dt = T / N as f64;
        let time: Vec<f64> = (0..N).map(|i| i as f64 * dt).collect();

        // volt_up[k] = sum of the first k impulse samples
        let mut volt_up = Vec::with_capacity(N);
        let mut acc = 0.0;
        volt_up.push(0.0);
        for &v in impulse.iter().take(N - 1) {
            acc += v;
            volt_up.push(acc);
        }

        // The discharge restarts from the level reached at 2 s
        let idx_2s = time.partition_point(|&t| t <= 2.0);
        let level = volt_up[idx_2s.min(N - 1)];
        let volt_down: Vec<f64> = volt_up.iter().map(|&v| level - v).collect();

        let mut integral_variables = HashMap::new();
        for (label, seconds) in INTEGRAL_POINTS {
            let idx = time.partition_point(|&t| t < seconds);
            integral_variables.insert(label.to_string(), volt_down[idx.min(N - 1)]);
        }

        // Only the first half of the window is meaningful for display
        let cut = time.partition_point(|&t| t < T / 2.0) + 1;
        Ok(PulseResponse {
            freq: self.frequency_grid(),
            time: time[..cut].to_vec(),
            volt_down: volt_down[..cut].to_vec(),
            volt_up: volt_up[..cut].to_vec(),
            integral_variables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_frequency_grid_shape() {
        let grid = TimeDomainTransform::new().frequency_grid();
        assert_eq!(grid.len(), N / 2 + 1);
        assert_relative_eq!(grid[0], 0.001, epsilon = 1e-12);
        assert_relative_eq!(grid[1], 0.25, epsilon = 1e-12);
        assert_relative_eq!(grid[N / 2], N as f64 / 2.0 / T, epsilon = 1e-9);
    }

    #[test]
    fn test_wrong_bin_count_rejected() {
        let transform = TimeDomainTransform::new();
        let z = vec![Complex64::new(1.0, 0.0); 100];
        assert!(transform.to_time_domain(&z).is_err());
    }

    #[test]
    fn test_resistor_round_trips_to_flat_step() {
        // A purely resistive spectrum concentrates the impulse response in
        // the first sample, so the rising voltage is a flat step of height R
        let r = 75.0;
        let transform = TimeDomainTransform::new();
        let z = vec![Complex64::new(r, 0.0); N / 2 + 1];
        let pulse = transform.to_time_domain(&z).unwrap();

        assert_relative_eq!(pulse.volt_up[0], 0.0, epsilon = 1e-9);
        for &v in pulse.volt_up.iter().skip(1) {
            assert_relative_eq!(v, r, epsilon = 1e-6);
        }
        // The falling curve starts at the step height and collapses to zero
        assert_relative_eq!(pulse.volt_down[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_truncated_at_half_window() {
        let transform = TimeDomainTransform::new();
        let z = vec![Complex64::new(10.0, 0.0); N / 2 + 1];
        let pulse = transform.to_time_domain(&z).unwrap();

        let t_last = *pulse.time.last().unwrap();
        assert!(t_last >= T / 2.0 && t_last < T / 2.0 + 2.0 * T / N as f64);
        assert_eq!(pulse.time.len(), pulse.volt_down.len());
        assert_eq!(pulse.time.len(), pulse.volt_up.len());
    }

    #[test]
    fn test_integral_variables_present() {
        let transform = TimeDomainTransform::new();
        let z = vec![Complex64::new(10.0, 0.0); N / 2 + 1];
        let pulse = transform.to_time_domain(&z).unwrap();

        assert_eq!(pulse.integral_variables.len(), 9);
        assert!(pulse.integral_variables.contains_key("V(.1ms)"));
        assert!(pulse.integral_variables.contains_key("V(1.6s)"));
    }
}
