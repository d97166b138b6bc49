//! Circuit element primitives
//!
//! Closed-form impedances for the element vocabulary: constant-phase
//! elements, the instrument inductance, parallel combination, and the
//! Q-from-relaxation-frequency conversion. All functions are pure; domain
//! violations (zero admittance, negative frequency) are contract errors.

use num_complex::Complex64;
use std::f64::consts::PI;

use crate::error::{Result, ZarcError};

/// Impedance of a constant-phase element: `Z = 1 / (Q · j^pi · (2πf)^pf)`.
///
/// The phase exponent `pi` and the frequency exponent `pf` are decoupled;
/// the arcs tie them together, the electrode CPE does not.
pub fn cpe(freq: f64, q: f64, pf: f64, pi: f64) -> Result<Complex64> {
    if q == 0.0 {
        return Err(ZarcError::InvalidParameterSet(
            "CPE admittance coefficient Q cannot be zero".to_string(),
        ));
    }
    if freq < 0.0 {
        return Err(ZarcError::InvalidParameterSet(format!(
            "frequency must be non-negative, got {}",
            freq
        )));
    }
    if freq == 0.0 && pf != 0.0 {
        return Err(ZarcError::InvalidParameterSet(format!(
            "CPE undefined at zero frequency with exponent {}",
            pf
        )));
    }

    let phase_factor = Complex64::i().powf(pi);
    let omega_exp = (2.0 * PI * freq).powf(pf);
    Ok(1.0 / (q * phase_factor * omega_exp))
}

/// Impedance of an inductor: `Z = j·2πf·L`.
pub fn inductor(freq: f64, l: f64) -> Result<Complex64> {
    if l == 0.0 {
        return Err(ZarcError::InvalidParameterSet(
            "inductance cannot be zero".to_string(),
        ));
    }
    if freq < 0.0 {
        return Err(ZarcError::InvalidParameterSet(format!(
            "frequency must be non-negative, got {}",
            freq
        )));
    }
    Ok(Complex64::new(0.0, 2.0 * PI * freq * l))
}

/// Parallel combination of two impedances: `1 / (1/z1 + 1/z2)`.
pub fn parallel(z1: Complex64, z2: Complex64) -> Result<Complex64> {
    if z1 == Complex64::new(0.0, 0.0) || z2 == Complex64::new(0.0, 0.0) {
        return Err(ZarcError::InvalidParameterSet(
            "cannot combine a zero impedance in parallel".to_string(),
        ));
    }
    Ok(1.0 / (1.0 / z1 + 1.0 / z2))
}

/// CPE coefficient from a relaxation frequency: `Q = 1 / (R · (2πF0)^P)`.
pub fn q_from_f0(r: f64, f0: f64, p: f64) -> Result<f64> {
    if r == 0.0 {
        return Err(ZarcError::InvalidParameterSet(
            "arc resistance cannot be zero".to_string(),
        ));
    }
    if f0 <= 0.0 {
        return Err(ZarcError::InvalidParameterSet(format!(
            "relaxation frequency must be positive, got {}",
            f0
        )));
    }
    Ok(1.0 / (r * (2.0 * PI * f0).powf(p)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cpe_pure_capacitor_limit() {
        // pi = pf = 1 reduces the CPE to an ideal capacitor 1/(jωC)
        let c = 1e-6;
        let f = 100.0;
        let z = cpe(f, c, 1.0, 1.0).unwrap();
        let expected = 1.0 / Complex64::new(0.0, 2.0 * PI * f * c);
        assert_relative_eq!(z.re, expected.re, epsilon = 1e-12);
        assert_relative_eq!(z.im, expected.im, epsilon = 1e-12);
    }

    #[test]
    fn test_cpe_pure_resistor_limit() {
        // pi = pf = 0 reduces the CPE to a resistor 1/Q
        let z = cpe(50.0, 0.25, 0.0, 0.0).unwrap();
        assert_relative_eq!(z.re, 4.0, epsilon = 1e-12);
        assert_relative_eq!(z.im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cpe_domain_errors() {
        assert!(cpe(10.0, 0.0, 0.5, 0.5).is_err());
        assert!(cpe(-1.0, 1.0, 0.5, 0.5).is_err());
        assert!(cpe(0.0, 1.0, 0.5, 0.5).is_err());
        assert!(cpe(0.0, 1.0, -0.5, 0.5).is_err());
    }

    #[test]
    fn test_inductor() {
        let z = inductor(100.0, 0.001).unwrap();
        assert_relative_eq!(z.re, 0.0, epsilon = 1e-12);
        assert_relative_eq!(z.im, 2.0 * PI * 100.0 * 0.001, epsilon = 1e-12);

        assert!(inductor(100.0, 0.0).is_err());
        assert!(inductor(-1.0, 0.001).is_err());
    }

    #[test]
    fn test_parallel_equal_resistors_halve() {
        let r = Complex64::new(100.0, 0.0);
        let z = parallel(r, r).unwrap();
        assert_relative_eq!(z.re, 50.0, epsilon = 1e-12);
        assert_relative_eq!(z.im, 0.0, epsilon = 1e-12);

        assert!(parallel(Complex64::new(0.0, 0.0), r).is_err());
    }

    #[test]
    fn test_q_from_f0_round_trip() {
        // A CPE built from (R, F0, P) must satisfy |Z(F0)| consistency:
        // at f = F0, Q·(2πF0)^P = 1/R
        let (r, f0, p) = (20.0, 100.0, 0.8);
        let q = q_from_f0(r, f0, p).unwrap();
        assert_relative_eq!(q * (2.0 * PI * f0).powf(p), 1.0 / r, epsilon = 1e-12);

        assert!(q_from_f0(0.0, 100.0, 0.8).is_err());
        assert!(q_from_f0(20.0, 0.0, 0.8).is_err());
    }
}
