// src/validation.rs

//! Diagnostics over raw amplitude slices.
//!
//! These helpers answer the questions tests keep asking of a state
//! vector: is it still normalized, and does it equal a reference state
//! once global phase is ignored. They operate on plain slices so both
//! register output and engine internals can be checked with the same
//! code.

use num_complex::Complex64;

/// Default allowed deviation of the squared norm from 1.
pub const DEFAULT_NORM_TOLERANCE: f64 = 1e-9;

/// Deviation of the state's squared norm from 1.
pub fn norm_deviation(amps: &[Complex64]) -> f64 {
    let norm_sq: f64 = amps.iter().map(|c| c.norm_sqr()).sum();
    (norm_sq - 1.0).abs()
}

/// Whether the state vector is normalized within tolerance.
pub fn check_normalization(amps: &[Complex64], tolerance: Option<f64>) -> bool {
    norm_deviation(amps) <= tolerance.unwrap_or(DEFAULT_NORM_TOLERANCE)
}

/// Squared overlap `|<a|b>|^2` of two normalized states. 1 for equal
/// states up to global phase, 0 for orthogonal ones.
pub fn fidelity(a: &[Complex64], b: &[Complex64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let inner: Complex64 = a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum();
    inner.norm_sqr()
}

/// Whether two state vectors agree up to global phase, at tolerance on
/// the infidelity.
pub fn approx_equal_up_to_phase(a: &[Complex64], b: &[Complex64], tolerance: f64) -> bool {
    a.len() == b.len() && (1.0 - fidelity(a, b)) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_detects_drift() {
        let good = vec![
            Complex64::new(std::f64::consts::FRAC_1_SQRT_2, 0.0),
            Complex64::new(0.0, std::f64::consts::FRAC_1_SQRT_2),
        ];
        assert!(check_normalization(&good, None));
        let bad = vec![Complex64::new(0.9, 0.0), Complex64::new(0.3, 0.0)];
        assert!(!check_normalization(&bad, None));
    }

    #[test]
    fn phase_equality_ignores_global_phase() {
        let a = vec![Complex64::new(0.6, 0.0), Complex64::new(0.8, 0.0)];
        let phase = Complex64::new(0.0, 1.0);
        let b: Vec<Complex64> = a.iter().map(|c| c * phase).collect();
        assert!(approx_equal_up_to_phase(&a, &b, 1e-12));
        let c = vec![Complex64::new(0.8, 0.0), Complex64::new(0.6, 0.0)];
        assert!(!approx_equal_up_to_phase(&a, &c, 1e-3));
    }
}
