// src/core/complex.rs

//! Approximate comparison helpers for complex amplitudes.
//!
//! Every tolerance decision in the crate funnels through these functions so
//! that "equal at epsilon squared" means the same thing everywhere: two
//! amplitudes are considered equal when the squared norm of their
//! difference is at or below [`NORM_EPSILON`].

use num_complex::Complex64;

use super::constants::{NORM_EPSILON, REAL_EPSILON};

/// True when the squared norm of `c` is zero at tolerance.
#[inline]
pub fn is_norm_zero(c: Complex64) -> bool {
    c.norm_sqr() <= NORM_EPSILON
}

/// True when `a` and `b` agree at tolerance (squared distance).
#[inline]
pub fn approx_eq(a: Complex64, b: Complex64) -> bool {
    is_norm_zero(a - b)
}

/// True when `c` is the multiplicative identity at tolerance.
#[inline]
pub fn is_one(c: Complex64) -> bool {
    is_norm_zero(Complex64::new(1.0, 0.0) - c)
}

/// True when the argument of `c` is zero, i.e. `c` is a positive real.
#[inline]
pub fn is_arg_zero(c: Complex64) -> bool {
    is_norm_zero(c - Complex64::new(c.norm(), 0.0))
}

/// True when the argument of `c` is pi, i.e. `c` is a negative real.
#[inline]
pub fn is_arg_pi(c: Complex64) -> bool {
    is_norm_zero(c + Complex64::new(c.norm(), 0.0))
}

/// Clamp a probability into `[0, 1]`, absorbing floating-point excursions.
#[inline]
pub fn clamp_prob(p: f64) -> f64 {
    if p < REAL_EPSILON {
        0.0
    } else if p > 1.0 - REAL_EPSILON {
        1.0
    } else {
        p
    }
}

/// Unit-modulus complex number at phase angle `theta`.
#[inline]
pub fn polar_unit(theta: f64) -> Complex64 {
    Complex64::new(theta.cos(), theta.sin())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arg_classification() {
        assert!(is_arg_zero(Complex64::new(2.5, 0.0)));
        assert!(is_arg_pi(Complex64::new(-0.3, 0.0)));
        assert!(!is_arg_zero(Complex64::new(0.0, 1.0)));
        assert!(!is_arg_pi(Complex64::new(0.0, -1.0)));
    }

    #[test]
    fn clamping() {
        assert_eq!(clamp_prob(-1e-15), 0.0);
        assert_eq!(clamp_prob(1.0 + 1e-15), 1.0);
        assert_eq!(clamp_prob(0.25), 0.25);
    }

    #[test]
    fn polar_is_unit() {
        let c = polar_unit(std::f64::consts::PI / 3.0);
        assert!((c.norm_sqr() - 1.0).abs() < 1e-15);
    }
}
