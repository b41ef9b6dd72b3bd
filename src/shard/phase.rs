// src/shard/phase.rs

//! Deferred two-qubit phase/invert records.
//!
//! A record stands for a controlled gate that has been promised to the
//! caller but not yet applied to any engine. `cmplx_diff` is the phase
//! picked up by the target eigenstate that *differs* from the control's
//! firing polarity, `cmplx_same` by the one that matches it; `is_invert`
//! additionally applies a conditional Pauli-X. Storing the fields relative
//! to polarity lets control-polarity flips swap maps without rephrasing
//! the gate.

use num_complex::Complex64;
use num_traits::One;

use crate::core::is_one;

/// One buffered controlled-phase or controlled-invert gate between a pair
/// of shards.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRecord {
    pub cmplx_diff: Complex64,
    pub cmplx_same: Complex64,
    pub is_invert: bool,
}

impl Default for PhaseRecord {
    fn default() -> Self {
        Self {
            cmplx_diff: Complex64::one(),
            cmplx_same: Complex64::one(),
            is_invert: false,
        }
    }
}

impl PhaseRecord {
    /// True when the record is the identity gate and can be discarded.
    pub fn is_identity(&self) -> bool {
        !self.is_invert && is_one(self.cmplx_diff) && is_one(self.cmplx_same)
    }

    /// Exchange the two phase fields.
    pub fn swap_fields(&mut self) {
        std::mem::swap(&mut self.cmplx_diff, &mut self.cmplx_same);
    }

    /// Compose a further phase gate onto the record.
    pub fn mul_fields(&mut self, diff: Complex64, same: Complex64) {
        self.cmplx_diff *= diff;
        self.cmplx_same *= same;
    }

    /// Compose a further inversion onto the record: the X component
    /// toggles and exchanges which eigenstate sees which pending phase.
    pub fn compose_inversion(&mut self, diff: Complex64, same: Complex64) {
        self.is_invert = !self.is_invert;
        self.swap_fields();
        self.mul_fields(diff, same);
    }
}
