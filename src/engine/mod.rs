// src/engine/mod.rs

//! Engine backend capability set.
//!
//! The register core never manipulates amplitude vectors directly; it
//! drives one or more engines through [`EngineBackend`]. The trait is a
//! capability set rather than an inheritance tree: any representation that
//! can honor these operations (dense vectors, stabilizer tableaux,
//! decision diagrams) can sit behind a shard. The crate ships one
//! reference implementation, [`StateVectorEngine`].
//!
//! Engines never own randomness. Every sampling operation receives the
//! register's generator, so a seeded register replays identical
//! measurement paths regardless of how work was partitioned into engines.

pub mod state_vector;

use std::collections::BTreeMap;

use num_complex::Complex64;
use rand::rngs::StdRng;

pub use state_vector::StateVectorEngine;

/// Constructor used by the register whenever it needs a fresh engine of
/// `length` qubits initialized to the permutation eigenstate `perm`.
pub type EngineFactory = fn(length: usize, perm: u64) -> Box<dyn EngineBackend>;

/// Operations the separability-tracking core invokes on a joint subsystem.
///
/// Local qubit indices are engine-relative; the core translates through
/// each shard's `mapped` field. Methods that can sample take the
/// register's `StdRng`.
pub trait EngineBackend: Send {
    /// Number of qubits this engine currently holds.
    fn qubit_count(&self) -> usize;

    // --- structure ---

    /// Fuse `other`'s qubits after this engine's own. Returns the base
    /// index at which `other`'s qubits now live.
    fn compose(&mut self, other: Box<dyn EngineBackend>) -> usize;

    /// Split the contiguous range starting at `start`, of `dest`'s width,
    /// out of this engine and into `dest`. The range must be in a product
    /// state with the remainder.
    fn decompose(&mut self, start: usize, dest: &mut dyn EngineBackend);

    /// Discard a contiguous range. When `disposed_perm` is given the range
    /// is known to be in that permutation eigenstate and is projected out;
    /// otherwise a product factorization is assumed, as for `decompose`.
    fn dispose(&mut self, start: usize, length: usize, disposed_perm: Option<u64>);

    /// Attempt `decompose` under an error tolerance, mutating nothing on
    /// failure. Returns whether the split was committed.
    fn try_decompose(&mut self, start: usize, dest: &mut dyn EngineBackend, error_tol: f64)
        -> bool;

    /// Optional fast path: report whether a single qubit is separable and,
    /// if the representation allows, coax it into separable form.
    fn try_separate_one(&mut self, _qubit: usize) -> bool {
        false
    }

    /// Optional two-qubit analogue of [`Self::try_separate_one`].
    fn try_separate_two(&mut self, _qubit1: usize, _qubit2: usize) -> bool {
        false
    }

    // --- gates ---

    /// Apply a general 2x2 matrix `[m00, m01, m10, m11]` to one qubit.
    fn mtrx(&mut self, mtrx: &[Complex64; 4], target: usize);

    /// Apply the diagonal gate `diag(top_left, bottom_right)`.
    fn phase(&mut self, top_left: Complex64, bottom_right: Complex64, target: usize);

    /// Apply the anti-diagonal gate `[[0, top_right], [bottom_left, 0]]`.
    fn invert(&mut self, top_right: Complex64, bottom_left: Complex64, target: usize);

    /// Controlled general matrix: applies when every control reads |1>.
    fn mc_mtrx(&mut self, controls: &[usize], mtrx: &[Complex64; 4], target: usize);

    /// Anti-controlled general matrix: applies when every control reads |0>.
    fn mac_mtrx(&mut self, controls: &[usize], mtrx: &[Complex64; 4], target: usize);

    fn mc_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    );

    fn mac_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    );

    fn mc_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    );

    fn mac_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    );

    /// Apply one of `2^controls.len()` matrices to `target`, selected by
    /// the controls' basis value. `skip_powers`/`skip_value_mask` name
    /// control positions that were classically resolved before dispatch;
    /// their fixed values are folded back into the matrix index.
    fn uniformly_controlled_single_bit(
        &mut self,
        controls: &[usize],
        target: usize,
        mtrxs: &[Complex64],
        skip_powers: &[u64],
        skip_value_mask: u64,
    );

    fn swap(&mut self, qubit1: usize, qubit2: usize);
    fn iswap(&mut self, qubit1: usize, qubit2: usize);
    fn iiswap(&mut self, qubit1: usize, qubit2: usize);
    fn sqrt_swap(&mut self, qubit1: usize, qubit2: usize);
    fn isqrt_swap(&mut self, qubit1: usize, qubit2: usize);

    /// Fermionic simulation gate: rotation by `theta` in the {|01>, |10>}
    /// subspace plus a `phi` phase on |11>.
    fn fsim(&mut self, theta: f64, phi: f64, qubit1: usize, qubit2: usize);

    // --- probability and measurement ---

    /// Probability of reading |1> on one qubit.
    fn prob(&self, qubit: usize) -> f64;

    /// Probability of the full permutation eigenstate `perm`.
    fn prob_all(&self, perm: u64) -> f64;

    /// Probability that the masked bits carry odd parity.
    fn prob_parity(&self, mask: u64) -> f64;

    /// Measure one qubit. `result` forces the outcome; `do_apply` commits
    /// the collapse to the state.
    fn force_m(
        &mut self,
        qubit: usize,
        result: Option<bool>,
        do_apply: bool,
        rng: &mut StdRng,
    ) -> bool;

    /// Measure the parity of the masked bits, collapsing onto the parity
    /// subspace.
    fn force_m_parity(&mut self, mask: u64, result: Option<bool>, rng: &mut StdRng) -> bool;

    /// Sample `shots` non-collapsing measurements of the qubits named by
    /// `q_powers` (each a power of two selecting one local qubit). Keys of
    /// the result are packed in `q_powers` order.
    fn multi_shot_measure_mask(
        &self,
        q_powers: &[u64],
        shots: u32,
        rng: &mut StdRng,
    ) -> BTreeMap<u64, u32>;

    /// Expected value of the integer read from `bits` (LSB first), plus
    /// `offset`.
    fn expectation_bits_all(&self, bits: &[usize], offset: u64) -> f64;

    /// Apply `exp(i*radians/2)` to odd-parity components of the mask and
    /// the conjugate phase to even-parity components.
    fn phase_parity(&mut self, radians: f64, mask: u64);

    // --- state access ---

    fn set_permutation(&mut self, perm: u64, phase: Complex64);
    fn set_quantum_state(&mut self, amps: &[Complex64]);
    fn get_quantum_state(&self) -> Vec<Complex64>;
    fn get_amplitude(&self, perm: u64) -> Complex64;
    fn set_amplitude(&mut self, perm: u64, amp: Complex64);

    // --- arithmetic ---

    fn inc(&mut self, to_add: u64, start: usize, length: usize);
    fn c_inc(&mut self, to_add: u64, start: usize, length: usize, controls: &[usize]);

    /// Add with carry-out folded into the `carry` qubit.
    fn inc_c(&mut self, to_add: u64, start: usize, length: usize, carry: usize);

    /// Signed add; flips the phase of the `overflow` qubit's |1> component
    /// on two's-complement overflow.
    fn inc_s(&mut self, to_add: u64, start: usize, length: usize, overflow: usize);

    /// Signed add with carry, optionally flagging overflow.
    fn inc_sc(
        &mut self,
        to_add: u64,
        start: usize,
        length: usize,
        overflow: Option<usize>,
        carry: usize,
    );

    /// Multiply the in/out register into a double-width result; the carry
    /// register must be |0>.
    fn mul(&mut self, to_mul: u64, in_out_start: usize, carry_start: usize, length: usize);

    /// Inverse of [`Self::mul`].
    fn div(&mut self, to_div: u64, in_out_start: usize, carry_start: usize, length: usize);

    /// Out-of-place modular multiplication: `out += in * to_mul (mod n)`,
    /// with `out` expected reset.
    fn mul_mod_n_out(
        &mut self,
        to_mul: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
    );

    /// Inverse of [`Self::mul_mod_n_out`].
    fn imul_mod_n_out(
        &mut self,
        to_mul: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
    );

    /// Out-of-place modular exponentiation: `out += base^in (mod n)`.
    fn pow_mod_n_out(
        &mut self,
        base: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
    );

    fn c_mul(
        &mut self,
        to_mul: u64,
        in_out_start: usize,
        carry_start: usize,
        length: usize,
        controls: &[usize],
    );

    fn c_div(
        &mut self,
        to_div: u64,
        in_out_start: usize,
        carry_start: usize,
        length: usize,
        controls: &[usize],
    );

    fn c_mul_mod_n_out(
        &mut self,
        to_mul: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
    );

    fn c_imul_mod_n_out(
        &mut self,
        to_mul: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
    );

    fn c_pow_mod_n_out(
        &mut self,
        base: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
    );

    /// XOR the byte-table entry selected by the index register into the
    /// value register (a load, when the value register is reset).
    fn indexed_lda(
        &mut self,
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        values: &[u8],
    );

    /// Add the table entry selected by the index register into the value
    /// register, with carry.
    fn indexed_adc(
        &mut self,
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        carry: usize,
        values: &[u8],
    );

    /// Subtract the table entry selected by the index register from the
    /// value register, with borrow.
    fn indexed_sbc(
        &mut self,
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        carry: usize,
        values: &[u8],
    );

    /// Replace the register value `v` with `table[v]`. The table must be a
    /// permutation of `0..2^length`.
    fn hash(&mut self, start: usize, length: usize, values: &[u8]);

    /// Flip the phase of every component whose range value is below
    /// `greater_perm`.
    fn phase_flip_if_less(&mut self, greater_perm: u64, start: usize, length: usize);

    /// As [`Self::phase_flip_if_less`], gated on a flag qubit reading |1>.
    fn c_phase_flip_if_less(
        &mut self,
        greater_perm: u64,
        start: usize,
        length: usize,
        flag: usize,
    );

    // --- bookkeeping ---

    /// Recompute the running norm used by [`Self::normalize_state`].
    fn update_running_norm(&mut self);

    /// Rescale amplitudes to unit norm using the running norm.
    fn normalize_state(&mut self);

    /// Block until queued work is committed. The reference engine is
    /// synchronous, so this is a no-op.
    fn finish(&mut self) {}

    /// Whether all queued work has committed.
    fn is_finished(&self) -> bool {
        true
    }

    /// Squared distance between two engines' states, invariant under
    /// global phase: `1 - |<self|other>|^2`. Engines of different widths
    /// are maximally distant.
    fn sum_sqr_diff(&self, other: &dyn EngineBackend) -> f64;

    /// Deep copy behind a fresh box.
    fn clone_box(&self) -> Box<dyn EngineBackend>;

    /// Whether this engine is a stabilizer-type representation with cheap
    /// separability reporting.
    fn is_clifford(&self) -> bool {
        false
    }

    /// Whether this engine is a decision-diagram representation, which
    /// keeps its own normalization.
    fn is_binary_decision_tree(&self) -> bool {
        false
    }
}
