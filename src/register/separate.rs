// src/register/separate.rs

//! Winning qubits back out of joint subsystems.
//!
//! Separation is attempted whenever an operation may have reduced
//! entanglement. The single-qubit path measures the Bloch vector with
//! three probability queries in successive frames, rotates the Bloch axis
//! onto Z, and checks the residual |1> probability against the
//! separability threshold; on success the qubit is projected out and the
//! detached shard is rotated back. Every failed attempt undoes its own
//! rotation, so a failed attempt is a strict no-op.

use log::debug;
use num_complex::Complex64;
use num_traits::One;

use crate::core::{clamp_prob, is_norm_zero};
use crate::engine::EngineBackend;
use crate::shard::Pauli;

use super::QubitRegister;

/// Azimuth/inclination rotation taking the Z axis onto the named Bloch
/// direction.
fn ai_mtrx(azimuth: f64, inclination: f64) -> [Complex64; 4] {
    let cos_a = azimuth.cos();
    let sin_a = azimuth.sin();
    let cos_i = (inclination / 2.0).cos();
    let sin_i = (inclination / 2.0).sin();
    [
        Complex64::new(cos_i, 0.0),
        Complex64::new(-cos_a, sin_a) * sin_i,
        Complex64::new(cos_a, sin_a) * sin_i,
        Complex64::new(cos_i, 0.0),
    ]
}

/// Inverse of [`ai_mtrx`].
fn iai_mtrx(azimuth: f64, inclination: f64) -> [Complex64; 4] {
    let cos_a = azimuth.cos();
    let sin_a = azimuth.sin();
    let cos_i = (inclination / 2.0).cos();
    let sin_i = (inclination / 2.0).sin();
    [
        Complex64::new(cos_i, 0.0),
        Complex64::new(cos_a, -sin_a) * sin_i,
        Complex64::new(-cos_a, -sin_a) * sin_i,
        Complex64::new(cos_i, 0.0),
    ]
}

impl QubitRegister {
    /// Refresh a shard's cached probability, collapsing trivial units to
    /// detached form along the way. Returns the |1> probability in the
    /// shard's current frame.
    pub(crate) fn prob_base(&mut self, q: usize) -> f64 {
        if let Some(u) = self.shards[q].unit {
            if self.units.get(u).qubit_count() == 1 {
                self.revert_basis_1qb(q);
                let u = self.shards[q].unit.expect("still attached");
                let amps = self.units.get(u).get_quantum_state();
                let (mut a0, mut a1) = (amps[0], amps[1]);
                let mut basis = Pauli::Z;
                let i = Complex64::i();
                if self.amp_is_zero(a0 - a1) {
                    basis = Pauli::X;
                    a0 /= a0.norm();
                    a1 = Complex64::new(0.0, 0.0);
                } else if self.amp_is_zero(a0 + a1) {
                    basis = Pauli::X;
                    a1 = a0 / a0.norm();
                    a0 = Complex64::new(0.0, 0.0);
                } else if self.amp_is_zero(i * a0 - a1) {
                    basis = Pauli::Y;
                    a0 /= a0.norm();
                    a1 = Complex64::new(0.0, 0.0);
                } else if self.amp_is_zero(i * a0 + a1) {
                    basis = Pauli::Y;
                    a1 = a0 / a0.norm();
                    a0 = Complex64::new(0.0, 0.0);
                }
                let shard = &mut self.shards[q];
                shard.amp0 = a0;
                shard.amp1 = a1;
                shard.pauli_basis = basis;
                shard.is_prob_dirty = false;
                shard.is_phase_dirty = false;
                shard.unit = None;
                shard.mapped = 0;
                shard.clamp_amps();
                self.units.remove(u);
                return clamp_prob(self.shards[q].prob());
            }
        }

        if !self.shards[q].is_prob_dirty {
            return clamp_prob(self.shards[q].prob());
        }
        self.shards[q].is_prob_dirty = false;

        let Some(u) = self.shards[q].unit else {
            return clamp_prob(self.shards[q].prob());
        };
        let mapped = self.shards[q].mapped;
        let prob = self.units.get(u).prob(mapped);
        self.shards[q].amp1 = Complex64::new(prob.sqrt(), 0.0);
        self.shards[q].amp0 = Complex64::new((1.0 - prob).sqrt(), 0.0);

        if is_norm_zero(self.shards[q].amp1) {
            self.separate_bit(false, q);
        } else if is_norm_zero(self.shards[q].amp0) {
            self.separate_bit(true, q);
        }

        clamp_prob(prob)
    }

    /// Project a qubit out of its unit as the eigenstate `value` and
    /// detach it. The caller has established that the projection is
    /// sound.
    pub(crate) fn separate_bit(&mut self, value: bool, q: usize) -> bool {
        let unit = self.shards[q].unit;
        let mapped = self.shards[q].mapped;

        if let Some(u) = unit {
            if self.units.get(u).is_clifford() && !self.units.get_mut(u).try_separate_one(mapped)
            {
                // The representation refuses; leave the qubit attached.
                return false;
            }
        }

        let phase = self.nonunitary_phase();
        {
            let shard = &mut self.shards[q];
            shard.unit = None;
            shard.mapped = 0;
            shard.is_prob_dirty = false;
            shard.is_phase_dirty = false;
            shard.amp0 = if value { Complex64::new(0.0, 0.0) } else { phase };
            shard.amp1 = if value { phase } else { Complex64::new(0.0, 0.0) };
        }

        let Some(u) = unit else { return true };
        if self.units.get(u).qubit_count() == 1 {
            self.units.remove(u);
            return true;
        }

        let prob = self.units.get(u).prob(mapped);
        self.units
            .get_mut(u)
            .dispose(mapped, 1, Some(if value { 1 } else { 0 }));
        if !self.units.get(u).is_binary_decision_tree()
            && (0.5 - (prob - 0.5).abs()) > self.separability_threshold
        {
            self.units.get_mut(u).update_running_norm();
            self.units.get_mut(u).normalize_state();
        }

        for shard in self.shards.iter_mut() {
            if shard.unit == Some(u) && shard.mapped > mapped {
                shard.mapped -= 1;
            }
        }

        if self.units.get(u).qubit_count() != 1 {
            return true;
        }

        // One partner remains in the unit; fold it back to detached form.
        if let Some(partner) = (0..self.shards.len()).find(|&i| self.shards[i].unit == Some(u)) {
            self.prob_base(partner);
        }
        true
    }

    fn try_separate_clifford(&mut self, q: usize) -> bool {
        let Some(u) = self.shards[q].unit else {
            return false;
        };
        let mapped = self.shards[q].mapped;
        if !self.units.get_mut(u).try_separate_one(mapped) {
            return false;
        }

        let mut extracted = (self.engine_factory)(1, 0);
        self.units.get_mut(u).decompose(mapped, &mut *extracted);
        let sep_unit = self.units.insert(extracted);

        for i in 0..self.shards.len() {
            if self.shards[i].unit == Some(u) && self.shards[i].mapped > mapped {
                self.shards[i].mapped -= 1;
            }
        }
        let shard = &mut self.shards[q];
        shard.mapped = 0;
        shard.unit = Some(sep_unit);
        shard.make_dirty();
        self.prob_base(q);
        true
    }

    /// Attempt to detach one qubit. Succeeding repeatedly is a no-op.
    pub fn try_separate(&mut self, q: usize) -> bool {
        if self.shard_unit_len(q) == 1 {
            if self.shards[q].unit.is_some() {
                self.prob_base(q);
            }
            return true;
        }

        if let Some(u) = self.shards[q].unit {
            if self.units.get(u).is_clifford() {
                return self.try_separate_clifford(q);
            }
        }

        // Measure the Bloch vector with three frame rotations.
        let mut x = 0.0;
        let mut y = 0.0;
        let mut z = 0.0;
        for round in 0..3 {
            let prob = 2.0 * (0.5 - self.prob_base(q));
            if self.shards[q].unit.is_none() {
                return true;
            }
            match self.shards[q].pauli_basis {
                Pauli::Z => z = prob,
                Pauli::X => x = prob,
                Pauli::Y => y = prob,
            }
            if round >= 2 {
                continue;
            }
            match self.shards[q].pauli_basis {
                Pauli::Z => self.convert_z_to_x(q),
                Pauli::X => self.convert_x_to_y(q),
                Pauli::Y => self.convert_y_to_z(q),
            }
        }

        let r = (x * x + y * y + z * z).sqrt();
        if (1.0 - r) > self.separability_threshold || r > 1.0 + self.separability_threshold {
            return false;
        }

        // Permute axes for logical equivalence with the final frame.
        match self.shards[q].pauli_basis {
            Pauli::X => self.revert_basis_1qb(q),
            Pauli::Y => {
                std::mem::swap(&mut x, &mut z);
                std::mem::swap(&mut y, &mut z);
            }
            Pauli::Z => {}
        }

        let inclination = (x * x + y * y).sqrt().atan2(z);
        let azimuth = y.atan2(x);

        let u = self.shards[q].unit.expect("attached checked above");
        let mapped = self.shards[q].mapped;
        self.units.get_mut(u).mtrx(&iai_mtrx(azimuth, inclination), mapped);
        let prob = self.units.get(u).prob(mapped);
        if prob > self.separability_threshold {
            // Not pure enough after all; undo the rotation.
            self.units.get_mut(u).mtrx(&ai_mtrx(azimuth, inclination), mapped);
            return false;
        }

        debug!("separated qubit {q} (bloch radius {r:.6})");
        self.separate_bit(false, q);
        self.shard_ai(q, azimuth, inclination);
        true
    }

    /// Rotate a detached shard's cache by the azimuth/inclination gate.
    fn shard_ai(&mut self, q: usize, azimuth: f64, inclination: f64) {
        let m = ai_mtrx(azimuth, inclination);
        let shard = &mut self.shards[q];
        let a0 = shard.amp0;
        shard.amp0 = m[0] * a0 + m[1] * shard.amp1;
        shard.amp1 = m[2] * a0 + m[3] * shard.amp1;
    }

    /// Attempt to detach a pair. When both qubits stay fused in the same
    /// unit, a maximally disentangling triple is driven through the gate
    /// front-end, checking for success after each stage and undoing
    /// itself on failure.
    pub fn try_separate_pair(&mut self, qubit1: usize, qubit2: usize) -> bool {
        let sep1 = self.try_separate(qubit1);
        let sep2 = self.try_separate(qubit2);

        if sep1 || sep2 || !self.same_unit(qubit1, qubit2) {
            return sep1 && sep2;
        }

        if self.freeze_basis_2qb {
            return false;
        }

        if let Some(u) = self.shards[qubit1].unit {
            if self.units.get(u).is_clifford() {
                let (m1, m2) = (self.shards[qubit1].mapped, self.shards[qubit2].mapped);
                if !self.units.get_mut(u).try_separate_two(m1, m2) {
                    return false;
                }
            }
        }

        let was_reactive = self.reactive_separate;
        self.reactive_separate = true;
        let one = Complex64::one();
        let i = Complex64::i();

        // Kick the one possible bit of entanglement entropy up through
        // three bases.
        self.mc_invert(&[qubit1], one, one, qubit2);
        if self.shards[qubit1].unit.is_none() || self.shards[qubit2].unit.is_none() {
            self.mc_invert(&[qubit1], one, one, qubit2);
            self.reactive_separate = was_reactive;
            return self.shards[qubit1].unit.is_none() && self.shards[qubit2].unit.is_none();
        }

        self.mc_phase(&[qubit1], -i, i, qubit2);
        if self.shards[qubit1].unit.is_none() || self.shards[qubit2].unit.is_none() {
            // Undo the net of the first two stages with one controlled-Y.
            self.mc_invert(&[qubit1], -i, i, qubit2);
            self.reactive_separate = was_reactive;
            return self.shards[qubit1].unit.is_none() && self.shards[qubit2].unit.is_none();
        }

        self.mc_invert(&[qubit1], -i, -i, qubit2);
        self.mc_phase(&[qubit1], one, -one, qubit2);
        self.reactive_separate = was_reactive;
        if self.shards[qubit1].unit.is_none() || self.shards[qubit2].unit.is_none() {
            return self.shards[qubit1].unit.is_none() && self.shards[qubit2].unit.is_none();
        }

        false
    }

    /// Attempt to split an arbitrary qubit set out under an explicit
    /// error tolerance.
    pub fn try_separate_tol(&mut self, qubits: &[usize], error_tol: f64) -> bool {
        if qubits.len() == 1 {
            let q = qubits[0];
            if self.shard_unit_len(q) == 1 {
                return true;
            }
            let u = self.shards[q].unit.expect("multi-qubit unit");
            if self.units.get(u).is_clifford() {
                let mapped = self.shards[q].mapped;
                if !self.units.get_mut(u).try_separate_one(mapped) {
                    return false;
                }
            }

            let mapped = self.shards[q].mapped;
            let mut extracted = (self.engine_factory)(1, 0);
            if !self
                .units
                .get_mut(u)
                .try_decompose(mapped, &mut *extracted, error_tol)
            {
                return false;
            }
            for i in 0..self.shards.len() {
                if self.shards[i].unit == Some(u) && self.shards[i].mapped > mapped {
                    self.shards[i].mapped -= 1;
                }
            }
            let sep_unit = self.units.insert(extracted);
            self.shards[q].unit = Some(sep_unit);
            self.shards[q].mapped = 0;
            self.shards[q].make_dirty();
            self.prob_base(q);

            if self.units.contains(u) && self.units.get(u).qubit_count() == 1 {
                if let Some(partner) =
                    (0..self.shards.len()).find(|&i| self.shards[i].unit == Some(u))
                {
                    self.prob_base(partner);
                }
            }
            return true;
        }

        // Swap gate is free, so bring the set into contiguous form first.
        let mut sorted: Vec<usize> = qubits.to_vec();
        sorted.sort_unstable();
        for (i, &q) in sorted.iter().enumerate() {
            self.swap(i, q);
        }

        let mut dest = self.child_register(sorted.len(), 0);
        let separated = self.try_decompose_range(0, &mut dest, error_tol);
        if separated {
            self.compose_at(&mut dest, 0);
        }

        // Undo the positioning swaps in reverse order.
        for (i, &q) in sorted.iter().enumerate().rev() {
            self.swap(i, q);
        }
        separated
    }

    /// Non-destructive ranged decomposition check: split a clone, rejoin
    /// it, and commit the split on this register only when the round trip
    /// matches at tolerance.
    fn try_decompose_range(
        &mut self,
        start: usize,
        dest: &mut QubitRegister,
        error_tol: f64,
    ) -> bool {
        let mut probe = self.clone_register();
        probe.detach(start, dest.qubit_count(), Some(dest));
        probe.compose_at(dest, start);
        let separated = self.sum_sqr_diff(&mut probe) <= error_tol;
        if separated {
            self.detach(start, dest.qubit_count(), None);
        }
        separated
    }
}
