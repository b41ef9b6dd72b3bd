// src/register/measure.rs

//! Measurement, probability queries, and state access.
//!
//! Collapse is the one place entanglement genuinely dies, so measurement
//! doubles as a separation opportunity: a measured qubit always detaches,
//! its former siblings are marked dirty to model nonlocal collapse
//! correlations, and eigenstate flushes resolve every deferred record the
//! collapsed control can still satisfy.

use std::collections::BTreeMap;

use num_complex::Complex64;
use num_traits::One;
use rand::Rng;

use crate::core::{clamp_prob, polar_unit, SQRT1_2};
use crate::engine::EngineBackend;
use crate::shard::{Pauli, QubitShard};

use super::basis::{RevertAnti, RevertControl, RevertExclusivity};
use super::units::UnitId;
use super::QubitRegister;

fn mask_bits(mask: u64) -> Vec<usize> {
    let mut bits = Vec::new();
    let mut v = mask;
    while v != 0 {
        bits.push(v.trailing_zeros() as usize);
        v &= v - 1;
    }
    bits
}

impl QubitRegister {
    // --- probability ---

    /// Probability of reading |1> on one qubit.
    pub fn prob(&mut self, qubit: usize) -> f64 {
        self.to_perm_basis_prob(qubit);
        self.prob_base(qubit)
    }

    /// Probability of the full permutation eigenstate `perm`.
    pub fn prob_all(&mut self, perm: u64) -> f64 {
        clamp_prob(self.get_amplitude_or_prob(perm, true).norm_sqr())
    }

    /// Amplitude of the permutation eigenstate `perm`.
    pub fn get_amplitude(&mut self, perm: u64) -> Complex64 {
        self.get_amplitude_or_prob(perm, false)
    }

    fn get_amplitude_or_prob(&mut self, perm: u64, is_prob: bool) -> Complex64 {
        assert!(
            perm < 1u64 << self.qubit_count(),
            "permutation out of range"
        );
        if is_prob {
            self.to_perm_basis_prob_all();
        } else {
            self.to_perm_basis_all();
        }

        let mut result = Complex64::one();
        let mut perms: BTreeMap<UnitId, u64> = BTreeMap::new();

        for i in 0..self.qubit_count() {
            let shard = &self.shards[i];
            let bit = (perm >> i) & 1 != 0;
            match shard.unit {
                None => {
                    result *= if bit { shard.amp1 } else { shard.amp0 };
                }
                Some(u) => {
                    let entry = perms.entry(u).or_insert(0);
                    if bit {
                        *entry |= 1u64 << shard.mapped;
                    }
                }
            }
        }

        for (u, unit_perm) in perms {
            result *= self.units.get(u).get_amplitude(unit_perm);
            if self.amp_is_zero(result) {
                break;
            }
        }

        // A unit-norm amplitude identifies the whole state; snap the
        // representation to the eigenstate.
        if self.shard_unit_len(0) > 1
            && result.norm_sqr() >= 1.0 - self.separability_threshold
            && (self.rand_global_phase || self.amp_is_zero(result - Complex64::one()))
        {
            self.set_permutation(perm);
        }

        result
    }

    /// Overwrite one amplitude of the fully fused state.
    pub fn set_amplitude(&mut self, perm: u64, amp: Complex64) {
        assert!(
            perm < 1u64 << self.qubit_count(),
            "permutation out of range"
        );
        let unit = self.entangle_all();
        self.order_contiguous(unit);
        self.units.get_mut(unit).set_amplitude(perm, amp);
        for shard in self.shards.iter_mut() {
            if shard.unit == Some(unit) {
                shard.make_dirty();
            }
        }
    }

    /// Load an arbitrary state vector, detecting a clean one-qubit
    /// eigenframe when possible.
    pub fn set_quantum_state(&mut self, amps: &[Complex64]) {
        assert_eq!(
            amps.len(),
            1usize << self.qubit_count(),
            "state width mismatch"
        );
        self.units.clear();

        if self.qubit_count() == 1 {
            let id = self.shards[0].id;
            let mut shard = QubitShard::eigenstate(id, false, Complex64::one());
            shard.amp0 = amps[0];
            shard.amp1 = amps[1];
            shard.pauli_basis = Pauli::Z;
            let i = Complex64::i();
            if self.amp_is_zero(shard.amp0 - shard.amp1) {
                shard.pauli_basis = Pauli::X;
                shard.amp0 /= shard.amp0.norm();
                shard.amp1 = Complex64::new(0.0, 0.0);
            } else if self.amp_is_zero(shard.amp0 + shard.amp1) {
                shard.pauli_basis = Pauli::X;
                shard.amp1 = shard.amp0 / shard.amp0.norm();
                shard.amp0 = Complex64::new(0.0, 0.0);
            } else if self.amp_is_zero(i * shard.amp0 - shard.amp1) {
                shard.pauli_basis = Pauli::Y;
                shard.amp0 /= shard.amp0.norm();
                shard.amp1 = Complex64::new(0.0, 0.0);
            } else if self.amp_is_zero(i * shard.amp0 + shard.amp1) {
                shard.pauli_basis = Pauli::Y;
                shard.amp1 = shard.amp0 / shard.amp0.norm();
                shard.amp0 = Complex64::new(0.0, 0.0);
            }
            self.shards[0] = shard;
            return;
        }

        let count = self.qubit_count();
        let unit = self.make_engine(count, 0);
        self.units.get_mut(unit).set_quantum_state(amps);
        let mut shards = crate::shard::ShardMap::new();
        for i in 0..count {
            let id = shards.alloc_id();
            shards.push(QubitShard::attached(id, unit, i));
        }
        self.shards = shards;
    }

    /// Read the full amplitude vector in logical qubit order.
    pub fn get_quantum_state(&mut self) -> Vec<Complex64> {
        if self.qubit_count() == 1 {
            self.revert_basis_1qb(0);
            if self.shards[0].unit.is_none() {
                return vec![self.shards[0].amp0, self.shards[0].amp1];
            }
        }

        self.to_perm_basis_all();
        if self.shard_unit_len(0) == self.qubit_count() {
            let u = self.shards[0].unit.expect("fully fused");
            self.order_contiguous(u);
            return self.units.get(u).get_quantum_state();
        }

        let mut copy = self.clone_register();
        let u = copy.entangle_all();
        copy.order_contiguous(u);
        copy.units.get(u).get_quantum_state()
    }

    /// Read the full probability vector in logical qubit order.
    pub fn get_probs(&mut self) -> Vec<f64> {
        if self.qubit_count() == 1 {
            self.revert_basis_1qb(0);
            if self.shards[0].unit.is_none() {
                return vec![
                    self.shards[0].amp0.norm_sqr(),
                    self.shards[0].amp1.norm_sqr(),
                ];
            }
        }

        self.to_perm_basis_prob_all();
        if self.shard_unit_len(0) == self.qubit_count() {
            let u = self.shards[0].unit.expect("fully fused");
            self.order_contiguous(u);
            return self
                .units
                .get(u)
                .get_quantum_state()
                .iter()
                .map(|a| a.norm_sqr())
                .collect();
        }

        let mut copy = self.clone_register();
        let u = copy.entangle_range(0, copy.qubit_count(), true);
        copy.order_contiguous(u);
        copy.units
            .get(u)
            .get_quantum_state()
            .iter()
            .map(|a| a.norm_sqr())
            .collect()
    }

    // --- single-qubit measurement ---

    /// Measure one qubit. `do_force` pins the outcome to `result`;
    /// `do_apply = false` reads without collapsing.
    pub fn force_m(&mut self, qubit: usize, result: bool, do_force: bool, do_apply: bool) -> bool {
        if do_apply {
            self.revert_basis_1qb(qubit);
            self.revert_basis_2qb(
                qubit,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
                &[],
                &[],
                false,
                false,
            );
        } else {
            self.to_perm_basis_measure(qubit);
        }

        let outcome = match self.shards[qubit].unit {
            None => {
                if do_force {
                    result
                } else {
                    let prob = self.shards[qubit].prob();
                    if prob >= 1.0 {
                        true
                    } else if prob <= 0.0 {
                        false
                    } else {
                        self.rng.random::<f64>() <= prob
                    }
                }
            }
            Some(u) => {
                // Always collapse the unit before any decomposition.
                let mapped = self.shards[qubit].mapped;
                let forced = if do_force { Some(result) } else { None };
                self.units
                    .get_mut(u)
                    .force_m(mapped, forced, do_apply, &mut self.rng)
            }
        };

        if !do_apply {
            return outcome;
        }

        let phase = self.nonunitary_phase();
        {
            let shard = &mut self.shards[qubit];
            shard.is_prob_dirty = false;
            shard.is_phase_dirty = false;
            shard.amp0 = if outcome { Complex64::new(0.0, 0.0) } else { phase };
            shard.amp1 = if outcome { phase } else { Complex64::new(0.0, 0.0) };
        }

        if self.shard_unit_len(qubit) == 1 {
            if let Some(u) = self.shards[qubit].unit.take() {
                self.shards[qubit].mapped = 0;
                self.units.remove(u);
            }
            if outcome {
                self.flush_1_eigenstate(qubit);
            } else {
                self.flush_0_eigenstate(qubit);
            }
            return outcome;
        }

        // Nonlocal collapse correlation: every sibling of the measured
        // qubit loses its cache.
        if let Some(u) = self.shards[qubit].unit {
            for i in 0..self.qubit_count() {
                if i != qubit && self.shards[i].unit == Some(u) {
                    self.shards[i].make_dirty();
                }
            }
            self.separate_bit(outcome, qubit);
        }

        if outcome {
            self.flush_1_eigenstate(qubit);
        } else {
            self.flush_0_eigenstate(qubit);
        }

        outcome
    }

    /// Sampled, collapsing measurement of one qubit.
    pub fn m(&mut self, qubit: usize) -> bool {
        self.force_m(qubit, false, false, true)
    }

    /// Measure a register range, optionally forcing the result.
    pub fn force_m_reg(
        &mut self,
        start: usize,
        length: usize,
        result: u64,
        do_force: bool,
        do_apply: bool,
    ) -> u64 {
        if !do_force && do_apply && start == 0 && length == self.qubit_count() {
            return self.m_all();
        }
        if !do_apply {
            self.to_perm_basis_measure_range(start, length);
        }
        let mut value = 0u64;
        for i in 0..length {
            if self.force_m(start + i, (result >> i) & 1 != 0, do_force, do_apply) {
                value |= 1u64 << i;
            }
        }
        value
    }

    /// Sampled measurement of a register range.
    pub fn m_reg(&mut self, start: usize, length: usize) -> u64 {
        self.force_m_reg(start, length, 0, false, true)
    }

    /// Measure every qubit, leaving the register in the sampled
    /// eigenstate.
    pub fn m_all(&mut self) -> u64 {
        let count = self.qubit_count();
        for i in 0..count {
            self.revert_basis_1qb(i);
        }
        // Phases cannot move any Z-basis outcome once everything is being
        // measured; inversions survive stripped to bare conditional X.
        for i in 0..count {
            self.shards.dump_phase_buffers(i);
            self.shards.clear_invert_phase(i);
        }
        for i in 0..count {
            if self.shards[i].is_invert_control() {
                // Measurement commutes with control.
                self.m(i);
            }
        }

        let mut value = 0u64;
        for i in 0..count {
            if self.shards[i].unit.is_none() {
                if self.shards[i].queued_phase() {
                    // Remaining inversions targeting this bit resolve now.
                    if self.m(i) {
                        value |= 1u64 << i;
                    }
                    continue;
                }
                let prob = self.shards[i].prob();
                let one_shot =
                    prob >= 1.0 || (prob > 0.0 && self.rng.random::<f64>() <= prob);
                let phase = self.nonunitary_phase();
                let shard = &mut self.shards[i];
                if one_shot {
                    shard.amp0 = Complex64::new(0.0, 0.0);
                    shard.amp1 = phase;
                    value |= 1u64 << i;
                } else {
                    shard.amp0 = phase;
                    shard.amp1 = Complex64::new(0.0, 0.0);
                }
            } else if self.m(i) {
                value |= 1u64 << i;
            }
        }

        self.set_permutation(value);
        value
    }

    // --- sampling without collapse ---

    /// Draw `shots` non-collapsing samples of the named qubits. Keys of
    /// the result are packed in `qubits` order. Engines sample their own
    /// shard of the distribution; independent engines' distributions are
    /// convolved by shot-weighted random pairing rather than by forming
    /// any joint state.
    pub fn multi_shot_measure_mask(&mut self, qubits: &[usize], shots: u32) -> BTreeMap<u64, u32> {
        if shots == 0 {
            return BTreeMap::new();
        }
        self.to_perm_basis_prob_all();

        let mut sub_powers: BTreeMap<UnitId, Vec<u64>> = BTreeMap::new();
        let mut sub_out_powers: BTreeMap<UnitId, Vec<u64>> = BTreeMap::new();
        let mut single_bits: Vec<(usize, u64)> = Vec::new();

        for (j, &q) in qubits.iter().enumerate() {
            let out_power = 1u64 << j;
            match self.shards[q].unit {
                None => single_bits.push((q, out_power)),
                Some(u) => {
                    sub_powers
                        .entry(u)
                        .or_default()
                        .push(1u64 << self.shards[q].mapped);
                    sub_out_powers.entry(u).or_default().push(out_power);
                }
            }
        }

        let mut combined: BTreeMap<u64, u32> = BTreeMap::new();
        combined.insert(0, shots);

        for (u, powers) in &sub_powers {
            let unit_results =
                self.units
                    .get(*u)
                    .multi_shot_measure_mask(powers, shots, &mut self.rng);
            let out_powers = &sub_out_powers[u];
            let mut top: BTreeMap<u64, u32> = BTreeMap::new();
            for (key, count) in unit_results {
                let mut mask = 0u64;
                for (i, &op) in out_powers.iter().enumerate() {
                    if (key >> i) & 1 == 1 {
                        mask |= op;
                    }
                }
                *top.entry(mask).or_insert(0) += count;
            }

            // All-zero maps change nothing.
            if top.len() == 1 && top.contains_key(&0) {
                continue;
            }
            if combined.len() == 1 && combined.contains_key(&0) {
                combined = top;
                continue;
            }
            if combined.len() < top.len() {
                std::mem::swap(&mut combined, &mut top);
            }

            // A single-outcome map passes through without a shuffle.
            if top.len() == 1 {
                let pick = *top.keys().next().expect("single outcome");
                let mut merged = BTreeMap::new();
                for (k, v) in combined {
                    merged.insert(k | pick, v);
                }
                combined = merged;
                continue;
            }

            // Random pairing between the two shot multisets.
            let mut merged: BTreeMap<u64, u32> = BTreeMap::new();
            let mut shots_left: i64 = shots as i64;
            for (k, v) in &combined {
                for _ in 0..*v {
                    let mut pick = (shots_left as f64 * self.rng.random::<f64>()) as i64;
                    if pick >= shots_left {
                        pick = shots_left - 1;
                    }
                    shots_left -= 1;

                    let mut chosen = *top.keys().next().expect("nonempty map");
                    let mut count: i64 = 0;
                    for (&tk, &tv) in top.iter() {
                        count += tv as i64;
                        chosen = tk;
                        if pick < count {
                            break;
                        }
                    }

                    *merged.entry(*k | chosen).or_insert(0) += 1;
                    let remaining = top.get_mut(&chosen).expect("chosen key");
                    *remaining -= 1;
                    if *remaining == 0 {
                        top.remove(&chosen);
                    }
                }
            }
            combined = merged;
        }

        for (q, out_power) in single_bits {
            let prob = clamp_prob(self.shards[q].prob());
            if prob == 0.0 {
                continue;
            }
            let mut merged: BTreeMap<u64, u32> = BTreeMap::new();
            if prob == 1.0 {
                for (k, v) in combined {
                    merged.insert(k | out_power, v);
                }
            } else {
                for (k, v) in &combined {
                    for _ in 0..*v {
                        if self.rng.random::<f64>() > prob {
                            *merged.entry(*k).or_insert(0) += 1;
                        } else {
                            *merged.entry(*k | out_power).or_insert(0) += 1;
                        }
                    }
                }
            }
            combined = merged;
        }

        combined
    }

    // --- parity ---

    /// Probability that the masked bits carry odd parity. Independent
    /// contributions combine by `p' = p(1-q) + (1-p)q`.
    pub fn prob_parity(&mut self, mask: u64) -> f64 {
        if mask == 0 {
            return 0.0;
        }
        if mask & (mask - 1) == 0 {
            return self.prob(mask.trailing_zeros() as usize);
        }

        let q_indices = mask_bits(mask);
        for &q in &q_indices {
            self.revert_basis_2qb(
                q,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
                &[],
                &[],
                false,
                false,
            );
            if self.shards[q].unit.is_some() && self.shards[q].queued_phase() {
                self.revert_basis_1qb(q);
            }
        }

        let mut odd_chance = 0.0;
        let mut unit_masks: BTreeMap<UnitId, u64> = BTreeMap::new();
        for &q in &q_indices {
            if self.shards[q].unit.is_none() {
                let shard = &self.shards[q];
                let bit_odd = if shard.pauli_basis != Pauli::Z {
                    (Complex64::new(SQRT1_2, 0.0) * (shard.amp0 - shard.amp1)).norm_sqr()
                } else {
                    shard.prob()
                };
                odd_chance = odd_chance * (1.0 - bit_odd) + (1.0 - odd_chance) * bit_odd;
                continue;
            }
            self.revert_basis_1qb(q);
            if let Some(u) = self.shards[q].unit {
                *unit_masks.entry(u).or_insert(0) |= 1u64 << self.shards[q].mapped;
            }
        }

        for (u, unit_mask) in unit_masks {
            let bit_odd = self.units.get(u).prob_parity(unit_mask);
            odd_chance = odd_chance * (1.0 - bit_odd) + (1.0 - odd_chance) * bit_odd;
        }

        clamp_prob(odd_chance)
    }

    /// Apply a parity-conditioned phase rotation over the masked bits.
    pub fn phase_parity(&mut self, radians: f64, mask: u64) {
        if mask == 0 {
            return;
        }
        let phase_fac = polar_unit(radians / 2.0);

        if mask & (mask - 1) == 0 {
            let q = mask.trailing_zeros() as usize;
            self.phase(phase_fac.conj(), phase_fac, q);
            return;
        }

        let q_indices = mask_bits(mask);
        for &q in &q_indices {
            self.to_perm_basis_prob(q);
        }

        let mut flip = false;
        let mut e_indices = Vec::new();
        for &q in &q_indices {
            if self.unsafe_cached_zero(q) {
                continue;
            }
            if self.unsafe_cached_one(q) {
                flip = !flip;
                continue;
            }
            e_indices.push(q);
        }

        if e_indices.is_empty() {
            if flip {
                self.phase(phase_fac, phase_fac, 0);
            } else {
                self.phase(phase_fac.conj(), phase_fac.conj(), 0);
            }
            return;
        }

        if e_indices.len() == 1 {
            let q = e_indices[0];
            if flip {
                self.phase(phase_fac, phase_fac.conj(), q);
            } else {
                self.phase(phase_fac.conj(), phase_fac, q);
            }
            return;
        }

        let unit = self.entangle(&mut e_indices);
        for shard in self.shards.iter_mut() {
            if shard.unit == Some(unit) {
                shard.make_dirty();
            }
        }

        let mut mapped_mask = 0u64;
        for &q in &e_indices {
            mapped_mask |= 1u64 << self.shards[q].mapped;
        }
        let angle = if flip { -radians } else { radians };
        self.units.get_mut(unit).phase_parity(angle, mapped_mask);
    }

    /// Measure the joint parity of the masked bits.
    pub fn force_m_parity(&mut self, mask: u64, result: bool, do_force: bool) -> bool {
        if mask == 0 {
            return false;
        }
        if mask & (mask - 1) == 0 {
            return self.force_m(mask.trailing_zeros() as usize, result, do_force, true);
        }

        let q_indices = mask_bits(mask);
        for &q in &q_indices {
            self.to_perm_basis_prob(q);
        }

        let mut flip = false;
        let mut e_indices = Vec::new();
        for &q in &q_indices {
            if self.unsafe_cached_zero(q) {
                continue;
            }
            if self.unsafe_cached_one(q) {
                flip = !flip;
                continue;
            }
            e_indices.push(q);
        }

        if e_indices.is_empty() {
            return flip;
        }
        if e_indices.len() == 1 {
            return flip ^ self.force_m(e_indices[0], result ^ flip, do_force, true);
        }

        let unit = self.entangle(&mut e_indices);
        for shard in self.shards.iter_mut() {
            if shard.unit == Some(unit) {
                shard.make_dirty();
            }
        }

        let mut mapped_mask = 0u64;
        for &q in &e_indices {
            mapped_mask |= 1u64 << self.shards[q].mapped;
        }
        let forced = if do_force { Some(result ^ flip) } else { None };
        flip
            ^ self
                .units
                .get_mut(unit)
                .force_m_parity(mapped_mask, forced, &mut self.rng)
    }

    /// Expected value of the integer read from `bits` (LSB first), plus
    /// `offset`.
    pub fn expectation_bits_all(&mut self, bits: &[usize], offset: u64) -> f64 {
        if bits.len() > 1 && self.shard_unit_len(0) == self.qubit_count() {
            self.to_perm_basis_prob_all();
            if let Some(u) = self.shards[0].unit {
                if self.units.get(u).qubit_count() == self.qubit_count() {
                    self.order_contiguous(u);
                    let mapped: Vec<usize> =
                        bits.iter().map(|&b| self.shards[b].mapped).collect();
                    return self.units.get(u).expectation_bits_all(&mapped, offset);
                }
            }
        }

        let mut expectation = offset as f64;
        for (j, &b) in bits.iter().enumerate() {
            expectation += (1u64 << j) as f64 * self.prob(b);
        }
        expectation
    }

    /// Collapse a range and reset it to the classical value `value`.
    pub fn set_reg(&mut self, start: usize, length: usize, value: u64) {
        self.m_reg(start, length);
        for i in 0..length {
            self.revert_basis_2qb_full(start + i);
            let bit = (value >> i) & 1 != 0;
            let phase = self.nonunitary_phase();
            let id = self.shards[start + i].id;
            self.shards[start + i] = QubitShard::eigenstate(id, bit, phase);
        }
    }
}
