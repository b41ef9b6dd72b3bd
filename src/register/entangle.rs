// src/register/entangle.rs

//! Fusing shards into joint subsystems.
//!
//! Fusion is the expensive irreversible-ish step, so everything here is
//! about doing as little of it as late as possible: engines compose
//! pairwise until one survives, local indices are rewritten along the
//! way, and an in-place quicksort brings the surviving engine's qubit
//! order in line with logical order so ranged operations need no engine
//! swaps afterwards.

use std::collections::BTreeMap;

use log::trace;

use crate::core::is_norm_zero;
use crate::engine::EngineBackend;
use crate::shard::Pauli;

use super::units::UnitId;
use super::QubitRegister;

impl QubitRegister {
    /// Give a detached shard a real 1-qubit engine holding its cached
    /// state.
    pub(crate) fn end_emulation(&mut self, q: usize) {
        if self.shards[q].unit.is_some() {
            return;
        }
        let (amp0, amp1) = (self.shards[q].amp0, self.shards[q].amp1);
        let unit = if is_norm_zero(amp1) {
            self.make_engine(1, 0)
        } else if is_norm_zero(amp0) {
            self.make_engine(1, 1)
        } else {
            let u = self.make_engine(1, 0);
            self.units.get_mut(u).set_quantum_state(&[amp0, amp1]);
            u
        };
        let shard = &mut self.shards[q];
        shard.unit = Some(unit);
        shard.mapped = 0;
    }

    /// Fuse all the engines behind `bits` into one, without any basis
    /// normalization. Shards' `mapped` fields are rewritten as engines
    /// merge. Returns the surviving engine.
    pub(crate) fn entangle_in_current_basis(&mut self, bits: &[usize]) -> UnitId {
        for &b in bits {
            self.end_emulation(b);
        }

        let mut units: Vec<UnitId> = Vec::with_capacity(bits.len());
        for &b in bits {
            let u = self.shards[b].unit.expect("emulation ended above");
            if !units.contains(&u) {
                units.push(u);
            }
        }
        let unit1 = units[0];
        if units.len() > 1 {
            trace!("fusing {} engines into one", units.len());
        }

        while units.len() > 1 {
            // Work an odd engine into the collapse sequence first.
            if units.len() % 2 == 1 {
                let consumed = units.remove(1);
                let engine = self.units.remove(consumed);
                let offset = self.units.get_mut(unit1).compose(engine);
                for shard in self.shards.iter_mut() {
                    if shard.unit == Some(consumed) {
                        shard.mapped += offset;
                        shard.unit = Some(unit1);
                    }
                }
            }

            let mut survivors: Vec<UnitId> = Vec::with_capacity(units.len() / 2);
            let mut offsets: BTreeMap<UnitId, (usize, UnitId)> = BTreeMap::new();
            for pair in units.chunks(2) {
                let retained = pair[0];
                let consumed = pair[1];
                survivors.push(retained);
                let engine = self.units.remove(consumed);
                let offset = self.units.get_mut(retained).compose(engine);
                offsets.insert(consumed, (offset, retained));
            }
            for shard in self.shards.iter_mut() {
                if let Some(u) = shard.unit {
                    if let Some(&(offset, retained)) = offsets.get(&u) {
                        shard.mapped += offset;
                        shard.unit = Some(retained);
                    }
                }
            }
            units = survivors;
        }

        unit1
    }

    /// Normalize every bit to the permutation basis, then fuse.
    pub(crate) fn entangle_sorted(&mut self, bits: &[usize]) -> UnitId {
        for &b in bits {
            self.to_perm_basis(b);
        }
        self.entangle_in_current_basis(bits)
    }

    /// Sort, normalize, and fuse an arbitrary bit list.
    pub(crate) fn entangle(&mut self, bits: &mut Vec<usize>) -> UnitId {
        bits.sort_unstable();
        self.entangle_sorted(bits)
    }

    /// Fuse a contiguous logical range and order the engine to match.
    pub(crate) fn entangle_range(&mut self, start: usize, length: usize, is_for_prob: bool) -> UnitId {
        if is_for_prob {
            self.to_perm_basis_prob_range(start, length);
        } else {
            self.to_perm_basis_range(start, length);
        }

        if length == 1 {
            self.end_emulation(start);
            return self.shards[start].unit.expect("emulation ended above");
        }

        let bits: Vec<usize> = (start..start + length).collect();
        let unit = self.entangle_in_current_basis(&bits);
        self.order_contiguous(unit);
        unit
    }

    /// Fuse two contiguous logical ranges into one engine.
    pub(crate) fn entangle_range_2(
        &mut self,
        start1: usize,
        length1: usize,
        start2: usize,
        length2: usize,
    ) -> UnitId {
        self.to_perm_basis_range(start1, length1);
        self.to_perm_basis_range(start2, length2);

        let (start1, length1, start2, length2) = if start2 < start1 {
            (start2, length2, start1, length1)
        } else {
            (start1, length1, start2, length2)
        };

        let mut bits: Vec<usize> = (start1..start1 + length1).collect();
        bits.extend(start2..start2 + length2);
        let unit = self.entangle_in_current_basis(&bits);
        self.order_contiguous(unit);
        unit
    }

    /// Fuse three contiguous logical ranges into one engine.
    pub(crate) fn entangle_range_3(
        &mut self,
        start1: usize,
        length1: usize,
        start2: usize,
        length2: usize,
        start3: usize,
        length3: usize,
    ) -> UnitId {
        self.to_perm_basis_range(start1, length1);
        self.to_perm_basis_range(start2, length2);
        self.to_perm_basis_range(start3, length3);

        let mut ranges = [(start1, length1), (start2, length2), (start3, length3)];
        ranges.sort_unstable();

        let mut bits: Vec<usize> = Vec::with_capacity(length1 + length2 + length3);
        for (s, l) in ranges {
            bits.extend(s..s + l);
        }
        let unit = self.entangle_in_current_basis(&bits);
        self.order_contiguous(unit);
        unit
    }

    /// Fuse the whole register.
    pub(crate) fn entangle_all(&mut self) -> UnitId {
        self.entangle_range(0, self.qubit_count(), false)
    }

    /// Reorder a unit so that its local indices run in the same order as
    /// the logical positions of its shards. Sorting proactively keeps
    /// later ranged operations from paying for engine swaps.
    pub(crate) fn order_contiguous(&mut self, unit: UnitId) {
        if !self.units.contains(unit) || self.units.get(unit).qubit_count() == 1 {
            return;
        }

        // (mapped, logical bit) for every shard of the unit, in logical
        // order.
        let mut bits: Vec<(usize, usize)> = Vec::new();
        for i in 0..self.shards.len() {
            if self.shards[i].unit == Some(unit) {
                bits.push((self.shards[i].mapped, i));
            }
        }
        if bits.len() < 2 {
            return;
        }

        let high = bits.len() as i64 - 1;
        self.sort_unit(unit, &mut bits, 0, high);
    }

    /// Quicksort over the unit's shards by `mapped`, swapping inside the
    /// engine and in the global mapping with every exchange.
    fn sort_unit(&mut self, unit: UnitId, bits: &mut [(usize, usize)], low: i64, high: i64) {
        let mut i = low;
        let mut j = high;
        if i == j - 1 {
            let (il, jl) = (i as usize, j as usize);
            if bits[jl].0 < bits[il].0 {
                self.units.get_mut(unit).swap(bits[il].0, bits[jl].0);
                let (bi, bj) = (bits[il].1, bits[jl].1);
                let tmp = self.shards[bi].mapped;
                self.shards[bi].mapped = self.shards[bj].mapped;
                self.shards[bj].mapped = tmp;
                let tmp = bits[il].0;
                bits[il].0 = bits[jl].0;
                bits[jl].0 = tmp;
            }
            return;
        }
        let pivot = bits[((low + high) / 2) as usize].0;

        while i <= j {
            while bits[i as usize].0 < pivot {
                i += 1;
            }
            while bits[j as usize].0 > pivot {
                j -= 1;
            }
            if i < j {
                let (il, jl) = (i as usize, j as usize);
                self.units.get_mut(unit).swap(bits[il].0, bits[jl].0);
                let (bi, bj) = (bits[il].1, bits[jl].1);
                let tmp = self.shards[bi].mapped;
                self.shards[bi].mapped = self.shards[bj].mapped;
                self.shards[bj].mapped = tmp;
                let tmp = bits[il].0;
                bits[il].0 = bits[jl].0;
                bits[jl].0 = tmp;
                i += 1;
                j -= 1;
            } else if i == j {
                i += 1;
                j -= 1;
            }
        }
        if low < j {
            self.sort_unit(unit, bits, low, j);
        }
        if i < high {
            self.sort_unit(unit, bits, i, high);
        }
    }

    // --- cached-eigenstate predicates ---

    pub(crate) fn cached_z(&self, q: usize) -> bool {
        let s = &self.shards[q];
        s.pauli_basis == Pauli::Z && !s.is_dirty() && !s.queued_phase()
    }

    pub(crate) fn cached_x(&self, q: usize) -> bool {
        let s = &self.shards[q];
        s.pauli_basis == Pauli::X && !s.is_dirty() && !s.queued_phase()
    }

    pub(crate) fn cached_zero(&self, q: usize) -> bool {
        self.cached_z(q) && self.amp_is_zero(self.shards[q].amp1)
    }

    pub(crate) fn cached_one(&self, q: usize) -> bool {
        self.cached_z(q) && self.amp_is_zero(self.shards[q].amp0)
    }

    pub(crate) fn cached_plus(&self, q: usize) -> bool {
        self.cached_x(q) && self.amp_is_zero(self.shards[q].amp1)
    }

    /// Eigenstate check that ignores queued two-qubit records.
    pub(crate) fn unsafe_cached_zero_or_one(&self, q: usize) -> bool {
        let s = &self.shards[q];
        !s.is_prob_dirty
            && s.pauli_basis == Pauli::Z
            && (self.amp_is_zero(s.amp0) || self.amp_is_zero(s.amp1))
    }

    pub(crate) fn unsafe_cached_zero(&self, q: usize) -> bool {
        let s = &self.shards[q];
        !s.is_prob_dirty && s.pauli_basis == Pauli::Z && self.amp_is_zero(s.amp1)
    }

    pub(crate) fn unsafe_cached_one(&self, q: usize) -> bool {
        let s = &self.shards[q];
        !s.is_prob_dirty && s.pauli_basis == Pauli::Z && self.amp_is_zero(s.amp0)
    }

    /// Whether every bit of the range caches a permutation eigenstate, so
    /// operations over it can go classical.
    pub(crate) fn check_bits_permutation(&mut self, start: usize, length: usize) -> bool {
        self.to_perm_basis_prob_range(start, length);
        (0..length).all(|i| self.unsafe_cached_zero_or_one(start + i))
    }

    pub(crate) fn check_bit_permutation(&mut self, q: usize) -> bool {
        self.check_bits_permutation(q, 1)
    }

    /// Whether every bit of the range caches |+>.
    pub(crate) fn check_bits_plus(&mut self, start: usize, length: usize) -> bool {
        (0..length).all(|i| self.cached_plus(start + i))
    }

    /// Read the integer value of a range of cached eigenstates.
    pub(crate) fn cached_permutation(&self, start: usize, length: usize) -> u64 {
        let mut value = 0u64;
        for i in 0..length {
            if self.shards[start + i].leans_one() {
                value |= 1u64 << i;
            }
        }
        value
    }

    pub(crate) fn cached_permutation_at(&self, bits: &[usize]) -> u64 {
        let mut value = 0u64;
        for (i, &b) in bits.iter().enumerate() {
            if self.shards[b].leans_one() {
                value |= 1u64 << i;
            }
        }
        value
    }
}
