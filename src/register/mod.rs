// src/register/mod.rs

//! The separability-tracking register front-end.
//!
//! [`QubitRegister`] owns an ordered map of per-qubit shards and a table
//! of joint-subsystem engines. Gates enter here; whenever possible they
//! resolve against detached shard caches or deferred-phase records, and
//! only when a gate genuinely demands it do shards fuse into an engine.
//! After entangling calls the separator tries to win qubits back.
//!
//! Every optimization in this module is a no-op on the joint state
//! vector: buffering, basis relabeling, fusion, and separation never
//! change what a measurement can observe.

pub mod units;

mod arith;
mod basis;
mod entangle;
mod gates;
mod measure;
mod separate;

use std::collections::BTreeMap;

use log::trace;
use num_complex::Complex64;
use num_traits::One;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::{
    clamp_prob, is_norm_zero, polar_unit, QregError, QregResult, MAX_FUSED_QUBITS, NORM_EPSILON,
};
use crate::engine::{EngineBackend, EngineFactory, StateVectorEngine};
use crate::shard::{QubitShard, ShardMap};

use units::{UnitId, UnitTable};

/// Environment variable overriding the separability threshold, read once
/// at construction.
pub const SEPARABILITY_THRESHOLD_ENV: &str = "QRACK_QUNIT_SEPARABILITY_THRESHOLD";

/// A register of qubits simulated through separability tracking.
pub struct QubitRegister {
    pub(crate) shards: ShardMap,
    pub(crate) units: UnitTable,
    pub(crate) rng: StdRng,
    pub(crate) engine_factory: EngineFactory,
    pub(crate) rand_global_phase: bool,
    pub(crate) reactive_separate: bool,
    pub(crate) freeze_basis_2qb: bool,
    pub(crate) threshold_qubits: usize,
    pub(crate) separability_threshold: f64,
}

impl std::fmt::Debug for QubitRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "QubitRegister({} qubits, {} engines)",
            self.shards.len(),
            self.units.ids().len()
        )
    }
}

impl QubitRegister {
    /// Allocate `qubit_count` qubits in the permutation eigenstate
    /// `init_state`, with an OS-seeded generator.
    pub fn new(qubit_count: usize, init_state: u64) -> QregResult<Self> {
        Self::build(qubit_count, init_state, StdRng::from_os_rng())
    }

    /// As [`Self::new`], with a deterministic generator seed so that
    /// measurement paths replay exactly.
    pub fn with_seed(qubit_count: usize, init_state: u64, seed: u64) -> QregResult<Self> {
        Self::build(qubit_count, init_state, StdRng::seed_from_u64(seed))
    }

    fn build(qubit_count: usize, init_state: u64, rng: StdRng) -> QregResult<Self> {
        if qubit_count > MAX_FUSED_QUBITS {
            return Err(QregError::OutOfMemory(format!(
                "cannot allocate {qubit_count} qubits; limit is {MAX_FUSED_QUBITS}"
            )));
        }
        let separability_threshold = std::env::var(SEPARABILITY_THRESHOLD_ENV)
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(NORM_EPSILON);

        let mut register = Self {
            shards: ShardMap::new(),
            units: UnitTable::new(),
            rng,
            engine_factory: StateVectorEngine::factory,
            rand_global_phase: false,
            reactive_separate: true,
            freeze_basis_2qb: false,
            threshold_qubits: 0,
            separability_threshold,
        };
        register.reset_to_permutation(qubit_count, init_state);
        Ok(register)
    }

    /// Number of qubits currently owned.
    pub fn qubit_count(&self) -> usize {
        self.shards.len()
    }

    /// Whether a qubit is currently represented by a detached shard
    /// rather than a joint subsystem.
    pub fn is_detached(&self, qubit: usize) -> bool {
        self.shards[qubit].unit.is_none()
    }

    /// Whether both sides of every deferred two-qubit record agree. Holds
    /// at every public boundary; exposed for tests.
    pub fn deferred_records_consistent(&self) -> bool {
        self.shards.buffers_symmetric()
    }

    /// Tune the separability threshold used by the separator.
    pub fn set_separability_threshold(&mut self, threshold: f64) {
        self.separability_threshold = threshold;
    }

    /// Enable or disable automatic separation attempts after multi-qubit
    /// gates.
    pub fn set_reactive_separate(&mut self, on: bool) {
        self.reactive_separate = on;
    }

    /// Hint forwarded to engine construction policy.
    pub fn set_threshold_qubits(&mut self, qubits: usize) {
        self.threshold_qubits = qubits;
    }

    /// When enabled, nonunitary collapse phases are drawn at random and
    /// global-phase-only records may be discarded.
    pub fn set_rand_global_phase(&mut self, on: bool) {
        self.rand_global_phase = on;
    }

    // --- internal plumbing ---

    pub(crate) fn nonunitary_phase(&mut self) -> Complex64 {
        if self.rand_global_phase {
            polar_unit(self.rng.random::<f64>() * std::f64::consts::TAU)
        } else {
            Complex64::one()
        }
    }

    pub(crate) fn make_engine(&mut self, length: usize, perm: u64) -> UnitId {
        self.units.insert((self.engine_factory)(length, perm))
    }

    /// Width of the unit behind a shard; 1 when detached.
    pub(crate) fn shard_unit_len(&self, q: usize) -> usize {
        match self.shards[q].unit {
            Some(u) => self.units.get(u).qubit_count(),
            None => 1,
        }
    }

    pub(crate) fn same_unit(&self, a: usize, b: usize) -> bool {
        match (self.shards[a].unit, self.shards[b].unit) {
            (Some(ua), Some(ub)) => ua == ub,
            _ => false,
        }
    }

    /// Amplitude-zero check at the separability threshold.
    pub(crate) fn amp_is_zero(&self, c: Complex64) -> bool {
        c.norm_sqr() <= self.separability_threshold
    }

    /// Drop engines no shard references anymore.
    pub(crate) fn prune_orphan_units(&mut self) {
        for id in self.units.ids() {
            if !self.shards.iter().any(|s| s.unit == Some(id)) {
                trace!("releasing orphaned engine {id:?}");
                self.units.remove(id);
            }
        }
    }

    /// Snap a clean near-eigenstate cache and, when the shard is attached,
    /// separate the now-classical qubit out of its engine.
    pub(crate) fn clamp_shard(&mut self, q: usize) {
        if !self.shards[q].clamp_amps() || self.shards[q].unit.is_none() {
            return;
        }
        if is_norm_zero(self.shards[q].amp1) {
            self.separate_bit(false, q);
        } else if is_norm_zero(self.shards[q].amp0) {
            self.separate_bit(true, q);
        }
    }

    pub(crate) fn dirty_shard_range(&mut self, start: usize, length: usize) {
        for i in 0..length {
            self.shards[start + i].make_dirty();
        }
    }

    pub(crate) fn dirty_shard_range_phase(&mut self, start: usize, length: usize) {
        for i in 0..length {
            self.shards[start + i].is_phase_dirty = true;
        }
    }

    /// Child register sharing this one's configuration, with a generator
    /// split off this one's stream.
    pub(crate) fn child_register(&mut self, qubit_count: usize, init_state: u64) -> Self {
        let mut child = Self {
            shards: ShardMap::new(),
            units: UnitTable::new(),
            rng: StdRng::from_rng(&mut self.rng),
            engine_factory: self.engine_factory,
            rand_global_phase: self.rand_global_phase,
            reactive_separate: self.reactive_separate,
            freeze_basis_2qb: false,
            threshold_qubits: self.threshold_qubits,
            separability_threshold: self.separability_threshold,
        };
        child.reset_to_permutation(qubit_count, init_state);
        child
    }

    // --- structural operations ---

    /// Reset every qubit to the permutation eigenstate `perm`, discarding
    /// all engines and deferred records.
    pub fn set_permutation(&mut self, perm: u64) {
        let count = self.shards.len();
        self.reset_to_permutation(count, perm);
    }

    pub(crate) fn reset_to_permutation(&mut self, count: usize, perm: u64) {
        self.units.clear();
        let mut shards = ShardMap::new();
        for i in 0..count {
            let bit = (perm >> i) & 1 != 0;
            let phase = self.nonunitary_phase();
            let id = shards.alloc_id();
            shards.push(QubitShard::eigenstate(id, bit, phase));
        }
        self.shards = shards;
    }

    /// Deep copy. Deferred two-qubit records of the source are flushed
    /// first, so the copy starts with clean pair buffers; every engine
    /// reachable from the shards is cloned exactly once.
    pub fn clone_register(&mut self) -> Self {
        for i in 0..self.qubit_count() {
            self.revert_basis_2qb_full(i);
        }
        self.finish();
        Self {
            shards: self.shards.clone(),
            units: self.units.clone(),
            rng: StdRng::from_rng(&mut self.rng),
            engine_factory: self.engine_factory,
            rand_global_phase: self.rand_global_phase,
            reactive_separate: self.reactive_separate,
            freeze_basis_2qb: false,
            threshold_qubits: self.threshold_qubits,
            separability_threshold: self.separability_threshold,
        }
    }

    /// Append another register's qubits after this one's. Returns the
    /// starting logical index of the appended qubits.
    pub fn compose(&mut self, other: &mut QubitRegister) -> usize {
        let start = self.qubit_count();
        self.compose_at(other, start)
    }

    /// Insert another register's qubits at logical position `start`.
    pub fn compose_at(&mut self, other: &mut QubitRegister, start: usize) -> usize {
        assert!(start <= self.qubit_count(), "compose start out of range");
        let clone = other.clone_register();
        let (clone_shards, clone_units) = (clone.shards, clone.units);

        let mut unit_remap: BTreeMap<UnitId, UnitId> = BTreeMap::new();
        let mut moved_units = clone_units;
        let mut incoming = Vec::with_capacity(clone_shards.len());
        for shard in clone_shards.iter() {
            let mut shard = shard.clone();
            // The flushed clone carries no pair records, so identities can
            // be reassigned freely.
            shard.id = self.shards.alloc_id();
            if let Some(u) = shard.unit {
                let handle = *unit_remap
                    .entry(u)
                    .or_insert_with(|| self.units.insert(moved_units.remove(u)));
                shard.unit = Some(handle);
            }
            incoming.push(shard);
        }
        self.shards.insert_many(start, incoming);
        start
    }

    /// Split `length` qubits at `start` out of this register, into `dest`
    /// when given, discarding them otherwise. The workhorse behind
    /// `decompose` and `dispose`.
    pub fn detach(&mut self, start: usize, length: usize, mut dest: Option<&mut QubitRegister>) {
        assert!(start + length <= self.qubit_count(), "detach range out of bounds");
        if let Some(d) = dest.as_deref() {
            assert_eq!(d.qubit_count(), length, "detach destination width mismatch");
        }
        trace!("detaching {length} qubits at {start}");

        for i in 0..length {
            self.revert_basis_2qb_full(start + i);
        }

        // Count how many leaving bits live in each unit; detached shards
        // move into the destination immediately.
        let mut subunits: BTreeMap<UnitId, usize> = BTreeMap::new();
        for i in 0..length {
            match self.shards[start + i].unit {
                Some(u) => *subunits.entry(u).or_insert(0) += 1,
                None => {
                    if let Some(d) = dest.as_deref_mut() {
                        Self::copy_shard_state(&self.shards[start + i].clone(), &mut d.shards[i], None, 0);
                    }
                }
            }
        }

        // Leaving bits of each unit must be contiguous inside the engine.
        if length > 1 {
            for u in subunits.keys().copied().collect::<Vec<_>>() {
                self.order_contiguous(u);
            }
        }

        struct UnitPlan {
            dest_unit: Option<UnitId>,
            base_mapped: usize,
            collapsed: Option<[Complex64; 2]>,
        }
        let mut plans: BTreeMap<UnitId, UnitPlan> = BTreeMap::new();

        for i in 0..length {
            let p = start + i;
            let Some(u) = self.shards[p].unit else { continue };
            if !plans.contains_key(&u) {
                let base_mapped = self.shards[p].mapped;
                let sub_len = subunits[&u];
                let orig_len = self.units.get(u).qubit_count();
                let mut plan = UnitPlan {
                    dest_unit: None,
                    base_mapped,
                    collapsed: None,
                };
                if sub_len != orig_len {
                    if let Some(d) = dest.as_deref_mut() {
                        let mut extracted = (self.engine_factory)(sub_len, 0);
                        self.units.get_mut(u).decompose(base_mapped, &mut *extracted);
                        if sub_len == 1 {
                            let amps = extracted.get_quantum_state();
                            plan.collapsed = Some([amps[0], amps[1]]);
                        } else {
                            plan.dest_unit = Some(d.units.insert(extracted));
                        }
                    } else {
                        self.units.get_mut(u).dispose(base_mapped, sub_len, None);
                    }
                    if sub_len == orig_len - 1 {
                        self.collapse_last_partner(u, base_mapped, sub_len);
                    }
                } else if let Some(d) = dest.as_deref_mut() {
                    plan.dest_unit = Some(d.units.insert(self.units.remove(u)));
                    plan.base_mapped = 0;
                } else {
                    self.units.remove(u);
                }
                plans.insert(u, plan);
            }

            if let Some(d) = dest.as_deref_mut() {
                let plan = &plans[&u];
                let src = self.shards[p].clone();
                if let Some(amps) = plan.collapsed {
                    let dst = &mut d.shards[i];
                    dst.unit = None;
                    dst.mapped = 0;
                    dst.amp0 = amps[0];
                    dst.amp1 = amps[1];
                    dst.pauli_basis = src.pauli_basis;
                    dst.is_prob_dirty = false;
                    dst.is_phase_dirty = false;
                    dst.clamp_amps();
                } else {
                    Self::copy_shard_state(&src, &mut d.shards[i], plan.dest_unit, plan.base_mapped);
                }
            }
        }

        // Remaining shards above a removed chunk slide down inside their
        // engine.
        for shard_idx in 0..self.shards.len() {
            if shard_idx >= start && shard_idx < start + length {
                continue;
            }
            let Some(u) = self.shards[shard_idx].unit else { continue };
            if let (Some(plan), Some(&sub_len)) = (plans.get(&u), subunits.get(&u)) {
                if self.shards[shard_idx].mapped >= plan.base_mapped + sub_len {
                    self.shards[shard_idx].mapped -= sub_len;
                }
            }
        }

        self.shards.drain_range(start, start + length);
        self.prune_orphan_units();
    }

    fn copy_shard_state(
        src: &QubitShard,
        dst: &mut QubitShard,
        dest_unit: Option<UnitId>,
        base_mapped: usize,
    ) {
        dst.unit = dest_unit;
        dst.mapped = src.mapped - base_mapped;
        dst.amp0 = src.amp0;
        dst.amp1 = src.amp1;
        dst.pauli_basis = src.pauli_basis;
        dst.is_prob_dirty = src.is_prob_dirty;
        dst.is_phase_dirty = src.is_phase_dirty;
        if dest_unit.is_none() {
            dst.mapped = 0;
        }
    }

    /// When a unit is about to shrink to a single qubit, collapse the
    /// surviving partner shard to detached form.
    fn collapse_last_partner(&mut self, unit: UnitId, base_mapped: usize, sub_len: usize) {
        let survivor_mapped = if base_mapped == 0 { sub_len } else { 0 };
        let partner = (0..self.shards.len()).find(|&j| {
            self.shards[j].unit == Some(unit) && self.shards[j].mapped == survivor_mapped
        });
        let Some(j) = partner else { return };
        let amps = self.units.get(unit).get_quantum_state();
        let shard = &mut self.shards[j];
        shard.amp0 = amps[0];
        shard.amp1 = amps[1];
        shard.is_prob_dirty = false;
        shard.is_phase_dirty = false;
        shard.unit = None;
        shard.mapped = 0;
        shard.clamp_amps();
    }

    /// Split `length` qubits at `start` into a fresh register.
    pub fn decompose(&mut self, start: usize, length: usize) -> QubitRegister {
        let mut dest = self.child_register(length, 0);
        self.detach(start, length, Some(&mut dest));
        dest
    }

    /// Split qubits at `start` into an existing register of the target
    /// width.
    pub fn decompose_into(&mut self, start: usize, dest: &mut QubitRegister) {
        self.detach(start, dest.qubit_count(), Some(dest));
    }

    /// Discard `length` qubits at `start`.
    pub fn dispose(&mut self, start: usize, length: usize) {
        self.detach(start, length, None);
    }

    /// Discard qubits known to rest in the permutation eigenstate
    /// `_disposed_perm`. The hint is redundant under shard tracking.
    pub fn dispose_eigenstate(&mut self, start: usize, length: usize, _disposed_perm: u64) {
        self.detach(start, length, None);
    }

    // --- comparison ---

    /// Squared state distance, invariant under global phase: zero for
    /// equal states, one for orthogonal or incomparable ones.
    pub fn sum_sqr_diff(&mut self, other: &mut QubitRegister) -> f64 {
        if std::ptr::eq(self, other) {
            return 0.0;
        }
        if self.qubit_count() != other.qubit_count() {
            return 1.0;
        }

        if self.qubit_count() == 1 {
            self.revert_basis_1qb(0);
            other.revert_basis_1qb(0);
            // Both sides branch uniformly on detachment.
            let mine = self.one_qubit_amps(0);
            let theirs = other.one_qubit_amps(0);
            let inner = mine[0].conj() * theirs[0] + mine[1].conj() * theirs[1];
            return (1.0 - clamp_prob(inner.norm_sqr())).max(0.0);
        }

        let n = self.qubit_count();
        if self.check_bits_permutation(0, n) && other.check_bits_permutation(0, n) {
            return if self.cached_permutation(0, n) == other.cached_permutation(0, n) {
                0.0
            } else {
                1.0
            };
        }

        let mut a = self.clone_register();
        let ua = a.entangle_all();
        a.order_contiguous(ua);
        let mut b = other.clone_register();
        let ub = b.entangle_all();
        b.order_contiguous(ub);
        a.units.get(ua).sum_sqr_diff(b.units.get(ub))
    }

    pub(crate) fn one_qubit_amps(&self, q: usize) -> [Complex64; 2] {
        match self.shards[q].unit {
            Some(u) => {
                let amps = self.units.get(u).get_quantum_state();
                [amps[0], amps[1]]
            }
            None => [self.shards[q].amp0, self.shards[q].amp1],
        }
    }

    // --- engine bookkeeping fan-out ---

    /// Ask every reachable engine to commit queued work.
    pub fn finish(&mut self) {
        for u in self.units.ids() {
            self.units.get_mut(u).finish();
        }
    }

    /// Whether every reachable engine has committed queued work.
    pub fn is_finished(&self) -> bool {
        self.units.ids().iter().all(|&u| self.units.get(u).is_finished())
    }

    pub fn update_running_norm(&mut self) {
        for u in self.units.ids() {
            self.units.get_mut(u).update_running_norm();
        }
    }

    pub fn normalize_state(&mut self) {
        for u in self.units.ids() {
            self.units.get_mut(u).normalize_state();
        }
    }
}
