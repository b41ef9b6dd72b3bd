// src/shard/mod.rs

//! Per-qubit shards and the ordered shard map.
//!
//! A shard either carries its own two cached amplitudes ("detached") or
//! points into a joint subsystem engine through a [`UnitId`] handle plus a
//! local index. Every shard also carries four maps of deferred two-qubit
//! records, keyed by the *identity* of the partner shard, never by its
//! logical position: records survive position swaps and register edits.
//!
//! The two sides of one buffered gate hold equal record copies. All
//! record mutation goes through [`ShardMap`] methods that touch both sides
//! in one call, which is what keeps the symmetric-relation invariant true
//! at every public boundary.

pub mod phase;

use std::collections::{BTreeMap, BTreeSet};

use num_complex::Complex64;
use num_traits::{One, Zero};

use crate::core::{approx_eq, is_arg_zero, is_norm_zero, NORM_EPSILON};
use crate::register::units::UnitId;

pub use phase::PhaseRecord;

/// The Pauli eigenbasis a detached shard's cached amplitudes live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pauli {
    Z,
    X,
    Y,
}

/// Stable per-register shard identity. Allocation is monotone; identities
/// are never reused within one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(pub u64);

/// The per-qubit record.
#[derive(Debug, Clone)]
pub struct QubitShard {
    pub id: ShardId,
    /// Joint subsystem handle, or `None` when detached.
    pub unit: Option<UnitId>,
    /// Local index inside the unit; 0 when detached.
    pub mapped: usize,
    pub amp0: Complex64,
    pub amp1: Complex64,
    pub pauli_basis: Pauli,
    /// Cached amplitudes cannot be trusted for |amp1|^2 probability.
    pub is_prob_dirty: bool,
    /// Cached amplitudes cannot be trusted for relative phase.
    pub is_phase_dirty: bool,
    /// Records in which this shard is the normal-polarity control.
    pub controls: BTreeMap<ShardId, PhaseRecord>,
    /// Records in which this shard is the anti-polarity control.
    pub anti_controls: BTreeMap<ShardId, PhaseRecord>,
    /// Records in which this shard is the target of a normal control.
    pub target_of: BTreeMap<ShardId, PhaseRecord>,
    /// Records in which this shard is the target of an anti control.
    pub anti_target_of: BTreeMap<ShardId, PhaseRecord>,
}

impl QubitShard {
    fn blank(id: ShardId) -> Self {
        Self {
            id,
            unit: None,
            mapped: 0,
            amp0: Complex64::one(),
            amp1: Complex64::zero(),
            pauli_basis: Pauli::Z,
            is_prob_dirty: false,
            is_phase_dirty: false,
            controls: BTreeMap::new(),
            anti_controls: BTreeMap::new(),
            target_of: BTreeMap::new(),
            anti_target_of: BTreeMap::new(),
        }
    }

    /// Detached permutation eigenstate, carrying a nonunitary phase.
    pub fn eigenstate(id: ShardId, bit: bool, phase: Complex64) -> Self {
        let mut shard = Self::blank(id);
        if bit {
            shard.amp0 = Complex64::zero();
            shard.amp1 = phase;
        } else {
            shard.amp0 = phase;
        }
        shard
    }

    /// Shard attached to `unit` at local index `mapped`, caches untrusted.
    pub fn attached(id: ShardId, unit: UnitId, mapped: usize) -> Self {
        let mut shard = Self::blank(id);
        shard.unit = Some(unit);
        shard.mapped = mapped;
        shard.is_prob_dirty = true;
        shard.is_phase_dirty = true;
        shard
    }

    pub fn make_dirty(&mut self) {
        self.is_prob_dirty = true;
        self.is_phase_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.is_prob_dirty || self.is_phase_dirty
    }

    /// Cached probability of |1> in the shard's own basis.
    pub fn prob(&self) -> f64 {
        self.amp1.norm_sqr()
    }

    /// True when the cached state leans |1>.
    pub fn leans_one(&self) -> bool {
        self.amp0.norm_sqr() < 0.5
    }

    /// Snap a near-eigenstate cache to an exact one. Returns whether a
    /// snap happened. Dirty caches are left alone.
    pub fn clamp_amps(&mut self) -> bool {
        if self.is_prob_dirty {
            return false;
        }
        if self.amp0.norm_sqr() <= NORM_EPSILON {
            self.amp0 = Complex64::zero();
            let n = self.amp1.norm();
            if n > 0.0 {
                self.amp1 /= n;
            }
            true
        } else if self.amp1.norm_sqr() <= NORM_EPSILON {
            self.amp1 = Complex64::zero();
            let n = self.amp0.norm();
            if n > 0.0 {
                self.amp0 /= n;
            }
            true
        } else {
            false
        }
    }

    /// Any deferred record at all, in either role or polarity.
    pub fn queued_phase(&self) -> bool {
        !self.controls.is_empty()
            || !self.anti_controls.is_empty()
            || !self.target_of.is_empty()
            || !self.anti_target_of.is_empty()
    }

    /// This shard is the target of at least one buffered inversion.
    pub fn is_invert_target(&self) -> bool {
        self.target_of.values().any(|r| r.is_invert)
            || self.anti_target_of.values().any(|r| r.is_invert)
    }

    /// This shard controls at least one buffered inversion.
    pub fn is_invert_control(&self) -> bool {
        self.controls.values().any(|r| r.is_invert)
            || self.anti_controls.values().any(|r| r.is_invert)
    }

    fn target_side(&self, anti: bool) -> &BTreeMap<ShardId, PhaseRecord> {
        if anti {
            &self.anti_target_of
        } else {
            &self.target_of
        }
    }

    fn target_side_mut(&mut self, anti: bool) -> &mut BTreeMap<ShardId, PhaseRecord> {
        if anti {
            &mut self.anti_target_of
        } else {
            &mut self.target_of
        }
    }

    fn control_side(&self, anti: bool) -> &BTreeMap<ShardId, PhaseRecord> {
        if anti {
            &self.anti_controls
        } else {
            &self.controls
        }
    }

    fn control_side_mut(&mut self, anti: bool) -> &mut BTreeMap<ShardId, PhaseRecord> {
        if anti {
            &mut self.anti_controls
        } else {
            &mut self.controls
        }
    }

    /// One of the four record maps, chosen by role and polarity.
    pub(crate) fn side(&self, control_side: bool, anti: bool) -> &BTreeMap<ShardId, PhaseRecord> {
        if control_side {
            self.control_side(anti)
        } else {
            self.target_side(anti)
        }
    }
}

/// Ordered sequence of shards, indexed by logical qubit position, plus the
/// paired operations that keep both sides of every deferred record equal.
#[derive(Debug, Clone, Default)]
pub struct ShardMap {
    shards: Vec<QubitShard>,
    next_id: u64,
}

impl std::ops::Index<usize> for ShardMap {
    type Output = QubitShard;
    fn index(&self, index: usize) -> &QubitShard {
        &self.shards[index]
    }
}

impl std::ops::IndexMut<usize> for ShardMap {
    fn index_mut(&mut self, index: usize) -> &mut QubitShard {
        &mut self.shards[index]
    }
}

impl ShardMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, QubitShard> {
        self.shards.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, QubitShard> {
        self.shards.iter_mut()
    }

    pub fn alloc_id(&mut self) -> ShardId {
        let id = ShardId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn push(&mut self, shard: QubitShard) {
        self.shards.push(shard);
    }

    pub fn insert_many(&mut self, start: usize, shards: Vec<QubitShard>) {
        self.shards.splice(start..start, shards);
    }

    pub fn drain_range(&mut self, start: usize, end: usize) {
        self.shards.drain(start..end);
    }

    /// Swap two logical positions. Identities travel with the shards, so
    /// deferred records are untouched.
    pub fn swap(&mut self, a: usize, b: usize) {
        self.shards.swap(a, b);
    }

    pub fn position_of(&self, id: ShardId) -> Option<usize> {
        self.shards.iter().position(|s| s.id == id)
    }

    // --- record insertion ---

    fn compose_record<F: Fn(&mut PhaseRecord)>(
        &mut self,
        control: usize,
        target: usize,
        anti: bool,
        f: F,
    ) {
        debug_assert_ne!(control, target);
        let cid = self.shards[control].id;
        let tid = self.shards[target].id;

        let map = self.shards[target].target_side_mut(anti);
        let dead = {
            let rec = map.entry(cid).or_default();
            f(rec);
            rec.is_identity()
        };
        if dead {
            map.remove(&cid);
        }

        let map = self.shards[control].control_side_mut(anti);
        let dead = {
            let rec = map.entry(tid).or_default();
            f(rec);
            rec.is_identity()
        };
        if dead {
            map.remove(&tid);
        }
    }

    /// Buffer `diag(top_left, bottom_right)` on `target` when `control`
    /// reads |1>, composing with any existing record.
    pub fn add_phase_angles(
        &mut self,
        control: usize,
        target: usize,
        top_left: Complex64,
        bottom_right: Complex64,
    ) {
        self.compose_record(control, target, false, |r| {
            r.mul_fields(top_left, bottom_right)
        });
    }

    /// Buffer `diag(top_left, bottom_right)` on `target` when `control`
    /// reads |0>.
    pub fn add_anti_phase_angles(
        &mut self,
        control: usize,
        target: usize,
        top_left: Complex64,
        bottom_right: Complex64,
    ) {
        self.compose_record(control, target, true, |r| {
            r.mul_fields(bottom_right, top_left)
        });
    }

    /// Buffer `[[0, top_right], [bottom_left, 0]]` on `target` when
    /// `control` reads |1>.
    pub fn add_inversion_angles(
        &mut self,
        control: usize,
        target: usize,
        top_right: Complex64,
        bottom_left: Complex64,
    ) {
        self.compose_record(control, target, false, |r| {
            r.compose_inversion(top_right, bottom_left)
        });
    }

    /// Buffer `[[0, top_right], [bottom_left, 0]]` on `target` when
    /// `control` reads |0>.
    pub fn add_anti_inversion_angles(
        &mut self,
        control: usize,
        target: usize,
        top_right: Complex64,
        bottom_left: Complex64,
    ) {
        self.compose_record(control, target, true, |r| {
            r.compose_inversion(bottom_left, top_right)
        });
    }

    /// Overwrite one record pair, both sides.
    pub fn set_record(&mut self, control: usize, target: usize, anti: bool, rec: PhaseRecord) {
        let cid = self.shards[control].id;
        let tid = self.shards[target].id;
        self.shards[target]
            .target_side_mut(anti)
            .insert(cid, rec.clone());
        self.shards[control].control_side_mut(anti).insert(tid, rec);
    }

    /// Remove one record pair, both sides.
    pub fn remove_pair(&mut self, control: usize, target: usize, anti: bool) {
        let cid = self.shards[control].id;
        let tid = self.shards[target].id;
        self.shards[target].target_side_mut(anti).remove(&cid);
        self.shards[control].control_side_mut(anti).remove(&tid);
    }

    /// Read a record in which `target` is targeted by `control`.
    pub fn record(&self, control: usize, target: usize, anti: bool) -> Option<&PhaseRecord> {
        let cid = self.shards[control].id;
        self.shards[target].target_side(anti).get(&cid)
    }

    // --- commutation ---

    /// Commute the single-qubit phase gate `diag(top_left, bottom_right)`,
    /// just applied to `pos`, through every buffered record touching
    /// `pos`. Phase records and control-side records commute freely; only
    /// inversions targeting `pos` pick up rephrased fields.
    pub fn commute_phase(&mut self, pos: usize, top_left: Complex64, bottom_right: Complex64) {
        if is_norm_zero(top_left) || is_norm_zero(bottom_right) {
            return;
        }
        let ratio = top_left / bottom_right;
        let inverse = bottom_right / top_left;
        let sid = self.shards[pos].id;

        for anti in [false, true] {
            let (diff_mul, same_mul) = if anti {
                (inverse, ratio)
            } else {
                (ratio, inverse)
            };
            let partners: Vec<ShardId> = self.shards[pos]
                .target_side(anti)
                .iter()
                .filter(|(_, r)| r.is_invert)
                .map(|(k, _)| *k)
                .collect();
            for pid in partners {
                if let Some(r) = self.shards[pos].target_side_mut(anti).get_mut(&pid) {
                    r.mul_fields(diff_mul, same_mul);
                }
                let cpos = self.position_of(pid).expect("record partner present");
                if let Some(r) = self.shards[cpos].control_side_mut(anti).get_mut(&sid) {
                    r.mul_fields(diff_mul, same_mul);
                }
            }
        }
    }

    /// Commute a Pauli-X-like gate, just applied to `pos`, through every
    /// buffered record touching `pos`. Records targeting `pos` exchange
    /// their fields; records controlled by `pos` flip firing polarity.
    pub fn flip_phase_anti(&mut self, pos: usize) {
        let sid = self.shards[pos].id;

        for anti in [false, true] {
            let pids: Vec<ShardId> =
                self.shards[pos].target_side(anti).keys().copied().collect();
            for pid in pids {
                self.shards[pos]
                    .target_side_mut(anti)
                    .get_mut(&pid)
                    .expect("snapshotted key")
                    .swap_fields();
                let cpos = self.position_of(pid).expect("record partner present");
                self.shards[cpos]
                    .control_side_mut(anti)
                    .get_mut(&sid)
                    .expect("mirror record present")
                    .swap_fields();
            }
        }

        let shard = &mut self.shards[pos];
        std::mem::swap(&mut shard.controls, &mut shard.anti_controls);
        for r in shard.controls.values_mut() {
            r.swap_fields();
        }
        for r in shard.anti_controls.values_mut() {
            r.swap_fields();
        }
        let pids: BTreeSet<ShardId> = shard
            .controls
            .keys()
            .chain(shard.anti_controls.keys())
            .copied()
            .collect();
        for pid in pids {
            let tpos = self.position_of(pid).expect("record partner present");
            let t = &mut self.shards[tpos];
            let normal = t.target_of.remove(&sid);
            let anti = t.anti_target_of.remove(&sid);
            if let Some(mut r) = normal {
                r.swap_fields();
                t.anti_target_of.insert(sid, r);
            }
            if let Some(mut r) = anti {
                r.swap_fields();
                t.target_of.insert(sid, r);
            }
        }
    }

    /// Rewrite the records targeting `pos` that survive an H commutation:
    /// a control-phase `(d, -d)` becomes a conditional inversion, a
    /// conditional inversion `(v, v)` becomes a control-phase, and a
    /// conditional inversion `(d, -d)` stays an inversion with both fields
    /// negated. The caller has already flushed every record these
    /// identities do not cover.
    pub fn commute_h_local(&mut self, pos: usize) {
        let sid = self.shards[pos].id;
        for anti in [false, true] {
            let rewrite = |rec: &mut PhaseRecord| {
                if rec.is_invert && !approx_eq(rec.cmplx_diff, rec.cmplx_same) {
                    rec.cmplx_diff = -rec.cmplx_diff;
                    rec.cmplx_same = -rec.cmplx_same;
                    return;
                }
                if anti {
                    rec.cmplx_diff = -rec.cmplx_diff;
                } else {
                    rec.cmplx_same = -rec.cmplx_same;
                }
                rec.is_invert = !rec.is_invert;
            };
            let pids: Vec<ShardId> =
                self.shards[pos].target_side(anti).keys().copied().collect();
            for pid in pids {
                if let Some(rec) = self.shards[pos].target_side_mut(anti).get_mut(&pid) {
                    rewrite(rec);
                }
                let cpos = self.position_of(pid).expect("record partner present");
                if let Some(rec) = self.shards[cpos].control_side_mut(anti).get_mut(&sid) {
                    rewrite(rec);
                }
            }
        }
    }

    // --- algebraic cleanup ---

    /// Re-orient a symmetric record (no inversion, unit `cmplx_diff`) so
    /// that the shard currently acting as control becomes the target. Used
    /// before flushing control-side maps, so symmetric records escape the
    /// flush entirely.
    pub fn optimize_controls(&mut self, pos: usize, anti: bool) {
        let snapshot: Vec<(ShardId, PhaseRecord)> = self.shards[pos]
            .control_side(anti)
            .iter()
            .filter(|(_, r)| !r.is_invert && is_arg_zero(r.cmplx_diff))
            .map(|(k, r)| (*k, r.clone()))
            .collect();
        for (pid, rec) in snapshot {
            let tpos = self.position_of(pid).expect("record partner present");
            self.remove_pair(pos, tpos, anti);
            if anti {
                self.add_anti_phase_angles(tpos, pos, rec.cmplx_same, Complex64::one());
            } else {
                self.add_phase_angles(tpos, pos, Complex64::one(), rec.cmplx_same);
            }
        }
    }

    /// Mirror of [`Self::optimize_controls`] for the target-side maps.
    pub fn optimize_targets(&mut self, pos: usize, anti: bool) {
        let snapshot: Vec<(ShardId, PhaseRecord)> = self.shards[pos]
            .target_side(anti)
            .iter()
            .filter(|(_, r)| !r.is_invert && is_arg_zero(r.cmplx_diff))
            .map(|(k, r)| (*k, r.clone()))
            .collect();
        for (pid, rec) in snapshot {
            let cpos = self.position_of(pid).expect("record partner present");
            self.remove_pair(cpos, pos, anti);
            if anti {
                self.add_anti_phase_angles(pos, cpos, rec.cmplx_same, Complex64::one());
            } else {
                self.add_phase_angles(pos, cpos, Complex64::one(), rec.cmplx_same);
            }
        }
    }

    /// Merge symmetric control-side records of `pos` into an existing
    /// target-side record against the same partner, when one exists.
    pub fn combine_gates(&mut self, pos: usize) {
        for anti in [false, true] {
            let snapshot: Vec<(ShardId, PhaseRecord)> = self.shards[pos]
                .control_side(anti)
                .iter()
                .filter(|(_, r)| !r.is_invert && is_arg_zero(r.cmplx_diff))
                .map(|(k, r)| (*k, r.clone()))
                .collect();
            for (pid, rec) in snapshot {
                if !self.shards[pos].target_side(anti).contains_key(&pid) {
                    continue;
                }
                let tpos = self.position_of(pid).expect("record partner present");
                self.remove_pair(pos, tpos, anti);
                if anti {
                    self.add_anti_phase_angles(tpos, pos, rec.cmplx_same, Complex64::one());
                } else {
                    self.add_phase_angles(tpos, pos, Complex64::one(), rec.cmplx_same);
                }
            }
        }
    }

    // --- discard paths ---

    /// Drop every record in which `pos` is a control of polarity `anti`.
    pub fn dump_control_of(&mut self, pos: usize, anti: bool) {
        let pids: Vec<ShardId> = self.shards[pos].control_side(anti).keys().copied().collect();
        for pid in pids {
            let tpos = self.position_of(pid).expect("record partner present");
            self.remove_pair(pos, tpos, anti);
        }
    }

    /// Drop control-side records of `pos` whose firing applies only a
    /// global phase to the partner.
    pub fn dump_same_phase_control_of(&mut self, pos: usize, anti: bool) {
        let pids: Vec<ShardId> = self.shards[pos]
            .control_side(anti)
            .iter()
            .filter(|(_, r)| !r.is_invert && approx_eq(r.cmplx_diff, r.cmplx_same))
            .map(|(k, _)| *k)
            .collect();
        for pid in pids {
            let tpos = self.position_of(pid).expect("record partner present");
            self.remove_pair(pos, tpos, anti);
        }
    }

    /// Drop every non-invert record touching `pos`, in either role.
    pub fn dump_phase_buffers(&mut self, pos: usize) {
        for anti in [false, true] {
            let pids: Vec<ShardId> = self.shards[pos]
                .target_side(anti)
                .iter()
                .filter(|(_, r)| !r.is_invert)
                .map(|(k, _)| *k)
                .collect();
            for pid in pids {
                let cpos = self.position_of(pid).expect("record partner present");
                self.remove_pair(cpos, pos, anti);
            }
            let pids: Vec<ShardId> = self.shards[pos]
                .control_side(anti)
                .iter()
                .filter(|(_, r)| !r.is_invert)
                .map(|(k, _)| *k)
                .collect();
            for pid in pids {
                let tpos = self.position_of(pid).expect("record partner present");
                self.remove_pair(pos, tpos, anti);
            }
        }
    }

    /// Reduce every inversion record touching `pos` to a bare conditional
    /// X by clearing its phase fields. Valid when every participant is
    /// about to be measured in the permutation basis.
    pub fn clear_invert_phase(&mut self, pos: usize) {
        fn strip(rec: &mut PhaseRecord) {
            if rec.is_invert {
                rec.cmplx_diff = Complex64::one();
                rec.cmplx_same = Complex64::one();
            }
        }
        let sid = self.shards[pos].id;
        for anti in [false, true] {
            let pids: Vec<ShardId> =
                self.shards[pos].target_side(anti).keys().copied().collect();
            for pid in pids {
                if let Some(rec) = self.shards[pos].target_side_mut(anti).get_mut(&pid) {
                    strip(rec);
                }
                let cpos = self.position_of(pid).expect("record partner present");
                if let Some(rec) = self.shards[cpos].control_side_mut(anti).get_mut(&sid) {
                    strip(rec);
                }
            }
            let pids: Vec<ShardId> =
                self.shards[pos].control_side(anti).keys().copied().collect();
            for pid in pids {
                if let Some(rec) = self.shards[pos].control_side_mut(anti).get_mut(&pid) {
                    strip(rec);
                }
                let tpos = self.position_of(pid).expect("record partner present");
                if let Some(rec) = self.shards[tpos].target_side_mut(anti).get_mut(&sid) {
                    strip(rec);
                }
            }
        }
    }

    /// Check that every record's two sides agree: for each entry in a
    /// control-side map there is an equal entry in the partner's
    /// target-side map of the same polarity, and vice versa.
    pub fn buffers_symmetric(&self) -> bool {
        for shard in self.shards.iter() {
            for anti in [false, true] {
                for (tid, rec) in shard.control_side(anti) {
                    let Some(tpos) = self.position_of(*tid) else {
                        return false;
                    };
                    match self.shards[tpos].target_side(anti).get(&shard.id) {
                        Some(mirror) if mirror == rec => {}
                        _ => return false,
                    }
                }
                for (cid, rec) in shard.target_side(anti) {
                    let Some(cpos) = self.position_of(*cid) else {
                        return false;
                    };
                    match self.shards[cpos].control_side(anti).get(&shard.id) {
                        Some(mirror) if mirror == rec => {}
                        _ => return false,
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_shards() -> ShardMap {
        let mut map = ShardMap::new();
        let id0 = map.alloc_id();
        map.push(QubitShard::eigenstate(id0, false, Complex64::one()));
        let id1 = map.alloc_id();
        map.push(QubitShard::eigenstate(id1, false, Complex64::one()));
        map
    }

    #[test]
    fn phase_records_stay_symmetric() {
        let mut map = two_shards();
        map.add_phase_angles(0, 1, Complex64::one(), -Complex64::one());
        assert!(map.buffers_symmetric());
        assert!(map[0].controls.len() == 1 && map[1].target_of.len() == 1);

        map.add_inversion_angles(0, 1, Complex64::one(), Complex64::one());
        assert!(map.buffers_symmetric());
        assert!(map.record(0, 1, false).unwrap().is_invert);
    }

    #[test]
    fn double_inversion_cancels() {
        let mut map = two_shards();
        map.add_inversion_angles(0, 1, Complex64::one(), Complex64::one());
        map.add_inversion_angles(0, 1, Complex64::one(), Complex64::one());
        assert!(map.record(0, 1, false).is_none());
        assert!(!map[0].queued_phase() && !map[1].queued_phase());
    }

    #[test]
    fn flip_phase_anti_swaps_polarity_and_fields() {
        let mut map = two_shards();
        let tl = Complex64::new(0.0, 1.0);
        map.add_phase_angles(0, 1, tl, Complex64::one());
        // X on the control flips which branch fires.
        map.flip_phase_anti(0);
        assert!(map.buffers_symmetric());
        assert!(map.record(0, 1, false).is_none());
        let rec = map.record(0, 1, true).expect("record moved to anti polarity");
        // diag(i, 1) fired on |1> must become diag(i, 1) fired on |0>.
        assert!(approx_eq(rec.cmplx_same, tl));
        assert!(approx_eq(rec.cmplx_diff, Complex64::one()));
    }

    #[test]
    fn commute_h_turns_cz_into_cnot() {
        let mut map = two_shards();
        map.add_phase_angles(0, 1, Complex64::one(), -Complex64::one());
        map.commute_h_local(1);
        assert!(map.buffers_symmetric());
        let rec = map.record(0, 1, false).unwrap();
        assert!(rec.is_invert);
        assert!(approx_eq(rec.cmplx_diff, Complex64::one()));
        assert!(approx_eq(rec.cmplx_same, Complex64::one()));
    }

    #[test]
    fn optimize_controls_reorients_symmetric_record() {
        let mut map = two_shards();
        map.add_phase_angles(0, 1, Complex64::one(), Complex64::new(0.0, 1.0));
        map.optimize_controls(0, false);
        assert!(map.buffers_symmetric());
        // Shard 0 no longer controls anything; it is now the target.
        assert!(map[0].controls.is_empty());
        let rec = map.record(1, 0, false).expect("reoriented record");
        assert!(approx_eq(rec.cmplx_same, Complex64::new(0.0, 1.0)));
    }
}
