// src/register/basis.rs

//! Per-shard basis management and deferred-record flushing.
//!
//! A shard in basis X stores the frame `H * psi`; in basis Y the frame
//! `U_Y^dag * psi` with `U_Y = ((1, 1), (i, -i)) / sqrt(2)`. Gates headed
//! for an off-frame shard are conjugated into the frame by the fixed
//! transforms below, and frame relabeling itself is free for H. The flush
//! machinery drains deferred two-qubit records in controlled slices so a
//! gate only pays for the records that actually conflict with it.

use std::collections::BTreeSet;

use num_complex::Complex64;
use num_traits::One;

use crate::core::{approx_eq, is_arg_pi, is_arg_zero, is_norm_zero, is_one, SQRT1_2};
use crate::engine::EngineBackend;
use crate::shard::{Pauli, PhaseRecord, ShardId};

use super::QubitRegister;

/// Which record kinds a flush covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RevertExclusivity {
    OnlyInvert,
    OnlyPhase,
    InvertAndPhase,
}

/// Which side of the shard's maps a flush covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RevertControl {
    OnlyControls,
    OnlyTargets,
    ControlsAndTargets,
}

/// Which control polarity a flush covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RevertAnti {
    OnlyCtrl,
    OnlyAnti,
    CtrlAndAnti,
}

/// Conjugate a 2x2 matrix into the X frame: `H * m * H`.
pub(crate) fn transform_x2x2(m: &[Complex64; 4]) -> [Complex64; 4] {
    let half = 0.5;
    [
        half * (m[0] + m[1] + m[2] + m[3]),
        half * (m[0] - m[1] + m[2] - m[3]),
        half * (m[0] + m[1] - m[2] - m[3]),
        half * (m[0] - m[1] - m[2] + m[3]),
    ]
}

/// Conjugate a 2x2 matrix into the Y frame: `U_Y^dag * m * U_Y`.
pub(crate) fn transform_y2x2(m: &[Complex64; 4]) -> [Complex64; 4] {
    let half = 0.5;
    let i = Complex64::i();
    [
        half * (m[0] + i * (m[1] - m[2]) + m[3]),
        half * (m[0] - i * (m[1] + m[2]) - m[3]),
        half * (m[0] + i * (m[1] + m[2]) - m[3]),
        half * (m[0] - i * (m[1] - m[2]) + m[3]),
    ]
}

pub(crate) fn transform_x_invert(top_right: Complex64, bottom_left: Complex64) -> [Complex64; 4] {
    let half = 0.5;
    let m0 = half * (top_right + bottom_left);
    let m1 = half * (-top_right + bottom_left);
    [m0, m1, -m1, -m0]
}

pub(crate) fn transform_y_invert(top_right: Complex64, bottom_left: Complex64) -> [Complex64; 4] {
    let half_i = Complex64::new(0.0, 0.5);
    let m0 = half_i * (top_right - bottom_left);
    let m1 = half_i * (-top_right - bottom_left);
    [m0, m1, -m1, -m0]
}

pub(crate) fn transform_phase(top_left: Complex64, bottom_right: Complex64) -> [Complex64; 4] {
    let half = 0.5;
    let m0 = half * (top_left + bottom_right);
    let m1 = half * (top_left - bottom_right);
    [m0, m1, m1, m0]
}

/// Hadamard, which converts between the Z and X frames.
pub(crate) fn hadamard_mtrx() -> [Complex64; 4] {
    let h = Complex64::new(SQRT1_2, 0.0);
    [h, h, h, -h]
}

/// Frame conversion Y -> X: `H * U_Y`.
fn y_to_x_mtrx() -> [Complex64; 4] {
    [
        Complex64::new(0.5, 0.5),
        Complex64::new(0.5, -0.5),
        Complex64::new(0.5, -0.5),
        Complex64::new(0.5, 0.5),
    ]
}

/// Frame conversion X -> Y: adjoint of [`y_to_x_mtrx`].
fn x_to_y_mtrx() -> [Complex64; 4] {
    [
        Complex64::new(0.5, -0.5),
        Complex64::new(0.5, 0.5),
        Complex64::new(0.5, 0.5),
        Complex64::new(0.5, -0.5),
    ]
}

/// Frame conversion Y -> Z: `U_Y`.
fn y_to_z_mtrx() -> [Complex64; 4] {
    let h = Complex64::new(SQRT1_2, 0.0);
    let hi = Complex64::new(0.0, SQRT1_2);
    [h, h, hi, -hi]
}

impl QubitRegister {
    /// Apply a frame-conversion matrix to a shard's engine slice and its
    /// cached amplitudes alike.
    fn apply_frame(&mut self, q: usize, m: &[Complex64; 4]) {
        let (unit, mapped) = (self.shards[q].unit, self.shards[q].mapped);
        if let Some(u) = unit {
            self.units.get_mut(u).mtrx(m, mapped);
        }
        let shard = &mut self.shards[q];
        let a0 = shard.amp0;
        shard.amp0 = m[0] * a0 + m[1] * shard.amp1;
        shard.amp1 = m[2] * a0 + m[3] * shard.amp1;
    }

    /// Toggle between the Z and X frames.
    pub(crate) fn convert_z_to_x(&mut self, q: usize) {
        self.shards[q].pauli_basis = match self.shards[q].pauli_basis {
            Pauli::X => Pauli::Z,
            _ => Pauli::X,
        };
        self.apply_frame(q, &hadamard_mtrx());
    }

    pub(crate) fn convert_x_to_y(&mut self, q: usize) {
        self.shards[q].pauli_basis = Pauli::Y;
        self.apply_frame(q, &x_to_y_mtrx());
    }

    pub(crate) fn convert_y_to_z(&mut self, q: usize) {
        self.shards[q].pauli_basis = Pauli::Z;
        self.apply_frame(q, &y_to_z_mtrx());
    }

    /// Leave the Y frame for X, when in Y.
    pub(crate) fn revert_basis_y(&mut self, q: usize) {
        if self.shards[q].pauli_basis != Pauli::Y {
            return;
        }
        self.shards[q].pauli_basis = Pauli::X;
        self.apply_frame(q, &y_to_x_mtrx());
    }

    /// Leave the X frame for Z, when in X.
    pub(crate) fn revert_basis_x(&mut self, q: usize) {
        if self.shards[q].pauli_basis == Pauli::X {
            self.convert_z_to_x(q);
        }
    }

    /// Return the shard to the permutation (Z) frame.
    pub(crate) fn revert_basis_1qb(&mut self, q: usize) {
        self.revert_basis_y(q);
        self.revert_basis_x(q);
    }

    // --- raw axis operations, frame-blind ---

    pub(crate) fn x_base(&mut self, q: usize) {
        let (unit, mapped) = (self.shards[q].unit, self.shards[q].mapped);
        if let Some(u) = unit {
            self.units
                .get_mut(u)
                .invert(Complex64::one(), Complex64::one(), mapped);
        }
        let shard = &mut self.shards[q];
        std::mem::swap(&mut shard.amp0, &mut shard.amp1);
    }

    pub(crate) fn y_base(&mut self, q: usize) {
        let (unit, mapped) = (self.shards[q].unit, self.shards[q].mapped);
        if let Some(u) = unit {
            self.units
                .get_mut(u)
                .invert(-Complex64::i(), Complex64::i(), mapped);
        }
        let shard = &mut self.shards[q];
        let a0 = shard.amp0;
        shard.amp0 = -Complex64::i() * shard.amp1;
        shard.amp1 = Complex64::i() * a0;
    }

    pub(crate) fn z_base(&mut self, q: usize) {
        let (unit, mapped) = (self.shards[q].unit, self.shards[q].mapped);
        if let Some(u) = unit {
            self.units
                .get_mut(u)
                .phase(Complex64::one(), -Complex64::one(), mapped);
        }
        self.shards[q].amp1 = -self.shards[q].amp1;
    }

    // --- deferred-record flushing ---

    /// Materialize one record as the controlled gate it stands for. The
    /// re-entrancy guard keeps the nested gate call from flushing further
    /// records while this one is mid-application.
    pub(crate) fn apply_buffer(
        &mut self,
        rec: &PhaseRecord,
        control: usize,
        target: usize,
        anti: bool,
    ) {
        let was_frozen = self.freeze_basis_2qb;
        self.freeze_basis_2qb = true;
        if rec.is_invert {
            if anti {
                self.mac_invert(&[control], rec.cmplx_same, rec.cmplx_diff, target);
            } else {
                self.mc_invert(&[control], rec.cmplx_diff, rec.cmplx_same, target);
            }
        } else if anti {
            self.mac_phase(&[control], rec.cmplx_same, rec.cmplx_diff, target);
        } else {
            self.mc_phase(&[control], rec.cmplx_diff, rec.cmplx_same, target);
        }
        self.freeze_basis_2qb = was_frozen;
    }

    fn apply_buffer_map(
        &mut self,
        pos: usize,
        anti: bool,
        control_side: bool,
        exclusivity: RevertExclusivity,
        except: &BTreeSet<ShardId>,
        dump_skipped: bool,
    ) {
        let snapshot: Vec<(ShardId, PhaseRecord)> = self.shards[pos]
            .side(control_side, anti)
            .iter()
            .map(|(k, r)| (*k, r.clone()))
            .collect();
        for (pid, _) in snapshot {
            // A cascaded flush or dump may have resolved this record.
            if !self.shards[pos].side(control_side, anti).contains_key(&pid) {
                continue;
            }
            let Some(ppos) = self.shards.position_of(pid) else {
                continue;
            };
            let (control, target) = if control_side { (pos, ppos) } else { (ppos, pos) };
            let rec = match self.shards.record(control, target, anti) {
                Some(r) => r.clone(),
                None => continue,
            };
            let matches = match exclusivity {
                RevertExclusivity::OnlyInvert => rec.is_invert,
                RevertExclusivity::OnlyPhase => !rec.is_invert,
                RevertExclusivity::InvertAndPhase => true,
            };
            if !matches || except.contains(&pid) {
                if dump_skipped {
                    self.shards.remove_pair(control, target, anti);
                }
                continue;
            }
            self.shards.remove_pair(control, target, anti);
            self.apply_buffer(&rec, control, target, anti);
        }
    }

    /// Drain the deferred-record maps of one shard, restricted by record
    /// kind, map side, and control polarity. Partners named in the except
    /// lists are passed over (and discarded when `dump_skipped`, for
    /// records known to be absorbed elsewhere).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn revert_basis_2qb(
        &mut self,
        pos: usize,
        exclusivity: RevertExclusivity,
        control_excl: RevertControl,
        anti_excl: RevertAnti,
        except_controlling: &[usize],
        except_targeted_by: &[usize],
        dump_skipped: bool,
        skip_optimize: bool,
    ) {
        if self.freeze_basis_2qb || !self.shards[pos].queued_phase() {
            return;
        }

        self.shards.combine_gates(pos);

        if !skip_optimize && exclusivity != RevertExclusivity::OnlyInvert {
            match control_excl {
                RevertControl::OnlyControls => {
                    if anti_excl != RevertAnti::OnlyAnti {
                        self.shards.optimize_controls(pos, false);
                    }
                    if anti_excl != RevertAnti::OnlyCtrl {
                        self.shards.optimize_controls(pos, true);
                    }
                }
                RevertControl::OnlyTargets => {
                    if anti_excl != RevertAnti::OnlyAnti {
                        self.shards.optimize_targets(pos, false);
                    }
                    if anti_excl != RevertAnti::OnlyCtrl {
                        self.shards.optimize_targets(pos, true);
                    }
                }
                RevertControl::ControlsAndTargets => {}
            }
        }

        let except_c: BTreeSet<ShardId> = except_controlling
            .iter()
            .map(|&i| self.shards[i].id)
            .collect();
        let except_t: BTreeSet<ShardId> = except_targeted_by
            .iter()
            .map(|&i| self.shards[i].id)
            .collect();

        if control_excl != RevertControl::OnlyTargets {
            if anti_excl != RevertAnti::OnlyAnti {
                self.apply_buffer_map(pos, false, true, exclusivity, &except_c, dump_skipped);
            }
            if anti_excl != RevertAnti::OnlyCtrl {
                self.apply_buffer_map(pos, true, true, exclusivity, &except_c, dump_skipped);
            }
        }
        if control_excl == RevertControl::OnlyControls {
            return;
        }
        if anti_excl != RevertAnti::OnlyAnti {
            self.apply_buffer_map(pos, false, false, exclusivity, &except_t, dump_skipped);
        }
        if anti_excl != RevertAnti::OnlyCtrl {
            self.apply_buffer_map(pos, true, false, exclusivity, &except_t, dump_skipped);
        }
    }

    pub(crate) fn revert_basis_2qb_full(&mut self, pos: usize) {
        self.revert_basis_2qb(
            pos,
            RevertExclusivity::InvertAndPhase,
            RevertControl::ControlsAndTargets,
            RevertAnti::CtrlAndAnti,
            &[],
            &[],
            false,
            false,
        );
    }

    // --- canonical-form entry points ---

    pub(crate) fn to_perm_basis(&mut self, q: usize) {
        self.revert_basis_1qb(q);
        self.revert_basis_2qb_full(q);
    }

    pub(crate) fn to_perm_basis_range(&mut self, start: usize, length: usize) {
        for i in 0..length {
            self.to_perm_basis(start + i);
        }
    }

    pub(crate) fn to_perm_basis_all(&mut self) {
        self.to_perm_basis_range(0, self.qubit_count());
    }

    /// Enough canonicalization that `prob(q)` is meaningful: the frame
    /// returns to Z and inversions targeting `q` are materialized, but
    /// phase records stay buffered because they cannot move probability.
    pub(crate) fn to_perm_basis_prob(&mut self, q: usize) {
        self.revert_basis_1qb(q);
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
    }

    pub(crate) fn to_perm_basis_prob_range(&mut self, start: usize, length: usize) {
        for i in 0..length {
            self.to_perm_basis_prob(start + i);
        }
    }

    pub(crate) fn to_perm_basis_prob_all(&mut self) {
        self.to_perm_basis_prob_range(0, self.qubit_count());
    }

    /// Canonicalization for a non-collapsing measurement read: flush every
    /// inversion touching `q` and materialize phase records `q` controls;
    /// phase records targeting `q` cannot move its Z-basis probability.
    pub(crate) fn to_perm_basis_measure(&mut self, q: usize) {
        self.revert_basis_1qb(q);
        self.revert_basis_2qb(
            q,
            RevertExclusivity::OnlyInvert,
            RevertControl::ControlsAndTargets,
            RevertAnti::CtrlAndAnti,
            &[],
            &[],
            false,
            false,
        );
        self.revert_basis_2qb(
            q,
            RevertExclusivity::OnlyPhase,
            RevertControl::OnlyControls,
            RevertAnti::CtrlAndAnti,
            &[],
            &[],
            true,
            false,
        );
    }

    pub(crate) fn to_perm_basis_measure_range(&mut self, start: usize, length: usize) {
        for i in 0..length {
            self.to_perm_basis_measure(start + i);
        }
    }

    // --- eigenstate flushes ---

    /// The control collapsed to |0>: its normal-polarity records can never
    /// fire and are discarded; its anti-polarity records certainly fire
    /// and are materialized (trim reduces them to local gates).
    pub(crate) fn flush_0_eigenstate(&mut self, q: usize) {
        self.shards.dump_control_of(q, false);
        if self.rand_global_phase {
            self.shards.dump_same_phase_control_of(q, true);
        }
        self.revert_basis_2qb(
            q,
            RevertExclusivity::InvertAndPhase,
            RevertControl::OnlyControls,
            RevertAnti::OnlyAnti,
            &[],
            &[],
            false,
            false,
        );
    }

    /// Mirror of [`Self::flush_0_eigenstate`] for a |1> collapse.
    pub(crate) fn flush_1_eigenstate(&mut self, q: usize) {
        self.shards.dump_control_of(q, true);
        if self.rand_global_phase {
            self.shards.dump_same_phase_control_of(q, false);
        }
        self.revert_basis_2qb(
            q,
            RevertExclusivity::InvertAndPhase,
            RevertControl::OnlyControls,
            RevertAnti::OnlyCtrl,
            &[],
            &[],
            false,
            false,
        );
    }

    // --- H commutation ---

    /// Push a Hadamard on `pos` through its deferred records. CZ-like
    /// records this shard controls re-orient to target it; records that
    /// survive commutation are rewritten in closed form; everything else
    /// is flushed first.
    pub(crate) fn commute_h(&mut self, pos: usize) {
        if !self.shards[pos].queued_phase() {
            return;
        }

        for anti in [false, true] {
            let snapshot: Vec<(ShardId, PhaseRecord)> = self.shards[pos]
                .side(true, anti)
                .iter()
                .map(|(k, r)| (*k, r.clone()))
                .collect();
            for (pid, rec) in snapshot {
                if rec.is_invert {
                    continue;
                }
                let Some(tpos) = self.shards.position_of(pid) else {
                    continue;
                };
                let one = Complex64::one();
                if is_arg_zero(rec.cmplx_diff) && is_arg_pi(rec.cmplx_same) {
                    self.shards.remove_pair(pos, tpos, anti);
                    if anti {
                        self.shards.add_anti_phase_angles(tpos, pos, -one, one);
                    } else {
                        self.shards.add_phase_angles(tpos, pos, one, -one);
                    }
                } else if is_arg_pi(rec.cmplx_diff) && is_arg_zero(rec.cmplx_same) {
                    self.shards.remove_pair(pos, tpos, anti);
                    if anti {
                        self.shards.add_phase_angles(tpos, pos, -one, one);
                    } else {
                        self.shards.add_anti_phase_angles(tpos, pos, one, -one);
                    }
                }
            }
        }

        // Whatever this shard still controls cannot commute; flush it.
        self.revert_basis_2qb(
            pos,
            RevertExclusivity::InvertAndPhase,
            RevertControl::OnlyControls,
            RevertAnti::CtrlAndAnti,
            &[],
            &[],
            false,
            true,
        );

        // Flush the records targeting this shard that have no H-commuted
        // form.
        for anti in [false, true] {
            let snapshot: Vec<(ShardId, PhaseRecord)> = self.shards[pos]
                .side(false, anti)
                .iter()
                .map(|(k, r)| (*k, r.clone()))
                .collect();
            for (pid, rec) in snapshot {
                if is_norm_zero(rec.cmplx_diff + rec.cmplx_same) {
                    continue;
                }
                if rec.is_invert && is_norm_zero(rec.cmplx_diff - rec.cmplx_same) {
                    continue;
                }
                let Some(cpos) = self.shards.position_of(pid) else {
                    continue;
                };
                if self.shards.record(cpos, pos, anti).is_none() {
                    continue;
                }
                self.shards.remove_pair(cpos, pos, anti);
                self.apply_buffer(&rec, cpos, pos, anti);
            }
        }

        self.shards.commute_h_local(pos);
    }

    // --- pairwise record cleanup after buffered controlled gates ---

    /// After composing a record between `control` and `target`, resolve
    /// what can be resolved: identity records vanish, same-unit records
    /// are materialized at once, and a matched normal/anti pair collapses
    /// to a local phase on the target.
    pub(crate) fn optimize_pair_buffers(&mut self, control: usize, target: usize, anti: bool) {
        let Some(primary) = self.shards.record(control, target, anti).cloned() else {
            return;
        };

        if !primary.is_invert {
            if is_one(primary.cmplx_diff) && is_one(primary.cmplx_same) {
                self.shards.remove_pair(control, target, anti);
                return;
            }
            if self.same_unit(control, target) {
                self.shards.remove_pair(control, target, anti);
                self.apply_buffer(&primary, control, target, anti);
                return;
            }
        }

        let Some(secondary) = self.shards.record(control, target, !anti).cloned() else {
            return;
        };
        if primary.is_invert != secondary.is_invert {
            return;
        }

        let (mut ctrl_rec, mut anti_rec) = if anti {
            (secondary, primary)
        } else {
            (primary, secondary)
        };

        let was_invert = ctrl_rec.is_invert;
        if was_invert {
            // Both polarities invert, so the X component is unconditional:
            // apply it directly (in the shard's own frame) and keep only
            // the conditional phases.
            match self.shards[target].pauli_basis {
                Pauli::Y => self.y_base(target),
                Pauli::X => self.z_base(target),
                Pauli::Z => self.x_base(target),
            }
            ctrl_rec.is_invert = false;
            anti_rec.is_invert = false;
            self.shards.set_record(control, target, false, ctrl_rec.clone());
            self.shards.set_record(control, target, true, anti_rec.clone());
        }

        if approx_eq(ctrl_rec.cmplx_diff, anti_rec.cmplx_same)
            && approx_eq(ctrl_rec.cmplx_same, anti_rec.cmplx_diff)
        {
            self.shards.remove_pair(control, target, false);
            self.shards.remove_pair(control, target, true);
            self.phase(ctrl_rec.cmplx_diff, ctrl_rec.cmplx_same, target);
        } else if was_invert {
            if is_one(ctrl_rec.cmplx_diff) && is_one(ctrl_rec.cmplx_same) {
                self.shards.remove_pair(control, target, false);
            }
            if is_one(anti_rec.cmplx_diff) && is_one(anti_rec.cmplx_same) {
                self.shards.remove_pair(control, target, true);
            }
        }
    }
}
