// src/register/gates.rs

//! Public unitary operations.
//!
//! Every gate runs the same gauntlet: trivial-control checks first, then
//! the narrowest basis normalization that the gate actually conflicts
//! with, then a detached-cache fast path, then deferred-record absorption
//! for single-controlled phase/invert gates whose endpoints live in
//! different engines. Only what survives all of that reaches an engine.

use num_complex::Complex64;
use num_traits::One;

use crate::core::{approx_eq, is_norm_zero, is_one, polar_unit, REAL_EPSILON, SQRT1_2};
use crate::engine::EngineBackend;
use crate::shard::Pauli;

use super::basis::{
    transform_phase, transform_x2x2, transform_x_invert, transform_y2x2, transform_y_invert,
    RevertAnti, RevertControl, RevertExclusivity,
};
use super::QubitRegister;

/// Engine-bound payload of a controlled gate, before frame conjugation.
pub(crate) enum CtrlOp {
    Mtrx([Complex64; 4]),
    Phase {
        top_left: Complex64,
        bottom_right: Complex64,
    },
    Invert {
        top_right: Complex64,
        bottom_left: Complex64,
    },
}

fn is_phase_or_invert(m: &[Complex64; 4]) -> bool {
    (is_norm_zero(m[1]) && is_norm_zero(m[2])) || (is_norm_zero(m[0]) && is_norm_zero(m[3]))
}

/// Square root of Pauli-X, the target payload of the controlled
/// square-root-swap decomposition.
fn sqrt_x_mtrx() -> [Complex64; 4] {
    [
        Complex64::new(0.5, 0.5),
        Complex64::new(0.5, -0.5),
        Complex64::new(0.5, -0.5),
        Complex64::new(0.5, 0.5),
    ]
}

fn isqrt_x_mtrx() -> [Complex64; 4] {
    [
        Complex64::new(0.5, -0.5),
        Complex64::new(0.5, 0.5),
        Complex64::new(0.5, 0.5),
        Complex64::new(0.5, -0.5),
    ]
}

impl QubitRegister {
    // --- named single-qubit gates ---

    pub fn x(&mut self, target: usize) {
        let one = Complex64::one();
        self.invert(one, one, target);
    }

    pub fn y(&mut self, target: usize) {
        let i = Complex64::i();
        self.invert(-i, i, target);
    }

    pub fn z(&mut self, target: usize) {
        let one = Complex64::one();
        self.phase(one, -one, target);
    }

    pub fn t(&mut self, target: usize) {
        self.phase(
            Complex64::one(),
            polar_unit(std::f64::consts::FRAC_PI_4),
            target,
        );
    }

    pub fn it(&mut self, target: usize) {
        self.phase(
            Complex64::one(),
            polar_unit(-std::f64::consts::FRAC_PI_4),
            target,
        );
    }

    /// Hadamard: free for a detached shard, amounting to a frame
    /// relabel after pushing the gate through any deferred records.
    pub fn h(&mut self, target: usize) {
        self.revert_basis_y(target);
        self.commute_h(target);
        let shard = &mut self.shards[target];
        shard.pauli_basis = match shard.pauli_basis {
            Pauli::Z => Pauli::X,
            _ => Pauli::Z,
        };
    }

    /// Quarter phase: advances the frame cycle Z -> Z (with a phase),
    /// X -> Y, Y -> X (with an axis flip).
    pub fn s(&mut self, target: usize) {
        self.shards
            .commute_phase(target, Complex64::one(), Complex64::i());
        match self.shards[target].pauli_basis {
            Pauli::Y => {
                self.shards[target].pauli_basis = Pauli::X;
                self.x_base(target);
            }
            Pauli::X => {
                self.shards[target].pauli_basis = Pauli::Y;
            }
            Pauli::Z => {
                let (unit, mapped) = (self.shards[target].unit, self.shards[target].mapped);
                if let Some(u) = unit {
                    self.units
                        .get_mut(u)
                        .phase(Complex64::one(), Complex64::i(), mapped);
                }
                self.shards[target].amp1 *= Complex64::i();
            }
        }
    }

    /// Inverse quarter phase.
    pub fn is(&mut self, target: usize) {
        self.shards
            .commute_phase(target, Complex64::one(), -Complex64::i());
        match self.shards[target].pauli_basis {
            Pauli::Y => {
                self.shards[target].pauli_basis = Pauli::X;
            }
            Pauli::X => {
                self.shards[target].pauli_basis = Pauli::Y;
                self.x_base(target);
            }
            Pauli::Z => {
                let (unit, mapped) = (self.shards[target].unit, self.shards[target].mapped);
                if let Some(u) = unit {
                    self.units
                        .get_mut(u)
                        .phase(Complex64::one(), -Complex64::i(), mapped);
                }
                self.shards[target].amp1 *= -Complex64::i();
            }
        }
    }

    // --- general single-qubit gates ---

    /// Apply `diag(top_left, bottom_right)`.
    pub fn phase(&mut self, top_left: Complex64, bottom_right: Complex64, target: usize) {
        if self.rand_global_phase || is_one(top_left) {
            if is_norm_zero(top_left - bottom_right) {
                return;
            }
            if is_norm_zero(Complex64::i() * top_left - bottom_right) {
                self.s(target);
                return;
            }
            if is_norm_zero(Complex64::i() * top_left + bottom_right) {
                self.is(target);
                return;
            }
        }

        self.shards.commute_phase(target, top_left, bottom_right);

        if self.shards[target].pauli_basis == Pauli::Z {
            let (unit, mapped) = (self.shards[target].unit, self.shards[target].mapped);
            if let Some(u) = unit {
                self.units.get_mut(u).phase(top_left, bottom_right, mapped);
            }
            let shard = &mut self.shards[target];
            shard.amp0 *= top_left;
            shard.amp1 *= bottom_right;
            return;
        }

        let m = transform_phase(top_left, bottom_right);
        self.apply_transformed_single(target, &m);
    }

    /// Apply `[[0, top_right], [bottom_left, 0]]`.
    pub fn invert(&mut self, top_right: Complex64, bottom_left: Complex64, target: usize) {
        self.shards.flip_phase_anti(target);
        self.shards.commute_phase(target, top_right, bottom_left);

        if self.shards[target].pauli_basis == Pauli::Z {
            let (unit, mapped) = (self.shards[target].unit, self.shards[target].mapped);
            if let Some(u) = unit {
                self.units.get_mut(u).invert(top_right, bottom_left, mapped);
            }
            let shard = &mut self.shards[target];
            let new_amp1 = bottom_left * shard.amp0;
            shard.amp0 = top_right * shard.amp1;
            shard.amp1 = new_amp1;
            return;
        }

        let m = if self.shards[target].pauli_basis == Pauli::X {
            transform_x_invert(top_right, bottom_left)
        } else {
            transform_y_invert(top_right, bottom_left)
        };
        self.apply_transformed_single(target, &m);
    }

    /// Forward a frame-conjugated 2x2 matrix to engine and cache alike.
    fn apply_transformed_single(&mut self, target: usize, m: &[Complex64; 4]) {
        let (unit, mapped) = (self.shards[target].unit, self.shards[target].mapped);
        if let Some(u) = unit {
            self.units.get_mut(u).mtrx(m, mapped);
        }
        let shard = &mut self.shards[target];
        if shard.is_dirty() {
            shard.is_prob_dirty |= !is_phase_or_invert(m);
        }
        let a0 = shard.amp0;
        shard.amp0 = m[0] * a0 + m[1] * shard.amp1;
        shard.amp1 = m[2] * a0 + m[3] * shard.amp1;
        self.clamp_shard(target);
    }

    /// Apply a general 2x2 matrix, recognizing the phase, invert, and
    /// Hadamard-composite special forms first.
    pub fn mtrx(&mut self, m: &[Complex64; 4], target: usize) {
        if is_norm_zero(m[1]) && is_norm_zero(m[2]) {
            self.phase(m[0], m[3], target);
            return;
        }
        if is_norm_zero(m[0]) && is_norm_zero(m[3]) {
            self.invert(m[1], m[2], target);
            return;
        }

        let i = Complex64::i();
        let sqrt1_2 = Complex64::new(SQRT1_2, 0.0);
        let phase_free = self.rand_global_phase || approx_eq(m[0], sqrt1_2);
        if phase_free && approx_eq(m[0], m[1]) && approx_eq(m[0], m[2]) && approx_eq(m[0], -m[3])
        {
            self.h(target);
            return;
        }
        if phase_free
            && approx_eq(m[0], m[1])
            && approx_eq(m[0], -i * m[2])
            && approx_eq(m[0], i * m[3])
        {
            self.h(target);
            self.s(target);
            return;
        }
        if phase_free
            && approx_eq(m[0], i * m[1])
            && approx_eq(m[0], m[2])
            && approx_eq(m[0], -i * m[3])
        {
            self.is(target);
            self.h(target);
            return;
        }

        self.revert_basis_2qb_full(target);

        let tm = match self.shards[target].pauli_basis {
            Pauli::Y => transform_y2x2(m),
            Pauli::X => transform_x2x2(m),
            Pauli::Z => *m,
        };
        self.apply_transformed_single(target, &tm);
    }

    // --- controlled phase/invert/matrix ---

    /// Trim classically resolvable controls. Returns the surviving
    /// controls, or `None` when some control makes the gate a no-op.
    pub(crate) fn trim_controls(&mut self, controls: &[usize], anti: bool) -> Option<Vec<usize>> {
        if controls.is_empty() {
            return Some(Vec::new());
        }

        // First, cache checks with no flushing at all.
        for &c in controls {
            if (anti && self.cached_one(c)) || (!anti && self.cached_zero(c)) {
                return None;
            }
        }

        // Next, probability refreshes without flushing.
        for &c in controls {
            if self.shards[c].pauli_basis != Pauli::Z || self.shards[c].is_invert_target() {
                continue;
            }
            self.prob_base(c);
            if self.amp_is_zero(self.shards[c].amp1) {
                self.flush_0_eigenstate(c);
                if !anti {
                    return None;
                }
            } else if self.amp_is_zero(self.shards[c].amp0) {
                self.flush_1_eigenstate(c);
                if anti {
                    return None;
                }
            }
        }

        // Next, single-qubit frame flushing only.
        for &c in controls {
            if self.shards[c].pauli_basis == Pauli::Z || self.shards[c].is_invert_target() {
                continue;
            }
            self.revert_basis_1qb(c);
            self.prob_base(c);
            if self.amp_is_zero(self.shards[c].amp1) {
                self.flush_0_eigenstate(c);
                if !anti {
                    return None;
                }
            } else if self.amp_is_zero(self.shards[c].amp0) {
                self.flush_1_eigenstate(c);
                if anti {
                    return None;
                }
            }
        }

        // Last resort: full record flushing per control.
        let mut control_vec = Vec::new();
        for &c in controls {
            self.to_perm_basis_prob(c);
            self.prob_base(c);
            let mut is_eigenstate = false;
            if self.amp_is_zero(self.shards[c].amp1) {
                self.flush_0_eigenstate(c);
                if !anti {
                    return None;
                }
                is_eigenstate = true;
            } else if self.amp_is_zero(self.shards[c].amp0) {
                self.flush_1_eigenstate(c);
                if anti {
                    return None;
                }
                is_eigenstate = true;
            }
            if !is_eigenstate {
                control_vec.push(c);
            }
        }

        Some(control_vec)
    }

    /// Controlled `diag(top_left, bottom_right)` on `target`.
    pub fn mc_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) {
        if is_one(top_left) && is_one(bottom_right) {
            return;
        }
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return;
        };
        if control_vec.is_empty() {
            self.phase(top_left, bottom_right, target);
            return;
        }
        if control_vec.len() == 1 && is_norm_zero(top_left - bottom_right) {
            // A symmetric controlled phase is a local phase on the control.
            self.phase(Complex64::one(), bottom_right, control_vec[0]);
            return;
        }

        if !self.freeze_basis_2qb && control_vec.len() == 1 {
            let control = control_vec[0];
            self.revert_basis_2qb(
                control,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
                &[],
                &[],
                false,
                false,
            );
            self.revert_basis_2qb(
                target,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::OnlyAnti,
                &[],
                &[],
                false,
                false,
            );
            self.revert_basis_2qb(
                target,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::OnlyCtrl,
                &[],
                &[control],
                false,
                false,
            );

            if !self.same_unit(control, target) {
                self.shards
                    .add_phase_angles(control, target, top_left, bottom_right);
                self.optimize_pair_buffers(control, target, false);
                return;
            }
        }

        self.apply_either_controlled(
            &control_vec,
            target,
            false,
            CtrlOp::Phase {
                top_left,
                bottom_right,
            },
            true,
        );
    }

    /// Anti-controlled `diag(top_left, bottom_right)` on `target`.
    pub fn mac_phase(
        &mut self,
        controls: &[usize],
        top_left: Complex64,
        bottom_right: Complex64,
        target: usize,
    ) {
        if is_one(top_left) && is_one(bottom_right) {
            return;
        }
        let Some(control_vec) = self.trim_controls(controls, true) else {
            return;
        };
        if control_vec.is_empty() {
            self.phase(top_left, bottom_right, target);
            return;
        }
        if control_vec.len() == 1 && is_norm_zero(top_left - bottom_right) {
            self.phase(top_left, Complex64::one(), control_vec[0]);
            return;
        }

        if !self.freeze_basis_2qb && control_vec.len() == 1 {
            let control = control_vec[0];
            self.revert_basis_2qb(
                control,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
                &[],
                &[],
                false,
                false,
            );
            self.revert_basis_2qb(
                target,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::OnlyCtrl,
                &[],
                &[],
                false,
                false,
            );
            self.revert_basis_2qb(
                target,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::OnlyAnti,
                &[],
                &[control],
                false,
                false,
            );

            if !self.same_unit(control, target) {
                self.shards
                    .add_anti_phase_angles(control, target, top_left, bottom_right);
                self.optimize_pair_buffers(control, target, true);
                return;
            }
        }

        self.apply_either_controlled(
            &control_vec,
            target,
            true,
            CtrlOp::Phase {
                top_left,
                bottom_right,
            },
            true,
        );
    }

    /// Controlled `[[0, top_right], [bottom_left, 0]]` on `target`.
    pub fn mc_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) {
        if is_one(top_right) && is_one(bottom_left) && self.cached_plus(target) {
            return;
        }
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return;
        };
        if control_vec.is_empty() {
            self.invert(top_right, bottom_left, target);
            return;
        }

        if !self.freeze_basis_2qb && control_vec.len() == 1 {
            let control = control_vec[0];
            self.revert_basis_2qb(
                control,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
                &[],
                &[],
                false,
                false,
            );
            self.revert_basis_2qb(
                target,
                RevertExclusivity::InvertAndPhase,
                RevertControl::ControlsAndTargets,
                RevertAnti::OnlyAnti,
                &[],
                &[],
                false,
                false,
            );
            self.revert_basis_2qb(
                target,
                RevertExclusivity::InvertAndPhase,
                RevertControl::ControlsAndTargets,
                RevertAnti::OnlyCtrl,
                &[],
                &[control],
                false,
                false,
            );

            if !self.same_unit(control, target) {
                self.shards
                    .add_inversion_angles(control, target, top_right, bottom_left);
                self.optimize_pair_buffers(control, target, false);
                return;
            }
        }

        self.apply_either_controlled(
            &control_vec,
            target,
            false,
            CtrlOp::Invert {
                top_right,
                bottom_left,
            },
            false,
        );
    }

    /// Anti-controlled `[[0, top_right], [bottom_left, 0]]` on `target`.
    pub fn mac_invert(
        &mut self,
        controls: &[usize],
        top_right: Complex64,
        bottom_left: Complex64,
        target: usize,
    ) {
        if is_one(top_right) && is_one(bottom_left) && self.cached_plus(target) {
            return;
        }
        let Some(control_vec) = self.trim_controls(controls, true) else {
            return;
        };
        if control_vec.is_empty() {
            self.invert(top_right, bottom_left, target);
            return;
        }

        if !self.freeze_basis_2qb && control_vec.len() == 1 {
            let control = control_vec[0];
            self.revert_basis_2qb(
                control,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
                &[],
                &[],
                false,
                false,
            );
            self.revert_basis_2qb(
                target,
                RevertExclusivity::InvertAndPhase,
                RevertControl::ControlsAndTargets,
                RevertAnti::OnlyCtrl,
                &[],
                &[],
                false,
                false,
            );
            self.revert_basis_2qb(
                target,
                RevertExclusivity::InvertAndPhase,
                RevertControl::ControlsAndTargets,
                RevertAnti::OnlyAnti,
                &[],
                &[control],
                false,
                false,
            );

            if !self.same_unit(control, target) {
                self.shards
                    .add_anti_inversion_angles(control, target, top_right, bottom_left);
                self.optimize_pair_buffers(control, target, true);
                return;
            }
        }

        self.apply_either_controlled(
            &control_vec,
            target,
            true,
            CtrlOp::Invert {
                top_right,
                bottom_left,
            },
            false,
        );
    }

    /// Controlled general 2x2 matrix.
    pub fn mc_mtrx(&mut self, controls: &[usize], m: &[Complex64; 4], target: usize) {
        if is_norm_zero(m[1]) && is_norm_zero(m[2]) {
            self.mc_phase(controls, m[0], m[3], target);
            return;
        }
        if is_norm_zero(m[0]) && is_norm_zero(m[3]) {
            self.mc_invert(controls, m[1], m[2], target);
            return;
        }
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return;
        };
        if control_vec.is_empty() {
            self.mtrx(m, target);
            return;
        }
        self.apply_either_controlled(&control_vec, target, false, CtrlOp::Mtrx(*m), false);
    }

    /// Anti-controlled general 2x2 matrix.
    pub fn mac_mtrx(&mut self, controls: &[usize], m: &[Complex64; 4], target: usize) {
        if is_norm_zero(m[1]) && is_norm_zero(m[2]) {
            self.mac_phase(controls, m[0], m[3], target);
            return;
        }
        if is_norm_zero(m[0]) && is_norm_zero(m[3]) {
            self.mac_invert(controls, m[1], m[2], target);
            return;
        }
        let Some(control_vec) = self.trim_controls(controls, true) else {
            return;
        };
        if control_vec.is_empty() {
            self.mtrx(m, target);
            return;
        }
        self.apply_either_controlled(&control_vec, target, true, CtrlOp::Mtrx(*m), false);
    }

    /// Fuse, forward, and reactively separate: the common tail of every
    /// controlled gate that could not be resolved classically or buffered.
    pub(crate) fn apply_either_controlled(
        &mut self,
        control_vec: &[usize],
        target: usize,
        anti: bool,
        op: CtrlOp,
        is_phase: bool,
    ) {
        for &c in control_vec {
            self.to_perm_basis_prob(c);
        }
        if is_phase {
            self.revert_basis_2qb(
                target,
                RevertExclusivity::OnlyInvert,
                RevertControl::OnlyTargets,
                RevertAnti::CtrlAndAnti,
                &[],
                &[],
                false,
                false,
            );
        } else {
            self.revert_basis_2qb_full(target);
        }

        let mut all_bits: Vec<usize> = control_vec.to_vec();
        all_bits.push(target);
        all_bits.sort_unstable();
        let unit = self.entangle_in_current_basis(&all_bits);

        let mut mapped_controls = Vec::with_capacity(control_vec.len());
        for &c in control_vec {
            self.shards[c].is_phase_dirty = true;
            mapped_controls.push(self.shards[c].mapped);
        }
        let basis = self.shards[target].pauli_basis;
        self.shards[target].is_phase_dirty = true;
        self.shards[target].is_prob_dirty |= basis != Pauli::Z || !is_phase;
        let mapped_target = self.shards[target].mapped;

        let engine = self.units.get_mut(unit);
        match op {
            CtrlOp::Mtrx(m) => {
                let tm = match basis {
                    Pauli::X => transform_x2x2(&m),
                    Pauli::Y => transform_y2x2(&m),
                    Pauli::Z => m,
                };
                if anti {
                    engine.mac_mtrx(&mapped_controls, &tm, mapped_target);
                } else {
                    engine.mc_mtrx(&mapped_controls, &tm, mapped_target);
                }
            }
            CtrlOp::Phase {
                top_left,
                bottom_right,
            } => match basis {
                Pauli::Z => {
                    if anti {
                        engine.mac_phase(&mapped_controls, top_left, bottom_right, mapped_target);
                    } else {
                        engine.mc_phase(&mapped_controls, top_left, bottom_right, mapped_target);
                    }
                }
                _ => {
                    let tm = transform_phase(top_left, bottom_right);
                    if anti {
                        engine.mac_mtrx(&mapped_controls, &tm, mapped_target);
                    } else {
                        engine.mc_mtrx(&mapped_controls, &tm, mapped_target);
                    }
                }
            },
            CtrlOp::Invert {
                top_right,
                bottom_left,
            } => match basis {
                Pauli::Z => {
                    if anti {
                        engine.mac_invert(&mapped_controls, top_right, bottom_left, mapped_target);
                    } else {
                        engine.mc_invert(&mapped_controls, top_right, bottom_left, mapped_target);
                    }
                }
                Pauli::X => {
                    let tm = transform_x_invert(top_right, bottom_left);
                    if anti {
                        engine.mac_mtrx(&mapped_controls, &tm, mapped_target);
                    } else {
                        engine.mc_mtrx(&mapped_controls, &tm, mapped_target);
                    }
                }
                Pauli::Y => {
                    let tm = transform_y_invert(top_right, bottom_left);
                    if anti {
                        engine.mac_mtrx(&mapped_controls, &tm, mapped_target);
                    } else {
                        engine.mc_mtrx(&mapped_controls, &tm, mapped_target);
                    }
                }
            },
        }

        if !self.reactive_separate || self.freeze_basis_2qb {
            return;
        }
        if all_bits.len() == 2 {
            self.try_separate(all_bits[0]);
            self.try_separate(all_bits[1]);
            return;
        }
        for i in 0..all_bits.len() - 1 {
            for j in i + 1..all_bits.len() {
                self.try_separate_pair(all_bits[i], all_bits[j]);
            }
        }
    }

    /// Select a 2x2 matrix from `mtrxs` by the controls' basis value and
    /// apply it to `target`. Classically resolved controls are folded out
    /// before anything entangles.
    pub fn uniformly_controlled_single_bit(
        &mut self,
        controls: &[usize],
        target: usize,
        mtrxs: &[Complex64],
    ) {
        if controls.is_empty() {
            let m: [Complex64; 4] = mtrxs[0..4].try_into().expect("one 2x2 matrix");
            self.mtrx(&m, target);
            return;
        }

        let mut trimmed = Vec::new();
        let mut skip_powers = Vec::new();
        let mut skip_value_mask = 0u64;
        for (i, &c) in controls.iter().enumerate() {
            if self.check_bit_permutation(c) {
                skip_powers.push(1u64 << i);
                if self.shards[c].leans_one() {
                    skip_value_mask |= 1u64 << i;
                }
            } else {
                trimmed.push(c);
            }
        }

        if trimmed.is_empty() {
            let perm = self.cached_permutation_at(controls) as usize;
            let m: [Complex64; 4] = mtrxs[4 * perm..4 * perm + 4]
                .try_into()
                .expect("selected 2x2 matrix");
            self.mtrx(&m, target);
            return;
        }

        let mut bits = trimmed.clone();
        bits.push(target);
        bits.sort_unstable();
        let unit = self.entangle_sorted(&bits);

        let mut mapped_controls = Vec::with_capacity(trimmed.len());
        for &c in &trimmed {
            self.shards[c].is_phase_dirty = true;
            mapped_controls.push(self.shards[c].mapped);
        }
        let mapped_target = self.shards[target].mapped;
        self.units.get_mut(unit).uniformly_controlled_single_bit(
            &mapped_controls,
            mapped_target,
            mtrxs,
            &skip_powers,
            skip_value_mask,
        );
        self.shards[target].make_dirty();
    }

    // --- swaps ---

    /// Identical clean caches need no work to exchange.
    fn swap_ident(&self, qubit1: usize, qubit2: usize) -> bool {
        let a = &self.shards[qubit1];
        let b = &self.shards[qubit2];
        !a.is_dirty()
            && !b.is_dirty()
            && a.pauli_basis == b.pauli_basis
            && self.amp_is_zero(a.amp0 - b.amp0)
            && self.amp_is_zero(a.amp1 - b.amp1)
            && !a.queued_phase()
            && !b.queued_phase()
    }

    /// Exchange two logical positions. Pure bookkeeping; the engines
    /// never hear about it.
    pub fn swap(&mut self, qubit1: usize, qubit2: usize) {
        if qubit1 == qubit2 {
            return;
        }
        self.shards.swap(qubit1, qubit2);
    }

    pub fn i_swap(&mut self, qubit1: usize, qubit2: usize) {
        self.either_i_swap(qubit1, qubit2, false);
    }

    /// Inverse of [`Self::i_swap`].
    pub fn ii_swap(&mut self, qubit1: usize, qubit2: usize) {
        self.either_i_swap(qubit1, qubit2, true);
    }

    fn either_i_swap(&mut self, qubit1: usize, qubit2: usize, inverse: bool) {
        if qubit1 == qubit2 {
            return;
        }
        if self.swap_ident(qubit1, qubit2) {
            return;
        }
        let phase = if inverse {
            -Complex64::i()
        } else {
            Complex64::i()
        };

        if self.same_unit(qubit1, qubit2) {
            let mut bits = vec![qubit1, qubit2];
            let unit = self.entangle(&mut bits);
            let (m1, m2) = (self.shards[qubit1].mapped, self.shards[qubit2].mapped);
            if inverse {
                self.units.get_mut(unit).iiswap(m1, m2);
            } else {
                self.units.get_mut(unit).iswap(m1, m2);
            }
            self.shards[qubit1].make_dirty();
            self.shards[qubit2].make_dirty();
            return;
        }

        self.mc_phase(&[qubit1], phase, Complex64::one(), qubit2);
        self.mc_phase(&[qubit2], phase, Complex64::one(), qubit1);
        self.shards.swap(qubit1, qubit2);
    }

    pub fn sqrt_swap(&mut self, qubit1: usize, qubit2: usize) {
        self.either_sqrt_swap(qubit1, qubit2, false);
    }

    pub fn i_sqrt_swap(&mut self, qubit1: usize, qubit2: usize) {
        self.either_sqrt_swap(qubit1, qubit2, true);
    }

    fn either_sqrt_swap(&mut self, qubit1: usize, qubit2: usize, inverse: bool) {
        if qubit1 == qubit2 {
            return;
        }
        for q in [qubit1, qubit2] {
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
        }
        if self.swap_ident(qubit1, qubit2) {
            return;
        }

        let mut bits = vec![qubit1, qubit2];
        let unit = self.entangle(&mut bits);
        let (m1, m2) = (self.shards[qubit1].mapped, self.shards[qubit2].mapped);
        if inverse {
            self.units.get_mut(unit).isqrt_swap(m1, m2);
        } else {
            self.units.get_mut(unit).sqrt_swap(m1, m2);
        }
        self.shards[qubit1].make_dirty();
        self.shards[qubit2].make_dirty();
    }

    /// Fermionic simulation gate.
    pub fn f_sim(&mut self, theta: f64, phi: f64, qubit1: usize, qubit2: usize) {
        let sin_theta = theta.sin();
        let phase_fac = polar_unit(phi);

        if sin_theta.abs() <= REAL_EPSILON {
            self.mc_phase(&[qubit1], Complex64::one(), phase_fac, qubit2);
            return;
        }
        if (sin_theta + 1.0).abs() <= REAL_EPSILON {
            self.i_swap(qubit1, qubit2);
            self.mc_phase(&[qubit1], Complex64::one(), phase_fac, qubit2);
            return;
        }

        for q in [qubit1, qubit2] {
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
        }
        if self.swap_ident(qubit1, qubit2) {
            self.mc_phase(&[qubit1], Complex64::one(), phase_fac, qubit2);
            return;
        }

        let mut bits = vec![qubit1, qubit2];
        let unit = self.entangle(&mut bits);
        let (m1, m2) = (self.shards[qubit1].mapped, self.shards[qubit2].mapped);
        self.units.get_mut(unit).fsim(theta, phi, m1, m2);
        self.shards[qubit1].make_dirty();
        self.shards[qubit2].make_dirty();
    }

    // --- controlled swaps, decomposed at the front-end ---

    pub fn c_swap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) {
        if qubit1 == qubit2 {
            return;
        }
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return;
        };
        if control_vec.is_empty() {
            self.swap(qubit1, qubit2);
            return;
        }
        let one = Complex64::one();
        self.mc_invert(&[qubit2], one, one, qubit1);
        let mut all = control_vec;
        all.push(qubit1);
        self.mc_invert(&all, one, one, qubit2);
        self.mc_invert(&[qubit2], one, one, qubit1);
    }

    pub fn anti_c_swap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) {
        for &c in controls {
            self.x(c);
        }
        self.c_swap(controls, qubit1, qubit2);
        for &c in controls {
            self.x(c);
        }
    }

    fn c_half_swap(
        &mut self,
        controls: &[usize],
        qubit1: usize,
        qubit2: usize,
        payload: [Complex64; 4],
        bare: fn(&mut Self, usize, usize),
    ) {
        if qubit1 == qubit2 {
            return;
        }
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return;
        };
        if control_vec.is_empty() {
            bare(self, qubit1, qubit2);
            return;
        }
        // Conjugating by CNOT moves the exchange block onto qubit1, where
        // it is a controlled square-root-of-X.
        let one = Complex64::one();
        self.mc_invert(&[qubit1], one, one, qubit2);
        let mut all = control_vec;
        all.push(qubit2);
        self.mc_mtrx(&all, &payload, qubit1);
        self.mc_invert(&[qubit1], one, one, qubit2);
    }

    pub fn c_sqrt_swap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) {
        self.c_half_swap(controls, qubit1, qubit2, sqrt_x_mtrx(), Self::sqrt_swap);
    }

    pub fn anti_c_sqrt_swap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) {
        for &c in controls {
            self.x(c);
        }
        self.c_sqrt_swap(controls, qubit1, qubit2);
        for &c in controls {
            self.x(c);
        }
    }

    pub fn c_i_sqrt_swap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) {
        self.c_half_swap(controls, qubit1, qubit2, isqrt_x_mtrx(), Self::i_sqrt_swap);
    }

    pub fn anti_c_i_sqrt_swap(&mut self, controls: &[usize], qubit1: usize, qubit2: usize) {
        for &c in controls {
            self.x(c);
        }
        self.c_i_sqrt_swap(controls, qubit1, qubit2);
        for &c in controls {
            self.x(c);
        }
    }

    /// Global phase flip, expressed as a phase on qubit 0.
    pub(crate) fn phase_flip(&mut self) {
        let neg = -Complex64::one();
        self.phase(neg, neg, 0);
    }
}
