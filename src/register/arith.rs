// src/register/arith.rs

//! Integer arithmetic over qubit ranges.
//!
//! Arithmetic is where classical bookkeeping pays off most: a register
//! range whose bits all cache permutation eigenstates is just an integer,
//! and even a partially classical range can often absorb an addition one
//! ripple at a time, entangling only the minimal prefix whose carry is
//! genuinely indeterminate.

use num_complex::Complex64;
use num_traits::One;

use crate::core::{QregError, QregResult};
use crate::engine::EngineBackend;

use super::QubitRegister;

fn is_overflow_add(a: u64, b: u64, sign_mask: u64, len_mask: u64) -> bool {
    let r = a.wrapping_add(b) & len_mask;
    (a & sign_mask) == (b & sign_mask) && (r & sign_mask) != (a & sign_mask)
}

fn is_overflow_sub(a: u64, b: u64, sign_mask: u64, len_mask: u64) -> bool {
    let r = (a + (len_mask + 1) - (b & len_mask)) & len_mask;
    (a & sign_mask) != (b & sign_mask) && (r & sign_mask) == (b & sign_mask)
}

fn pow_mod(base: u64, mut exp: u64, mod_n: u64) -> u64 {
    if mod_n <= 1 {
        return 0;
    }
    let mut result = 1u64;
    let mut base = base % mod_n;
    while exp > 0 {
        if exp & 1 != 0 {
            result = result.wrapping_mul(base) % mod_n;
        }
        base = base.wrapping_mul(base) % mod_n;
        exp >>= 1;
    }
    result
}

impl QubitRegister {
    /// Ripple-adder core shared by every unsigned add/subtract variant.
    /// Walks bit by bit, absorbing the addend into cached classical bits,
    /// and entangles only indeterminate stretches whose closing bit pins
    /// the carry back down.
    fn int_op(
        &mut self,
        mut to_mod: u64,
        mut start: usize,
        mut length: usize,
        carry_index: Option<usize>,
        control_vec: &[usize],
    ) -> QregResult<()> {
        to_mod &= (1u64 << length) - 1;
        if to_mod == 0 {
            return Ok(());
        }

        let has_carry = carry_index.is_some();
        if !has_carry && self.check_bits_plus(start, length) {
            // A uniform superposition is permutation-invariant.
            return Ok(());
        }

        let one = Complex64::one();
        for &c in control_vec {
            self.shards[c].make_dirty();
        }

        let orig_length = length;
        let mut carry = false;
        let mut i = 0;
        while i < orig_length {
            let to_add = to_mod & 1 != 0;

            if to_add == carry {
                // Nothing changes in this bit; the carry promotes.
                to_mod >>= 1;
                start += 1;
                length -= 1;
                i += 1;
                continue;
            }

            if self.check_bit_permutation(start) {
                let in_reg = self.shards[start].leans_one();
                let total = to_add as u32 + in_reg as u32 + carry as u32;
                if in_reg != (total & 1 == 1) {
                    self.mc_invert(control_vec, one, one, start);
                }
                carry = total > 1;
                to_mod >>= 1;
                start += 1;
                length -= 1;
                i += 1;
                continue;
            }

            // Blocked on a superposed bit. The carry-in is classical.
            if carry {
                carry = false;
                to_mod += 1;
            }
            if length == 1 {
                break;
            }

            // Scan forward for a closing bit where the addend bit equals
            // the cached register bit; there the carry-out cannot
            // superpose, and the prefix can be added as one block.
            let mut bit_mask = 1u64;
            let mut part_mod = to_mod & bit_mask;
            let mut part_length = 1usize;
            i += 1;
            loop {
                part_length += 1;
                i += 1;
                bit_mask <<= 1;
                let to_add_part = to_mod & bit_mask != 0;
                part_mod |= to_mod & bit_mask;

                let part_start = start + part_length - 1;
                let closes = self.check_bit_permutation(part_start)
                    && to_add_part == self.shards[part_start].leans_one();
                if closes {
                    self.dirty_shard_range(start, part_length);
                    self.entangle_range(start, part_length, false);
                    if control_vec.is_empty() {
                        let unit = self.shards[start].unit.expect("entangled range");
                        let mapped_start = self.shards[start].mapped;
                        self.units.get_mut(unit).inc(part_mod, mapped_start, part_length);
                    } else {
                        let mut bits: Vec<usize> = control_vec.to_vec();
                        bits.push(start);
                        let unit = self.entangle(&mut bits);
                        let mut mapped_controls = Vec::with_capacity(control_vec.len());
                        for &c in control_vec {
                            self.shards[c].make_dirty();
                            mapped_controls.push(self.shards[c].mapped);
                        }
                        let mapped_start = self.shards[start].mapped;
                        self.units.get_mut(unit).c_inc(
                            part_mod,
                            mapped_start,
                            part_length,
                            &mapped_controls,
                        );
                    }

                    carry = to_add_part;
                    to_mod >>= part_length;
                    start += part_length;
                    length -= part_length;
                    break;
                }
                if i >= orig_length {
                    break;
                }
            }
        }

        if to_mod == 0 && length == 0 {
            // The whole addend was absorbed without a residual range.
            if has_carry && carry {
                self.mc_invert(control_vec, one, one, carry_index.expect("has carry"));
            }
            return Ok(());
        }

        // One residual range must be entangled, plus the carry when present.
        if has_carry {
            if !control_vec.is_empty() {
                return Err(QregError::UnsupportedOperation(
                    "controlled-with-carry arithmetic".to_string(),
                ));
            }
            let carry_q = carry_index.expect("has carry");
            self.dirty_shard_range(start, length);
            self.shards[carry_q].make_dirty();
            self.entangle_range(start, length, false);
            let mut bits = vec![start, carry_q];
            let unit = self.entangle(&mut bits);
            let mapped_start = self.shards[start].mapped;
            let mapped_carry = self.shards[carry_q].mapped;
            self.units
                .get_mut(unit)
                .inc_c(to_mod, mapped_start, length, mapped_carry);
            return Ok(());
        }

        self.dirty_shard_range(start, length);
        self.entangle_range(start, length, false);
        if control_vec.is_empty() {
            let unit = self.shards[start].unit.expect("entangled range");
            let mapped_start = self.shards[start].mapped;
            self.units.get_mut(unit).inc(to_mod, mapped_start, length);
        } else {
            let mut bits: Vec<usize> = control_vec.to_vec();
            bits.push(start);
            let unit = self.entangle(&mut bits);
            let mut mapped_controls = Vec::with_capacity(control_vec.len());
            for &c in control_vec {
                self.shards[c].make_dirty();
                mapped_controls.push(self.shards[c].mapped);
            }
            let mapped_start = self.shards[start].mapped;
            self.units
                .get_mut(unit)
                .c_inc(to_mod, mapped_start, length, &mapped_controls);
        }
        Ok(())
    }

    /// Add an integer to a register range.
    pub fn inc(&mut self, to_add: u64, start: usize, length: usize) -> QregResult<()> {
        self.int_op(to_add, start, length, None, &[])
    }

    /// Subtract an integer from a register range.
    pub fn dec(&mut self, to_sub: u64, start: usize, length: usize) -> QregResult<()> {
        let inverse = (1u64 << length).wrapping_sub(to_sub);
        self.int_op(inverse, start, length, None, &[])
    }

    /// Controlled add.
    pub fn c_inc(
        &mut self,
        to_add: u64,
        start: usize,
        length: usize,
        controls: &[usize],
    ) -> QregResult<()> {
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return Ok(());
        };
        if control_vec.is_empty() {
            return self.inc(to_add, start, length);
        }
        self.int_op(to_add, start, length, None, &control_vec)
    }

    /// Controlled subtract.
    pub fn c_dec(
        &mut self,
        to_sub: u64,
        start: usize,
        length: usize,
        controls: &[usize],
    ) -> QregResult<()> {
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return Ok(());
        };
        if control_vec.is_empty() {
            return self.dec(to_sub, start, length);
        }
        let inverse = (1u64 << length).wrapping_sub(to_sub);
        self.int_op(inverse, start, length, None, &control_vec)
    }

    /// Add with carry-in/carry-out through `carry_index`.
    pub fn inc_c(
        &mut self,
        to_add: u64,
        start: usize,
        length: usize,
        carry_index: usize,
    ) -> QregResult<()> {
        let mut to_add = to_add;
        if self.m(carry_index) {
            self.x(carry_index);
            to_add += 1;
        }
        self.int_op(to_add, start, length, Some(carry_index), &[])
    }

    /// Subtract with borrow through `carry_index`.
    pub fn dec_c(
        &mut self,
        to_sub: u64,
        start: usize,
        length: usize,
        carry_index: usize,
    ) -> QregResult<()> {
        let mut to_sub = to_sub;
        if self.m(carry_index) {
            self.x(carry_index);
        } else {
            to_sub += 1;
        }
        let inverse = (1u64 << length).wrapping_sub(to_sub);
        self.int_op(inverse, start, length, Some(carry_index), &[])
    }

    /// Classical fast path for signed/carry arithmetic over an eigenstate
    /// range. Returns whether the operation completed classically.
    fn int_sc_optimize(
        &mut self,
        to_mod: u64,
        start: usize,
        length: usize,
        is_add: bool,
        carry_index: Option<usize>,
        overflow_index: Option<usize>,
    ) -> bool {
        if !self.check_bits_permutation(start, length) {
            return false;
        }

        let mut to_mod = to_mod;
        let carry_in = match carry_index {
            Some(c) => {
                let set = self.m(c);
                if set == is_add {
                    to_mod += 1;
                }
                set
            }
            None => false,
        };

        let length_power = 1u64 << length;
        let len_mask = length_power - 1;
        let sign_mask = 1u64 << (length - 1);
        let in_out_int = self.cached_permutation(start, length);

        let (is_overflow, out_int) = if is_add {
            (
                overflow_index.is_some()
                    && is_overflow_add(in_out_int, to_mod & len_mask, sign_mask, len_mask),
                in_out_int + to_mod,
            )
        } else {
            (
                overflow_index.is_some()
                    && is_overflow_sub(in_out_int, to_mod, sign_mask, len_mask),
                in_out_int + length_power - (to_mod & len_mask),
            )
        };

        let carry_out = out_int >= length_power;
        if carry_index.is_some() && carry_in != carry_out {
            self.x(carry_index.expect("carry checked"));
        }
        self.set_reg(start, length, out_int & len_mask);
        if is_overflow {
            self.z(overflow_index.expect("overflow checked"));
        }
        true
    }

    /// Signed add/subtract core with overflow flagging.
    fn ints_op(
        &mut self,
        mut to_mod: u64,
        start: usize,
        length: usize,
        overflow_index: usize,
        carry_index: Option<usize>,
    ) -> QregResult<()> {
        to_mod &= (1u64 << length) - 1;
        if to_mod == 0 {
            return Ok(());
        }

        let sign_bit = start + length - 1;
        let knew_flag = self.check_bit_permutation(overflow_index);
        let flag_set = self.shards[overflow_index].leans_one();
        if knew_flag && !flag_set {
            // Overflow detection is disarmed.
            return self.int_op(to_mod, start, length, carry_index, &[]);
        }

        let addend_neg = to_mod & (1u64 << (length - 1)) != 0;
        let knew_sign = self.check_bit_permutation(sign_bit);
        let quantum_neg = self.shards[sign_bit].leans_one();
        if knew_sign && addend_neg != quantum_neg {
            // Opposite signs can never overflow.
            return self.int_op(to_mod, start, length, carry_index, &[]);
        }

        match carry_index {
            Some(carry_q) => {
                if self.int_sc_optimize(
                    to_mod,
                    start,
                    length,
                    true,
                    Some(carry_q),
                    Some(overflow_index),
                ) {
                    return Ok(());
                }
                self.dirty_shard_range(start, length);
                self.shards[overflow_index].make_dirty();
                self.shards[carry_q].make_dirty();
                self.entangle_range(start, length, false);
                let mut bits = vec![start, overflow_index, carry_q];
                let unit = self.entangle(&mut bits);
                let mapped_start = self.shards[start].mapped;
                let mapped_overflow = self.shards[overflow_index].mapped;
                let mapped_carry = self.shards[carry_q].mapped;
                self.units.get_mut(unit).inc_sc(
                    to_mod,
                    mapped_start,
                    length,
                    Some(mapped_overflow),
                    mapped_carry,
                );
            }
            None => {
                if self.int_sc_optimize(to_mod, start, length, true, None, Some(overflow_index)) {
                    return Ok(());
                }
                self.dirty_shard_range(start, length);
                self.shards[overflow_index].make_dirty();
                self.entangle_range(start, length, false);
                let mut bits = vec![start, overflow_index];
                let unit = self.entangle(&mut bits);
                let mapped_start = self.shards[start].mapped;
                let mapped_overflow = self.shards[overflow_index].mapped;
                self.units
                    .get_mut(unit)
                    .inc_s(to_mod, mapped_start, length, mapped_overflow);
            }
        }
        Ok(())
    }

    /// Signed add, flagging two's-complement overflow.
    pub fn inc_s(
        &mut self,
        to_add: u64,
        start: usize,
        length: usize,
        overflow_index: usize,
    ) -> QregResult<()> {
        self.ints_op(to_add, start, length, overflow_index, None)
    }

    /// Signed subtract, flagging two's-complement overflow.
    pub fn dec_s(
        &mut self,
        to_sub: u64,
        start: usize,
        length: usize,
        overflow_index: usize,
    ) -> QregResult<()> {
        let inverse = (1u64 << length).wrapping_sub(to_sub);
        self.ints_op(inverse, start, length, overflow_index, None)
    }

    /// Signed add with both overflow flag and carry.
    pub fn inc_dec_sc(
        &mut self,
        to_add: u64,
        start: usize,
        length: usize,
        overflow_index: usize,
        carry_index: usize,
    ) -> QregResult<()> {
        self.ints_op(to_add, start, length, overflow_index, Some(carry_index))
    }

    /// Multiply in place, spilling the high half into the carry range,
    /// which must be reset.
    pub fn mul(
        &mut self,
        to_mul: u64,
        in_out_start: usize,
        carry_start: usize,
        length: usize,
    ) -> QregResult<()> {
        if to_mul == 0 {
            self.set_reg(in_out_start, length, 0);
            self.set_reg(carry_start, length, 0);
            return Ok(());
        }
        if to_mul == 1 {
            self.set_reg(carry_start, length, 0);
            return Ok(());
        }

        if self.check_bits_permutation(in_out_start, length) {
            let len_mask = (1u64 << length) - 1;
            let res = self.cached_permutation(in_out_start, length) * to_mul;
            self.set_reg(in_out_start, length, res & len_mask);
            self.set_reg(carry_start, length, (res >> length) & len_mask);
            return Ok(());
        }

        self.dirty_shard_range(in_out_start, length);
        self.dirty_shard_range(carry_start, length);
        let unit = self.entangle_range_2(in_out_start, length, carry_start, length);
        let mapped_in = self.shards[in_out_start].mapped;
        let mapped_carry = self.shards[carry_start].mapped;
        self.units
            .get_mut(unit)
            .mul(to_mul, mapped_in, mapped_carry, length);
        Ok(())
    }

    /// Inverse of [`Self::mul`].
    pub fn div(
        &mut self,
        to_div: u64,
        in_out_start: usize,
        carry_start: usize,
        length: usize,
    ) -> QregResult<()> {
        if to_div == 0 {
            return Err(QregError::UnsupportedOperation(
                "division by zero".to_string(),
            ));
        }
        if to_div == 1 {
            return Ok(());
        }

        if self.check_bits_permutation(in_out_start, length)
            && self.check_bits_permutation(carry_start, length)
        {
            let len_mask = (1u64 << length) - 1;
            let orig = self.cached_permutation(in_out_start, length)
                | (self.cached_permutation(carry_start, length) << length);
            let res = orig / to_div;
            if orig == res * to_div {
                self.set_reg(in_out_start, length, res & len_mask);
                self.set_reg(carry_start, length, (res >> length) & len_mask);
            }
            return Ok(());
        }

        self.dirty_shard_range(in_out_start, length);
        self.dirty_shard_range(carry_start, length);
        let unit = self.entangle_range_2(in_out_start, length, carry_start, length);
        let mapped_in = self.shards[in_out_start].mapped;
        let mapped_carry = self.shards[carry_start].mapped;
        self.units
            .get_mut(unit)
            .div(to_div, mapped_in, mapped_carry, length);
        Ok(())
    }

    fn x_mul_mod_n_out(
        &mut self,
        to_mod: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        inverse: bool,
    ) -> QregResult<()> {
        if to_mod == 0 {
            self.set_reg(out_start, length, 0);
            return Ok(());
        }

        if self.check_bits_permutation(in_start, length) {
            let res =
                (self.cached_permutation(in_start, length) % mod_n) * (to_mod % mod_n) % mod_n;
            if inverse {
                self.dec(res, out_start, length)?;
            } else {
                self.set_reg(out_start, length, res);
            }
            return Ok(());
        }

        if !inverse {
            self.set_reg(out_start, length, 0);
        }

        // A power-of-two modulus decomposes into controlled shift-adds, as
        // long as the input bits are not already one fused unit.
        if mod_n.is_power_of_two() {
            let fully_entangled = (1..length)
                .all(|i| self.shards[in_start].unit == self.shards[in_start + i].unit);
            if !fully_entangled {
                let mut to_mod_exp = to_mod;
                for i in 0..length {
                    let controls = [in_start + i];
                    if inverse {
                        self.c_dec(to_mod_exp, out_start, length, &controls)?;
                    } else {
                        self.c_inc(to_mod_exp, out_start, length, &controls)?;
                    }
                    to_mod_exp <<= 1;
                }
                return Ok(());
            }
        }

        self.dirty_shard_range_phase(in_start, length);
        self.dirty_shard_range(out_start, length);
        let unit = self.entangle_range_2(in_start, length, out_start, length);
        let mapped_in = self.shards[in_start].mapped;
        let mapped_out = self.shards[out_start].mapped;
        if inverse {
            self.units
                .get_mut(unit)
                .imul_mod_n_out(to_mod, mod_n, mapped_in, mapped_out, length);
        } else {
            self.units
                .get_mut(unit)
                .mul_mod_n_out(to_mod, mod_n, mapped_in, mapped_out, length);
        }
        Ok(())
    }

    /// Out-of-place modular multiply: `out = in * to_mul (mod n)`.
    pub fn mul_mod_n_out(
        &mut self,
        to_mul: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
    ) -> QregResult<()> {
        self.x_mul_mod_n_out(to_mul, mod_n, in_start, out_start, length, false)
    }

    /// Inverse of [`Self::mul_mod_n_out`].
    pub fn imul_mod_n_out(
        &mut self,
        to_mul: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
    ) -> QregResult<()> {
        self.x_mul_mod_n_out(to_mul, mod_n, in_start, out_start, length, true)
    }

    /// Out-of-place modular power: `out = base^in (mod n)`.
    pub fn pow_mod_n_out(
        &mut self,
        base: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
    ) -> QregResult<()> {
        if base == 1 {
            self.set_reg(out_start, length, 1 % mod_n);
            return Ok(());
        }

        if self.check_bits_permutation(in_start, length) {
            let res = pow_mod(base, self.cached_permutation(in_start, length), mod_n);
            self.set_reg(out_start, length, res);
            return Ok(());
        }

        self.set_reg(out_start, length, 0);

        let unit = self.entangle_range_2(in_start, length, out_start, length);
        let mapped_in = self.shards[in_start].mapped;
        let mapped_out = self.shards[out_start].mapped;
        self.units
            .get_mut(unit)
            .pow_mod_n_out(base, mod_n, mapped_in, mapped_out, length);
        self.dirty_shard_range_phase(in_start, length);
        self.dirty_shard_range(out_start, length);
        Ok(())
    }

    /// Fuse controls plus both ranges for a controlled multiply-family
    /// call; returns the unit and the mapped controls.
    fn c_mul_entangle(
        &mut self,
        control_vec: &[usize],
        start: usize,
        carry_start: usize,
        length: usize,
    ) -> (super::units::UnitId, Vec<usize>) {
        self.dirty_shard_range_phase(start, length);
        self.dirty_shard_range(carry_start, length);
        self.entangle_range(start, length, false);
        self.entangle_range(carry_start, length, false);

        let mut bits: Vec<usize> = control_vec.to_vec();
        bits.push(start);
        bits.push(carry_start);
        let unit = self.entangle(&mut bits);

        let mut mapped_controls = Vec::with_capacity(control_vec.len());
        for &c in control_vec {
            self.shards[c].is_phase_dirty = true;
            mapped_controls.push(self.shards[c].mapped);
        }
        (unit, mapped_controls)
    }

    /// Controlled multiply.
    pub fn c_mul(
        &mut self,
        to_mul: u64,
        in_out_start: usize,
        carry_start: usize,
        length: usize,
        controls: &[usize],
    ) -> QregResult<()> {
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return Ok(());
        };
        if control_vec.is_empty() {
            return self.mul(to_mul, in_out_start, carry_start, length);
        }
        let (unit, mapped_controls) =
            self.c_mul_entangle(&control_vec, in_out_start, carry_start, length);
        let mapped_in = self.shards[in_out_start].mapped;
        let mapped_carry = self.shards[carry_start].mapped;
        self.units
            .get_mut(unit)
            .c_mul(to_mul, mapped_in, mapped_carry, length, &mapped_controls);
        self.dirty_shard_range(in_out_start, length);
        Ok(())
    }

    /// Controlled divide.
    pub fn c_div(
        &mut self,
        to_div: u64,
        in_out_start: usize,
        carry_start: usize,
        length: usize,
        controls: &[usize],
    ) -> QregResult<()> {
        if to_div == 0 {
            return Err(QregError::UnsupportedOperation(
                "division by zero".to_string(),
            ));
        }
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return Ok(());
        };
        if control_vec.is_empty() {
            return self.div(to_div, in_out_start, carry_start, length);
        }
        let (unit, mapped_controls) =
            self.c_mul_entangle(&control_vec, in_out_start, carry_start, length);
        let mapped_in = self.shards[in_out_start].mapped;
        let mapped_carry = self.shards[carry_start].mapped;
        self.units
            .get_mut(unit)
            .c_div(to_div, mapped_in, mapped_carry, length, &mapped_controls);
        self.dirty_shard_range(in_out_start, length);
        Ok(())
    }

    fn cx_mul_mod_n_out(
        &mut self,
        to_mod: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
        inverse: bool,
    ) -> QregResult<()> {
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return Ok(());
        };
        if control_vec.is_empty() {
            return self.x_mul_mod_n_out(to_mod, mod_n, in_start, out_start, length, inverse);
        }

        if !inverse {
            self.set_reg(out_start, length, 0);
        }

        if mod_n.is_power_of_two() {
            let fully_entangled = (1..length)
                .all(|i| self.shards[in_start].unit == self.shards[in_start + i].unit);
            if !fully_entangled {
                let mut to_mod_exp = to_mod;
                for i in 0..length {
                    let mut all_controls = control_vec.clone();
                    all_controls.push(in_start + i);
                    if inverse {
                        self.c_dec(to_mod_exp, out_start, length, &all_controls)?;
                    } else {
                        self.c_inc(to_mod_exp, out_start, length, &all_controls)?;
                    }
                    to_mod_exp <<= 1;
                }
                return Ok(());
            }
        }

        let (unit, mapped_controls) =
            self.c_mul_entangle(&control_vec, in_start, out_start, length);
        let mapped_in = self.shards[in_start].mapped;
        let mapped_out = self.shards[out_start].mapped;
        if inverse {
            self.units.get_mut(unit).c_imul_mod_n_out(
                to_mod,
                mod_n,
                mapped_in,
                mapped_out,
                length,
                &mapped_controls,
            );
        } else {
            self.units.get_mut(unit).c_mul_mod_n_out(
                to_mod,
                mod_n,
                mapped_in,
                mapped_out,
                length,
                &mapped_controls,
            );
        }
        self.dirty_shard_range_phase(in_start, length);
        Ok(())
    }

    /// Controlled modular multiply.
    pub fn c_mul_mod_n_out(
        &mut self,
        to_mul: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
    ) -> QregResult<()> {
        self.cx_mul_mod_n_out(to_mul, mod_n, in_start, out_start, length, controls, false)
    }

    /// Inverse of [`Self::c_mul_mod_n_out`].
    pub fn c_imul_mod_n_out(
        &mut self,
        to_mul: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
    ) -> QregResult<()> {
        self.cx_mul_mod_n_out(to_mul, mod_n, in_start, out_start, length, controls, true)
    }

    /// Controlled modular power.
    pub fn c_pow_mod_n_out(
        &mut self,
        base: u64,
        mod_n: u64,
        in_start: usize,
        out_start: usize,
        length: usize,
        controls: &[usize],
    ) -> QregResult<()> {
        if controls.is_empty() {
            return self.pow_mod_n_out(base, mod_n, in_start, out_start, length);
        }
        self.set_reg(out_start, length, 0);
        let Some(control_vec) = self.trim_controls(controls, false) else {
            return Ok(());
        };
        if control_vec.is_empty() {
            return self.pow_mod_n_out(base, mod_n, in_start, out_start, length);
        }

        let (unit, mapped_controls) =
            self.c_mul_entangle(&control_vec, in_start, out_start, length);
        let mapped_in = self.shards[in_start].mapped;
        let mapped_out = self.shards[out_start].mapped;
        self.units.get_mut(unit).c_pow_mod_n_out(
            base,
            mod_n,
            mapped_in,
            mapped_out,
            length,
            &mapped_controls,
        );
        self.dirty_shard_range_phase(in_start, length);
        Ok(())
    }

    fn indexed_eigenstate_value(
        &self,
        index_start: usize,
        index_length: usize,
        value_length: usize,
        values: &[u8],
    ) -> u64 {
        let index = self.cached_permutation(index_start, index_length);
        let value_bytes = value_length.div_ceil(8);
        let mut value = 0u64;
        for j in 0..value_bytes {
            value |= (values[index as usize * value_bytes + j] as u64) << (8 * j);
        }
        value & ((1u64 << value_length) - 1)
    }

    /// Load the table entry selected by the index register into the value
    /// register.
    pub fn indexed_lda(
        &mut self,
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        values: &[u8],
    ) -> QregResult<u64> {
        if self.check_bits_permutation(index_start, index_length) {
            let value =
                self.indexed_eigenstate_value(index_start, index_length, value_length, values);
            self.set_reg(value_start, value_length, value);
            return Ok(value);
        }

        let unit =
            self.entangle_range_2(index_start, index_length, value_start, value_length);
        let mapped_index = self.shards[index_start].mapped;
        let mapped_value = self.shards[value_start].mapped;
        self.units.get_mut(unit).indexed_lda(
            mapped_index,
            index_length,
            mapped_value,
            value_length,
            values,
        );
        self.dirty_shard_range_phase(index_start, index_length);
        self.dirty_shard_range(value_start, value_length);
        Ok(0)
    }

    /// Add the table entry selected by the index register into the value
    /// register, with carry.
    pub fn indexed_adc(
        &mut self,
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        carry_index: usize,
        values: &[u8],
    ) -> QregResult<u64> {
        if self.check_bits_permutation(index_start, index_length) {
            let value =
                self.indexed_eigenstate_value(index_start, index_length, value_length, values);
            self.inc_c(value, value_start, value_length, carry_index)?;
            return Ok(0);
        }

        let unit = self.entangle_range_3(
            index_start,
            index_length,
            value_start,
            value_length,
            carry_index,
            1,
        );
        let mapped_index = self.shards[index_start].mapped;
        let mapped_value = self.shards[value_start].mapped;
        let mapped_carry = self.shards[carry_index].mapped;
        self.units.get_mut(unit).indexed_adc(
            mapped_index,
            index_length,
            mapped_value,
            value_length,
            mapped_carry,
            values,
        );
        self.dirty_shard_range_phase(index_start, index_length);
        self.dirty_shard_range(value_start, value_length);
        self.shards[carry_index].make_dirty();
        Ok(0)
    }

    /// Subtract the table entry selected by the index register from the
    /// value register, with borrow.
    pub fn indexed_sbc(
        &mut self,
        index_start: usize,
        index_length: usize,
        value_start: usize,
        value_length: usize,
        carry_index: usize,
        values: &[u8],
    ) -> QregResult<u64> {
        if self.check_bits_permutation(index_start, index_length) {
            let value =
                self.indexed_eigenstate_value(index_start, index_length, value_length, values);
            self.dec_c(value, value_start, value_length, carry_index)?;
            return Ok(0);
        }

        let unit = self.entangle_range_3(
            index_start,
            index_length,
            value_start,
            value_length,
            carry_index,
            1,
        );
        let mapped_index = self.shards[index_start].mapped;
        let mapped_value = self.shards[value_start].mapped;
        let mapped_carry = self.shards[carry_index].mapped;
        self.units.get_mut(unit).indexed_sbc(
            mapped_index,
            index_length,
            mapped_value,
            value_length,
            mapped_carry,
            values,
        );
        self.dirty_shard_range_phase(index_start, index_length);
        self.dirty_shard_range(value_start, value_length);
        self.shards[carry_index].make_dirty();
        Ok(0)
    }

    /// Replace the register value `v` with `table[v]`. The table must be
    /// a permutation of `0..2^length`.
    pub fn hash(&mut self, start: usize, length: usize, values: &[u8]) -> QregResult<()> {
        if self.check_bits_plus(start, length) {
            // A permutation of a uniform superposition is itself.
            return Ok(());
        }
        if self.check_bits_permutation(start, length) {
            let value = self.indexed_eigenstate_value(start, length, length, values);
            self.set_reg(start, length, value);
            return Ok(());
        }

        self.dirty_shard_range(start, length);
        let unit = self.entangle_range(start, length, false);
        let mapped = self.shards[start].mapped;
        self.units.get_mut(unit).hash(mapped, length, values);
        Ok(())
    }

    /// Flip the global phase of every component whose range value is
    /// below `greater_perm`.
    pub fn phase_flip_if_less(&mut self, greater_perm: u64, start: usize, length: usize) {
        if self.check_bits_permutation(start, length) {
            if self.cached_permutation(start, length) < greater_perm {
                self.phase_flip();
            }
            return;
        }

        self.dirty_shard_range(start, length);
        let unit = self.entangle_range(start, length, false);
        let mapped = self.shards[start].mapped;
        self.units
            .get_mut(unit)
            .phase_flip_if_less(greater_perm, mapped, length);
    }

    /// As [`Self::phase_flip_if_less`], gated on a flag qubit.
    pub fn c_phase_flip_if_less(
        &mut self,
        greater_perm: u64,
        start: usize,
        length: usize,
        flag_index: usize,
    ) {
        if self.check_bit_permutation(flag_index) {
            if self.shards[flag_index].leans_one() {
                self.phase_flip_if_less(greater_perm, start, length);
            }
            return;
        }

        self.dirty_shard_range(start, length);
        self.shards[flag_index].is_phase_dirty = true;
        self.entangle_range(start, length, false);
        let mut bits = vec![start, flag_index];
        let unit = self.entangle(&mut bits);
        let mapped = self.shards[start].mapped;
        let mapped_flag = self.shards[flag_index].mapped;
        self.units
            .get_mut(unit)
            .c_phase_flip_if_less(greater_perm, mapped, length, mapped_flag);
    }
}
