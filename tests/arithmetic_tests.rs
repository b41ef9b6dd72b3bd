// tests/arithmetic_tests.rs

// Arithmetic front-end: classical fast paths, ripple addition around
// superposed bits, carry and overflow handling, multipliers, and indexed
// loads.

use qreg::{QregError, QubitRegister};

const TOL: f64 = 1e-9;

#[test]
fn classical_add_wraps_at_register_width() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(4, 0, 7)?;
    reg.set_reg(0, 4, 5);
    reg.inc(3, 0, 4)?;
    assert_eq!(reg.m_reg(0, 4), 8);
    reg.inc(9, 0, 4)?;
    assert_eq!(reg.m_reg(0, 4), 1, "17 mod 16");
    Ok(())
}

#[test]
fn classical_subtract_is_inverse_of_add() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(4, 0, 11)?;
    reg.set_reg(0, 4, 9);
    reg.inc(5, 0, 4)?;
    reg.dec(5, 0, 4)?;
    assert_eq!(reg.m_reg(0, 4), 9);
    Ok(())
}

#[test]
fn ripple_add_entangles_only_the_superposed_prefix() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(3, 0, 13)?;
    reg.h(0);
    reg.inc(1, 0, 2)?;
    // (|0> + |1>)/sqrt(2) + 1 = (|1> + |2>)/sqrt(2)
    assert!((reg.prob_all(1) - 0.5).abs() < TOL);
    assert!((reg.prob_all(2) - 0.5).abs() < TOL);
    assert!(reg.is_detached(2), "untouched bit stays detached");
    Ok(())
}

#[test]
fn classical_bits_absorb_additions_without_entangling() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(4, 0, 17)?;
    reg.set_reg(0, 4, 3);
    reg.inc(6, 0, 4)?;
    for q in 0..4 {
        assert!(reg.is_detached(q));
    }
    assert_eq!(reg.m_reg(0, 4), 9);
    Ok(())
}

#[test]
fn carry_add_flips_the_carry_qubit() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(3, 0b011, 19)?;
    reg.inc_c(1, 0, 2, 2)?;
    assert_eq!(reg.m_reg(0, 2), 0);
    assert!(reg.m(2), "3 + 1 overflows a 2-bit register");
    Ok(())
}

#[test]
fn borrow_subtract_clears_the_carry_qubit() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(3, 0b101, 23)?;
    // Value 1, carry set (no pending borrow): subtract 2 underflows.
    reg.dec_c(2, 0, 2, 2)?;
    assert_eq!(reg.m_reg(0, 2), 3);
    assert!(!reg.m(2), "underflow consumes the carry");
    Ok(())
}

#[test]
fn signed_add_flags_overflow() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(4, 0, 29)?;
    reg.set_reg(0, 3, 3); // Largest positive 3-bit value.
    reg.x(3); // Arm the overflow flag.
    reg.inc_s(1, 0, 3, 3)?;
    assert_eq!(reg.m_reg(0, 3), 4, "wraps to the most negative value");
    assert!(reg.m(3), "flag qubit itself is untouched by Z");
    Ok(())
}

#[test]
fn controlled_add_respects_the_control() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(4, 0, 31)?;
    reg.set_reg(0, 3, 2);
    reg.c_inc(3, 0, 3, &[3])?;
    assert_eq!(reg.m_reg(0, 3), 2, "control |0> blocks the add");

    reg.x(3);
    reg.c_inc(3, 0, 3, &[3])?;
    assert_eq!(reg.m_reg(0, 3), 5);
    Ok(())
}

#[test]
fn multiply_spills_into_the_carry_range() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(6, 0, 37)?;
    reg.set_reg(0, 3, 5);
    reg.mul(3, 0, 3, 3)?;
    // 5 * 3 = 15 = b001111: low half 7, high half 1.
    assert_eq!(reg.m_reg(0, 3), 7);
    assert_eq!(reg.m_reg(3, 3), 1);
    Ok(())
}

#[test]
fn divide_undoes_multiply() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(6, 0, 41)?;
    reg.set_reg(0, 3, 5);
    reg.mul(3, 0, 3, 3)?;
    reg.div(3, 0, 3, 3)?;
    assert_eq!(reg.m_reg(0, 3), 5);
    assert_eq!(reg.m_reg(3, 3), 0);
    Ok(())
}

#[test]
fn modular_multiply_writes_the_output_register() -> Result<(), QregError> {
    // Scenario: input 5, multiplier 3, modulus 8; output lands at 7 and
    // the input register is untouched.
    let mut reg = QubitRegister::with_seed(8, 0, 43)?;
    reg.set_reg(0, 4, 5);
    reg.mul_mod_n_out(3, 8, 0, 4, 4)?;
    assert_eq!(reg.m_reg(4, 4), 7);
    assert_eq!(reg.m_reg(0, 4), 5);
    Ok(())
}

#[test]
fn modular_multiply_over_superposed_input() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(6, 0, 47)?;
    reg.h(0);
    reg.mul_mod_n_out(3, 5, 0, 3, 3)?;
    // (|0> + |1>)/sqrt(2) maps to (|0,0> + |1,3>)/sqrt(2).
    assert!((reg.prob_all(0) - 0.5).abs() < TOL);
    assert!((reg.prob_all(1 | (3 << 3)) - 0.5).abs() < TOL);
    Ok(())
}

#[test]
fn inverse_modular_multiply_round_trips() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(6, 0, 53)?;
    reg.h(0);
    reg.mul_mod_n_out(3, 5, 0, 3, 3)?;
    reg.imul_mod_n_out(3, 5, 0, 3, 3)?;
    assert!((reg.prob_all(0) - 0.5).abs() < TOL);
    assert!((reg.prob_all(1) - 0.5).abs() < TOL);
    Ok(())
}

#[test]
fn modular_power_on_classical_input() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(8, 0, 59)?;
    reg.set_reg(0, 4, 3);
    reg.pow_mod_n_out(2, 5, 0, 4, 4)?;
    // 2^3 mod 5 = 3.
    assert_eq!(reg.m_reg(4, 4), 3);
    Ok(())
}

#[test]
fn indexed_load_reads_the_table() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(10, 0, 61)?;
    let table = [10u8, 20, 30, 40];
    reg.set_reg(0, 2, 2);
    reg.indexed_lda(0, 2, 2, 8, &table)?;
    assert_eq!(reg.m_reg(2, 8), 30);
    Ok(())
}

#[test]
fn indexed_add_carries_like_a_plain_add() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(7, 0, 67)?;
    let table = [3u8, 7, 11, 15];
    reg.set_reg(0, 2, 1);
    reg.set_reg(2, 4, 12);
    reg.indexed_adc(0, 2, 2, 4, 6, &table)?;
    // 12 + 7 = 19 = 3 mod 16, carry out.
    assert_eq!(reg.m_reg(2, 4), 3);
    assert!(reg.m(6));
    Ok(())
}

#[test]
fn indexed_subtract_borrows() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(7, 0, 71)?;
    let table = [3u8, 7, 11, 15];
    reg.set_reg(0, 2, 1);
    reg.set_reg(2, 4, 12);
    reg.x(6); // No borrow pending.
    reg.indexed_sbc(0, 2, 2, 4, 6, &table)?;
    assert_eq!(reg.m_reg(2, 4), 5);
    assert!(reg.m(6), "12 - 7 needs no borrow");
    Ok(())
}

#[test]
fn hash_permutes_a_classical_value() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(3, 0, 73)?;
    let table = [4u8, 6, 1, 7, 0, 3, 2, 5];
    reg.set_reg(0, 3, 3);
    reg.hash(0, 3, &table)?;
    assert_eq!(reg.m_reg(0, 3), 7);
    Ok(())
}

#[test]
fn comparator_phase_flip_is_invisible_to_probabilities() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(3, 0, 79)?;
    reg.h(0);
    reg.h(1);
    let before: Vec<f64> = (0u64..8).map(|p| reg.prob_all(p)).collect();
    reg.phase_flip_if_less(2, 0, 3);
    let after: Vec<f64> = (0u64..8).map(|p| reg.prob_all(p)).collect();
    for (b, a) in before.iter().zip(after.iter()) {
        assert!((b - a).abs() < TOL);
    }
    Ok(())
}

#[test]
fn comparator_phase_flip_interferes_correctly() -> Result<(), QregError> {
    // H; flip phase of |0>; H again turns |0> into |1>.
    let mut reg = QubitRegister::with_seed(1, 0, 83)?;
    reg.h(0);
    reg.phase_flip_if_less(1, 0, 1);
    reg.h(0);
    assert!((reg.prob(0) - 1.0).abs() < TOL);
    Ok(())
}

#[test]
fn controlled_modular_multiply_respects_controls() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(8, 0, 89)?;
    reg.set_reg(0, 3, 4);
    reg.c_mul_mod_n_out(3, 7, 0, 3, 3, &[7])?;
    assert_eq!(reg.m_reg(3, 3), 0, "control |0> blocks the multiply");

    reg.set_reg(0, 3, 4);
    reg.x(7);
    reg.c_mul_mod_n_out(3, 7, 0, 3, 3, &[7])?;
    // 4 * 3 mod 7 = 5.
    assert_eq!(reg.m_reg(3, 3), 5);
    Ok(())
}
