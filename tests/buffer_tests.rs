// tests/buffer_tests.rs

// Deferred-record equivalence: every sequence that ends in a full
// canonicalization must agree with a monolithic engine that applied the
// same gates directly, and the two sides of every record must stay equal
// through every rewrite.

use num_complex::Complex64;
use qreg::validation::approx_equal_up_to_phase;
use qreg::{EngineBackend, QregError, QubitRegister, StateVectorEngine};

const TOL: f64 = 1e-9;

#[derive(Clone, Copy)]
enum Op {
    H(usize),
    S(usize),
    T(usize),
    X(usize),
    Z(usize),
    Cnot(usize, usize),
    Cz(usize, usize),
    AntiCnot(usize, usize),
    ISwap(usize, usize),
}

fn one() -> Complex64 {
    Complex64::new(1.0, 0.0)
}

fn hadamard() -> [Complex64; 4] {
    let h = Complex64::new(std::f64::consts::FRAC_1_SQRT_2, 0.0);
    [h, h, h, -h]
}

fn t_phase() -> Complex64 {
    Complex64::new(
        std::f64::consts::FRAC_1_SQRT_2,
        std::f64::consts::FRAC_1_SQRT_2,
    )
}

fn apply_to_register(reg: &mut QubitRegister, ops: &[Op]) {
    for &op in ops {
        match op {
            Op::H(q) => reg.h(q),
            Op::S(q) => reg.s(q),
            Op::T(q) => reg.t(q),
            Op::X(q) => reg.x(q),
            Op::Z(q) => reg.z(q),
            Op::Cnot(c, t) => reg.mc_invert(&[c], one(), one(), t),
            Op::Cz(c, t) => reg.mc_phase(&[c], one(), -one(), t),
            Op::AntiCnot(c, t) => reg.mac_invert(&[c], one(), one(), t),
            Op::ISwap(a, b) => reg.i_swap(a, b),
        }
        assert!(
            reg.deferred_records_consistent(),
            "record symmetry broke after an operation"
        );
    }
}

fn apply_to_engine(engine: &mut StateVectorEngine, ops: &[Op]) {
    for &op in ops {
        match op {
            Op::H(q) => engine.mtrx(&hadamard(), q),
            Op::S(q) => engine.phase(one(), Complex64::i(), q),
            Op::T(q) => engine.phase(one(), t_phase(), q),
            Op::X(q) => engine.invert(one(), one(), q),
            Op::Z(q) => engine.phase(one(), -one(), q),
            Op::Cnot(c, t) => engine.mc_invert(&[c], one(), one(), t),
            Op::Cz(c, t) => engine.mc_phase(&[c], one(), -one(), t),
            Op::AntiCnot(c, t) => engine.mac_invert(&[c], one(), one(), t),
            Op::ISwap(a, b) => engine.iswap(a, b),
        }
    }
}

fn assert_matches_reference(qubits: usize, seed: u64, ops: &[Op]) -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(qubits, 0, seed)?;
    apply_to_register(&mut reg, ops);

    let mut reference = StateVectorEngine::new(qubits, 0);
    apply_to_engine(&mut reference, ops);

    let actual = reg.get_quantum_state();
    let expected = reference.get_quantum_state();
    assert!(
        approx_equal_up_to_phase(&actual, &expected, TOL),
        "state diverged from the monolithic reference"
    );
    Ok(())
}

#[test]
fn buffered_cz_commutes_through_hadamard() -> Result<(), QregError> {
    // CZ between separate subsystems buffers; the later H rewrites the
    // record into a conditional inversion rather than flushing it.
    assert_matches_reference(2, 7, &[Op::H(0), Op::Cz(0, 1), Op::H(1)])
}

#[test]
fn buffered_cnot_pair_cancels() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 13)?;
    reg.h(0);
    reg.mc_invert(&[0], one(), one(), 1);
    reg.mc_invert(&[0], one(), one(), 1);
    assert!(reg.is_detached(0) && reg.is_detached(1));
    assert!(reg.try_separate(0), "cancelled records leave the pair free");

    assert_matches_reference(
        2,
        13,
        &[Op::H(0), Op::Cnot(0, 1), Op::Cnot(0, 1)],
    )
}

#[test]
fn stacked_phase_records_compose() -> Result<(), QregError> {
    assert_matches_reference(
        2,
        17,
        &[Op::H(0), Op::H(1), Op::Cz(0, 1), Op::Cz(0, 1), Op::T(1), Op::Cz(0, 1)],
    )
}

#[test]
fn chained_controls_across_three_qubits() -> Result<(), QregError> {
    assert_matches_reference(
        3,
        19,
        &[
            Op::H(0),
            Op::Cnot(0, 1),
            Op::Cnot(1, 2),
            Op::T(2),
            Op::Cnot(1, 2),
            Op::H(1),
        ],
    )
}

#[test]
fn anti_controls_and_inverts_interleave() -> Result<(), QregError> {
    assert_matches_reference(
        3,
        23,
        &[
            Op::H(0),
            Op::AntiCnot(0, 1),
            Op::X(1),
            Op::Cz(1, 2),
            Op::H(2),
            Op::S(1),
            Op::Cnot(2, 0),
        ],
    )
}

#[test]
fn iswap_and_local_phases_stay_exact() -> Result<(), QregError> {
    assert_matches_reference(
        2,
        29,
        &[Op::H(0), Op::T(0), Op::ISwap(0, 1), Op::X(0), Op::Z(1)],
    )
}

#[test]
fn cz_on_ground_state_never_fuses() -> Result<(), QregError> {
    // Scenario: CZ with a control cached at |0> is a provable no-op.
    let mut reg = QubitRegister::with_seed(2, 0, 31)?;
    reg.mc_phase(&[0], one(), -one(), 1);
    assert!(reg.is_detached(0) && reg.is_detached(1));
    assert!(reg.prob_parity(0b11) < TOL);
    Ok(())
}

#[test]
fn buffered_cz_parity_agrees_with_joint_state() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 37)?;
    reg.h(0);
    reg.h(1);
    reg.mc_phase(&[0], one(), -one(), 1);
    // Absorbed into records: no engine fusion happened.
    assert!(reg.is_detached(0) && reg.is_detached(1));

    let parity = reg.prob_parity(0b11);
    let direct: f64 = (0u64..4)
        .filter(|p| p.count_ones() & 1 == 1)
        .map(|p| reg.prob_all(p))
        .sum();
    assert!((parity - direct).abs() < TOL, "{parity} vs {direct}");
    Ok(())
}

#[test]
fn parity_of_an_entangled_register_sums_probabilities() -> Result<(), QregError> {
    // P5 over every mask of a genuinely entangled three-qubit state.
    let mut reg = QubitRegister::with_seed(3, 0, 41)?;
    reg.h(0);
    reg.mc_invert(&[0], one(), one(), 1);
    reg.h(2);
    reg.t(2);
    reg.mc_phase(&[2], one(), -one(), 0);

    for mask in 1u64..8 {
        let parity = reg.prob_parity(mask);
        let direct: f64 = (0u64..8)
            .filter(|p| (p & mask).count_ones() & 1 == 1)
            .map(|p| reg.prob_all(p))
            .sum();
        assert!(
            (parity - direct).abs() < 1e-8,
            "mask {mask}: {parity} vs {direct}"
        );
    }
    Ok(())
}

#[test]
fn parity_measurement_collapses_onto_the_parity_subspace() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 43)?;
    reg.h(0);
    reg.h(1);
    let odd = reg.force_m_parity(0b11, true, true);
    assert!(odd);
    assert!((reg.prob_parity(0b11) - 1.0).abs() < TOL);
    Ok(())
}

#[test]
fn phase_parity_leaves_probabilities_alone() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 47)?;
    reg.h(0);
    reg.h(1);
    let before: Vec<f64> = (0u64..4).map(|p| reg.prob_all(p)).collect();
    reg.phase_parity(std::f64::consts::FRAC_PI_3, 0b11);
    let after: Vec<f64> = (0u64..4).map(|p| reg.prob_all(p)).collect();
    for (b, a) in before.iter().zip(after.iter()) {
        assert!((b - a).abs() < TOL);
    }
    Ok(())
}

#[test]
fn records_survive_position_swaps() -> Result<(), QregError> {
    // Partner references are identities, not positions: swapping logical
    // positions must not corrupt the pending record.
    let mut reg = QubitRegister::with_seed(3, 0, 53)?;
    reg.h(0);
    reg.mc_invert(&[0], one(), one(), 2);
    reg.swap(1, 2);
    assert!(reg.deferred_records_consistent());

    // The CNOT now targets logical qubit 1.
    assert!(reg.force_m(0, true, true, true));
    assert!(reg.m(1));
    assert!(!reg.m(2));
    Ok(())
}
