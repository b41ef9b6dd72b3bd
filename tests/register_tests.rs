// tests/register_tests.rs

// End-to-end checks of the separability-tracking register: literal
// scenarios, measurement collapse, structural round trips, and the
// local-gate identities every shard state must satisfy.

use num_complex::Complex64;
use qreg::validation::approx_equal_up_to_phase;
use qreg::{QregError, QubitRegister};

const TOL: f64 = 1e-9;

fn one() -> Complex64 {
    Complex64::new(1.0, 0.0)
}

fn cnot(reg: &mut QubitRegister, control: usize, target: usize) {
    reg.mc_invert(&[control], one(), one(), target);
}

fn cz(reg: &mut QubitRegister, control: usize, target: usize) {
    reg.mc_phase(&[control], one(), -one(), target);
}

fn bell_amps() -> Vec<Complex64> {
    let h = Complex64::new(std::f64::consts::FRAC_1_SQRT_2, 0.0);
    vec![h, Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0), h]
}

#[test]
fn hadamard_leaves_spectators_detached() -> Result<(), QregError> {
    // Scenario: three qubits, H on qubit 0 only.
    let mut reg = QubitRegister::with_seed(3, 0, 11)?;
    reg.h(0);

    assert!((reg.prob(0) - 0.5).abs() < TOL);
    assert!(reg.prob(1) < TOL);
    assert!(reg.prob(2) < TOL);
    assert!(reg.is_detached(1));
    assert!(reg.is_detached(2));
    Ok(())
}

#[test]
fn bell_pair_matches_reference_and_resists_separation() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 23)?;
    reg.h(0);
    cnot(&mut reg, 0, 1);

    let mut reference = QubitRegister::with_seed(2, 0, 24)?;
    reference.set_quantum_state(&bell_amps());

    assert!(reg.sum_sqr_diff(&mut reference) < TOL);
    assert!(!reg.try_separate(0));
    Ok(())
}

#[test]
fn measuring_one_half_of_a_bell_pair_collapses_the_other() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 5)?;
    reg.h(0);
    cnot(&mut reg, 0, 1);

    assert!(reg.force_m(0, true, true, true));
    assert!(reg.m(1), "partner must collapse to the same value");
    assert!(reg.is_detached(0));
    assert!(reg.is_detached(1));
    Ok(())
}

#[test]
fn t_like_phase_sequence_matches_closed_form() -> Result<(), QregError> {
    // h; s; h; s; h; s on |0> lands on e^(i pi/4)|0>.
    let mut reg = QubitRegister::with_seed(1, 0, 3)?;
    for _ in 0..3 {
        reg.h(0);
        reg.s(0);
    }

    let expected = Complex64::new(
        std::f64::consts::FRAC_1_SQRT_2,
        std::f64::consts::FRAC_1_SQRT_2,
    );
    let amp0 = reg.get_amplitude(0);
    let amp1 = reg.get_amplitude(1);
    assert!((amp0 - expected).norm_sqr() < TOL, "amp0 = {amp0}");
    assert!(amp1.norm_sqr() < TOL, "amp1 = {amp1}");
    Ok(())
}

#[test]
fn separation_is_idempotent() -> Result<(), QregError> {
    // P1: a fused but separable qubit detaches, and repeating the attempt
    // stays true without further work.
    let mut reg = QubitRegister::with_seed(2, 0, 17)?;
    let h = std::f64::consts::FRAC_1_SQRT_2;
    reg.set_quantum_state(&[
        Complex64::new(h, 0.0),
        Complex64::new(h, 0.0),
        Complex64::new(0.0, 0.0),
        Complex64::new(0.0, 0.0),
    ]);

    assert!(reg.try_separate(0));
    assert!(reg.is_detached(0));
    assert!(reg.try_separate(0));
    assert!((reg.prob(0) - 0.5).abs() < TOL);
    assert!(reg.prob(1) < TOL);
    Ok(())
}

#[test]
fn local_gate_round_trips_are_no_ops() -> Result<(), QregError> {
    // P2 on a state that walks through all three shard bases.
    let mut reg = QubitRegister::with_seed(1, 0, 29)?;
    reg.h(0);
    reg.s(0);
    let before = reg.get_quantum_state();

    reg.h(0);
    reg.h(0);
    assert!(approx_equal_up_to_phase(&before, &reg.get_quantum_state(), TOL));

    reg.s(0);
    reg.is(0);
    assert!(approx_equal_up_to_phase(&before, &reg.get_quantum_state(), TOL));

    reg.x(0);
    reg.x(0);
    assert!(approx_equal_up_to_phase(&before, &reg.get_quantum_state(), TOL));
    Ok(())
}

#[test]
fn forced_measurement_pins_probability() -> Result<(), QregError> {
    // P4: after a forced collapse, the probability is exactly 0 or 1.
    let mut reg = QubitRegister::with_seed(2, 0, 31)?;
    reg.h(0);
    cnot(&mut reg, 0, 1);

    assert!(!reg.force_m(0, false, true, true));
    assert_eq!(reg.prob(0), 0.0);
    assert_eq!(reg.prob(1), 0.0);
    for _ in 0..4 {
        assert!(!reg.m(0));
    }
    Ok(())
}

#[test]
fn clone_is_fully_isolated() -> Result<(), QregError> {
    // P6, including the open-question sequence: buffered two-qubit phase
    // records at clone time.
    let mut reg = QubitRegister::with_seed(2, 0, 37)?;
    reg.h(0);
    reg.h(1);
    cz(&mut reg, 0, 1);

    let mut copy = reg.clone_register();
    let before = reg.get_quantum_state();

    copy.x(0);
    copy.z(1);
    cnot(&mut copy, 0, 1);

    assert!(
        approx_equal_up_to_phase(&before, &reg.get_quantum_state(), TOL),
        "mutating the clone must not reach the source"
    );

    let mut copy2 = reg.clone_register();
    reg.x(1);
    let copy2_state = copy2.get_quantum_state();
    assert!(
        approx_equal_up_to_phase(&before, &copy2_state, TOL),
        "mutating the source must not reach the clone"
    );
    Ok(())
}

#[test]
fn compose_then_decompose_round_trips() -> Result<(), QregError> {
    // P7: b composes in and decomposes back out unchanged.
    let mut a = QubitRegister::with_seed(2, 0, 41)?;
    a.h(0);
    a.t(1);

    let mut b = QubitRegister::with_seed(1, 0, 43)?;
    b.h(0);
    b.s(0);

    let offset = a.compose(&mut b);
    assert_eq!(offset, 2);
    assert_eq!(a.qubit_count(), 3);

    let mut extracted = a.decompose(offset, 1);
    assert_eq!(a.qubit_count(), 2);
    assert!(extracted.sum_sqr_diff(&mut b) < TOL);
    Ok(())
}

#[test]
fn double_swap_is_identity_on_observables() -> Result<(), QregError> {
    // P8.
    let mut reg = QubitRegister::with_seed(2, 0, 47)?;
    reg.h(0);
    reg.t(0);
    let before = reg.get_quantum_state();

    reg.swap(0, 1);
    reg.swap(0, 1);
    assert!(approx_equal_up_to_phase(&before, &reg.get_quantum_state(), TOL));
    Ok(())
}

#[test]
fn swap_moves_state_without_engine_work() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 53)?;
    reg.x(0);
    reg.swap(0, 1);
    assert!(reg.prob(0) < TOL);
    assert!((reg.prob(1) - 1.0).abs() < TOL);
    assert!(reg.is_detached(0) && reg.is_detached(1));
    Ok(())
}

#[test]
fn iswap_applies_the_expected_phase() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 59)?;
    reg.x(0);
    reg.i_swap(0, 1);

    let amp = reg.get_amplitude(0b10);
    assert!((amp - Complex64::new(0.0, 1.0)).norm_sqr() < TOL, "amp = {amp}");

    reg.ii_swap(0, 1);
    let amp = reg.get_amplitude(0b01);
    assert!((amp - one()).norm_sqr() < TOL);
    Ok(())
}

#[test]
fn sqrt_swap_squares_to_swap() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 61)?;
    reg.x(0);
    reg.sqrt_swap(0, 1);
    reg.sqrt_swap(0, 1);
    assert!(reg.prob(0) < TOL);
    assert!((reg.prob(1) - 1.0).abs() < TOL);
    Ok(())
}

#[test]
fn controlled_swap_fires_only_when_control_is_set() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(3, 0b001, 67)?;
    // Control |0>: nothing moves.
    reg.c_swap(&[2], 0, 1);
    assert!((reg.prob(0) - 1.0).abs() < TOL);

    reg.x(2);
    reg.c_swap(&[2], 0, 1);
    assert!(reg.prob(0) < TOL);
    assert!((reg.prob(1) - 1.0).abs() < TOL);

    // Anti-control |1>: nothing moves back.
    reg.anti_c_swap(&[2], 0, 1);
    assert!((reg.prob(1) - 1.0).abs() < TOL);
    Ok(())
}

#[test]
fn fsim_at_iswap_angle_matches_iswap() -> Result<(), QregError> {
    let mut a = QubitRegister::with_seed(2, 0, 71)?;
    a.x(0);
    a.f_sim(-std::f64::consts::FRAC_PI_2, 0.0, 0, 1);

    let mut b = QubitRegister::with_seed(2, 0, 73)?;
    b.x(0);
    b.i_swap(0, 1);

    assert!(a.sum_sqr_diff(&mut b) < TOL);
    Ok(())
}

#[test]
fn measure_all_pins_every_qubit() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(3, 0, 79)?;
    reg.x(1);
    reg.h(0);
    cnot(&mut reg, 0, 2);

    let value = reg.m_all();
    assert_eq!(value & 0b010, 0b010, "classical bit survives");
    let bit0 = value & 1 != 0;
    let bit2 = value & 0b100 != 0;
    assert_eq!(bit0, bit2, "entangled pair collapses together");
    // The register is now the sampled eigenstate.
    assert_eq!(reg.m_all(), value);
    Ok(())
}

#[test]
fn multi_shot_sampling_respects_the_joint_distribution() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 83)?;
    reg.h(0);
    cnot(&mut reg, 0, 1);
    // Materialize the pair so both qubits share one engine.
    let _ = reg.prob_all(0);

    let shots = 128;
    let results = reg.multi_shot_measure_mask(&[0, 1], shots);
    let total: u32 = results.values().sum();
    assert_eq!(total, shots);
    for outcome in results.keys() {
        assert!(
            *outcome == 0 || *outcome == 0b11,
            "bell sampling must only yield 00 or 11, got {outcome:b}"
        );
    }
    Ok(())
}

#[test]
fn deterministic_seeds_replay_measurement_paths() -> Result<(), QregError> {
    let run = |seed: u64| -> Result<Vec<bool>, QregError> {
        let mut reg = QubitRegister::with_seed(4, 0, seed)?;
        for q in 0..4 {
            reg.h(q);
        }
        Ok((0..4).map(|q| reg.m(q)).collect())
    };
    assert_eq!(run(97)?, run(97)?);
    Ok(())
}

#[test]
fn expectation_is_linear_in_bit_probabilities() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(2, 0, 101)?;
    reg.h(0);
    reg.x(1);
    let expectation = reg.expectation_bits_all(&[0, 1], 0);
    assert!((expectation - 2.5).abs() < TOL, "expectation = {expectation}");
    Ok(())
}

#[test]
fn oversized_register_is_rejected() {
    match QubitRegister::new(64, 0) {
        Err(QregError::OutOfMemory(_)) => {}
        other => panic!("expected OutOfMemory, got {other:?}"),
    }
}

#[test]
fn dispose_drops_a_classical_range() -> Result<(), QregError> {
    let mut reg = QubitRegister::with_seed(4, 0b0110, 103)?;
    reg.dispose(1, 2);
    assert_eq!(reg.qubit_count(), 2);
    assert!(reg.prob(0) < TOL);
    assert!(reg.prob(1) < TOL);
    Ok(())
}
