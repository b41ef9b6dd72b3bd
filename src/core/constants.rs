//! Numeric tolerances and capacity limits shared across the crate.

/// Tolerance for real-valued comparisons (probabilities, Bloch components).
pub const REAL_EPSILON: f64 = 1e-12;

/// Tolerance for squared-norm comparisons of amplitudes. A squared norm at
/// or below this is treated as exactly zero.
pub const NORM_EPSILON: f64 = 1e-12;

/// 1/sqrt(2), the Hadamard coefficient.
pub const SQRT1_2: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// Upper bound on the width of a single fused engine. A dense amplitude
/// vector above this would overflow the permutation index type long before
/// it would fit in memory.
pub const MAX_FUSED_QUBITS: usize = 63;
