// src/core/mod.rs

//! Core numeric primitives and shared types

pub mod complex;
pub mod constants;
pub mod error;

pub use complex::{
    approx_eq, clamp_prob, is_arg_pi, is_arg_zero, is_norm_zero, is_one, polar_unit,
};
pub use constants::{MAX_FUSED_QUBITS, NORM_EPSILON, REAL_EPSILON, SQRT1_2};
pub use error::{QregError, QregResult};
