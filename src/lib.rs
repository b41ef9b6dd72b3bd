// src/lib.rs

//! `qreg` - a separability-tracking simulator of quantum registers
//!
//! This library simulates a register of qubits on top of one or more
//! dense amplitude-vector engines while deliberately delaying, avoiding,
//! and reversing entanglement. Each qubit is tracked by a shard that is
//! either detached (two cached amplitudes in a Z, X, or Y eigenframe) or
//! attached to a joint subsystem engine; controlled phase and invert
//! gates between separate subsystems are buffered as deferred records
//! instead of forcing fusion, and a separator tries to win qubits back
//! after every entangling operation.
//!
//! Every optimization is a strict no-op on the joint state a measurement
//! could observe.
//!
//! ```
//! use num_complex::Complex64;
//! use qreg::QubitRegister;
//!
//! # fn main() -> Result<(), qreg::QregError> {
//! let mut reg = QubitRegister::with_seed(2, 0, 7)?;
//! reg.h(0);
//! let one = Complex64::new(1.0, 0.0);
//! // CNOT toward a separate subsystem: absorbed as a deferred record,
//! // with no engine fusion.
//! reg.mc_invert(&[0], one, one, 1);
//! assert!((reg.prob(0) - 0.5).abs() < 1e-9);
//!
//! // Collapsing the control forces the deferred inversion through.
//! assert!(reg.force_m(0, true, true, true));
//! assert!(reg.m(1));
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod engine;
pub mod register;
pub mod shard;
pub mod validation;

pub use crate::core::{QregError, QregResult};
pub use engine::{EngineBackend, EngineFactory, StateVectorEngine};
pub use register::{QubitRegister, SEPARABILITY_THRESHOLD_ENV};
pub use shard::{Pauli, PhaseRecord, QubitShard, ShardId, ShardMap};

pub use num_complex::Complex64;
