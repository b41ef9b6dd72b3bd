//! Error handling logic

use thiserror::Error;

/// Errors surfaced by the register front-end or propagated unchanged from
/// an engine backend.
///
/// Approximate-equality decisions (separability checks, basis
/// normalization) are tuning-parameter driven and never produce an error;
/// they simply report "not separable". Probabilities clamp to `[0, 1]` and
/// squared norms below tolerance collapse to zero without complaint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QregError {
    /// A requested operation combination is not implemented by design,
    /// e.g. controlled arithmetic with a carry qubit.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// An engine allocation would exceed representable capacity.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// A qubit index or permutation fell outside the register.
    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    /// Two registers of different widths were combined where equal widths
    /// are required.
    #[error("size mismatch: {0}")]
    SizeMismatch(String),
}

/// Convenience alias used across the crate.
pub type QregResult<T> = Result<T, QregError>;
