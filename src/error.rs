//! Error types shared by every layer and combinator in the crate.
//!
//! All fallible operations return [`Result`] so call sites can propagate
//! failures with `?` instead of panicking. Contract violations (arity, stack
//! depth, shape) are surfaced as dedicated variants; failures inside the
//! tensor backend are forwarded unchanged.

use thiserror::Error;

/// Failure modes raised while composing, initializing, or applying layers.
#[derive(Debug, Error)]
pub enum LayerError {
    /// A layer received or produced a different number of tensors than its
    /// declared arity. Raised at call time, never silently truncated.
    #[error("{layer}: expected {expected} {role} tensor(s), got {actual}")]
    ArityMismatch {
        layer: String,
        role: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A combinator asked the data stack for more items than it holds.
    #[error("data stack underflow: requested {requested} item(s), {available} available")]
    StackUnderflow { requested: usize, available: usize },

    /// Flatten was asked to keep at least as many axes as the input has.
    #[error("{layer}: input rank {rank} must be greater than n_axes_to_keep {n_axes_to_keep}")]
    RankTooLow {
        layer: String,
        rank: usize,
        n_axes_to_keep: usize,
    },

    /// Two branch outputs cannot be merged elementwise.
    #[error("shapes {lhs:?} and {rhs:?} are not broadcast-compatible")]
    NotBroadcastable { lhs: Vec<usize>, rhs: Vec<usize> },

    /// A tensor or signature violated a layer's documented shape contract.
    #[error("{context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: String,
        actual: String,
    },

    /// A weighted layer was applied before `init` allocated its parameters.
    #[error("{layer}: forward called before init")]
    NotInitialized { layer: String },

    /// Weight or state allocation failed during initialization.
    #[error("{layer}: initialization failed: {message}")]
    Init { layer: String, message: String },

    /// Failure propagated from the tensor backend.
    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, LayerError>;
