//! Composable neural network layers threaded through a data stack.
//!
//! Every layer consumes a fixed number of tensors and produces a fixed number
//! of tensors (its arity). Multi-tensor exchanges are ordered top-first: index
//! 0 is the top of the data stack. Combinators like [`Serial`] and [`Branch`]
//! thread that stack through their children, so a layer deep inside a network
//! can reach values left by much earlier layers.
//!
//! Weighted layers allocate their parameters from an initialization
//! [`Signature`] (shape plus dtype, no data) rather than a concrete batch.
//! Initialization is idempotent per instance, and referencing the same
//! `Arc<dyn Layer>` from several places in a network shares one set of
//! weights.

pub mod activations;
pub mod branch;
pub mod dense;
pub mod error;
pub mod layer;
pub mod norm;
pub mod pure;
pub mod residual;
pub mod select;
pub mod serial;
pub mod shape;
pub mod signature;
pub mod stack;

pub use activations::{relu, sigmoid, tanh, Activation, ActivationKind};
pub use branch::{branch, Branch};
pub use dense::{dense, Dense, DenseInit};
pub use error::{LayerError, Result};
pub use layer::{Arity, Init, Layer};
pub use norm::{batch_norm, BatchNorm, BatchNormConfig};
pub use pure::{fn_layer, fn_layer_n, FnLayer, PureFn};
pub use residual::{add, residual, residual_with_shortcut, Add};
pub use select::{dup, select, swap, Select};
pub use serial::{serial, Serial};
pub use shape::{concatenate, flatten, Concatenate, Flatten};
pub use signature::{signature_of, Signature};
pub use stack::Stack;
