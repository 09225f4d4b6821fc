//! Shape and dtype descriptors used for initialization-time inference.
//!
//! A [`Signature`] records the shape and element type of a tensor without
//! carrying any data. Networks are initialized by propagating signatures
//! through every layer (see [`Layer::forward_signature`]), so weight shapes
//! can be derived before a single real tensor flows through the stack.
//!
//! [`Layer::forward_signature`]: crate::layer::Layer::forward_signature

use candle_core::{DType, Tensor};

use crate::error::{LayerError, Result};

/// Describes the shape and element type of one tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Dimensions, outermost first.
    pub dims: Vec<usize>,
    /// Element type of the described tensor.
    pub dtype: DType,
}

impl Signature {
    /// Creates a signature from explicit dimensions and dtype.
    pub fn new(dims: Vec<usize>, dtype: DType) -> Self {
        Self { dims, dtype }
    }

    /// Canonical descriptor of an existing tensor.
    pub fn of(tensor: &Tensor) -> Self {
        Self {
            dims: tensor.dims().to_vec(),
            dtype: tensor.dtype(),
        }
    }

    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements described.
    pub fn elem_count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Size of the last axis, the feature width convention used by weighted
    /// layers when inferring parameter shapes.
    pub fn feature_dim(&self) -> Option<usize> {
        self.dims.last().copied()
    }

    /// Computes the elementwise broadcast of two signatures.
    ///
    /// Follows the usual trailing-axis rule: dimensions are aligned from the
    /// right and each pair must be equal or contain a 1. Fails with
    /// [`LayerError::NotBroadcastable`] otherwise, which is how Residual
    /// rejects mismatched shortcut/main paths before any data is processed.
    pub fn broadcast_with(&self, other: &Signature) -> Result<Signature> {
        let rank = self.rank().max(other.rank());
        let mut dims = vec![0usize; rank];
        for i in 0..rank {
            let l = dim_from_right(&self.dims, i);
            let r = dim_from_right(&other.dims, i);
            dims[rank - 1 - i] = match (l, r) {
                (a, b) if a == b => a,
                (1, b) => b,
                (a, 1) => a,
                _ => {
                    return Err(LayerError::NotBroadcastable {
                        lhs: self.dims.clone(),
                        rhs: other.dims.clone(),
                    })
                }
            };
        }
        Ok(Signature::new(dims, self.dtype))
    }
}

fn dim_from_right(dims: &[usize], offset: usize) -> usize {
    if offset < dims.len() {
        dims[dims.len() - 1 - offset]
    } else {
        1
    }
}

/// Normalizes a group of tensors into a sequence of signatures.
///
/// The output is always a `Vec`, even for a single tensor, so callers can
/// feed it straight into [`Layer::init`](crate::layer::Layer::init).
pub fn signature_of(tensors: &[Tensor]) -> Vec<Signature> {
    tensors.iter().map(Signature::of).collect()
}
