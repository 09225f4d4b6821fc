//! Stack rearrangement: copy, reorder, or drop items near the top.

use std::sync::Arc;

use candle_core::Tensor;

use crate::error::{LayerError, Result};
use crate::layer::{expect_inputs, Arity, Layer};
use crate::signature::Signature;

/// Copies or reorders the top of the stack by index.
///
/// `Select([0, 0])` duplicates the top item; `Select([1, 0])` swaps the top
/// two. Consumed items whose index is never selected are dropped.
pub struct Select {
    indices: Vec<usize>,
    arity: Arity,
}

impl Select {
    /// Selects `indices` (0 = stack top) from the minimal depth they span.
    pub fn new(indices: Vec<usize>) -> Self {
        let n_in = indices.iter().map(|&i| i + 1).max().unwrap_or(0);
        Self::with_depth(indices, n_in)
    }

    /// Selects `indices` while consuming `n_in` items, which may be wider
    /// than the deepest index to drop trailing items.
    pub fn with_depth(indices: Vec<usize>, n_in: usize) -> Self {
        let arity = Arity::new(n_in, indices.len());
        Self { indices, arity }
    }

    fn pick<T: Clone>(&self, inputs: &[T]) -> Result<Vec<T>> {
        expect_inputs(self.name(), self.arity.n_in, inputs)?;
        self.indices
            .iter()
            .map(|&i| {
                inputs.get(i).cloned().ok_or_else(|| LayerError::ShapeMismatch {
                    context: "Select".to_string(),
                    expected: format!("index below depth {}", self.arity.n_in),
                    actual: format!("index {i}"),
                })
            })
            .collect()
    }
}

impl Layer for Select {
    fn name(&self) -> &str {
        "Select"
    }

    fn arity(&self) -> Arity {
        self.arity
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        self.pick(inputs)
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        self.pick(&inputs)
    }
}

/// Builds a selection as a shareable layer handle.
pub fn select(indices: Vec<usize>) -> Arc<dyn Layer> {
    Arc::new(Select::new(indices))
}

/// Duplicates the top stack item.
pub fn dup() -> Arc<dyn Layer> {
    select(vec![0, 0])
}

/// Swaps the top two stack items.
pub fn swap() -> Arc<dyn Layer> {
    select(vec![1, 0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn scalar(v: f32) -> Tensor {
        Tensor::from_slice(&[v], (1,), &Device::Cpu).unwrap()
    }

    #[test]
    fn dup_copies_the_top() -> Result<()> {
        let out = dup().call(vec![scalar(7.0)])?;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].to_vec1::<f32>()?, vec![7.0]);
        assert_eq!(out[1].to_vec1::<f32>()?, vec![7.0]);
        Ok(())
    }

    #[test]
    fn swap_reverses_the_top_two() -> Result<()> {
        let out = swap().call(vec![scalar(1.0), scalar(2.0)])?;
        assert_eq!(out[0].to_vec1::<f32>()?, vec![2.0]);
        assert_eq!(out[1].to_vec1::<f32>()?, vec![1.0]);
        Ok(())
    }

    #[test]
    fn wider_depth_drops_unselected_items() -> Result<()> {
        let keep_top = Select::with_depth(vec![0], 2);
        assert_eq!(keep_top.arity(), Arity::new(2, 1));
        let out = keep_top.call(vec![scalar(5.0), scalar(9.0)])?;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_vec1::<f32>()?, vec![5.0]);
        Ok(())
    }
}
