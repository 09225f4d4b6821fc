//! Weight-less layers that rearrange tensor shape or combine tensors.

use std::sync::Arc;

use candle_core::Tensor;

use crate::error::{LayerError, Result};
use crate::layer::{expect_inputs, Arity, Layer};
use crate::signature::Signature;

/// Keeps the first `n_axes_to_keep` axes and merges all remaining axes into
/// one. Fails when the input rank is not strictly greater than the kept-axis
/// count, at signature time as well as at call time.
pub struct Flatten {
    n_axes_to_keep: usize,
}

impl Flatten {
    /// Creates a flatten layer keeping `n_axes_to_keep` leading axes.
    pub fn new(n_axes_to_keep: usize) -> Self {
        Self { n_axes_to_keep }
    }

    fn output_dims(&self, dims: &[usize]) -> Result<Vec<usize>> {
        if dims.len() <= self.n_axes_to_keep {
            return Err(LayerError::RankTooLow {
                layer: "Flatten".to_string(),
                rank: dims.len(),
                n_axes_to_keep: self.n_axes_to_keep,
            });
        }
        let mut out = dims[..self.n_axes_to_keep].to_vec();
        out.push(dims[self.n_axes_to_keep..].iter().product());
        Ok(out)
    }
}

impl Default for Flatten {
    /// Keeps the leading batch axis.
    fn default() -> Self {
        Self::new(1)
    }
}

impl Layer for Flatten {
    fn name(&self) -> &str {
        "Flatten"
    }

    fn arity(&self) -> Arity {
        Arity::new(1, 1)
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        expect_inputs(self.name(), 1, inputs)?;
        let dims = self.output_dims(&inputs[0].dims)?;
        Ok(vec![Signature::new(dims, inputs[0].dtype)])
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        expect_inputs(self.name(), 1, &inputs)?;
        let dims = self.output_dims(inputs[0].dims())?;
        Ok(vec![inputs[0].reshape(dims)?])
    }
}

/// Pops `n_items` tensors and concatenates them along `axis`, preserving the
/// stack order of the inputs.
pub struct Concatenate {
    n_items: usize,
    axis: usize,
}

impl Concatenate {
    /// Concatenates `n_items` tensors along `axis`.
    pub fn new(n_items: usize, axis: usize) -> Self {
        Self { n_items, axis }
    }

    fn check_dims(&self, dims: &[&[usize]]) -> Result<Vec<usize>> {
        let Some(&first) = dims.first() else {
            return Err(LayerError::ShapeMismatch {
                context: "Concatenate".to_string(),
                expected: "at least one input".to_string(),
                actual: "0 items".to_string(),
            });
        };
        if self.axis >= first.len() {
            return Err(LayerError::ShapeMismatch {
                context: "Concatenate axis".to_string(),
                expected: format!("axis below rank {}", first.len()),
                actual: format!("axis {}", self.axis),
            });
        }
        let mut merged = first.to_vec();
        for other in &dims[1..] {
            let same_rank = other.len() == first.len();
            let same_rest = same_rank
                && other
                    .iter()
                    .enumerate()
                    .all(|(i, &d)| i == self.axis || d == first[i]);
            if !same_rest {
                return Err(LayerError::ShapeMismatch {
                    context: "Concatenate".to_string(),
                    expected: format!("{first:?} up to axis {}", self.axis),
                    actual: format!("{other:?}"),
                });
            }
            merged[self.axis] += other[self.axis];
        }
        Ok(merged)
    }
}

impl Layer for Concatenate {
    fn name(&self) -> &str {
        "Concatenate"
    }

    fn arity(&self) -> Arity {
        Arity::new(self.n_items, 1)
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        expect_inputs(self.name(), self.n_items, inputs)?;
        let dims: Vec<&[usize]> = inputs.iter().map(|sig| sig.dims.as_slice()).collect();
        let merged = self.check_dims(&dims)?;
        Ok(vec![Signature::new(merged, inputs[0].dtype)])
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        expect_inputs(self.name(), self.n_items, &inputs)?;
        let dims: Vec<&[usize]> = inputs.iter().map(|t| t.dims()).collect();
        self.check_dims(&dims)?;
        let refs: Vec<&Tensor> = inputs.iter().collect();
        Ok(vec![Tensor::cat(&refs, self.axis)?])
    }
}

/// Flatten as a shareable layer handle.
pub fn flatten(n_axes_to_keep: usize) -> Arc<dyn Layer> {
    Arc::new(Flatten::new(n_axes_to_keep))
}

/// Concatenation as a shareable layer handle.
pub fn concatenate(n_items: usize, axis: usize) -> Arc<dyn Layer> {
    Arc::new(Concatenate::new(n_items, axis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn flatten_merges_trailing_axes() -> Result<()> {
        let device = Device::Cpu;
        let x = Tensor::zeros((2, 3, 4, 5), DType::F32, &device)?;
        let out = flatten(2).apply(&x)?;
        assert_eq!(out.dims(), &[2, 3, 20]);
        Ok(())
    }

    #[test]
    fn flatten_rejects_insufficient_rank() {
        let sig = Signature::new(vec![2, 3], DType::F32);
        for keep in [2, 3] {
            let err = flatten(keep)
                .forward_signature(std::slice::from_ref(&sig))
                .unwrap_err();
            assert!(matches!(err, LayerError::RankTooLow { .. }));
        }
    }

    #[test]
    fn concatenate_stacks_rows_in_input_order() -> Result<()> {
        let device = Device::Cpu;
        let a = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), &device)?;
        let b = Tensor::from_slice(&[10.0f32, 20.0, 30.0, 40.0, 50.0, 60.0], (2, 3), &device)?;
        let c = Tensor::from_slice(
            &[100.0f32, 200.0, 300.0, 400.0, 500.0, 600.0],
            (2, 3),
            &device,
        )?;
        let out = concatenate(3, 0).call(vec![a, b, c])?;
        assert_eq!(
            out[0].to_vec2::<f32>()?,
            vec![
                vec![1.0, 2.0, 3.0],
                vec![4.0, 5.0, 6.0],
                vec![10.0, 20.0, 30.0],
                vec![40.0, 50.0, 60.0],
                vec![100.0, 200.0, 300.0],
                vec![400.0, 500.0, 600.0],
            ]
        );
        Ok(())
    }

    #[test]
    fn concatenate_checks_non_axis_dims() {
        let a = Signature::new(vec![2, 3], DType::F32);
        let b = Signature::new(vec![2, 4], DType::F32);
        let err = concatenate(2, 0)
            .forward_signature(&[a, b])
            .unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }

    #[test]
    fn concatenate_of_zero_items_is_an_error() {
        let empty = concatenate(0, 0);
        let err = empty.call(vec![]).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
        let err = empty.forward_signature(&[]).unwrap_err();
        assert!(matches!(err, LayerError::ShapeMismatch { .. }));
    }

    #[test]
    fn concatenate_signature_sums_the_axis() -> Result<()> {
        let a = Signature::new(vec![2, 3], DType::F32);
        let b = Signature::new(vec![5, 3], DType::F32);
        let out = concatenate(2, 0).forward_signature(&[a, b])?;
        assert_eq!(out[0].dims, vec![7, 3]);
        Ok(())
    }
}
