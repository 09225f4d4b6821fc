//! Batch normalization over the trailing feature axis.
//!
//! This is the crate's state-bearing layer: besides its trainable scale and
//! shift, it owns running mean/variance statistics that the forward pass
//! updates in place while in training mode. The running statistics are
//! auxiliary state, not weights; an external optimizer never touches them.
//! Evaluation mode normalizes with the stored statistics instead of the
//! current batch.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;

use crate::error::{LayerError, Result};
use crate::layer::{expect_inputs, Arity, Init, Layer};
use crate::signature::Signature;

/// Configuration for [`BatchNorm`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchNormConfig {
    /// Weight of the existing running statistic in each update.
    pub momentum: f64,
    /// Numeric stabilizer added to the variance before the square root.
    pub epsilon: f64,
}

impl Default for BatchNormConfig {
    fn default() -> Self {
        Self {
            momentum: 0.9,
            epsilon: 1e-5,
        }
    }
}

#[derive(Debug, Clone)]
struct BatchNormWeights {
    gamma: Tensor,
    beta: Tensor,
}

#[derive(Debug, Clone)]
struct BatchNormState {
    running_mean: Tensor,
    running_var: Tensor,
    steps: u64,
}

/// Normalizes over every axis except the last.
pub struct BatchNorm {
    config: BatchNormConfig,
    weights: Mutex<Option<BatchNormWeights>>,
    state: Mutex<Option<BatchNormState>>,
    training: AtomicBool,
}

impl BatchNorm {
    /// Creates a batch normalization layer with default momentum/epsilon.
    pub fn new() -> Self {
        Self::with_config(BatchNormConfig::default())
    }

    /// Creates a batch normalization layer from an explicit configuration.
    pub fn with_config(config: BatchNormConfig) -> Self {
        Self {
            config,
            weights: Mutex::new(None),
            state: Mutex::new(None),
            training: AtomicBool::new(true),
        }
    }

    /// Switches between batch statistics (training) and running statistics
    /// (evaluation).
    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    /// Number of forward passes that have updated the running statistics.
    pub fn update_steps(&self) -> u64 {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().map(|state| state.steps).unwrap_or(0)
    }

    /// Returns clones of the running mean and variance, if initialized.
    pub fn running_stats(&self) -> Option<(Tensor, Tensor)> {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|state| (state.running_mean.clone(), state.running_var.clone()))
    }

    fn feature_width(&self, signature: &Signature) -> Result<usize> {
        if signature.rank() < 2 {
            return Err(LayerError::ShapeMismatch {
                context: "BatchNorm input".to_string(),
                expected: "rank >= 2".to_string(),
                actual: format!("{:?}", signature.dims),
            });
        }
        Ok(signature.dims[signature.rank() - 1])
    }

    fn batch_stats(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let dims = x.dims();
        let reduce: Vec<usize> = (0..dims.len() - 1).collect();
        let count: usize = dims[..dims.len() - 1].iter().product();
        let mean = (x.sum(reduce.clone())? / count as f64)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = (centered.sqr()?.sum(reduce)? / count as f64)?;
        Ok((mean, var))
    }

    fn normalize(
        &self,
        x: &Tensor,
        mean: &Tensor,
        var: &Tensor,
        weights: &BatchNormWeights,
    ) -> Result<Tensor> {
        let denom = (var.clone() + self.config.epsilon)?.sqrt()?;
        let normalized = x.broadcast_sub(mean)?.broadcast_div(&denom)?;
        let scaled = normalized.broadcast_mul(&weights.gamma)?;
        Ok(scaled.broadcast_add(&weights.beta)?)
    }
}

impl Default for BatchNorm {
    fn default() -> Self {
        Self::new()
    }
}

impl Layer for BatchNorm {
    fn name(&self) -> &str {
        "BatchNorm"
    }

    fn arity(&self) -> Arity {
        Arity::new(1, 1)
    }

    fn init(&self, signature: &[Signature], device: &Device, rng: &mut StdRng) -> Result<Init> {
        let _ = rng;
        expect_inputs(self.name(), 1, signature)?;
        let mut weights = self.weights.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if weights.is_some() {
            return Ok(Init::Skipped);
        }

        let width = self.feature_width(&signature[0])?;
        let dtype = signature[0].dtype;
        *weights = Some(BatchNormWeights {
            gamma: Tensor::ones(width, dtype, device)?,
            beta: Tensor::zeros(width, dtype, device)?,
        });
        *state = Some(BatchNormState {
            running_mean: Tensor::zeros(width, dtype, device)?,
            running_var: Tensor::ones(width, dtype, device)?,
            steps: 0,
        });
        Ok(Init::Allocated)
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        expect_inputs(self.name(), 1, inputs)?;
        self.feature_width(&inputs[0])?;
        Ok(vec![inputs[0].clone()])
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        expect_inputs(self.name(), 1, &inputs)?;
        let x = &inputs[0];

        let weights = {
            let guard = self.weights.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone().ok_or_else(|| LayerError::NotInitialized {
                layer: "BatchNorm".to_string(),
            })?
        };

        let width = weights.gamma.dims()[0];
        let dims = x.dims();
        if dims.len() < 2 || dims[dims.len() - 1] != width {
            return Err(LayerError::ShapeMismatch {
                context: "BatchNorm input".to_string(),
                expected: format!("rank >= 2 with last axis {width}"),
                actual: format!("{dims:?}"),
            });
        }

        if self.training.load(Ordering::Relaxed) {
            let (mean, var) = self.batch_stats(x)?;
            let out = self.normalize(x, &mean, &var, &weights)?;

            // State is replaced, never shared destructively: each update
            // installs fresh tensors for the running statistics.
            let momentum = self.config.momentum;
            let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let state = guard.as_mut().ok_or_else(|| LayerError::NotInitialized {
                layer: "BatchNorm".to_string(),
            })?;
            state.running_mean = ((state.running_mean.clone() * momentum)?
                + (mean * (1.0 - momentum))?)?;
            state.running_var =
                ((state.running_var.clone() * momentum)? + (var * (1.0 - momentum))?)?;
            state.steps += 1;
            Ok(vec![out])
        } else {
            let (mean, var) = {
                let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let state = guard.as_ref().ok_or_else(|| LayerError::NotInitialized {
                    layer: "BatchNorm".to_string(),
                })?;
                (state.running_mean.clone(), state.running_var.clone())
            };
            Ok(vec![self.normalize(x, &mean, &var, &weights)?])
        }
    }
}

/// Batch normalization as a shareable layer handle.
pub fn batch_norm() -> Arc<dyn Layer> {
    Arc::new(BatchNorm::new())
}
