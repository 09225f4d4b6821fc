//! Dense affine projection with signature-inferred parameters.
//!
//! Unlike a conventional linear layer, `Dense` does not know its input width
//! at construction: the weight matrix `[d_in, units]` and bias `[units]` are
//! sized from the initialization signature's last axis and allocated exactly
//! once per instance. Referencing the same `Arc<Dense>` from several places
//! in a network therefore shares one set of parameters. Weights are read by
//! the forward pass and updated only through the external accessors.

use std::sync::{Arc, Mutex};

use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{LayerError, Result};
use crate::layer::{expect_inputs, Arity, Init, Layer};
use crate::signature::Signature;

/// Weight initialization policies for dense projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenseInit {
    /// Xavier/Glorot uniform initialization.
    XavierUniform,
    /// Xavier/Glorot normal initialization.
    XavierNormal,
    /// Kaiming/He normal initialization with ReLU gain.
    KaimingNormal,
}

impl DenseInit {
    fn sample(
        self,
        layer: &str,
        fan_in: usize,
        fan_out: usize,
        rng: &mut StdRng,
    ) -> Result<Vec<f32>> {
        let count = fan_in * fan_out;
        let (fi, fo) = (fan_in as f64, fan_out as f64);
        match self {
            DenseInit::XavierUniform => {
                let bound = (6.0 / (fi + fo)).sqrt() as f32;
                Ok((0..count).map(|_| rng.gen_range(-bound..bound)).collect())
            }
            DenseInit::XavierNormal => {
                let std = (2.0 / (fi + fo)).sqrt() as f32;
                sample_normal(layer, std, count, rng)
            }
            DenseInit::KaimingNormal => {
                let std = (2.0 / fi).sqrt() as f32;
                sample_normal(layer, std, count, rng)
            }
        }
    }
}

fn sample_normal(layer: &str, std: f32, count: usize, rng: &mut StdRng) -> Result<Vec<f32>> {
    let normal = Normal::new(0.0f32, std).map_err(|err| LayerError::Init {
        layer: layer.to_string(),
        message: err.to_string(),
    })?;
    Ok((0..count).map(|_| normal.sample(rng)).collect())
}

#[derive(Debug, Clone)]
struct DenseWeights {
    weight: Tensor,
    bias: Tensor,
}

/// Affine projection over the last axis: `y = x · w + b`.
pub struct Dense {
    units: usize,
    init: DenseInit,
    weights: Mutex<Option<DenseWeights>>,
}

impl Dense {
    /// Creates a dense layer projecting to `units` output features, using
    /// Xavier-uniform initialization.
    pub fn new(units: usize) -> Self {
        Self::with_init(units, DenseInit::XavierUniform)
    }

    /// Creates a dense layer with an explicit initialization policy.
    pub fn with_init(units: usize, init: DenseInit) -> Self {
        Self {
            units,
            init,
            weights: Mutex::new(None),
        }
    }

    /// Output feature count.
    pub fn units(&self) -> usize {
        self.units
    }

    /// Returns clones of the weight and bias tensors, if initialized.
    pub fn weights(&self) -> Option<(Tensor, Tensor)> {
        let guard = self.weights.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|w| (w.weight.clone(), w.bias.clone()))
    }

    /// Replaces the parameter values in place, the hook through which an
    /// external optimization process updates this layer.
    pub fn copy_weights_from(&self, weight: &Tensor, bias: &Tensor) -> Result<()> {
        let mut guard = self.weights.lock().unwrap_or_else(|e| e.into_inner());
        let current = guard.as_mut().ok_or_else(|| LayerError::NotInitialized {
            layer: "Dense".to_string(),
        })?;
        if weight.dims() != current.weight.dims() || bias.dims() != current.bias.dims() {
            return Err(LayerError::ShapeMismatch {
                context: "Dense weight update".to_string(),
                expected: format!("{:?} / {:?}", current.weight.dims(), current.bias.dims()),
                actual: format!("{:?} / {:?}", weight.dims(), bias.dims()),
            });
        }
        current.weight = weight.clone();
        current.bias = bias.clone();
        Ok(())
    }

    fn input_width(&self, signature: &Signature) -> Result<usize> {
        match signature.feature_dim() {
            Some(width) if width > 0 => Ok(width),
            _ => Err(LayerError::ShapeMismatch {
                context: "Dense input".to_string(),
                expected: "rank >= 1 with non-empty last axis".to_string(),
                actual: format!("{:?}", signature.dims),
            }),
        }
    }
}

impl Layer for Dense {
    fn name(&self) -> &str {
        "Dense"
    }

    fn arity(&self) -> Arity {
        Arity::new(1, 1)
    }

    fn init(&self, signature: &[Signature], device: &Device, rng: &mut StdRng) -> Result<Init> {
        expect_inputs(self.name(), 1, signature)?;
        let mut guard = self.weights.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return Ok(Init::Skipped);
        }

        let d_in = self.input_width(&signature[0])?;
        let dtype = signature[0].dtype;
        let values = self.init.sample(self.name(), d_in, self.units, rng)?;
        let mut weight = Tensor::from_vec(values, (d_in, self.units), device)?;
        let mut bias = Tensor::zeros(self.units, DType::F32, device)?;
        if dtype != DType::F32 {
            weight = weight.to_dtype(dtype)?;
            bias = bias.to_dtype(dtype)?;
        }
        *guard = Some(DenseWeights { weight, bias });
        Ok(Init::Allocated)
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        expect_inputs(self.name(), 1, inputs)?;
        self.input_width(&inputs[0])?;
        let mut dims = inputs[0].dims.clone();
        if let Some(last) = dims.last_mut() {
            *last = self.units;
        }
        Ok(vec![Signature::new(dims, inputs[0].dtype)])
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        expect_inputs(self.name(), 1, &inputs)?;
        let weights = {
            let guard = self.weights.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone().ok_or_else(|| LayerError::NotInitialized {
                layer: "Dense".to_string(),
            })?
        };

        let x = &inputs[0];
        let dims = x.dims().to_vec();
        let d_in = weights.weight.dims()[0];
        match dims.last() {
            Some(&width) if width == d_in => {}
            _ => {
                return Err(LayerError::ShapeMismatch {
                    context: "Dense input".to_string(),
                    expected: format!("last axis {d_in}"),
                    actual: format!("{dims:?}"),
                })
            }
        }

        let rows: usize = dims[..dims.len() - 1].iter().product();
        let flat = x.reshape((rows, d_in))?;
        let projected = flat.matmul(&weights.weight)?;
        let with_bias = projected.broadcast_add(&weights.bias)?;

        let mut out_dims = dims;
        if let Some(last) = out_dims.last_mut() {
            *last = self.units;
        }
        Ok(vec![with_bias.reshape(out_dims)?])
    }
}

/// Dense projection as a shareable layer handle.
pub fn dense(units: usize) -> Arc<dyn Layer> {
    Arc::new(Dense::new(units))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    #[test]
    fn init_sizes_weights_from_signature() -> Result<()> {
        let device = Device::Cpu;
        let layer = Dense::new(4);
        let sig = Signature::new(vec![2, 3], DType::F32);
        let outcome = layer.init(std::slice::from_ref(&sig), &device, &mut rng(0))?;
        assert_eq!(outcome, Init::Allocated);

        let (weight, bias) = layer.weights().expect("initialized");
        assert_eq!(weight.dims(), &[3, 4]);
        assert_eq!(bias.dims(), &[4]);
        Ok(())
    }

    #[test]
    fn repeat_init_does_not_reallocate() -> Result<()> {
        let device = Device::Cpu;
        let layer = Dense::new(2);
        let sig = Signature::new(vec![5], DType::F32);
        layer.init(std::slice::from_ref(&sig), &device, &mut rng(7))?;
        let (first, _) = layer.weights().expect("initialized");

        let outcome = layer.init(std::slice::from_ref(&sig), &device, &mut rng(99))?;
        assert_eq!(outcome, Init::Skipped);
        let (second, _) = layer.weights().expect("initialized");
        assert_eq!(first.to_vec2::<f32>()?, second.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn init_is_deterministic_per_seed() -> Result<()> {
        let device = Device::Cpu;
        let sig = Signature::new(vec![6], DType::F32);

        let a = Dense::new(3);
        let b = Dense::new(3);
        a.init(std::slice::from_ref(&sig), &device, &mut rng(42))?;
        b.init(std::slice::from_ref(&sig), &device, &mut rng(42))?;

        let (wa, _) = a.weights().expect("initialized");
        let (wb, _) = b.weights().expect("initialized");
        assert_eq!(wa.to_vec2::<f32>()?, wb.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn forward_projects_the_last_axis() -> Result<()> {
        let device = Device::Cpu;
        let layer = Dense::new(2);
        let sig = Signature::new(vec![2, 3], DType::F32);
        layer.init(std::slice::from_ref(&sig), &device, &mut rng(1))?;

        // Overwrite with known values: w = ones, b = [1, -1].
        let weight = Tensor::ones((3, 2), DType::F32, &device)?;
        let bias = Tensor::from_slice(&[1.0f32, -1.0], (2,), &device)?;
        layer.copy_weights_from(&weight, &bias)?;

        let x = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), &device)?;
        let out = layer.apply(&x)?;
        assert_eq!(
            out.to_vec2::<f32>()?,
            vec![vec![7.0, 5.0], vec![16.0, 14.0]]
        );
        Ok(())
    }

    #[test]
    fn forward_before_init_is_an_error() {
        let device = Device::Cpu;
        let layer = Dense::new(2);
        let x = Tensor::zeros((1, 3), DType::F32, &device).unwrap();
        let err = layer.apply(&x).unwrap_err();
        assert!(matches!(err, LayerError::NotInitialized { .. }));
    }

    #[test]
    fn xavier_uniform_stays_within_bound() -> Result<()> {
        let device = Device::Cpu;
        let layer = Dense::with_init(64, DenseInit::XavierUniform);
        let sig = Signature::new(vec![128], DType::F32);
        layer.init(std::slice::from_ref(&sig), &device, &mut rng(3))?;
        let (weight, _) = layer.weights().expect("initialized");
        let bound = (6.0f32 / (128.0 + 64.0)).sqrt();
        let flat = weight.flatten_all()?.to_vec1::<f32>()?;
        assert!(flat.iter().all(|v| v.abs() <= bound));
        Ok(())
    }
}
