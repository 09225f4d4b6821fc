//! Shortcut composition built from Branch plus an elementwise merge.
//!
//! `residual(main)` routes the input through both the main transformation and
//! an identity shortcut, then adds the two results elementwise. The two paths
//! must produce broadcast-compatible shapes; a mismatch is rejected while
//! propagating signatures, before any data is processed.

use std::sync::Arc;

use candle_core::Tensor;

use crate::branch::Branch;
use crate::error::{LayerError, Result};
use crate::layer::{Arity, Layer};
use crate::serial::Serial;
use crate::signature::Signature;

/// Elementwise broadcast addition of the top two stack items.
pub struct Add;

impl Layer for Add {
    fn name(&self) -> &str {
        "Add"
    }

    fn arity(&self) -> Arity {
        Arity::new(2, 1)
    }

    fn forward_signature(&self, inputs: &[Signature]) -> Result<Vec<Signature>> {
        crate::layer::expect_inputs(self.name(), 2, inputs)?;
        if inputs[0].dtype != inputs[1].dtype {
            return Err(LayerError::ShapeMismatch {
                context: "Add".to_string(),
                expected: format!("{:?}", inputs[0].dtype),
                actual: format!("{:?}", inputs[1].dtype),
            });
        }
        let merged = inputs[0].broadcast_with(&inputs[1])?;
        Ok(vec![merged])
    }

    fn forward(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        crate::layer::expect_inputs(self.name(), 2, &inputs)?;
        Ok(vec![inputs[0].broadcast_add(&inputs[1])?])
    }
}

/// The elementwise-add merge as a shareable handle.
pub fn add() -> Arc<dyn Layer> {
    Arc::new(Add)
}

/// Wraps `main` with an identity shortcut and an elementwise-add merge.
pub fn residual(main: Arc<dyn Layer>) -> Result<Arc<dyn Layer>> {
    residual_with_shortcut(main, Arc::new(Serial::identity()))
}

/// Wraps `main` with a caller-supplied shortcut path.
///
/// Derived combinator: expands to `Serial(Branch(main, shortcut), Add)`, so
/// all stack handling and error surfacing comes from the primitives. The
/// merge consumes exactly one output per path, so each path must produce
/// exactly one tensor; anything else is rejected at composition time.
pub fn residual_with_shortcut(
    main: Arc<dyn Layer>,
    shortcut: Arc<dyn Layer>,
) -> Result<Arc<dyn Layer>> {
    // An identity (empty Serial) shortcut would contribute no output to the
    // merge, so it is promoted to a one-item pass-through.
    let shortcut = if shortcut.arity() == Arity::new(0, 0) {
        crate::select::select(vec![0])
    } else {
        shortcut
    };
    for path in [&main, &shortcut] {
        if path.arity().n_out != 1 {
            return Err(LayerError::ArityMismatch {
                layer: path.name().to_string(),
                role: "residual path output",
                expected: 1,
                actual: path.arity().n_out,
            });
        }
    }
    Ok(Arc::new(Serial::new(vec![
        Arc::new(Branch::new(vec![main, shortcut])),
        add(),
    ])))
}
