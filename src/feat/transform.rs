//! Linear transform and feature fusion stages.
//!
//! [`TransformStage`] applies a loaded matrix to each frame; it serves both
//! the global discriminative (LDA-style) transform and the per-speaker
//! transform. [`AppendStage`] fuses two upstream stages by concatenation.

use crate::error::{LattixError, Result};
use crate::feat::stage::{FeatureStage, StageHandle};
use ndarray::Array2;

/// Per-frame linear (or affine) transform.
///
/// A matrix with `input_dim` columns is linear; `input_dim + 1` columns is
/// affine, with the last column the offset applied to an implicit trailing 1.
pub struct TransformStage {
    source: StageHandle,
    matrix: Array2<f32>,
    affine: bool,
    in_dim: usize,
}

impl TransformStage {
    pub fn new(matrix: Array2<f32>, source: StageHandle) -> Result<Self> {
        let in_dim = source.borrow().dim();
        let affine = match matrix.ncols() {
            c if c == in_dim => false,
            c if c == in_dim + 1 => true,
            c => {
                return Err(LattixError::ConfigInvalidValue {
                    key: "transform".to_string(),
                    message: format!(
                        "matrix has {c} columns, input dimension is {in_dim} (expected {in_dim} or {})",
                        in_dim + 1
                    ),
                });
            }
        };
        Ok(Self {
            source,
            matrix,
            affine,
            in_dim,
        })
    }
}

impl FeatureStage for TransformStage {
    fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    fn frames_ready(&mut self) -> usize {
        self.source.borrow_mut().frames_ready()
    }

    fn frame(&mut self, index: usize) -> Option<Vec<f32>> {
        let input = self.source.borrow_mut().frame(index)?;
        debug_assert_eq!(input.len(), self.in_dim);
        let out = self
            .matrix
            .rows()
            .into_iter()
            .map(|row| {
                let linear: f32 = row
                    .iter()
                    .take(self.in_dim)
                    .zip(input.iter())
                    .map(|(a, x)| a * x)
                    .sum();
                if self.affine {
                    linear + row[self.in_dim]
                } else {
                    linear
                }
            })
            .collect();
        Some(out)
    }

    fn input_done(&self) -> bool {
        self.source.borrow().input_done()
    }
}

/// Concatenates two upstream stages frame-by-frame.
pub struct AppendStage {
    first: StageHandle,
    second: StageHandle,
    dim: usize,
}

impl AppendStage {
    pub fn new(first: StageHandle, second: StageHandle) -> Self {
        let dim = first.borrow().dim() + second.borrow().dim();
        Self { first, second, dim }
    }
}

impl FeatureStage for AppendStage {
    fn dim(&self) -> usize {
        self.dim
    }

    fn frames_ready(&mut self) -> usize {
        let a = self.first.borrow_mut().frames_ready();
        let b = self.second.borrow_mut().frames_ready();
        a.min(b)
    }

    fn frame(&mut self, index: usize) -> Option<Vec<f32>> {
        let mut out = self.first.borrow_mut().frame(index)?;
        out.extend(self.second.borrow_mut().frame(index)?);
        Some(out)
    }

    fn input_done(&self) -> bool {
        self.first.borrow().input_done() && self.second.borrow().input_done()
    }
}
