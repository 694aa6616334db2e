use std::fmt::Debug;

use crate::error::Result;

/// Activation applied to the biased output of a linear layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Activation {
    /// No activation; the layer returns `x @ w + b`.
    #[default]
    Identity,
    /// Elementwise logistic sigmoid.
    Sigmoid,
    /// Row-wise softmax.
    Softmax,
}

/// The primitives a linear layer is built from.
///
/// Implemented by the host reference and by accelerator front-ends. Every
/// operand is a flat row-major f32 slice; results come back owned.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Short identifier for logs, such as "cpu" or "device".
    fn name(&self) -> &str;

    /// `a [m x k] @ b [k x n]`, returned as a fresh `[m x n]` buffer.
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Transpose a row-major [rows, cols] matrix into [cols, rows].
    fn transpose(&self, a: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>>;

    /// Broadcast-add `bias` (length = cols) to every row of `x`.
    fn add_bias(&self, x: &[f32], bias: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>>;

    /// Softmax over each row of `cols` elements:
    /// result[i] = exp(x[i] - max(x)) / sum(exp(x[j] - max(x)))
    fn softmax(&self, x: &[f32], cols: usize) -> Result<Vec<f32>>;

    /// Sigmoid activation: result[i] = 1 / (1 + exp(-x[i])).
    fn sigmoid(&self, x: &[f32]) -> Result<Vec<f32>>;

    /// Linear layer: activation(input @ weights + bias).
    ///
    /// - `input`: [m, k], `weights`: [k, n], `bias`: [n]
    fn linear(
        &self,
        input: &[f32],
        weights: &[f32],
        bias: &[f32],
        (m, k, n): (usize, usize, usize),
        activation: Activation,
    ) -> Result<Vec<f32>> {
        let product = self.matmul(input, weights, m, k, n)?;
        let biased = self.add_bias(&product, bias, m, n)?;
        match activation {
            Activation::Identity => Ok(biased),
            Activation::Sigmoid => self.sigmoid(&biased),
            Activation::Softmax => self.softmax(&biased, n),
        }
    }
}

impl std::str::FromStr for Activation {
    type Err = crate::error::TensorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" | "none" => Ok(Activation::Identity),
            "sigmoid" => Ok(Activation::Sigmoid),
            "softmax" => Ok(Activation::Softmax),
            other => Err(crate::error::TensorError::Other(format!(
                "unknown activation '{}'",
                other
            ))),
        }
    }
}
