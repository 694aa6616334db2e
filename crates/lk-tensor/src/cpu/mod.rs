pub mod bias;
pub mod matmul;
pub mod simd;

use tracing::trace;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};
use crate::shape::Shape;

/// Host reference for every linear-layer primitive.
///
/// Device kernels are checked against it. Rows are split across the global
/// rayon pool and dot products use the widest SIMD tier found at runtime.
#[derive(Debug, Clone, Copy)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        Shape::new(m, k).check_len("matmul lhs", a.len())?;
        Shape::new(k, n).check_len("matmul rhs", b.len())?;
        trace!(m, k, n, simd = simd::SimdCapability::detect().best_tier(), "cpu matmul");
        Ok(matmul::matmul(a, b, m, k, n))
    }

    fn transpose(&self, a: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>> {
        Shape::new(rows, cols).check_len("transpose", a.len())?;
        Ok(matmul::transpose(a, rows, cols))
    }

    fn add_bias(&self, x: &[f32], bias: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>> {
        let shape = Shape::new(rows, cols);
        shape.check_len("add_bias", x.len())?;
        shape.check_bias(bias.len())?;
        let mut out = x.to_vec();
        bias::add_bias_inplace(&mut out, bias);
        Ok(out)
    }

    fn softmax(&self, x: &[f32], cols: usize) -> Result<Vec<f32>> {
        if cols == 0 {
            return Err(TensorError::invalid_dimension(
                "softmax",
                "row length must be > 0",
            ));
        }
        if x.len() % cols != 0 {
            return Err(TensorError::invalid_dimension(
                "softmax",
                format!("x.len()={} is not a multiple of cols={}", x.len(), cols),
            ));
        }
        let mut out = x.to_vec();
        bias::softmax_rows_inplace(&mut out, cols);
        Ok(out)
    }

    fn sigmoid(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(x.iter().map(|&v| bias::sigmoid(v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Activation;
    use approx::assert_relative_eq;

    const CPU: CpuBackend = CpuBackend;

    #[test]
    fn test_product_of_two_by_two() {
        let c = CPU
            .matmul(&[1.0, 2.0, 3.0, 4.0], &[5.0, 6.0, 7.0, 8.0], 2, 2, 2)
            .unwrap();
        assert_eq!(c, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_rectangular_product() {
        // (1x3) @ (3x2)
        let c = CPU
            .matmul(&[1.0, -1.0, 2.0], &[1.0, 0.0, 0.0, 1.0, 3.0, 3.0], 1, 3, 2)
            .unwrap();
        assert_eq!(c, vec![7.0, 5.0]);
    }

    #[test]
    fn test_operand_length_checked() {
        let err = CPU.matmul(&[1.0; 6], &[1.0; 4], 2, 3, 2).unwrap_err();
        assert!(err.is_invalid_dimension());
        assert!(CPU.transpose(&[1.0; 5], 2, 3).is_err());
    }

    #[test]
    fn test_add_bias_shape_checked() {
        assert!(CPU.add_bias(&[1.0, 2.0], &[1.0], 1, 2).is_err());
        assert_eq!(
            CPU.add_bias(&[2.0, 2.0], &[1.0, -1.0], 1, 2).unwrap(),
            vec![3.0, 1.0]
        );
    }

    #[test]
    fn test_softmax_rows_independent() {
        let r = CPU.softmax(&[1.0, 2.0, 3.0, 0.0, 0.0, 0.0], 3).unwrap();
        assert_relative_eq!(r[..3].iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        assert!(r[0] < r[1] && r[1] < r[2]);
        for v in &r[3..] {
            assert_relative_eq!(*v, 1.0 / 3.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_softmax_rejects_partial_row() {
        assert!(CPU.softmax(&[1.0, 2.0, 3.0], 2).is_err());
        assert!(CPU.softmax(&[1.0], 0).is_err());
    }

    #[test]
    fn test_linear_identity_is_matmul_plus_bias() {
        let out = CPU
            .linear(
                &[1.0, 2.0, 3.0, 4.0],
                &[5.0, 6.0, 7.0, 8.0],
                &[1.0, -1.0],
                (2, 2, 2),
                Activation::Identity,
            )
            .unwrap();
        assert_eq!(out, vec![20.0, 21.0, 44.0, 49.0]);
    }

    #[test]
    fn test_linear_sigmoid_at_zero() {
        let out = CPU
            .linear(&[0.0], &[1.0], &[0.0], (1, 1, 1), Activation::Sigmoid)
            .unwrap();
        assert_relative_eq!(out[0], 0.5);
    }
}
