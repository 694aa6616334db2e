use lk_tensor::{ComputeBackend, CpuBackend, Matrix, Result, TensorError};

/// Gradient of softmax + cross-entropy with respect to the logits:
/// `output - target`.
pub fn compute_gradient(output: &Matrix, target: &Matrix) -> Result<Matrix> {
    if output.shape() != target.shape() {
        return Err(TensorError::invalid_dimension(
            "compute_gradient",
            format!("output {} but target {}", output.shape(), target.shape()),
        ));
    }
    let data = output
        .as_f32()?
        .iter()
        .zip(target.as_f32()?)
        .map(|(o, t)| o - t)
        .collect();
    Matrix::from_vec(data, output.rows(), output.cols())
}

/// Weight update for a linear layer, averaged over the batch:
/// `-learning_rate * input^T @ gradient / batch`.
///
/// `input` is [batch, k], `gradient` is [batch, n]; the delta is [k, n].
pub fn compute_weight_delta(
    input: &Matrix,
    gradient: &Matrix,
    learning_rate: f32,
) -> Result<Matrix> {
    let batch = input.rows();
    if gradient.rows() != batch {
        return Err(TensorError::invalid_dimension(
            "compute_weight_delta",
            format!(
                "input has {} rows but gradient has {}",
                batch,
                gradient.rows()
            ),
        ));
    }
    if batch == 0 {
        return Err(TensorError::invalid_dimension(
            "compute_weight_delta",
            "empty batch",
        ));
    }
    let cpu = CpuBackend::new();
    let input_t = input.transpose(&cpu)?;
    let (k, n) = (input.cols(), gradient.cols());
    let mut delta = cpu.matmul(input_t.as_f32()?, gradient.as_f32()?, k, batch, n)?;
    let scale = -learning_rate / batch as f32;
    delta.iter_mut().for_each(|v| *v *= scale);
    Matrix::from_vec(delta, k, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gradient() {
        let out = Matrix::from_rows(&[vec![0.7, 0.3]]).unwrap();
        let target = Matrix::from_rows(&[vec![1.0, 0.0]]).unwrap();
        let g = compute_gradient(&out, &target).unwrap();
        let g = g.as_f32().unwrap();
        assert_relative_eq!(g[0], -0.3, epsilon = 1e-6);
        assert_relative_eq!(g[1], 0.3, epsilon = 1e-6);
    }

    #[test]
    fn test_weight_delta() {
        // Two samples, k = 2, n = 1.
        let input = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let grad = Matrix::from_rows(&[vec![0.5], vec![-1.0]]).unwrap();
        let delta = compute_weight_delta(&input, &grad, 0.1).unwrap();
        // input^T @ grad = [1*0.5 + 3*-1, 2*0.5 + 4*-1] = [-2.5, -3.0]
        assert_eq!(delta.shape().rows(), 2);
        assert_eq!(delta.shape().cols(), 1);
        let d = delta.as_f32().unwrap();
        assert_relative_eq!(d[0], 0.125, epsilon = 1e-6);
        assert_relative_eq!(d[1], 0.15, epsilon = 1e-6);
    }

    #[test]
    fn test_weight_delta_batch_mismatch() {
        let input = Matrix::from_rows(&[vec![1.0, 2.0]]).unwrap();
        let grad = Matrix::from_rows(&[vec![0.5], vec![-1.0]]).unwrap();
        assert!(compute_weight_delta(&input, &grad, 0.1)
            .unwrap_err()
            .is_invalid_dimension());
    }
}
