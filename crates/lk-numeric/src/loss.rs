use lk_tensor::{DType, Matrix, Result, TensorError};

/// Probabilities are clamped to this before taking the log.
pub const MIN_PROBABILITY: f32 = 1e-12;

/// Cross-entropy of one prediction against one target distribution:
/// `-sum(target * ln(max(pred, MIN_PROBABILITY)))`.
pub fn cross_entropy(pred: &[f32], target: &[f32]) -> Result<f32> {
    if pred.len() != target.len() {
        return Err(TensorError::invalid_dimension(
            "cross_entropy",
            format!("prediction has {} classes, target {}", pred.len(), target.len()),
        ));
    }
    Ok(-pred
        .iter()
        .zip(target)
        .map(|(&p, &t)| t * p.max(MIN_PROBABILITY).ln())
        .sum::<f32>())
}

/// Mean cross-entropy over the rows of a batch.
pub fn cross_entropy_batch(pred: &Matrix, target: &Matrix) -> Result<f32> {
    if pred.shape() != target.shape() {
        return Err(TensorError::invalid_dimension(
            "cross_entropy_batch",
            format!("prediction {} but target {}", pred.shape(), target.shape()),
        ));
    }
    if pred.rows() == 0 || pred.cols() == 0 {
        return Err(TensorError::invalid_dimension(
            "cross_entropy_batch",
            "empty batch",
        ));
    }
    let cols = pred.cols();
    let mut total = 0.0f32;
    for (p, t) in pred
        .as_f32()?
        .chunks(cols)
        .zip(target.as_f32()?.chunks(cols))
    {
        total += cross_entropy(p, t)?;
    }
    Ok(total / pred.rows() as f32)
}

/// Encode class labels as rows of a `labels.len()` x `classes` matrix.
pub fn one_hot(labels: &[usize], classes: usize) -> Result<Matrix> {
    let mut out = Matrix::zeros(labels.len(), classes, DType::F32);
    let data = out.as_f32_mut()?;
    for (row, &label) in labels.iter().enumerate() {
        if label >= classes {
            return Err(TensorError::invalid_dimension(
                "one_hot",
                format!("label {} at row {} but only {} classes", label, row, classes),
            ));
        }
        data[row * classes + label] = 1.0;
    }
    Ok(out)
}
