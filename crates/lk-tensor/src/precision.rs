//! Explicit precision conversions.
//!
//! Narrowing from f32 to f16 only happens through [`narrow_to_f16`] (or the
//! [`Matrix::to_f16`] wrapper). The rounding rule is IEEE 754
//! round-to-nearest, ties-to-even, as implemented by `half::f16::from_f32`.

use half::f16;

use crate::error::{Result, TensorError};
use crate::matrix::Matrix;

/// Narrow a flat f32 buffer to f16, rounding to nearest even.
///
/// # Errors
/// Returns [`TensorError::PrecisionOverflow`] for the first finite element
/// whose magnitude exceeds `f16::MAX` (65504), since it would silently
/// become infinite. Non-finite inputs convert to their f16 counterparts.
pub fn narrow_to_f16(data: &[f32]) -> Result<Vec<f16>> {
    let limit = f16::MAX.to_f32();
    data.iter()
        .enumerate()
        .map(|(index, &value)| {
            if value.is_finite() && value.abs() > limit {
                let rounded = f16::from_f32(value);
                if rounded.is_infinite() {
                    return Err(TensorError::PrecisionOverflow { index, value });
                }
                return Ok(rounded);
            }
            Ok(f16::from_f32(value))
        })
        .collect()
}

/// Widen a flat f16 buffer to f32. Exact.
pub fn widen_to_f32(data: &[f16]) -> Vec<f32> {
    data.iter().map(|v| v.to_f32()).collect()
}

/// Convert a full-precision matrix into its flattened reduced-precision
/// representation, ready for the fused mixed-precision path.
pub fn to_half(matrix: &Matrix) -> Result<Matrix> {
    matrix.to_f16()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_exact_values() {
        let h = narrow_to_f16(&[0.0, 1.0, -2.5, 0.5]).unwrap();
        assert_eq!(widen_to_f32(&h), vec![0.0, 1.0, -2.5, 0.5]);
    }

    #[test]
    fn test_narrow_rounds_to_nearest_even() {
        // 1 + 2^-11 is exactly halfway between 1.0 and 1 + 2^-10 in f16.
        let halfway = 1.0 + 2f32.powi(-11);
        let h = narrow_to_f16(&[halfway]).unwrap();
        assert_eq!(h[0].to_f32(), 1.0);
    }

    #[test]
    fn test_narrow_overflow() {
        let err = narrow_to_f16(&[1.0, 70000.0]).unwrap_err();
        assert_eq!(
            err,
            TensorError::PrecisionOverflow {
                index: 1,
                value: 70000.0
            }
        );
    }

    #[test]
    fn test_narrow_max_ok() {
        // Just above f16::MAX still rounds down to it.
        let h = narrow_to_f16(&[65510.0]).unwrap();
        assert_eq!(h[0], f16::MAX);
    }

    #[test]
    fn test_non_finite_passthrough() {
        let h = narrow_to_f16(&[f32::INFINITY]).unwrap();
        assert!(h[0].is_infinite());
    }
}
