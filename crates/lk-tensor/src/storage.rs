use half::f16;

use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// Flat, row-major element buffer of a host matrix.
///
/// The precision is fixed at construction. Reading a buffer as the other
/// precision is an error; conversion lives in [`crate::precision`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostStorage {
    Full(Vec<f32>),
    Half(Vec<f16>),
}

impl HostStorage {
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::F32 => HostStorage::Full(vec![0.0; len]),
            DType::F16 => HostStorage::Half(vec![f16::ZERO; len]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            HostStorage::Full(_) => DType::F32,
            HostStorage::Half(_) => DType::F16,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            HostStorage::Full(data) => data.len(),
            HostStorage::Half(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes occupied by the elements.
    pub fn size_in_bytes(&self) -> usize {
        self.dtype().size_in_bytes() * self.len()
    }

    /// # Errors
    /// [`TensorError::DTypeMismatch`] unless the buffer is f32.
    pub fn as_f32(&self) -> Result<&[f32]> {
        match self {
            HostStorage::Full(data) => Ok(data.as_slice()),
            HostStorage::Half(_) => Err(self.mismatch(DType::F32)),
        }
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        match self {
            HostStorage::Full(data) => Ok(data.as_mut_slice()),
            HostStorage::Half(_) => Err(self.mismatch(DType::F32)),
        }
    }

    /// # Errors
    /// [`TensorError::DTypeMismatch`] unless the buffer is f16.
    pub fn as_f16(&self) -> Result<&[f16]> {
        match self {
            HostStorage::Half(data) => Ok(data.as_slice()),
            HostStorage::Full(_) => Err(self.mismatch(DType::F16)),
        }
    }

    fn mismatch(&self, wanted: DType) -> TensorError {
        TensorError::DTypeMismatch {
            expected: wanted.to_string(),
            got: self.dtype().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_precision_buffer() {
        let buf = HostStorage::Full(vec![0.5, -0.5, 8.0]);
        assert_eq!(buf.dtype(), DType::F32);
        assert_eq!(buf.size_in_bytes(), 12);
        assert_eq!(buf.as_f32().unwrap()[2], 8.0);
        assert_eq!(
            buf.as_f16().unwrap_err(),
            TensorError::DTypeMismatch {
                expected: "f16".to_string(),
                got: "f32".to_string(),
            }
        );
    }

    #[test]
    fn test_half_buffer_is_not_widened() {
        let mut buf = HostStorage::zeros(DType::F16, 5);
        assert_eq!(buf.size_in_bytes(), 10);
        assert!(buf.as_f32().is_err());
        assert!(buf.as_f32_mut().is_err());
        assert_eq!(buf.as_f16().unwrap(), &[f16::ZERO; 5]);
    }

    #[test]
    fn test_write_through_mut() {
        let mut buf = HostStorage::zeros(DType::F32, 2);
        buf.as_f32_mut().unwrap()[1] = 3.0;
        assert_eq!(buf.as_f32().unwrap(), &[0.0, 3.0]);
        assert!(HostStorage::zeros(DType::F32, 0).is_empty());
    }
}
