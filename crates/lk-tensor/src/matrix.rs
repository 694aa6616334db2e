use half::f16;

use crate::backend::ComputeBackend;
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::precision;
use crate::shape::Shape;
use crate::storage::HostStorage;

/// A 2-D matrix in host memory.
///
/// Holds contiguous, row-major data with an associated shape. The storage is
/// either full precision (f32) or reduced precision (f16); converting between
/// the two is always an explicit call.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    storage: HostStorage,
    shape: Shape,
}

impl Matrix {
    /// Create a matrix from row-major f32 data.
    pub fn from_vec(data: Vec<f32>, rows: usize, cols: usize) -> Result<Self> {
        let shape = Shape::new(rows, cols);
        shape.check_len("matrix", data.len())?;
        Ok(Matrix {
            storage: HostStorage::Full(data),
            shape,
        })
    }

    /// Create a reduced-precision matrix from row-major f16 data.
    pub fn from_f16_vec(data: Vec<f16>, rows: usize, cols: usize) -> Result<Self> {
        let shape = Shape::new(rows, cols);
        shape.check_len("matrix", data.len())?;
        Ok(Matrix {
            storage: HostStorage::Half(data),
            shape,
        })
    }

    /// Flatten nested rows into a matrix.
    ///
    /// The outer length is the row count, the inner length the column count.
    /// Ragged input is rejected.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(TensorError::invalid_dimension(
                    "from_rows",
                    format!("row {} has {} columns, expected {}", i, row.len(), cols),
                ));
            }
            data.extend_from_slice(row);
        }
        Matrix::from_vec(data, rows.len(), cols)
    }

    /// Create a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize, dtype: DType) -> Self {
        let shape = Shape::new(rows, cols);
        Matrix {
            storage: HostStorage::zeros(dtype, shape.numel()),
            shape,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn rows(&self) -> usize {
        self.shape.rows()
    }

    pub fn cols(&self) -> usize {
        self.shape.cols()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// The flat row-major f32 data. Fails for f16 matrices.
    pub fn as_f32(&self) -> Result<&[f32]> {
        self.storage.as_f32()
    }

    pub fn as_f32_mut(&mut self) -> Result<&mut [f32]> {
        self.storage.as_f32_mut()
    }

    /// The flat row-major f16 data. Fails for f32 matrices.
    pub fn as_f16(&self) -> Result<&[f16]> {
        self.storage.as_f16()
    }

    /// Backing buffer.
    pub fn storage(&self) -> &HostStorage {
        &self.storage
    }

    /// Reassemble into nested rows.
    pub fn to_rows(&self) -> Result<Vec<Vec<f32>>> {
        let cols = self.cols();
        let data = self.as_f32()?;
        if cols == 0 {
            return Ok(vec![Vec::new(); self.rows()]);
        }
        Ok(data.chunks(cols).map(|row| row.to_vec()).collect())
    }

    /// Narrow to reduced precision, rounding to nearest even.
    ///
    /// # Errors
    /// [`TensorError::PrecisionOverflow`] if a finite element exceeds the f16
    /// range; [`TensorError::DTypeMismatch`] if already f16.
    pub fn to_f16(&self) -> Result<Matrix> {
        let data = precision::narrow_to_f16(self.as_f32()?)?;
        Matrix::from_f16_vec(data, self.rows(), self.cols())
    }

    /// Widen a reduced-precision matrix back to f32. Exact.
    pub fn to_f32(&self) -> Result<Matrix> {
        let data = precision::widen_to_f32(self.as_f16()?);
        Matrix::from_vec(data, self.rows(), self.cols())
    }

    /// Matrix multiplication using the given backend.
    ///
    /// `[m x k] @ [k x n]` gives `[m x n]`.
    pub fn matmul(&self, other: &Matrix, backend: &dyn ComputeBackend) -> Result<Matrix> {
        let out = self.shape.matmul_output(&other.shape)?;
        let data = backend.matmul(
            self.as_f32()?,
            other.as_f32()?,
            self.rows(),
            self.cols(),
            other.cols(),
        )?;
        Matrix::from_vec(data, out.rows(), out.cols())
    }

    /// Transposed copy using the given backend.
    pub fn transpose(&self, backend: &dyn ComputeBackend) -> Result<Matrix> {
        let data = backend.transpose(self.as_f32()?, self.rows(), self.cols())?;
        Matrix::from_vec(data, self.cols(), self.rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuBackend;

    #[test]
    fn test_from_vec() {
        let m = Matrix::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 3);
        assert_eq!(m.dtype(), DType::F32);
        assert_eq!(m.as_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_from_vec_len_mismatch() {
        assert!(Matrix::from_vec(vec![1.0, 2.0], 2, 3).is_err());
    }

    #[test]
    fn test_rows_roundtrip() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]];
        let m = Matrix::from_rows(&rows).unwrap();
        assert_eq!(m.shape(), Shape::new(3, 2));
        assert_eq!(m.to_rows().unwrap(), rows);
    }

    #[test]
    fn test_from_rows_ragged() {
        let err = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(err.is_invalid_dimension());
    }

    #[test]
    fn test_precision_conversion() {
        let m = Matrix::from_vec(vec![0.5, -1.0, 2.0, 3.25], 2, 2).unwrap();
        let h = m.to_f16().unwrap();
        assert_eq!(h.dtype(), DType::F16);
        assert!(h.as_f32().is_err());
        assert_eq!(h.to_f32().unwrap(), m);
    }

    #[test]
    fn test_matmul_through_cpu() {
        let cpu = CpuBackend;
        let a = Matrix::from_vec(vec![1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        let b = Matrix::from_vec(vec![5.0, 6.0, 7.0, 8.0], 2, 2).unwrap();
        let c = a.matmul(&b, &cpu).unwrap();
        assert_eq!(c.shape(), Shape::new(2, 2));
        assert_eq!(c.as_f32().unwrap(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_inner_extent_mismatch() {
        let cpu = CpuBackend;
        let a = Matrix::from_vec(vec![1.0; 6], 2, 3).unwrap();
        let b = Matrix::from_vec(vec![1.0; 4], 2, 2).unwrap();
        assert!(a.matmul(&b, &cpu).unwrap_err().is_invalid_dimension());
    }

    #[test]
    fn test_transpose() {
        let cpu = CpuBackend;
        let a = Matrix::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3).unwrap();
        let t = a.transpose(&cpu).unwrap();
        assert_eq!(t.shape(), Shape::new(3, 2));
        assert_eq!(t.as_f32().unwrap(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
