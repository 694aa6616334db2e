//! Device kernels.

pub mod elementwise;
pub mod fused;
pub mod matmul;
pub mod mma;
pub mod reduce;
pub mod softmax;

pub use elementwise::{BiasAdd, Sigmoid};
pub use fused::FusedLinearSoftmax;
pub use matmul::TiledMatmul;
pub use softmax::RowSoftmax;

use crate::error::DeviceError;

/// Problem size of C[m, n] = A[m, k] @ B[k, n].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulDims {
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

impl MatmulDims {
    pub fn new(m: usize, k: usize, n: usize) -> Self {
        MatmulDims { m, k, n }
    }
}

/// Fail a kernel construction when a captured buffer has the wrong length.
pub(crate) fn check_len(
    kernel: &'static str,
    what: &str,
    len: usize,
    expected: usize,
) -> Result<(), DeviceError> {
    if len != expected {
        return Err(DeviceError::Kernel {
            kernel,
            reason: format!("{} holds {} elements, expected {}", what, len, expected),
        });
    }
    Ok(())
}
