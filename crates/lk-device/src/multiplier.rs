use std::fmt::Debug;

use crate::blas::BlasContext;
use crate::error::DeviceError;
use crate::kernels::{MatmulDims, TiledMatmul};
use crate::memory::DeviceBuffer;
use crate::stream::Stream;

/// The matrix-multiply step of a linear layer.
///
/// Implementations queue `c = a @ b` on `stream`; everything else in the
/// layer (transfers, bias, activation) is shared between them.
pub trait MatrixMultiplier: Debug {
    /// Strategy name, used in logs.
    fn name(&self) -> &'static str;

    fn matmul(
        &mut self,
        stream: &Stream,
        a: &DeviceBuffer<f32>,
        b: &DeviceBuffer<f32>,
        c: &DeviceBuffer<f32>,
        dims: MatmulDims,
    ) -> Result<(), DeviceError>;
}

/// Multiplies with the shared-memory tiled kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiledMultiplier;

impl MatrixMultiplier for TiledMultiplier {
    fn name(&self) -> &'static str {
        "tiled"
    }

    fn matmul(
        &mut self,
        stream: &Stream,
        a: &DeviceBuffer<f32>,
        b: &DeviceBuffer<f32>,
        c: &DeviceBuffer<f32>,
        dims: MatmulDims,
    ) -> Result<(), DeviceError> {
        let kernel = TiledMatmul::new(a, b, dims)?;
        stream.launch(kernel, TiledMatmul::launch_config(dims), c)
    }
}

/// Delegates to a caller-owned [`BlasContext`].
#[derive(Debug)]
pub struct VendorMultiplier<'a> {
    ctx: &'a mut BlasContext,
}

impl<'a> VendorMultiplier<'a> {
    pub fn new(ctx: &'a mut BlasContext) -> Self {
        VendorMultiplier { ctx }
    }
}

impl MatrixMultiplier for VendorMultiplier<'_> {
    fn name(&self) -> &'static str {
        "vendor"
    }

    fn matmul(
        &mut self,
        stream: &Stream,
        a: &DeviceBuffer<f32>,
        b: &DeviceBuffer<f32>,
        c: &DeviceBuffer<f32>,
        dims: MatmulDims,
    ) -> Result<(), DeviceError> {
        self.ctx.sgemm(stream, a, b, c, dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;

    fn multiply(mm: &mut dyn MatrixMultiplier) -> Vec<f32> {
        let dev = Device::new(0);
        let dims = MatmulDims::new(2, 2, 2);
        let a = dev.alloc_zeros::<f32>(4).unwrap();
        let b = dev.alloc_zeros::<f32>(4).unwrap();
        let c = dev.alloc_zeros::<f32>(4).unwrap();
        let stream = dev.create_stream().unwrap();
        stream.memcpy_htod(&[1.0, 2.0, 3.0, 4.0], &a).unwrap();
        stream.memcpy_htod(&[5.0, 6.0, 7.0, 8.0], &b).unwrap();
        mm.matmul(&stream, &a, &b, &c, dims).unwrap();
        stream.memcpy_dtoh(&c).wait().unwrap()
    }

    #[test]
    fn test_strategies_agree() {
        let mut ctx = BlasContext::with_threads(1).unwrap();
        let tiled = multiply(&mut TiledMultiplier);
        let vendor = multiply(&mut VendorMultiplier::new(&mut ctx));
        assert_eq!(tiled, vec![19.0, 22.0, 43.0, 50.0]);
        assert_eq!(tiled, vendor);
        assert_eq!(ctx.calls(), 1);
    }
}
