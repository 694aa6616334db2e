//! Fused linear + bias + softmax on f16 operands.
//!
//! One block owns a band of `FRAG_M` input rows. Each warp walks a subset of
//! the `n / FRAG_N` output column tiles, accumulating `FRAG_K`-deep fragment
//! products in f32, and stores its tiles into block shared memory. After the
//! barrier the warps add the bias and normalize the rows in place, and only
//! the final probabilities are written to device memory.

use half::f16;

use crate::error::DeviceError;
use crate::launch::{BlockIdx, Dim3, Kernel, LaunchConfig};
use crate::memory::{BufferId, DeviceBuffer, DeviceSlice};

use super::mma::{mma_sync, Accumulator, FragmentA, FragmentB, FRAG_K, FRAG_M, FRAG_N};
use super::reduce::{warp_reduce, WARP_SIZE};
use super::{check_len, MatmulDims};

/// Upper bound on warps per block.
pub const MAX_WARPS: usize = 8;

/// Per-warp f16 staging tiles for the left operand, zero-padded past `m`.
const STAGE_BYTES: usize = MAX_WARPS * FRAG_M * FRAG_K * std::mem::size_of::<f16>();

/// softmax(x @ w + bias) with x [m, k], w [k, n], bias [n], all f16.
#[derive(Debug)]
pub struct FusedLinearSoftmax {
    x: DeviceSlice<f16>,
    w: DeviceSlice<f16>,
    bias: DeviceSlice<f16>,
    dims: MatmulDims,
}

impl FusedLinearSoftmax {
    pub const NAME: &'static str = "fused_linear_softmax";

    /// Whether `k` and `n` fit the fragment shape.
    pub fn is_aligned(k: usize, n: usize) -> bool {
        k > 0 && n > 0 && k % FRAG_K == 0 && n % FRAG_N == 0
    }

    /// Shared memory for one block: a `FRAG_M` x `n` f32 band of logits plus
    /// the operand staging tiles. With 48 KiB per block this caps `n` at 704.
    pub fn shared_mem_bytes(n: usize) -> usize {
        FRAG_M * n * std::mem::size_of::<f32>() + STAGE_BYTES
    }

    /// Whether a row band of width `n` fits in `limit` bytes of shared memory.
    pub fn fits_shared_mem(n: usize, limit: usize) -> bool {
        Self::shared_mem_bytes(n) <= limit
    }

    pub fn new(
        x: &DeviceBuffer<f16>,
        w: &DeviceBuffer<f16>,
        bias: &DeviceBuffer<f16>,
        dims: MatmulDims,
    ) -> Result<Self, DeviceError> {
        if !Self::is_aligned(dims.k, dims.n) {
            return Err(DeviceError::Kernel {
                kernel: Self::NAME,
                reason: format!(
                    "k={} and n={} must be non-zero multiples of {}",
                    dims.k, dims.n, FRAG_K
                ),
            });
        }
        check_len(Self::NAME, "input", x.len(), dims.m * dims.k)?;
        check_len(Self::NAME, "weights", w.len(), dims.k * dims.n)?;
        check_len(Self::NAME, "bias", bias.len(), dims.n)?;
        Ok(FusedLinearSoftmax {
            x: x.slice(),
            w: w.slice(),
            bias: bias.slice(),
            dims,
        })
    }

    /// One block per `FRAG_M` rows, up to `MAX_WARPS` warps.
    pub fn launch_config(dims: MatmulDims) -> LaunchConfig {
        let warps = (dims.n / FRAG_N).clamp(1, MAX_WARPS);
        LaunchConfig {
            grid_dim: Dim3::new(1, dims.m.div_ceil(FRAG_M) as u32, 1),
            block_dim: Dim3::new((warps * WARP_SIZE) as u32, 1, 1),
            shared_mem_bytes: Self::shared_mem_bytes(dims.n) as u32,
        }
    }

    fn block(
        &self,
        blk: BlockIdx,
        warps: usize,
        x: &[f16],
        w: &[f16],
        bias: &[f16],
        band: &mut [f32],
    ) {
        let MatmulDims { m, k, n } = self.dims;
        let row0 = blk.y * FRAG_M;
        let rows_valid = FRAG_M.min(m - row0);
        let mut logits = vec![0.0f32; FRAG_M * n];

        for warp in 0..warps {
            for tile in (warp..n / FRAG_N).step_by(warps) {
                let col0 = tile * FRAG_N;
                let mut acc = Accumulator::zero();
                for k0 in (0..k).step_by(FRAG_K) {
                    let a = FragmentA::load(x, k, m, row0, k0);
                    let b = FragmentB::load(w, n, k0, col0);
                    mma_sync(&mut acc, &a, &b);
                }
                acc.store(&mut logits[col0..], n);
            }
        }
        // barrier

        for r in 0..rows_valid {
            let row = &mut logits[r * n..(r + 1) * n];
            for (v, b) in row.iter_mut().zip(bias) {
                *v += b.to_f32();
            }
            softmax_warp(row);
            band[r * n..(r + 1) * n].copy_from_slice(row);
        }
    }
}

/// Softmax of one row by a single warp: lanes stride over the row and
/// combine partial results with butterfly reductions. Non-finite maxima
/// follow the same rules as the row softmax kernel.
fn softmax_warp(row: &mut [f32]) {
    let mut lanes = [f32::NEG_INFINITY; WARP_SIZE];
    for (lane, slot) in lanes.iter_mut().enumerate() {
        *slot = row
            .iter()
            .skip(lane)
            .step_by(WARP_SIZE)
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
    }
    let row_max = warp_reduce(&mut lanes, f32::max);
    if row_max == f32::NEG_INFINITY {
        let uniform = 1.0 / row.len() as f32;
        row.iter_mut().for_each(|v| *v = uniform);
        return;
    }
    if row_max == f32::INFINITY {
        for (lane, slot) in lanes.iter_mut().enumerate() {
            *slot = row
                .iter()
                .skip(lane)
                .step_by(WARP_SIZE)
                .filter(|v| **v == f32::INFINITY)
                .count() as f32;
        }
        let share = 1.0 / warp_reduce(&mut lanes, |a, b| a + b);
        row.iter_mut()
            .for_each(|v| *v = if *v == f32::INFINITY { share } else { 0.0 });
        return;
    }

    for (lane, slot) in lanes.iter_mut().enumerate() {
        let mut local = 0.0f32;
        for v in row.iter_mut().skip(lane).step_by(WARP_SIZE) {
            *v = (*v - row_max).exp();
            local += *v;
        }
        *slot = local;
    }
    let inv = 1.0 / warp_reduce(&mut lanes, |a, b| a + b);
    row.iter_mut().for_each(|v| *v *= inv);
}

impl Kernel for FusedLinearSoftmax {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn reads(&self) -> Vec<BufferId> {
        vec![self.x.id(), self.w.id(), self.bias.id()]
    }

    fn execute(&self, cfg: &LaunchConfig, out: &mut [f32]) -> Result<(), DeviceError> {
        let MatmulDims { m, n, .. } = self.dims;
        check_len(Self::NAME, "output", out.len(), m * n)?;
        let warps = (cfg.threads_per_block() / WARP_SIZE).max(1);
        let (x_mem, w_mem, bias_mem) = (self.x.read(), self.w.read(), self.bias.read());
        let (x, w, bias): (&[f16], &[f16], &[f16]) = (&x_mem, &w_mem, &bias_mem);
        cfg.for_each_band(Self::NAME, FRAG_M * n, out, |blk, band| {
            self.block(blk, warps, x, w, bias, band)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use approx::assert_relative_eq;
    use lk_tensor::{Activation, ComputeBackend, CpuBackend, DType};

    fn to_half(v: &[f32]) -> Vec<f16> {
        v.iter().map(|&x| f16::from_f32(x)).collect()
    }

    fn run(x: &[f32], w: &[f32], bias: &[f32], dims: MatmulDims) -> Vec<f32> {
        let dev = Device::new(0);
        let dx = dev.alloc_zeros::<f16>(x.len()).unwrap();
        let dw = dev.alloc_zeros::<f16>(w.len()).unwrap();
        let db = dev.alloc_zeros::<f16>(bias.len()).unwrap();
        let out = dev.alloc_zeros::<f32>(dims.m * dims.n).unwrap();
        let stream = dev.create_stream().unwrap();
        stream.memcpy_htod(&to_half(x), &dx).unwrap();
        stream.memcpy_htod(&to_half(w), &dw).unwrap();
        stream.memcpy_htod(&to_half(bias), &db).unwrap();
        let kernel = FusedLinearSoftmax::new(&dx, &dw, &db, dims).unwrap();
        stream
            .launch(kernel, FusedLinearSoftmax::launch_config(dims), &out)
            .unwrap();
        stream.memcpy_dtoh(&out).wait().unwrap()
    }

    #[test]
    fn test_matches_cpu_reference() {
        // m = 21 is not a multiple of 16: the second block is partial.
        let dims = MatmulDims::new(21, 32, 48);
        let x: Vec<f32> = (0..dims.m * dims.k)
            .map(|i| ((i * 37) % 101) as f32 / 101.0 - 0.5)
            .collect();
        let w: Vec<f32> = (0..dims.k * dims.n)
            .map(|i| ((i * 53) % 97) as f32 / 97.0 - 0.5)
            .collect();
        let bias: Vec<f32> = (0..dims.n).map(|j| (j % 5) as f32 * 0.1).collect();

        let got = run(&x, &w, &bias, dims);
        // Reference on the same f16-rounded operands.
        let rounded = |v: &[f32]| -> Vec<f32> { to_half(v).iter().map(|h| h.to_f32()).collect() };
        let want = CpuBackend::new()
            .linear(
                &rounded(&x),
                &rounded(&w),
                &rounded(&bias),
                (dims.m, dims.k, dims.n),
                Activation::Softmax,
            )
            .unwrap();
        let tol = DType::F16.tolerance();
        for (g, r) in got.iter().zip(&want) {
            assert!((g - r).abs() <= tol * r.abs().max(1.0 / dims.n as f32), "{} vs {}", g, r);
        }
        for row in got.chunks(dims.n) {
            assert_relative_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_unaligned_rejected() {
        let dev = Device::new(0);
        let dims = MatmulDims::new(2, 10, 16);
        let dx = dev.alloc_zeros::<f16>(20).unwrap();
        let dw = dev.alloc_zeros::<f16>(160).unwrap();
        let db = dev.alloc_zeros::<f16>(16).unwrap();
        assert!(FusedLinearSoftmax::new(&dx, &dw, &db, dims).is_err());
        assert!(!FusedLinearSoftmax::is_aligned(10, 16));
        assert!(FusedLinearSoftmax::is_aligned(32, 64));
    }

    #[test]
    fn test_launch_shape() {
        let cfg = FusedLinearSoftmax::launch_config(MatmulDims::new(40, 16, 256));
        assert_eq!(cfg.grid_dim, Dim3::new(1, 3, 1));
        assert_eq!(cfg.block_dim, Dim3::new(256, 1, 1));
        assert_eq!(cfg.shared_mem_bytes, 16 * 256 * 4 + 4096);
    }

    #[test]
    fn test_shared_memory_ceiling() {
        let limit = 48 * 1024;
        assert!(FusedLinearSoftmax::fits_shared_mem(704, limit));
        assert!(!FusedLinearSoftmax::fits_shared_mem(720, limit));
        assert!(!FusedLinearSoftmax::fits_shared_mem(768, limit));
    }

    #[test]
    fn test_softmax_warp_non_finite_rows() {
        let mut row = vec![0.0f32; 48];
        row[3] = f32::INFINITY;
        row[40] = f32::INFINITY;
        row[7] = f32::NEG_INFINITY;
        softmax_warp(&mut row);
        assert_eq!(row[3], 0.5);
        assert_eq!(row[40], 0.5);
        assert_eq!(row.iter().sum::<f32>(), 1.0);

        let mut row = vec![f32::NEG_INFINITY; 16];
        softmax_warp(&mut row);
        assert!(row.iter().all(|v| *v == 1.0 / 16.0));
    }
}
