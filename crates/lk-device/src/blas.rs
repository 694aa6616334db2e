//! Vendor-style BLAS handle.
//!
//! A `BlasContext` stands in for a library handle such as a cuBLAS context:
//! the application creates it, hands it to every call that should use the
//! vendor routine, and destroys it when done. Nothing in this crate creates
//! one implicitly. Routines are queued on the caller's stream and run on the
//! context's own worker pool.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::error::DeviceError;
use crate::kernels::{check_len, MatmulDims};
use crate::memory::DeviceBuffer;
use crate::stream::Stream;

/// Cache blocking for the gemm inner loops.
const TILE_M: usize = 64;
const TILE_N: usize = 64;
const TILE_K: usize = 64;

const SGEMM: &str = "sgemm";

/// Handle to the vendor linear-algebra library.
///
/// Borrowed mutably by every routine, so one context never serves two
/// calls at once.
#[derive(Debug)]
pub struct BlasContext {
    pool: Arc<ThreadPool>,
    calls: usize,
}

impl BlasContext {
    /// Create a context with one worker per available core.
    pub fn new() -> Result<Self, DeviceError> {
        Self::with_threads(0)
    }

    /// Create a context with `threads` workers (0 picks the core count).
    pub fn with_threads(threads: usize) -> Result<Self, DeviceError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("lk-blas-{}", i))
            .build()
            .map_err(|e| DeviceError::Vendor(e.to_string()))?;
        debug!(threads = pool.current_num_threads(), "blas context created");
        Ok(BlasContext {
            pool: Arc::new(pool),
            calls: 0,
        })
    }

    /// Routines issued through this context so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Queue `c = a @ b` on `stream`.
    pub fn sgemm(
        &mut self,
        stream: &Stream,
        a: &DeviceBuffer<f32>,
        b: &DeviceBuffer<f32>,
        c: &DeviceBuffer<f32>,
        dims: MatmulDims,
    ) -> Result<(), DeviceError> {
        check_len(SGEMM, "A", a.len(), dims.m * dims.k)?;
        check_len(SGEMM, "B", b.len(), dims.k * dims.n)?;
        check_len(SGEMM, "C", c.len(), dims.m * dims.n)?;
        if c.id() == a.id() || c.id() == b.id() {
            return Err(DeviceError::AliasedBuffer { kernel: SGEMM });
        }
        self.calls += 1;
        debug!(m = dims.m, k = dims.k, n = dims.n, "sgemm");

        let (a, b, c) = (a.slice(), b.slice(), c.slice());
        let pool = Arc::clone(&self.pool);
        stream.enqueue(SGEMM, move || {
            let (a_mem, b_mem, mut c_mem) = (a.read(), b.read(), c.write());
            let (a, b): (&[f32], &[f32]) = (&a_mem, &b_mem);
            let c: &mut [f32] = &mut c_mem;
            pool.install(|| gemm(a, b, c, dims));
            Ok(())
        })
    }
}

/// Blocked gemm, parallel over `TILE_M`-row panels of C.
fn gemm(a: &[f32], b: &[f32], c: &mut [f32], dims: MatmulDims) {
    let MatmulDims { k, n, .. } = dims;
    if n == 0 {
        return;
    }
    c.par_chunks_mut(TILE_M * n)
        .enumerate()
        .for_each(|(panel, c_panel)| {
            c_panel.fill(0.0);
            let i0 = panel * TILE_M;
            let rows = c_panel.len() / n;
            for j0 in (0..n).step_by(TILE_N) {
                let j_end = (j0 + TILE_N).min(n);
                for p0 in (0..k).step_by(TILE_K) {
                    let p_end = (p0 + TILE_K).min(k);
                    for i in 0..rows {
                        let c_row = &mut c_panel[i * n + j0..i * n + j_end];
                        for p in p0..p_end {
                            let a_val = a[(i0 + i) * k + p];
                            let b_row = &b[p * n + j0..p * n + j_end];
                            for (cv, bv) in c_row.iter_mut().zip(b_row) {
                                *cv += a_val * bv;
                            }
                        }
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use lk_tensor::cpu::matmul::matmul_naive;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_sgemm_matches_reference() {
        let dims = MatmulDims::new(70, 33, 129);
        let mut rng = StdRng::seed_from_u64(7);
        let a: Vec<f32> = (0..dims.m * dims.k).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let b: Vec<f32> = (0..dims.k * dims.n).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let dev = Device::new(0);
        let da = dev.alloc_zeros::<f32>(a.len()).unwrap();
        let db = dev.alloc_zeros::<f32>(b.len()).unwrap();
        let dc = dev.alloc_zeros::<f32>(dims.m * dims.n).unwrap();
        let mut ctx = BlasContext::with_threads(2).unwrap();
        let stream = dev.create_stream().unwrap();
        stream.memcpy_htod(&a, &da).unwrap();
        stream.memcpy_htod(&b, &db).unwrap();
        ctx.sgemm(&stream, &da, &db, &dc, dims).unwrap();
        let got = stream.memcpy_dtoh(&dc).wait().unwrap();

        let want = matmul_naive(&a, &b, dims.m, dims.k, dims.n);
        for (g, w) in got.iter().zip(&want) {
            assert!((g - w).abs() <= 1e-3 * w.abs().max(1.0));
        }
        assert_eq!(ctx.calls(), 1);
    }

    #[test]
    fn test_sgemm_rejects_bad_operands() {
        let dev = Device::new(0);
        let da = dev.alloc_zeros::<f32>(4).unwrap();
        let db = dev.alloc_zeros::<f32>(4).unwrap();
        let mut ctx = BlasContext::with_threads(1).unwrap();
        let stream = dev.create_stream().unwrap();
        let dims = MatmulDims::new(2, 2, 2);
        assert_eq!(
            ctx.sgemm(&stream, &da, &db, &da, dims).unwrap_err(),
            DeviceError::AliasedBuffer { kernel: "sgemm" }
        );
        assert!(ctx
            .sgemm(&stream, &da, &db, &db, MatmulDims::new(2, 3, 2))
            .is_err());
        assert_eq!(ctx.calls(), 0);
    }
}
