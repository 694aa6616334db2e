//! Shared-memory tiled matrix multiply.
//!
//! Each block computes one `TILE` x `TILE` tile of C. The block has
//! `TILE / VEC` x `TILE` threads; thread `(tx, ty)` owns row `ty` of the tile
//! and the `VEC` adjacent columns starting at `tx * VEC`. For every K-step
//! the block stages a TILE x TILE sub-tile of A and of B into shared memory
//! (each thread loading `VEC` elements of each), synchronizes, accumulates,
//! and synchronizes again before the next stage overwrites the tiles.

use crate::error::DeviceError;
use crate::launch::{grid_2d, BlockIdx, Dim3, Kernel, LaunchConfig};
use crate::memory::{BufferId, DeviceBuffer, DeviceSlice};

use super::{check_len, MatmulDims};

/// Output tile edge.
pub const TILE: usize = 32;
/// Elements per vectorized load and per-thread output run.
pub const VEC: usize = 4;

const THREADS_X: usize = TILE / VEC;
const SHARED_BYTES: usize = 2 * TILE * TILE * std::mem::size_of::<f32>();

type SharedTile = [[f32; TILE]; TILE];

/// C = A @ B over f32 buffers, overwriting C.
#[derive(Debug)]
pub struct TiledMatmul {
    a: DeviceSlice<f32>,
    b: DeviceSlice<f32>,
    dims: MatmulDims,
}

impl TiledMatmul {
    pub const NAME: &'static str = "tiled_matmul";

    pub fn new(
        a: &DeviceBuffer<f32>,
        b: &DeviceBuffer<f32>,
        dims: MatmulDims,
    ) -> Result<Self, DeviceError> {
        check_len(Self::NAME, "A", a.len(), dims.m * dims.k)?;
        check_len(Self::NAME, "B", b.len(), dims.k * dims.n)?;
        Ok(TiledMatmul {
            a: a.slice(),
            b: b.slice(),
            dims,
        })
    }

    /// One block per output tile, `TILE/VEC` x `TILE` threads.
    pub fn launch_config(dims: MatmulDims) -> LaunchConfig {
        grid_2d(
            dims.m,
            dims.n,
            TILE,
            TILE,
            Dim3::new(THREADS_X as u32, TILE as u32, 1),
            SHARED_BYTES as u32,
        )
    }

    fn block(&self, blk: BlockIdx, a: &[f32], b: &[f32], band: &mut [f32]) {
        let MatmulDims { m, k, n } = self.dims;
        let row0 = blk.y * TILE;
        let col0 = blk.x * TILE;

        let mut a_tile: SharedTile = [[0.0; TILE]; TILE];
        let mut b_tile: SharedTile = [[0.0; TILE]; TILE];
        let mut acc = [[[0.0f32; VEC]; THREADS_X]; TILE];

        for k0 in (0..k).step_by(TILE) {
            // Stage: each thread loads VEC elements of A and of B.
            for ty in 0..TILE {
                for tx in 0..THREADS_X {
                    let c = tx * VEC;
                    load_vec(a, m, k, row0 + ty, k0 + c, &mut a_tile[ty][c..c + VEC]);
                    load_vec(b, k, n, k0 + ty, col0 + c, &mut b_tile[ty][c..c + VEC]);
                }
            }
            // barrier

            let depth = TILE.min(k - k0);
            for ty in 0..TILE {
                for tx in 0..THREADS_X {
                    let out = &mut acc[ty][tx];
                    for p in 0..depth {
                        let av = a_tile[ty][p];
                        let bv = &b_tile[p][tx * VEC..tx * VEC + VEC];
                        for v in 0..VEC {
                            out[v] += av * bv[v];
                        }
                    }
                }
            }
            // barrier
        }

        for (ty, row_acc) in acc.iter().enumerate() {
            if row0 + ty >= m {
                break;
            }
            for (tx, run) in row_acc.iter().enumerate() {
                for (v, value) in run.iter().enumerate() {
                    let col = col0 + tx * VEC + v;
                    if col < n {
                        band[ty * n + col] = *value;
                    }
                }
            }
        }
    }
}

/// Load `VEC` consecutive elements of row `r` starting at column `c` from a
/// `rows` x `cols` row-major source, zero-filling anything out of bounds.
///
/// Fully in-bounds, 4-aligned runs are copied as one vector; everything else
/// goes element by element.
fn load_vec(src: &[f32], rows: usize, cols: usize, r: usize, c: usize, dst: &mut [f32]) {
    let offset = r * cols + c;
    if r < rows && c + VEC <= cols && offset % VEC == 0 {
        dst.copy_from_slice(&src[offset..offset + VEC]);
        return;
    }
    for (v, slot) in dst.iter_mut().enumerate() {
        *slot = if r < rows && c + v < cols {
            src[offset + v]
        } else {
            0.0
        };
    }
}

impl Kernel for TiledMatmul {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn reads(&self) -> Vec<BufferId> {
        vec![self.a.id(), self.b.id()]
    }

    fn execute(&self, cfg: &LaunchConfig, out: &mut [f32]) -> Result<(), DeviceError> {
        let MatmulDims { m, n, .. } = self.dims;
        check_len(Self::NAME, "C", out.len(), m * n)?;
        let a_mem = self.a.read();
        let b_mem = self.b.read();
        let (a, b): (&[f32], &[f32]) = (&a_mem, &b_mem);
        cfg.for_each_band(Self::NAME, TILE * n, out, |blk, band| {
            self.block(blk, a, b, band)
        })
    }
}
