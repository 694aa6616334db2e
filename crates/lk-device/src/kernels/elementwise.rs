//! One-thread-per-element kernels over a `rows` x `cols` output.
//!
//! Blocks are `BLOCK_COLS` x `BLOCK_ROWS` threads. Thread `(tx, ty)` of block
//! `(bx, by)` handles row `by * BLOCK_ROWS + ty`, column `bx * BLOCK_COLS + tx`
//! and computes the flattened row-major index itself.

use crate::error::DeviceError;
use crate::launch::{grid_2d, BlockIdx, Dim3, Kernel, LaunchConfig};
use crate::memory::{BufferId, DeviceBuffer, DeviceSlice};

use super::check_len;

pub const BLOCK_COLS: usize = 32;
pub const BLOCK_ROWS: usize = 8;

fn launch_config(rows: usize, cols: usize) -> LaunchConfig {
    grid_2d(
        rows,
        cols,
        BLOCK_ROWS,
        BLOCK_COLS,
        Dim3::new(BLOCK_COLS as u32, BLOCK_ROWS as u32, 1),
        0,
    )
}

/// Visit every in-bounds `(row, col)` of one block.
fn for_each_thread<F>(blk: BlockIdx, rows: usize, cols: usize, band: &mut [f32], mut f: F)
where
    F: FnMut(usize, &mut f32),
{
    let band_start = blk.y * BLOCK_ROWS * cols;
    for ty in 0..BLOCK_ROWS {
        let row = blk.y * BLOCK_ROWS + ty;
        if row >= rows {
            return;
        }
        for tx in 0..BLOCK_COLS {
            let col = blk.x * BLOCK_COLS + tx;
            if col >= cols {
                break;
            }
            let idx = row * cols + col;
            f(col, &mut band[idx - band_start]);
        }
    }
}

/// `out[i][j] += bias[j]`.
#[derive(Debug)]
pub struct BiasAdd {
    bias: DeviceSlice<f32>,
    rows: usize,
    cols: usize,
}

impl BiasAdd {
    pub const NAME: &'static str = "bias_add";

    pub fn new(bias: &DeviceBuffer<f32>, rows: usize, cols: usize) -> Result<Self, DeviceError> {
        check_len(Self::NAME, "bias", bias.len(), cols)?;
        Ok(BiasAdd {
            bias: bias.slice(),
            rows,
            cols,
        })
    }

    pub fn launch_config(rows: usize, cols: usize) -> LaunchConfig {
        launch_config(rows, cols)
    }
}

impl Kernel for BiasAdd {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn reads(&self) -> Vec<BufferId> {
        vec![self.bias.id()]
    }

    fn execute(&self, cfg: &LaunchConfig, out: &mut [f32]) -> Result<(), DeviceError> {
        let (rows, cols) = (self.rows, self.cols);
        check_len(Self::NAME, "output", out.len(), rows * cols)?;
        let bias_mem = self.bias.read();
        let bias: &[f32] = &bias_mem;
        cfg.for_each_band(Self::NAME, BLOCK_ROWS * cols, out, |blk, band| {
            for_each_thread(blk, rows, cols, band, |col, v| *v += bias[col]);
        })
    }
}

/// `out[i] = 1 / (1 + exp(-out[i]))`.
#[derive(Debug, Clone, Copy)]
pub struct Sigmoid {
    rows: usize,
    cols: usize,
}

impl Sigmoid {
    pub const NAME: &'static str = "sigmoid";

    pub fn new(rows: usize, cols: usize) -> Self {
        Sigmoid { rows, cols }
    }

    pub fn launch_config(rows: usize, cols: usize) -> LaunchConfig {
        launch_config(rows, cols)
    }
}

impl Kernel for Sigmoid {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn reads(&self) -> Vec<BufferId> {
        Vec::new()
    }

    fn execute(&self, cfg: &LaunchConfig, out: &mut [f32]) -> Result<(), DeviceError> {
        let (rows, cols) = (self.rows, self.cols);
        check_len(Self::NAME, "output", out.len(), rows * cols)?;
        cfg.for_each_band(Self::NAME, BLOCK_ROWS * cols, out, |blk, band| {
            for_each_thread(blk, rows, cols, band, |_, v| *v = 1.0 / (1.0 + (-*v).exp()));
        })
    }
}
