//! Kernel launch descriptors and the block scheduler.
//!
//! A launch is a grid of blocks. Blocks that share a grid row (`y`) own one
//! contiguous band of the output buffer; bands execute concurrently on the
//! rayon pool and the blocks of one band run one after another. Kernels are
//! written block-at-a-time: each phase of a block loops over its threads,
//! and the boundary between two phases is the block barrier.

use std::fmt;

use rayon::prelude::*;

use crate::device::DeviceProps;
use crate::error::DeviceError;
use crate::memory::BufferId;

/// A three-component launch extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Dim3 { x, y, z }
    }

    pub fn volume(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Position of a block within the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIdx {
    pub x: usize,
    pub y: usize,
}

/// Grid/block shape and shared memory of one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub grid_dim: Dim3,
    pub block_dim: Dim3,
    pub shared_mem_bytes: u32,
}

impl LaunchConfig {
    /// Check the launch against the device limits.
    pub fn validate(&self, kernel: &'static str, props: &DeviceProps) -> Result<(), DeviceError> {
        let invalid = |reason: String| Err(DeviceError::InvalidLaunch { kernel, reason });
        let threads = self.block_dim.volume();
        if threads == 0 {
            return invalid("empty block".to_string());
        }
        if threads > props.max_threads_per_block as u64 {
            return invalid(format!(
                "{} threads per block exceeds the limit of {}",
                threads, props.max_threads_per_block
            ));
        }
        if self.shared_mem_bytes as usize > props.shared_mem_per_block {
            return invalid(format!(
                "{} bytes of shared memory exceeds the per-block limit of {}",
                self.shared_mem_bytes, props.shared_mem_per_block
            ));
        }
        if self.grid_dim.z != 1 || self.block_dim.z != 1 {
            return invalid("z extents other than 1 are not supported".to_string());
        }
        Ok(())
    }

    /// Threads in one block.
    pub fn threads_per_block(&self) -> usize {
        self.block_dim.volume() as usize
    }

    /// Run `body` for every block of the grid.
    ///
    /// `out` is split into bands of `band_len` elements (the last may be
    /// shorter), one per grid row. `body` receives the block index and its
    /// band.
    pub fn for_each_band<F>(
        &self,
        kernel: &'static str,
        band_len: usize,
        out: &mut [f32],
        body: F,
    ) -> Result<(), DeviceError>
    where
        F: Fn(BlockIdx, &mut [f32]) + Sync,
    {
        if out.is_empty() {
            return Ok(());
        }
        if band_len == 0 {
            return Err(DeviceError::InvalidLaunch {
                kernel,
                reason: "zero-length output band".to_string(),
            });
        }
        let bands = out.len().div_ceil(band_len);
        if bands != self.grid_dim.y as usize {
            return Err(DeviceError::InvalidLaunch {
                kernel,
                reason: format!(
                    "grid has {} rows but the output splits into {} bands",
                    self.grid_dim.y, bands
                ),
            });
        }
        let grid_x = self.grid_dim.x as usize;
        out.par_chunks_mut(band_len)
            .enumerate()
            .for_each(|(y, band)| {
                for x in 0..grid_x {
                    body(BlockIdx { x, y }, band);
                }
            });
        Ok(())
    }
}

/// Grid covering a `rows` x `cols` output with `tile_rows` x `tile_cols`
/// tiles per block.
pub fn grid_2d(
    rows: usize,
    cols: usize,
    tile_rows: usize,
    tile_cols: usize,
    block_dim: Dim3,
    shared_mem_bytes: u32,
) -> LaunchConfig {
    LaunchConfig {
        grid_dim: Dim3::new(
            cols.div_ceil(tile_cols) as u32,
            rows.div_ceil(tile_rows) as u32,
            1,
        ),
        block_dim,
        shared_mem_bytes,
    }
}

/// One block per output row.
pub fn grid_rows(rows: usize, threads: u32, shared_mem_bytes: u32) -> LaunchConfig {
    LaunchConfig {
        grid_dim: Dim3::new(1, rows as u32, 1),
        block_dim: Dim3::new(threads, 1, 1),
        shared_mem_bytes,
    }
}

/// A device kernel.
///
/// Implementations capture their input buffers at construction time and
/// write into the output buffer passed at launch.
pub trait Kernel: Send + fmt::Debug + 'static {
    /// Kernel name, used in logs and errors.
    fn name(&self) -> &'static str;

    /// Buffers the kernel reads; the output must not be one of them.
    fn reads(&self) -> Vec<BufferId>;

    /// Execute the whole grid against `out`.
    fn execute(&self, cfg: &LaunchConfig, out: &mut [f32]) -> Result<(), DeviceError>;
}
