//! Row softmax with two block reductions.
//!
//! One block owns one row. Threads stride over the row to build partial
//! maxima, the block reduces them to the row maximum, then the same pattern
//! produces the sum of `exp(x - max)`, and a final pass divides by it.

use crate::error::DeviceError;
use crate::launch::{grid_rows, BlockIdx, Kernel, LaunchConfig};
use crate::memory::BufferId;

use super::check_len;
use super::reduce::{block_reduce, reduction_threads};

/// Largest block used for one row.
pub const MAX_THREADS: usize = 256;

/// In-place softmax over each row of a `rows` x `cols` buffer.
#[derive(Debug, Clone, Copy)]
pub struct RowSoftmax {
    rows: usize,
    cols: usize,
}

impl RowSoftmax {
    pub const NAME: &'static str = "row_softmax";

    pub fn new(rows: usize, cols: usize) -> Self {
        RowSoftmax { rows, cols }
    }

    pub fn launch_config(rows: usize, cols: usize) -> LaunchConfig {
        let threads = reduction_threads(cols, MAX_THREADS);
        grid_rows(
            rows,
            threads as u32,
            (threads * std::mem::size_of::<f32>()) as u32,
        )
    }
}

/// Normalize one row in place using a block of `shared.len()` threads.
///
/// A row whose maximum is -inf (every entry -inf) becomes uniform; a row
/// holding +inf shares its mass equally among the +inf entries.
pub(crate) fn softmax_block(row: &mut [f32], shared: &mut [f32]) {
    let threads = shared.len();

    for (tid, slot) in shared.iter_mut().enumerate() {
        *slot = row
            .iter()
            .skip(tid)
            .step_by(threads)
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
    }
    let row_max = block_reduce(shared, f32::NEG_INFINITY, f32::max);

    if row_max == f32::NEG_INFINITY {
        let uniform = 1.0 / row.len() as f32;
        row.iter_mut().for_each(|v| *v = uniform);
        return;
    }
    if row_max == f32::INFINITY {
        for (tid, slot) in shared.iter_mut().enumerate() {
            *slot = row
                .iter()
                .skip(tid)
                .step_by(threads)
                .filter(|v| **v == f32::INFINITY)
                .count() as f32;
        }
        let share = 1.0 / block_reduce(shared, 0.0, |a, b| a + b);
        row.iter_mut()
            .for_each(|v| *v = if *v == f32::INFINITY { share } else { 0.0 });
        return;
    }

    for (tid, slot) in shared.iter_mut().enumerate() {
        let mut local = 0.0f32;
        for v in row.iter_mut().skip(tid).step_by(threads) {
            *v = (*v - row_max).exp();
            local += *v;
        }
        *slot = local;
    }
    let sum = block_reduce(shared, 0.0, |a, b| a + b);

    let inv = 1.0 / sum;
    row.iter_mut().for_each(|v| *v *= inv);
}

impl Kernel for RowSoftmax {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn reads(&self) -> Vec<BufferId> {
        Vec::new()
    }

    fn execute(&self, cfg: &LaunchConfig, out: &mut [f32]) -> Result<(), DeviceError> {
        check_len(Self::NAME, "output", out.len(), self.rows * self.cols)?;
        let threads = cfg.threads_per_block();
        cfg.for_each_band(Self::NAME, self.cols, out, |_: BlockIdx, row| {
            let mut shared = vec![0.0f32; threads];
            softmax_block(row, &mut shared);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use approx::assert_relative_eq;

    fn run(x: &[f32], rows: usize, cols: usize) -> Vec<f32> {
        let dev = Device::new(0);
        let buf = dev.alloc_zeros::<f32>(x.len()).unwrap();
        let stream = dev.create_stream().unwrap();
        stream.memcpy_htod(x, &buf).unwrap();
        stream
            .launch(
                RowSoftmax::new(rows, cols),
                RowSoftmax::launch_config(rows, cols),
                &buf,
            )
            .unwrap();
        stream.memcpy_dtoh(&buf).wait().unwrap()
    }

    #[test]
    fn test_known_values() {
        let p = run(&[1.0, 2.0, 3.0], 1, 3);
        assert_relative_eq!(p[0], 0.0900, epsilon = 1e-4);
        assert_relative_eq!(p[1], 0.2447, epsilon = 1e-4);
        assert_relative_eq!(p[2], 0.6652, epsilon = 1e-4);
    }

    #[test]
    fn test_rows_sum_to_one() {
        let cols = 1000;
        let mut x = Vec::with_capacity(4 * cols);
        // Large magnitude, one dominant entry, uniform, mixed sign.
        x.extend((0..cols).map(|i| 5000.0 + (i % 7) as f32 * 100.0));
        x.extend((0..cols).map(|i| if i == 17 { 50.0 } else { 0.0 }));
        x.extend(std::iter::repeat(3.0).take(cols));
        x.extend((0..cols).map(|i| (i as f32 - 500.0) / 50.0));
        let p = run(&x, 4, cols);
        for row in p.chunks(cols) {
            assert!(row.iter().all(|v| v.is_finite() && *v >= 0.0));
            let total: f64 = row.iter().map(|&v| v as f64).sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-5);
        }
        assert!(p[cols + 17] > 0.999);
        assert_relative_eq!(p[2 * cols], 1.0 / cols as f32, epsilon = 1e-7);
    }

    #[test]
    fn test_pos_inf_entries_share_the_row() {
        let p = run(&[f32::INFINITY, 1.0, 2.0, 1.0, f32::INFINITY, f32::INFINITY], 2, 3);
        assert_eq!(&p[..3], &[1.0, 0.0, 0.0]);
        assert_eq!(&p[3..], &[0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_all_neg_inf_row() {
        let p = run(&[f32::NEG_INFINITY; 4], 1, 4);
        assert_eq!(p, vec![0.25; 4]);
    }
}
