//! Host-side bias fusion and row-wise activations.
//!
//! Work is split into disjoint row ranges on the rayon pool. No two workers
//! touch the same output row, so no locking is involved.

use rayon::prelude::*;

/// Rows handed to one rayon task at a time.
const ROWS_PER_TASK: usize = 16;

/// `out[i][j] += bias[j]` for every row of a row-major buffer.
pub fn add_bias_inplace(out: &mut [f32], bias: &[f32]) {
    let cols = bias.len();
    if cols == 0 {
        return;
    }
    out.par_chunks_mut(cols * ROWS_PER_TASK).for_each(|rows| {
        for row in rows.chunks_mut(cols) {
            for (v, b) in row.iter_mut().zip(bias) {
                *v += b;
            }
        }
    });
}

/// Numerically stable softmax of one row, in place.
///
/// A row whose maximum is -inf (every entry -inf) becomes uniform. A row
/// holding +inf splits its mass equally over the +inf entries.
pub fn softmax_row_inplace(row: &mut [f32]) {
    if row.is_empty() {
        return;
    }
    let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max_val == f32::NEG_INFINITY {
        let uniform = 1.0 / row.len() as f32;
        row.iter_mut().for_each(|v| *v = uniform);
        return;
    }
    if max_val == f32::INFINITY {
        split_over_infinite(row);
        return;
    }

    let mut sum = 0.0f32;
    for v in row.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }
    let inv = 1.0 / sum;
    row.iter_mut().for_each(|v| *v *= inv);
}

/// The limit of softmax as the +inf entries grow: equal shares for them,
/// zero for everything else.
pub fn split_over_infinite(row: &mut [f32]) {
    let count = row.iter().filter(|v| **v == f32::INFINITY).count();
    let share = 1.0 / count as f32;
    for v in row.iter_mut() {
        *v = if *v == f32::INFINITY { share } else { 0.0 };
    }
}

/// Row-wise softmax over a row-major buffer, rows processed in parallel.
pub fn softmax_rows_inplace(x: &mut [f32], cols: usize) {
    if cols == 0 {
        return;
    }
    x.par_chunks_mut(cols).for_each(softmax_row_inplace);
}

/// Logistic sigmoid of a single value.
pub fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}
