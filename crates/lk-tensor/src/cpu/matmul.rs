//! Reference matrix multiply and transpose.
//!
//! The product transposes B once so that every output element is a
//! contiguous dot product, then distributes output rows across the rayon
//! pool.

use rayon::prelude::*;

use super::simd::dot;

/// Rows of B below which the transposed copy costs more than it saves.
const TRANSPOSE_MIN_K: usize = 8;

/// Transpose a row-major [rows, cols] buffer into [cols, rows].
pub fn transpose(a: &[f32], rows: usize, cols: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; rows * cols];
    if rows == 0 || cols == 0 {
        return out;
    }
    out.par_chunks_mut(rows).enumerate().for_each(|(j, col)| {
        for (i, v) in col.iter_mut().enumerate() {
            *v = a[i * cols + j];
        }
    });
    out
}

/// C = A @ B for row-major A [m, k] and B [k, n].
///
/// Lengths must already be validated by the caller.
pub fn matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    if m == 0 || n == 0 {
        return c;
    }

    if k < TRANSPOSE_MIN_K {
        c.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            for (j, out) in row.iter_mut().enumerate() {
                let mut sum = 0.0f32;
                for p in 0..k {
                    sum += a[i * k + p] * b[p * n + j];
                }
                *out = sum;
            }
        });
        return c;
    }

    let bt = transpose(b, k, n);
    c.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        let a_row = &a[i * k..(i + 1) * k];
        for (j, out) in row.iter_mut().enumerate() {
            *out = dot(a_row, &bt[j * k..(j + 1) * k]);
        }
    });
    c
}

/// Textbook triple loop, used as the oracle for every other matmul.
pub fn matmul_naive(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for p in 0..k {
                sum += a[i * k + p] * b[p * n + j];
            }
            c[i * n + j] = sum;
        }
    }
    c
}
