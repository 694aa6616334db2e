//! The matrix-multiply-accumulate unit.
//!
//! One warp-wide operation computes `D = A @ B + C` on fixed 16x16x16
//! fragments: A and B hold f16, the accumulator holds f32. Products of two
//! f16 values are exact in f32, so the only rounding happens in the
//! accumulation.

use half::f16;

pub const FRAG_M: usize = 16;
pub const FRAG_N: usize = 16;
pub const FRAG_K: usize = 16;

/// A 16x16 row-major tile of the left operand.
#[derive(Debug, Clone)]
pub struct FragmentA {
    data: [f16; FRAG_M * FRAG_K],
}

impl FragmentA {
    /// Load rows `row0..row0 + 16`, columns `k0..k0 + 16` of a row-major
    /// matrix with leading dimension `ld` and `rows` valid rows. Rows past
    /// the end are zero.
    pub fn load(src: &[f16], ld: usize, rows: usize, row0: usize, k0: usize) -> Self {
        let mut data = [f16::ZERO; FRAG_M * FRAG_K];
        for i in 0..FRAG_M {
            let row = row0 + i;
            if row >= rows {
                break;
            }
            let start = row * ld + k0;
            data[i * FRAG_K..(i + 1) * FRAG_K].copy_from_slice(&src[start..start + FRAG_K]);
        }
        FragmentA { data }
    }
}

/// A 16x16 row-major tile of the right operand.
#[derive(Debug, Clone)]
pub struct FragmentB {
    data: [f16; FRAG_K * FRAG_N],
}

impl FragmentB {
    /// Load rows `k0..k0 + 16`, columns `col0..col0 + 16` of a row-major
    /// matrix with leading dimension `ld`.
    pub fn load(src: &[f16], ld: usize, k0: usize, col0: usize) -> Self {
        let mut data = [f16::ZERO; FRAG_K * FRAG_N];
        for p in 0..FRAG_K {
            let start = (k0 + p) * ld + col0;
            data[p * FRAG_N..(p + 1) * FRAG_N].copy_from_slice(&src[start..start + FRAG_N]);
        }
        FragmentB { data }
    }
}

/// A 16x16 f32 accumulator tile.
#[derive(Debug, Clone)]
pub struct Accumulator {
    data: [f32; FRAG_M * FRAG_N],
}

impl Accumulator {
    pub fn zero() -> Self {
        Accumulator {
            data: [0.0; FRAG_M * FRAG_N],
        }
    }

    /// Store into a row-major destination with leading dimension `ld`,
    /// starting at the tile origin.
    pub fn store(&self, dst: &mut [f32], ld: usize) {
        for i in 0..FRAG_M {
            dst[i * ld..i * ld + FRAG_N].copy_from_slice(&self.data[i * FRAG_N..(i + 1) * FRAG_N]);
        }
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * FRAG_N + col]
    }
}

/// `acc += a @ b`.
pub fn mma_sync(acc: &mut Accumulator, a: &FragmentA, b: &FragmentB) {
    for i in 0..FRAG_M {
        for p in 0..FRAG_K {
            let av = a.data[i * FRAG_K + p].to_f32();
            let b_row = &b.data[p * FRAG_N..(p + 1) * FRAG_N];
            let out = &mut acc.data[i * FRAG_N..(i + 1) * FRAG_N];
            for (o, bv) in out.iter_mut().zip(b_row) {
                *o += av * bv.to_f32();
            }
        }
    }
}
