//! Block- and warp-level reductions shared by the softmax kernels.

/// Lanes in a warp.
pub const WARP_SIZE: usize = 32;

/// Butterfly reduction across one warp.
///
/// Each round every lane combines its value with the lane `offset` away
/// (the XOR shuffle), halving `offset` until it reaches 1. Afterwards every
/// lane holds the full reduction.
pub fn warp_reduce<F>(lanes: &mut [f32; WARP_SIZE], op: F) -> f32
where
    F: Fn(f32, f32) -> f32,
{
    let mut offset = WARP_SIZE / 2;
    while offset > 0 {
        let snapshot = *lanes;
        for (lane, value) in lanes.iter_mut().enumerate() {
            *value = op(snapshot[lane], snapshot[lane ^ offset]);
        }
        offset /= 2;
    }
    lanes[0]
}

/// Reduce one value per thread held in block shared memory.
///
/// `shared.len()` is the block size: a power of two, at least one warp.
/// A shared-memory tree halves the active threads until one warp remains,
/// which finishes with [`warp_reduce`].
pub fn block_reduce<F>(shared: &mut [f32], identity: f32, op: F) -> f32
where
    F: Fn(f32, f32) -> f32,
{
    let mut stride = shared.len() / 2;
    while stride >= WARP_SIZE {
        for tid in 0..stride {
            shared[tid] = op(shared[tid], shared[tid + stride]);
        }
        // barrier
        stride /= 2;
    }

    let mut lanes = [identity; WARP_SIZE];
    for (lane, value) in lanes.iter_mut().zip(shared.iter()) {
        *lane = *value;
    }
    warp_reduce(&mut lanes, op)
}

/// Threads per block for a reduction over `len` elements: the next power of
/// two, clamped to `[WARP_SIZE, max]`.
pub fn reduction_threads(len: usize, max: usize) -> usize {
    len.next_power_of_two().clamp(WARP_SIZE, max.max(WARP_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warp_reduce_sum_and_max() {
        let mut lanes = [0.0f32; WARP_SIZE];
        for (i, v) in lanes.iter_mut().enumerate() {
            *v = i as f32;
        }
        let mut copy = lanes;
        assert_eq!(warp_reduce(&mut lanes, |a, b| a + b), 496.0);
        assert!(lanes.iter().all(|&v| v == 496.0));
        assert_eq!(warp_reduce(&mut copy, f32::max), 31.0);
    }

    #[test]
    fn test_block_reduce() {
        let mut shared: Vec<f32> = (0..256).map(|v| v as f32).collect();
        assert_eq!(block_reduce(&mut shared, 0.0, |a, b| a + b), 32640.0);
        let mut shared: Vec<f32> = (0..128).map(|v| -(v as f32)).collect();
        assert_eq!(block_reduce(&mut shared, f32::NEG_INFINITY, f32::max), 0.0);
    }

    #[test]
    fn test_reduction_threads() {
        assert_eq!(reduction_threads(3, 256), 32);
        assert_eq!(reduction_threads(100, 256), 128);
        assert_eq!(reduction_threads(5000, 256), 256);
    }
}
