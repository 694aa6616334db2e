use lk_tensor::{Matrix, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Xavier/Glorot uniform initialisation of a `fan_in` x `fan_out` weight
/// matrix: samples from U(-l, l) with `l = sqrt(6 / (fan_in + fan_out))`.
///
/// The same seed always yields the same matrix.
pub fn xavier_uniform(fan_in: usize, fan_out: usize, seed: u64) -> Result<Matrix> {
    let mut rng = StdRng::seed_from_u64(seed);
    let limit = if fan_in + fan_out == 0 {
        0.0
    } else {
        (6.0 / (fan_in + fan_out) as f32).sqrt()
    };
    let data = (0..fan_in * fan_out)
        .map(|_| {
            if limit > 0.0 {
                rng.gen_range(-limit..limit)
            } else {
                0.0
            }
        })
        .collect();
    Matrix::from_vec(data, fan_in, fan_out)
}
