//! Counter-based pseudo-random numbers
//!
//! Occupancy sampling needs one uniform value per (level, voxel, cycle)
//! that is reproducible regardless of how work is split across threads, so
//! values are derived by hashing the key instead of advancing a generator.

/// Integer finalizer with good avalanche on all 32 bits
fn mix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846ca68b);
    h ^= h >> 16;
    h
}

/// Hash a sample key into 32 random bits.
///
/// `stream` separates independent draws for the same cell, e.g. the
/// selection coin and the three jitter axes.
pub fn hash_key(seed: u32, level: u32, voxel: u32, cycle: u32, stream: u32) -> u32 {
    let mut h = mix(seed.wrapping_mul(1274126177) ^ stream);
    h = mix(h ^ voxel.wrapping_mul(374761393));
    h = mix(h ^ level.wrapping_mul(668265263));
    mix(h ^ cycle.wrapping_mul(2246822519))
}

/// Uniform value in [0, 1) for a sample key
pub fn uniform(seed: u32, level: u32, voxel: u32, cycle: u32, stream: u32) -> f32 {
    // 24 mantissa bits keep the result strictly below 1.0
    (hash_key(seed, level, voxel, cycle, stream) >> 8) as f32 / (1u32 << 24) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reproducible() {
        assert_eq!(uniform(1, 2, 3, 4, 0), uniform(1, 2, 3, 4, 0));
    }

    #[test]
    fn test_range() {
        for voxel in 0..10_000 {
            let u = uniform(7, 0, voxel, 0, 0);
            assert!((0.0..1.0).contains(&u));
        }
    }

    #[test]
    fn test_keys_decorrelate() {
        let a = hash_key(0, 0, 1, 0, 0);
        assert_ne!(a, hash_key(0, 0, 1, 1, 0));
        assert_ne!(a, hash_key(0, 1, 1, 0, 0));
        assert_ne!(a, hash_key(0, 0, 1, 0, 1));
        assert_ne!(a, hash_key(1, 0, 1, 0, 0));
    }

    #[test]
    fn test_roughly_uniform() {
        let n = 20_000;
        let below_half = (0..n).filter(|&v| uniform(3, 1, v, 9, 0) < 0.5).count();
        let fraction = below_half as f32 / n as f32;
        assert!((fraction - 0.5).abs() < 0.03, "fraction below 0.5 = {}", fraction);
    }
}
