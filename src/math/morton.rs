//! Morton encoding (Z-order curve) for voxel addressing
//!
//! Grid voxels are addressed by interleaving 10 bits per axis into a 30-bit
//! code, so neighbouring voxels mostly land in the same cache lines.

/// Largest per-axis coordinate range a 30-bit code can hold
pub const MAX_MORTON_AXIS: u32 = 1 << 10;

/// Spread the low 10 bits of `x` so they occupy every third bit
fn expand_bits(x: u32) -> u32 {
    let mut x = x & 0x3ff;
    x = (x | (x << 16)) & 0x030000ff;
    x = (x | (x << 8)) & 0x0300f00f;
    x = (x | (x << 4)) & 0x030c30c3;
    x = (x | (x << 2)) & 0x09249249;
    x
}

/// Gather every third bit of `x` back into a 10-bit integer
fn compact_bits(x: u32) -> u32 {
    let mut x = x & 0x09249249;
    x = (x | (x >> 2)) & 0x030c30c3;
    x = (x | (x >> 4)) & 0x0300f00f;
    x = (x | (x >> 8)) & 0x030000ff;
    x = (x | (x >> 16)) & 0x3ff;
    x
}

/// Encode 3D coordinates (each `< 1024`) into a 30-bit Morton code.
/// Bit 0 comes from x, bit 1 from y, bit 2 from z.
pub fn encode_morton_3d(x: u32, y: u32, z: u32) -> u32 {
    debug_assert!(x < MAX_MORTON_AXIS && y < MAX_MORTON_AXIS && z < MAX_MORTON_AXIS);
    expand_bits(x) | (expand_bits(y) << 1) | (expand_bits(z) << 2)
}

/// Decode a Morton code back to 3D coordinates
pub fn decode_morton_3d(code: u32) -> (u32, u32, u32) {
    (
        compact_bits(code),
        compact_bits(code >> 1),
        compact_bits(code >> 2),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_exhaustive_small() {
        for x in 0..16 {
            for y in 0..16 {
                for z in 0..16 {
                    let code = encode_morton_3d(x, y, z);
                    assert!(code < 16 * 16 * 16);
                    assert_eq!(decode_morton_3d(code), (x, y, z));
                }
            }
        }
    }

    #[test]
    fn test_roundtrip_full_range() {
        for x in [0, 1, 10, 100, 511, 512, 1000, 1023] {
            for y in [0, 3, 255, 768, 1023] {
                for z in [0, 7, 333, 1023] {
                    let code = encode_morton_3d(x, y, z);
                    assert_eq!(decode_morton_3d(code), (x, y, z), "Failed for ({}, {}, {})", x, y, z);
                }
            }
        }
    }

    #[test]
    fn test_ordering() {
        assert_eq!(encode_morton_3d(0, 0, 0), 0);
        assert_eq!(encode_morton_3d(1, 0, 0), 1);
        assert_eq!(encode_morton_3d(0, 1, 0), 2);
        assert_eq!(encode_morton_3d(0, 0, 1), 4);
        assert_eq!(encode_morton_3d(1, 1, 1), 7);
        assert_eq!(encode_morton_3d(1023, 1023, 1023), (1 << 30) - 1);
    }

    #[test]
    fn test_codes_are_dense() {
        // Every code below R^3 decodes inside [0, R)^3 when R is a power of two
        let r = 8;
        for code in 0..r * r * r {
            let (x, y, z) = decode_morton_3d(code);
            assert!(x < r && y < r && z < r);
        }
    }
}
