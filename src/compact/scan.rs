//! Exclusive prefix sums over block counts

use rayon::prelude::*;

/// Block counts scanned per shard in the parallel path
const SCAN_SHARD: usize = 1024;

/// Serial exclusive scan. Returns the total.
pub(crate) fn serial_exclusive_scan(counts: &[u32], offsets: &mut [u32]) -> u32 {
    debug_assert_eq!(counts.len(), offsets.len());
    let mut acc = 0u32;
    for (offset, &count) in offsets.iter_mut().zip(counts) {
        *offset = acc;
        acc += count;
    }
    acc
}

/// Write the exclusive prefix sum of `counts` into `offsets` and return the
/// sum of all counts.
///
/// Small inputs are scanned serially. Larger ones are split into shards:
/// shard totals are reduced in parallel, scanned, and then each shard runs
/// its local scan seeded with its shard offset.
///
/// # Panics
/// If the slices differ in length.
pub fn exclusive_scan(counts: &[u32], offsets: &mut [u32]) -> u32 {
    assert_eq!(counts.len(), offsets.len(), "scan input and output must match");

    if counts.len() <= SCAN_SHARD {
        return serial_exclusive_scan(counts, offsets);
    }

    let shard_totals: Vec<u32> = counts
        .par_chunks(SCAN_SHARD)
        .map(|shard| shard.iter().sum())
        .collect();
    let mut shard_offsets = vec![0u32; shard_totals.len()];
    let total = serial_exclusive_scan(&shard_totals, &mut shard_offsets);

    offsets
        .par_chunks_mut(SCAN_SHARD)
        .zip(counts.par_chunks(SCAN_SHARD))
        .zip(shard_offsets.par_iter())
        .for_each(|((out, shard), &base)| {
            let mut acc = base;
            for (offset, &count) in out.iter_mut().zip(shard) {
                *offset = acc;
                acc += count;
            }
        });

    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_scan() {
        let counts = [3, 0, 2, 5];
        let mut offsets = [0; 4];
        let total = exclusive_scan(&counts, &mut offsets);
        assert_eq!(offsets, [0, 3, 3, 5]);
        assert_eq!(total, 10);
    }

    #[test]
    fn test_empty_scan() {
        let mut offsets: [u32; 0] = [];
        assert_eq!(exclusive_scan(&[], &mut offsets), 0);
    }

    #[test]
    fn test_sharded_scan_matches_serial() {
        let counts: Vec<u32> = (0..5000u32).map(|i| (i * 7919) % 257).collect();
        let mut parallel = vec![0; counts.len()];
        let mut serial = vec![0; counts.len()];
        let total = exclusive_scan(&counts, &mut parallel);
        let expected = serial_exclusive_scan(&counts, &mut serial);
        assert_eq!(total, expected);
        assert_eq!(parallel, serial);
    }
}
