//! Block-parallel stream compactor

use rayon::prelude::*;

use crate::core::{Arena, Error, Result};
use super::scan::{exclusive_scan, serial_exclusive_scan};
use super::warp::{ballot, lane_prefix, set_lanes, WARP_SIZE};

/// Elements per block unless configured otherwise (8 warps)
pub const DEFAULT_BLOCK_SIZE: usize = 256;

/// Largest block a launch may use (32 warps)
pub const MAX_BLOCK_SIZE: usize = 1024;

const MAX_WARPS_PER_BLOCK: usize = MAX_BLOCK_SIZE / WARP_SIZE;

/// Block geometry for a compaction launch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchConfig {
    block_size: usize,
}

impl LaunchConfig {
    /// Validate a block size: a non-zero multiple of [`WARP_SIZE`] no larger
    /// than [`MAX_BLOCK_SIZE`].
    pub fn new(block_size: usize) -> Result<Self> {
        if block_size == 0 || block_size % WARP_SIZE != 0 || block_size > MAX_BLOCK_SIZE {
            return Err(Error::Launch(format!(
                "block size {} must be a non-zero multiple of {} up to {}",
                block_size, WARP_SIZE, MAX_BLOCK_SIZE
            )));
        }
        Ok(Self { block_size })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks needed to cover `n` elements
    pub fn grid_size(&self, n: usize) -> usize {
        n.div_ceil(self.block_size)
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self { block_size: DEFAULT_BLOCK_SIZE }
    }
}

/// Phase 1: number of predicate-true elements in each block.
///
/// Each block reduces the population counts of its warps' ballots.
pub fn count_blocks<T, P>(input: &[T], block_size: usize, pred: &P, counts: &mut [u32])
where
    T: Sync,
    P: Fn(usize, &T) -> bool + Sync,
{
    debug_assert_eq!(counts.len(), input.len().div_ceil(block_size));
    input
        .par_chunks(block_size)
        .zip(counts.par_iter_mut())
        .enumerate()
        .for_each(|(block, (items, count))| {
            let base = block * block_size;
            *count = items
                .chunks(WARP_SIZE)
                .enumerate()
                .map(|(warp, lanes)| ballot(lanes, base + warp * WARP_SIZE, pred).count_ones())
                .sum();
        });
}

/// Phase 3 for a single block. `out` is exactly this block's output range,
/// i.e. it already starts at the block offset.
fn scatter_block<T, P>(items: &[T], base: usize, pred: &P, out: &mut [T])
where
    T: Copy,
    P: Fn(usize, &T) -> bool,
{
    let warps = items.len().div_ceil(WARP_SIZE);
    let mut ballots = [0u32; MAX_WARPS_PER_BLOCK];
    let mut totals = [0u32; MAX_WARPS_PER_BLOCK];
    let mut warp_offsets = [0u32; MAX_WARPS_PER_BLOCK];

    for (warp, lanes) in items.chunks(WARP_SIZE).enumerate() {
        let mask = ballot(lanes, base + warp * WARP_SIZE, pred);
        ballots[warp] = mask;
        totals[warp] = mask.count_ones();
    }

    // Every ballot of the block is written before any warp offset is read.
    let block_total = serial_exclusive_scan(&totals[..warps], &mut warp_offsets[..warps]);
    debug_assert_eq!(block_total as usize, out.len(), "predicate changed between count and scatter");

    for (warp, lanes) in items.chunks(WARP_SIZE).enumerate() {
        let mask = ballots[warp];
        for lane in set_lanes(mask) {
            let slot = lane_prefix(mask, lane) + warp_offsets[warp];
            out[slot as usize] = lanes[lane as usize];
        }
    }
}

/// Order-preserving stream compactor with reusable scratch buffers
pub struct StreamCompactor {
    config: LaunchConfig,
    block_counts: Arena<u32>,
    block_offsets: Arena<u32>,
}

impl StreamCompactor {
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config,
            block_counts: Arena::new("compaction block counts"),
            block_offsets: Arena::new("compaction block offsets"),
        }
    }

    pub fn config(&self) -> LaunchConfig {
        self.config
    }

    /// Copy every element of `input` satisfying `pred` into the front of
    /// `output`, preserving order, and return how many were written.
    ///
    /// `output` must be at least as long as `input`. Elements past the
    /// returned count are left untouched. `pred` is evaluated twice per
    /// element and must give the same answer both times.
    pub fn compact<T, P>(&mut self, input: &[T], output: &mut [T], pred: P) -> Result<usize>
    where
        T: Copy + Send + Sync,
        P: Fn(&T) -> bool + Sync,
    {
        self.compact_indexed(input, output, |_: usize, item: &T| pred(item))
    }

    /// Like [`compact`](Self::compact), but the predicate also receives the
    /// element's index so it can consult arrays parallel to `input`.
    pub fn compact_indexed<T, P>(&mut self, input: &[T], output: &mut [T], pred: P) -> Result<usize>
    where
        T: Copy + Send + Sync,
        P: Fn(usize, &T) -> bool + Sync,
    {
        if output.len() < input.len() {
            return Err(Error::Launch(format!(
                "compaction output holds {} elements but input has {}",
                output.len(),
                input.len()
            )));
        }

        let total = self.count_indexed(input, &pred)?;
        if total == 0 {
            return Ok(0);
        }

        let block_size = self.config.block_size;
        let blocks = self.config.grid_size(input.len());
        let counts = self.block_counts.slice(blocks);
        let offsets = self.block_offsets.slice(blocks);

        // Carve output[..total] into one disjoint range per block
        let mut targets: Vec<&mut [T]> = Vec::with_capacity(blocks);
        let mut rest = &mut output[..total];
        for (&count, &offset) in counts.iter().zip(offsets) {
            debug_assert_eq!(offset as usize, total - rest.len());
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(count as usize);
            targets.push(head);
            rest = tail;
        }

        input
            .par_chunks(block_size)
            .zip(targets.into_par_iter())
            .enumerate()
            .for_each(|(block, (items, out))| {
                if !out.is_empty() {
                    scatter_block(items, block * block_size, &pred, out);
                }
            });

        log::trace!("Compacted {} -> {} elements in {} blocks", input.len(), total, blocks);
        Ok(total)
    }

    /// Number of elements satisfying `pred`, computed with the counting and
    /// scan phases only.
    pub fn count<T, P>(&mut self, input: &[T], pred: P) -> Result<usize>
    where
        T: Sync,
        P: Fn(&T) -> bool + Sync,
    {
        let indexed = |_: usize, item: &T| pred(item);
        self.count_indexed(input, &indexed)
    }

    fn count_indexed<T, P>(&mut self, input: &[T], pred: &P) -> Result<usize>
    where
        T: Sync,
        P: Fn(usize, &T) -> bool + Sync,
    {
        if input.len() > u32::MAX as usize {
            return Err(Error::Launch(format!(
                "compaction input of {} elements exceeds 32-bit offsets",
                input.len()
            )));
        }
        if input.is_empty() {
            return Ok(0);
        }

        let blocks = self.config.grid_size(input.len());
        let counts = self.block_counts.ensure_capacity(blocks)?;
        let offsets = self.block_offsets.ensure_capacity(blocks)?;

        count_blocks(input, self.config.block_size, pred, counts);
        Ok(exclusive_scan(counts, offsets) as usize)
    }
}

impl Default for StreamCompactor {
    fn default() -> Self {
        Self::new(LaunchConfig::default())
    }
}
