//! Warp-level vote primitives
//!
//! A warp is a group of [`WARP_SIZE`] consecutive lanes. A ballot packs one
//! predicate result per lane into a `u32`; counts and per-lane offsets are
//! population counts of that mask.

/// Lanes per warp
pub const WARP_SIZE: usize = 32;

/// Evaluate `pred` on every lane of one warp and pack the results.
///
/// `base` is the global index of lane 0, handed to the predicate so it can
/// consult arrays parallel to the input.
#[inline]
pub fn ballot<T, P>(lanes: &[T], base: usize, pred: &P) -> u32
where
    P: Fn(usize, &T) -> bool,
{
    debug_assert!(lanes.len() <= WARP_SIZE);
    lanes.iter().enumerate().fold(0u32, |mask, (lane, item)| {
        if pred(base + lane, item) {
            mask | (1 << lane)
        } else {
            mask
        }
    })
}

/// Number of set lanes strictly below `lane`: the lane's exclusive prefix
/// count within its warp.
#[inline]
pub fn lane_prefix(mask: u32, lane: u32) -> u32 {
    debug_assert!(lane < WARP_SIZE as u32);
    (mask & ((1u32 << lane) - 1)).count_ones()
}

/// Iterate the set lanes of a ballot in ascending order
#[inline]
pub fn set_lanes(mask: u32) -> impl Iterator<Item = u32> {
    let mut remaining = mask;
    std::iter::from_fn(move || {
        if remaining == 0 {
            None
        } else {
            let lane = remaining.trailing_zeros();
            remaining &= remaining - 1;
            Some(lane)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ballot_packs_lanes() {
        let lanes = [1, 0, 1, 1, 0];
        let mask = ballot(&lanes, 0, &|_, v: &i32| *v != 0);
        assert_eq!(mask, 0b01101);
    }

    #[test]
    fn test_ballot_full_warp() {
        let lanes = [true; WARP_SIZE];
        assert_eq!(ballot(&lanes, 0, &|_, v: &bool| *v), u32::MAX);
    }

    #[test]
    fn test_ballot_passes_global_index() {
        let lanes = [0u8; 4];
        let mask = ballot(&lanes, 64, &|i, _| i % 2 == 0);
        assert_eq!(mask, 0b0101);
    }

    #[test]
    fn test_lane_prefix() {
        let mask = 0b1011_0110;
        assert_eq!(lane_prefix(mask, 0), 0);
        assert_eq!(lane_prefix(mask, 1), 0);
        assert_eq!(lane_prefix(mask, 2), 1);
        assert_eq!(lane_prefix(mask, 4), 2);
        assert_eq!(lane_prefix(mask, 5), 3);
        assert_eq!(lane_prefix(mask, 7), 4);
        assert_eq!(lane_prefix(u32::MAX, 31), 31);
    }

    #[test]
    fn test_set_lanes() {
        let lanes: Vec<u32> = set_lanes(0b1000_0101).collect();
        assert_eq!(lanes, vec![0, 2, 7]);
        assert_eq!(set_lanes(0).count(), 0);
        assert_eq!(set_lanes(u32::MAX).count(), 32);
    }
}
