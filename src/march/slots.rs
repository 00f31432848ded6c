//! Two-slot ray state arena

use rayon::prelude::*;

use crate::compact::StreamCompactor;
use crate::core::{Error, Result};
use crate::math::{Aabb, Ray};
use super::state::RayBatch;

/// Fraction of the scene extent rays start inside the bounds, so the first
/// sample point is not lost to rounding on the boundary
const ENTRY_EPSILON: f32 = 1e-5;

/// Double-buffered ray state.
///
/// `current` names the slot holding live state. Compaction always reads
/// `slots[current]` and writes `slots[1 - current]`, then flips `current`,
/// so a slot is never read and written by the same pass.
pub struct RaySlots {
    slots: [RayBatch; 2],
    current: usize,
    len: usize,
}

impl RaySlots {
    pub fn new() -> Self {
        Self {
            slots: [RayBatch::new(), RayBatch::new()],
            current: 0,
            len: 0,
        }
    }

    /// Grow both slots to hold `n` rays
    pub fn ensure_capacity(&mut self, n: usize) -> Result<()> {
        self.slots[0].ensure_capacity(n)?;
        self.slots[1].ensure_capacity(n)?;
        Ok(())
    }

    /// Start a new batch: every ray alive with full transmittance.
    ///
    /// Rays start at their entry into `bounds`. Rays that miss it start at
    /// infinity and are retired by the first march step.
    pub fn reset(&mut self, rays: &[Ray], pixels: &[u32], bounds: &Aabb) -> Result<()> {
        if rays.len() != pixels.len() {
            return Err(Error::Launch(format!(
                "{} rays but {} pixel indices",
                rays.len(),
                pixels.len()
            )));
        }
        let n = rays.len();
        let nudge = bounds.size().max_element() * ENTRY_EPSILON;
        self.ensure_capacity(n)?;
        self.current = 0;
        self.len = n;

        let batch = &mut self.slots[0];
        batch.alive.slice_mut(n).par_iter_mut().for_each(|a| *a = true);
        batch.active.slice_mut(n).par_iter_mut().for_each(|a| *a = false);
        batch.transmittance.slice_mut(n).par_iter_mut().for_each(|tr| *tr = 1.0);
        batch.steps.slice_mut(n).par_iter_mut().for_each(|s| *s = 0);
        batch.pixel.slice_mut(n).copy_from_slice(pixels);
        (
            batch.origin.slice_mut(n),
            batch.direction.slice_mut(n),
            batch.inv_direction.slice_mut(n),
            batch.t.slice_mut(n),
        )
            .into_par_iter()
            .zip(rays.par_iter())
            .for_each(|((origin, direction, inv_direction, t), ray)| {
                *origin = ray.origin;
                *direction = ray.direction;
                *inv_direction = ray.inv_direction;
                *t = ray.intersects_aabb(bounds).map_or(f32::INFINITY, |(t_near, _)| t_near + nudge);
            });

        log::debug!("Reset ray slots with {} rays", n);
        Ok(())
    }

    /// Number of rays in the current slot
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Index of the slot holding live state
    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current(&self) -> &RayBatch {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut RayBatch {
        &mut self.slots[self.current]
    }

    /// Move every alive ray of the current slot into the other slot, in
    /// order, and make that slot current. Returns the new ray count.
    pub fn compact_alive(&mut self, compactor: &mut StreamCompactor) -> Result<usize> {
        let n = self.len;
        let [first, second] = &mut self.slots;
        let (src, dst) = if self.current == 0 { (&*first, second) } else { (&*second, first) };

        let survivors = src.compact_alive_into(n, dst, compactor)?;
        debug_assert!(survivors <= n);

        self.current = 1 - self.current;
        self.len = survivors;
        log::trace!("Compacted rays {} -> {}", n, survivors);
        Ok(survivors)
    }

    /// Free both slots (batch teardown)
    pub fn release(&mut self) {
        self.slots = [RayBatch::new(), RayBatch::new()];
        self.current = 0;
        self.len = 0;
    }
}

impl Default for RaySlots {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Vec3;

    fn rays(n: usize) -> (Vec<Ray>, Vec<u32>) {
        let rays = (0..n)
            .map(|i| Ray::new(Vec3::new(i as f32 * 0.1, 0.0, -5.0), Vec3::Z))
            .collect();
        (rays, (0..n as u32).collect())
    }

    #[test]
    fn test_reset_all_alive() {
        let (rays, pixels) = rays(4);
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &Aabb::cube(Vec3::ZERO, 1.0)).unwrap();
        assert_eq!(slots.len(), 4);
        assert!(slots.current().alive(4).iter().all(|&a| a));
        assert!(slots.current().t(4).iter().all(|&t| (t - 4.0).abs() < 1e-4));
    }

    #[test]
    fn test_reset_miss_starts_at_infinity() {
        let rays = vec![Ray::new(Vec3::new(5.0, 5.0, -5.0), Vec3::Z)];
        let mut slots = RaySlots::new();
        slots.reset(&rays, &[0], &Aabb::cube(Vec3::ZERO, 1.0)).unwrap();
        assert_eq!(slots.current().t(1)[0], f32::INFINITY);
    }

    #[test]
    fn test_reset_rejects_pixel_count_mismatch() {
        let (rays, _) = rays(2);
        let mut slots = RaySlots::new();
        let result = slots.reset(&rays, &[0], &Aabb::cube(Vec3::ZERO, 1.0));
        assert!(matches!(result, Err(Error::Launch(_))));
        assert_eq!(slots.len(), 0);
    }

    #[test]
    fn test_dead_rays_removed_in_order() {
        let (rays, pixels) = rays(4);
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &Aabb::cube(Vec3::ZERO, 1.0)).unwrap();
        slots.current_mut().alive_mut(4)[1] = false;
        slots.current_mut().alive_mut(4)[3] = false;

        let mut compactor = StreamCompactor::default();
        let alive = slots.compact_alive(&mut compactor).unwrap();
        assert_eq!(alive, 2);
        assert_eq!(slots.current_index(), 1);
        assert_eq!(slots.current().pixels(2), &[0, 2]);
        assert_eq!(slots.current().ray(1).origin, Vec3::new(0.2, 0.0, -5.0));
    }

    #[test]
    fn test_slots_alternate() {
        let (rays, pixels) = rays(3);
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &Aabb::cube(Vec3::ZERO, 1.0)).unwrap();
        let mut compactor = StreamCompactor::default();
        slots.compact_alive(&mut compactor).unwrap();
        slots.current_mut().alive_mut(3)[0] = false;
        slots.compact_alive(&mut compactor).unwrap();
        assert_eq!(slots.current_index(), 0);
        assert_eq!(slots.current().pixels(slots.len()), &[1, 2]);
    }

    #[test]
    fn test_count_never_increases() {
        let (rays, pixels) = rays(100);
        let mut slots = RaySlots::new();
        slots.reset(&rays, &pixels, &Aabb::cube(Vec3::ZERO, 1.0)).unwrap();
        let mut compactor = StreamCompactor::default();
        let mut previous = slots.len();
        for step in 0..5 {
            let n = slots.len();
            for (i, alive) in slots.current_mut().alive_mut(n).iter_mut().enumerate() {
                if (i + step) % 3 == 0 {
                    *alive = false;
                }
            }
            let count = slots.compact_alive(&mut compactor).unwrap();
            assert!(count <= previous);
            previous = count;
        }
    }
}
