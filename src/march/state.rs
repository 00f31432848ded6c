//! Structure-of-arrays ray state

use crate::core::{Arena, Result, Vec3};
use crate::compact::StreamCompactor;
use crate::math::Ray;

/// Per-ray marching state, one array per attribute
pub struct RayBatch {
    /// Inside the volume and not yet absorbed
    pub(crate) alive: Arena<bool>,
    /// Sampled by the density sampler this step
    pub(crate) active: Arena<bool>,
    pub(crate) origin: Arena<Vec3>,
    pub(crate) direction: Arena<Vec3>,
    pub(crate) inv_direction: Arena<Vec3>,
    pub(crate) t: Arena<f32>,
    pub(crate) transmittance: Arena<f32>,
    pub(crate) steps: Arena<u32>,
    /// Output pixel the ray belongs to
    pub(crate) pixel: Arena<u32>,
}

impl RayBatch {
    pub fn new() -> Self {
        Self {
            alive: Arena::new("ray alive flags"),
            active: Arena::new("ray active flags"),
            origin: Arena::new("ray origins"),
            direction: Arena::new("ray directions"),
            inv_direction: Arena::new("ray inverse directions"),
            t: Arena::new("ray march parameters"),
            transmittance: Arena::new("ray transmittance"),
            steps: Arena::new("ray step counts"),
            pixel: Arena::new("ray pixel indices"),
        }
    }

    /// Grow every attribute array to hold `n` rays
    pub fn ensure_capacity(&mut self, n: usize) -> Result<()> {
        self.alive.ensure_capacity(n)?;
        self.active.ensure_capacity(n)?;
        self.origin.ensure_capacity(n)?;
        self.direction.ensure_capacity(n)?;
        self.inv_direction.ensure_capacity(n)?;
        self.t.ensure_capacity(n)?;
        self.transmittance.ensure_capacity(n)?;
        self.steps.ensure_capacity(n)?;
        self.pixel.ensure_capacity(n)?;
        Ok(())
    }

    /// Rays this batch can hold without growing
    pub fn capacity(&self) -> usize {
        self.alive.capacity()
    }

    /// Write ray `i`'s initial state
    pub(crate) fn init_ray(&mut self, i: usize, ray: &Ray, t: f32, pixel: u32) {
        self.alive.slice_mut(i + 1)[i] = true;
        self.active.slice_mut(i + 1)[i] = false;
        self.origin.slice_mut(i + 1)[i] = ray.origin;
        self.direction.slice_mut(i + 1)[i] = ray.direction;
        self.inv_direction.slice_mut(i + 1)[i] = ray.inv_direction;
        self.t.slice_mut(i + 1)[i] = t;
        self.transmittance.slice_mut(i + 1)[i] = 1.0;
        self.steps.slice_mut(i + 1)[i] = 0;
        self.pixel.slice_mut(i + 1)[i] = pixel;
    }

    /// Ray `i` as a [`Ray`]
    pub fn ray(&self, i: usize) -> Ray {
        Ray::with_inverse(
            self.origin.slice(i + 1)[i],
            self.direction.slice(i + 1)[i],
            self.inv_direction.slice(i + 1)[i],
        )
    }

    pub fn alive(&self, n: usize) -> &[bool] {
        self.alive.slice(n)
    }

    /// Mutable alive flags, for callers that terminate rays themselves
    pub fn alive_mut(&mut self, n: usize) -> &mut [bool] {
        self.alive.slice_mut(n)
    }

    pub fn active(&self, n: usize) -> &[bool] {
        self.active.slice(n)
    }

    pub fn t(&self, n: usize) -> &[f32] {
        self.t.slice(n)
    }

    pub fn transmittance(&self, n: usize) -> &[f32] {
        self.transmittance.slice(n)
    }

    pub fn steps(&self, n: usize) -> &[u32] {
        self.steps.slice(n)
    }

    pub fn pixels(&self, n: usize) -> &[u32] {
        self.pixel.slice(n)
    }

    /// Compact the first `n` rays of `self` whose alive flag is set into
    /// `dst`, attribute by attribute. Returns the number of survivors.
    pub(crate) fn compact_alive_into(
        &self,
        n: usize,
        dst: &mut RayBatch,
        compactor: &mut StreamCompactor,
    ) -> Result<usize> {
        let alive = self.alive.slice(n);
        let survivors = compact_attribute(compactor, alive, &self.alive, &mut dst.alive, n)?;
        compact_attribute(compactor, alive, &self.active, &mut dst.active, n)?;
        compact_attribute(compactor, alive, &self.origin, &mut dst.origin, n)?;
        compact_attribute(compactor, alive, &self.direction, &mut dst.direction, n)?;
        compact_attribute(compactor, alive, &self.inv_direction, &mut dst.inv_direction, n)?;
        compact_attribute(compactor, alive, &self.t, &mut dst.t, n)?;
        compact_attribute(compactor, alive, &self.transmittance, &mut dst.transmittance, n)?;
        compact_attribute(compactor, alive, &self.steps, &mut dst.steps, n)?;
        compact_attribute(compactor, alive, &self.pixel, &mut dst.pixel, n)?;
        Ok(survivors)
    }
}

impl Default for RayBatch {
    fn default() -> Self {
        Self::new()
    }
}

fn compact_attribute<T>(
    compactor: &mut StreamCompactor,
    alive: &[bool],
    src: &Arena<T>,
    dst: &mut Arena<T>,
    n: usize,
) -> Result<usize>
where
    T: Copy + Default + Send + Sync,
{
    let output = dst.ensure_capacity(n)?;
    let count = compactor.compact_indexed(src.slice(n), output, |i, _| alive[i])?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_and_read_back() {
        let mut batch = RayBatch::new();
        batch.ensure_capacity(2).unwrap();
        let ray = Ray::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Z);
        batch.init_ray(1, &ray, 0.5, 42);
        assert_eq!(batch.pixels(2)[1], 42);
        assert_eq!(batch.t(2)[1], 0.5);
        assert_eq!(batch.transmittance(2)[1], 1.0);
        assert!(batch.alive(2)[1]);
        assert_eq!(batch.ray(1).origin, ray.origin);
        assert_eq!(batch.ray(1).inv_direction, ray.inv_direction);
    }

    #[test]
    fn test_compact_keeps_attributes_together() {
        let mut src = RayBatch::new();
        let mut dst = RayBatch::new();
        src.ensure_capacity(5).unwrap();
        for i in 0..5 {
            let ray = Ray::new(Vec3::splat(i as f32), Vec3::X);
            src.init_ray(i, &ray, i as f32 * 10.0, 100 + i as u32);
        }
        src.alive_mut(5)[0] = false;
        src.alive_mut(5)[3] = false;

        let mut compactor = StreamCompactor::default();
        let n = src.compact_alive_into(5, &mut dst, &mut compactor).unwrap();
        assert_eq!(n, 3);
        assert_eq!(dst.pixels(3), &[101, 102, 104]);
        assert_eq!(dst.t(3), &[10.0, 20.0, 40.0]);
        assert_eq!(dst.ray(2).origin, Vec3::splat(4.0));
        assert!(dst.alive(3).iter().all(|&a| a));
    }
}
