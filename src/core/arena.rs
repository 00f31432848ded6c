//! Owned, growable buffers for per-dispatch scratch and ray state
//!
//! An [`Arena`] replaces the enlarge-on-demand workspace buffers a GPU
//! renderer keeps around between dispatches. Growth uses fallible
//! reservation so running out of memory surfaces as
//! [`Error::Allocation`] instead of aborting the process.

use crate::core::{Error, Result};

/// A typed buffer that only grows until released
#[derive(Debug)]
pub struct Arena<T> {
    label: &'static str,
    data: Vec<T>,
}

impl<T: Clone + Default> Arena<T> {
    /// Create an empty arena. `label` names the buffer in errors and logs.
    pub fn new(label: &'static str) -> Self {
        Self { label, data: Vec::new() }
    }

    /// Grow to at least `n` elements and return the first `n` of them.
    ///
    /// Existing contents are preserved; new elements are `T::default()`.
    pub fn ensure_capacity(&mut self, n: usize) -> Result<&mut [T]> {
        if self.data.len() < n {
            let additional = n - self.data.len();
            self.data.try_reserve_exact(additional).map_err(|_| Error::Allocation {
                what: self.label,
                requested: n.saturating_mul(std::mem::size_of::<T>()),
            })?;
            self.data.resize(n, T::default());
            log::debug!("Grew arena '{}' to {} elements", self.label, n);
        }
        Ok(&mut self.data[..n])
    }

    /// Number of elements currently allocated
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// First `n` elements.
    ///
    /// # Panics
    /// If `n` exceeds the current capacity.
    pub fn slice(&self, n: usize) -> &[T] {
        &self.data[..n]
    }

    /// First `n` elements, mutably.
    ///
    /// # Panics
    /// If `n` exceeds the current capacity.
    pub fn slice_mut(&mut self, n: usize) -> &mut [T] {
        &mut self.data[..n]
    }

    /// Free the backing memory (workspace teardown)
    pub fn release(&mut self) {
        self.data = Vec::new();
    }
}
