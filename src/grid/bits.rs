//! Per-voxel occupancy bits, one per cascade level

/// Maximum number of cascade levels a [`LevelMask`] can describe
pub const MAX_CASCADES: u32 = 8;

/// Occupancy bits of a single voxel across all cascade levels.
///
/// Bit `l` (least significant first) is set when the voxel is occupied at
/// cascade level `l`. The in-memory representation is exactly one byte so a
/// grid's mask array can be persisted as raw bytes.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LevelMask(u8);

impl LevelMask {
    pub const EMPTY: Self = Self(0);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether `level` is occupied.
    ///
    /// # Panics
    /// If `level >= MAX_CASCADES`.
    #[inline]
    pub fn get(self, level: u32) -> bool {
        assert!(level < MAX_CASCADES, "cascade level {} out of range", level);
        self.0 & (1 << level) != 0
    }

    /// Set or clear `level`, leaving every other level untouched.
    ///
    /// # Panics
    /// If `level >= MAX_CASCADES`.
    #[inline]
    pub fn set(&mut self, level: u32, occupied: bool) {
        assert!(level < MAX_CASCADES, "cascade level {} out of range", level);
        if occupied {
            self.0 |= 1 << level;
        } else {
            self.0 &= !(1 << level);
        }
    }

    /// Copy with `level` set to `occupied`
    pub fn with(mut self, level: u32, occupied: bool) -> Self {
        self.set(level, occupied);
        self
    }

    /// Number of occupied levels
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}
