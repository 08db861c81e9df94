//! Occupancy statistics.

use std::iter::Sum;
use std::ops::Add;

/// Occupancy of a single arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Arena size in bytes.
    pub total_size: u64,
    /// Bytes on the free-list (includes alignment padding).
    pub free_bytes: u64,
    /// Bytes held by live blocks.
    pub used_bytes: u64,
    /// Number of free intervals.
    pub free_regions: usize,
    /// Largest single free interval.
    pub largest_free_region: u64,
    /// Blocks handed out and not yet freed.
    pub live_blocks: usize,
}

impl ArenaStats {
    /// Share of free bytes that cannot be served as one contiguous request.
    ///
    /// `0.0` when all free memory is one interval (or nothing is free).
    /// Byte counts above 2^53 lose precision, which a ratio tolerates.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - self.largest_free_region as f64 / self.free_bytes as f64
    }
}

/// Occupancy of a pool (sum over its arenas).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of arenas.
    pub arena_count: usize,
    /// Summed arena statistics.
    pub totals: ArenaStats,
}

impl Add for ArenaStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            total_size: self.total_size + rhs.total_size,
            free_bytes: self.free_bytes + rhs.free_bytes,
            used_bytes: self.used_bytes + rhs.used_bytes,
            free_regions: self.free_regions + rhs.free_regions,
            largest_free_region: self.largest_free_region.max(rhs.largest_free_region),
            live_blocks: self.live_blocks + rhs.live_blocks,
        }
    }
}

impl Sum for ArenaStats {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl Add for PoolStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            arena_count: self.arena_count + rhs.arena_count,
            totals: self.totals + rhs.totals,
        }
    }
}
