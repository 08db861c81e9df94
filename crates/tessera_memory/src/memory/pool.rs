//! # Pool
//!
//! A growable collection of arenas of one location class.
//!
//! Requests are routed first-fit across arenas (creation order), then
//! first-fit inside the arena. When nothing fits, a new arena of
//! `max(arena_size, request.size)` bytes is created for the request's type
//! filter and appended.

use std::rc::Rc;

use crate::config::PoolConfig;
use crate::device::{BindableResource, MemoryDevice, MemoryLocation, MemoryRequirements};
use crate::error::{MemoryError, MemoryResult};

use super::arena::{Arena, ArenaId, SharedArena};
use super::block::Block;
use super::stats::PoolStats;

/// Arenas of one location class, grown on demand.
///
/// # Thread Safety
///
/// Not thread-safe (and `!Send`). Wrap the whole pool in a mutex-owning
/// thread if several threads must allocate.
///
/// # Example
///
/// ```rust,ignore
/// let device = Rc::new(HostMemoryDevice::new());
/// let mut pool = Pool::new(device, MemoryLocation::HostVisible, PoolConfig::default())?;
///
/// let mut buffer = HostBuffer::new(requirements);
/// let block = pool.allocate_and_bind(&mut buffer)?;
///
/// // Freed when dropped, or explicitly:
/// block.free()?;
/// ```
pub struct Pool<D: MemoryDevice> {
    device: Rc<D>,
    location: MemoryLocation,
    config: PoolConfig,
    arenas: Vec<SharedArena<D>>,
}

impl<D: MemoryDevice> Pool<D> {
    /// Creates an empty pool. No memory is allocated until the first request.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration is invalid.
    pub fn new(device: Rc<D>, location: MemoryLocation, config: PoolConfig) -> MemoryResult<Self> {
        config.validate()?;
        Ok(Self { device, location, config, arenas: Vec::new() })
    }

    /// Location class shared by every arena of the pool.
    #[inline]
    #[must_use]
    pub const fn location(&self) -> MemoryLocation {
        self.location
    }

    /// Pool configuration.
    #[inline]
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of arenas created so far.
    #[inline]
    #[must_use]
    pub fn arena_count(&self) -> usize {
        self.arenas.len()
    }

    /// Arenas in creation order.
    #[inline]
    #[must_use]
    pub fn arenas(&self) -> &[SharedArena<D>] {
        &self.arenas
    }

    /// Finds room for `requirements`, creating an arena if needed.
    ///
    /// # Errors
    ///
    /// - `ZeroSizedAllocation` / `InvalidAlignment` for malformed requests
    /// - `AllocationFailed` if no arena can serve the request and a new one
    ///   cannot be created (the cause is attached)
    pub fn allocate(&mut self, requirements: &MemoryRequirements) -> MemoryResult<Block<D>> {
        let MemoryRequirements { size, alignment, type_filter } = *requirements;
        if size == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        if alignment == 0 {
            return Err(MemoryError::InvalidAlignment(alignment));
        }

        for arena in &self.arenas {
            if !arena.is_supported(requirements) {
                continue;
            }
            if let Some(block) = arena.try_allocate(size, alignment, type_filter)? {
                return Ok(block);
            }
        }

        let arena = self.grow(requirements)?;
        let block = arena
            .try_allocate(size, alignment, type_filter)?
            .ok_or(MemoryError::AllocationFailed { size, alignment, cause: None })?;
        self.arenas.push(arena);
        Ok(block)
    }

    /// Allocates memory for `resource` and binds it.
    ///
    /// If binding fails the block is released again, leaving the pool as it
    /// was apart from a possibly new, empty arena.
    ///
    /// # Errors
    ///
    /// Allocation errors (see [`Pool::allocate`]) and `Device` for binding failures.
    pub fn allocate_and_bind<R: BindableResource<D>>(&mut self, resource: &mut R) -> MemoryResult<Block<D>> {
        let requirements = resource.memory_requirements(&self.device);
        let block = self.allocate(&requirements)?;
        let offset = block.offset();
        block.with_memory(|device, memory| resource.bind_memory(device, memory, offset))?;
        Ok(block)
    }

    /// Summed statistics over all arenas.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            arena_count: self.arenas.len(),
            totals: self.arenas.iter().map(SharedArena::stats).sum(),
        }
    }

    fn grow(&self, requirements: &MemoryRequirements) -> MemoryResult<SharedArena<D>> {
        let size = requirements.size.max(self.config.arena_size);
        if requirements.size > self.config.arena_size {
            tracing::warn!(
                "Request of {} bytes exceeds {:?} arena size {}, creating a dedicated arena",
                requirements.size,
                self.location,
                self.config.arena_size,
            );
        }

        let id = ArenaId {
            location: self.location,
            index: u32::try_from(self.arenas.len()).unwrap_or(u32::MAX),
        };
        let arena = Arena::new(Rc::clone(&self.device), id, size, requirements.type_filter, &self.config)
            .map_err(|cause| MemoryError::AllocationFailed {
                size: requirements.size,
                alignment: requirements.alignment,
                cause: Some(Box::new(cause)),
            })?;

        tracing::info!(
            "{:?} pool grew to {} arenas (+{} bytes)",
            self.location,
            self.arenas.len() + 1,
            size,
        );
        Ok(SharedArena::new(arena))
    }
}

impl<D: MemoryDevice> Drop for Pool<D> {
    fn drop(&mut self) {
        let stats = self.stats();
        tracing::debug!(
            "{:?} pool disposed: {} arenas, {} live blocks",
            self.location,
            stats.arena_count,
            stats.totals.live_blocks,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::host::{HostBuffer, HostImage, HostMemoryDevice};

    fn pool(location: MemoryLocation, arena_size: u64) -> (Rc<HostMemoryDevice>, Pool<HostMemoryDevice>) {
        let device = Rc::new(HostMemoryDevice::new());
        let config = PoolConfig { debug_checks: true, ..PoolConfig::for_location(location) }.with_arena_size(arena_size);
        let pool = Pool::new(Rc::clone(&device), location, config).unwrap();
        (device, pool)
    }

    fn request(size: u64, alignment: u64, type_filter: u32) -> MemoryRequirements {
        MemoryRequirements { size, alignment, type_filter }
    }

    #[test]
    fn test_lazy_arena_creation() {
        let (device, mut pool) = pool(MemoryLocation::DeviceLocal, 4096);
        assert_eq!(pool.arena_count(), 0);
        assert_eq!(device.live_allocations(), 0);

        let block = pool.allocate(&request(100, 16, 0b1111)).unwrap();
        assert_eq!(pool.arena_count(), 1);
        assert_eq!(block.offset(), 0);
        assert_eq!(block.memory_type_index(), 0);
        assert_eq!(device.allocated_bytes(), 4096);
    }

    #[test]
    fn test_reuses_fitting_arena() {
        let (_device, mut pool) = pool(MemoryLocation::DeviceLocal, 4096);
        let a = pool.allocate(&request(1000, 256, 0b1111)).unwrap();
        let b = pool.allocate(&request(1000, 256, 0b1111)).unwrap();

        assert_eq!(pool.arena_count(), 1);
        assert_eq!(a.arena_id(), b.arena_id());
        assert_eq!(b.offset(), 1024);
    }

    #[test]
    fn test_grows_when_full() {
        let (device, mut pool) = pool(MemoryLocation::DeviceLocal, 1024);
        let a = pool.allocate(&request(1024, 1, 0b1111)).unwrap();
        let b = pool.allocate(&request(512, 1, 0b1111)).unwrap();

        assert_eq!(pool.arena_count(), 2);
        assert_eq!(a.arena_id().index, 0);
        assert_eq!(b.arena_id().index, 1);
        assert_eq!(device.live_allocations(), 2);

        // Freed space in the first arena is found first again.
        drop(a);
        let c = pool.allocate(&request(256, 1, 0b1111)).unwrap();
        assert_eq!(c.arena_id().index, 0);
    }

    #[test]
    fn test_type_filter_exclusion() {
        let (_device, mut pool) = pool(MemoryLocation::DeviceLocal, 4096);

        let on_type_3 = pool.allocate(&request(64, 1, 0b1000)).unwrap();
        assert_eq!(on_type_3.memory_type_index(), 3);

        let excluding = request(64, 1, 0b0001);
        assert!(!pool.arenas()[0].is_supported(&excluding));

        let on_type_0 = pool.allocate(&excluding).unwrap();
        assert_eq!(pool.arena_count(), 2);
        assert_eq!(on_type_0.memory_type_index(), 0);
        assert_ne!(on_type_0.arena_id(), on_type_3.arena_id());
    }

    #[test]
    fn test_arena_on_type_2_rejects_mask_without_bit_2() {
        let device = Rc::new(HostMemoryDevice::new());
        let config = PoolConfig {
            require_coherent: false,
            ..PoolConfig::for_location(MemoryLocation::HostVisible).with_arena_size(4096)
        };
        let mut pool = Pool::new(Rc::clone(&device), MemoryLocation::HostVisible, config).unwrap();

        let cached = pool.allocate(&request(64, 1, 0b0100)).unwrap();
        assert_eq!(cached.memory_type_index(), 2);

        let without_bit_2 = request(64, 1, 0b1011);
        assert!(!pool.arenas()[0].is_supported(&without_bit_2));

        let other = pool.allocate(&without_bit_2).unwrap();
        assert_eq!(pool.arena_count(), 2);
        assert_eq!(other.memory_type_index(), 1);
        assert_eq!(other.arena_id().index, 1);
    }

    #[test]
    fn test_oversized_request_gets_dedicated_arena() {
        let (device, mut pool) = pool(MemoryLocation::DeviceLocal, 1024);
        let big = pool.allocate(&request(10_000, 256, 0b1111)).unwrap();

        assert_eq!(big.offset(), 0);
        assert_eq!(pool.arenas()[0].stats().total_size, 10_000);
        assert_eq!(device.allocated_bytes(), 10_000);
    }

    #[test]
    fn test_allocation_failed_carries_cause() {
        let device = Rc::new(HostMemoryDevice::new().with_budget(2048));
        let config = PoolConfig::for_location(MemoryLocation::DeviceLocal).with_arena_size(1024);
        let mut pool = Pool::new(device, MemoryLocation::DeviceLocal, config).unwrap();

        let _a = pool.allocate(&request(1024, 1, 0b1111)).unwrap();
        let _b = pool.allocate(&request(1024, 1, 0b1111)).unwrap();
        let err = pool.allocate(&request(1024, 1, 0b1111)).unwrap_err();

        match err {
            MemoryError::AllocationFailed { size: 1024, cause: Some(cause), .. } => {
                assert!(matches!(*cause, MemoryError::OutOfDeviceMemory { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pool.arena_count(), 2);
    }

    #[test]
    fn test_no_compatible_type() {
        let (_device, mut pool) = pool(MemoryLocation::HostVisible, 1024);
        let err = pool.allocate(&request(64, 1, 0b0001)).unwrap_err();
        match err {
            MemoryError::AllocationFailed { cause: Some(cause), .. } => {
                assert!(matches!(*cause, MemoryError::NoCompatibleMemoryType { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pool.arena_count(), 0);
    }

    #[test]
    fn test_allocate_and_bind() {
        let (device, mut pool) = pool(MemoryLocation::HostVisible, 4096);
        let mut buffer = HostBuffer::new(request(300, 256, device.all_types_filter()));

        let a = pool.allocate_and_bind(&mut buffer).unwrap();
        let binding = buffer.binding().unwrap();
        assert_eq!(binding.offset, a.offset());
        assert_eq!(device.memory_type_of(binding.memory), Some(1));

        let mut second = HostBuffer::new(request(10, 256, device.all_types_filter()));
        let b = pool.allocate_and_bind(&mut second).unwrap();
        assert_eq!(b.offset(), 512);
        assert_eq!(second.binding().unwrap().offset, 512);
    }

    #[test]
    fn test_bind_failure_releases_block() {
        let (_device, mut pool) = pool(MemoryLocation::DeviceLocal, 1 << 20);
        let mut image = HostImage::new(16, 16, 4, 0b0001).unwrap();

        let block = pool.allocate_and_bind(&mut image).unwrap();
        drop(block);

        // Binding an already-bound image fails, and the block must not leak.
        let err = pool.allocate_and_bind(&mut image).unwrap_err();
        assert!(matches!(err, MemoryError::Device(DeviceError::BindFailed(_))));
        assert_eq!(pool.stats().totals.live_blocks, 0);
        assert_eq!(pool.stats().totals.used_bytes, 0);
    }

    #[test]
    fn test_invalid_requests() {
        let (_device, mut pool) = pool(MemoryLocation::DeviceLocal, 1024);
        assert!(matches!(pool.allocate(&request(0, 1, 0b1)), Err(MemoryError::ZeroSizedAllocation)));
        assert!(matches!(pool.allocate(&request(8, 0, 0b1)), Err(MemoryError::InvalidAlignment(0))));
        assert_eq!(pool.arena_count(), 0);
    }

    #[test]
    fn test_invalid_config() {
        let device = Rc::new(HostMemoryDevice::new());
        let config = PoolConfig::default().with_arena_size(0);
        assert!(matches!(
            Pool::new(device, MemoryLocation::DeviceLocal, config),
            Err(MemoryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_stats_track_blocks() {
        let (_device, mut pool) = pool(MemoryLocation::DeviceLocal, 1024);
        let a = pool.allocate(&request(100, 1, 0b1)).unwrap();
        let b = pool.allocate(&request(200, 1, 0b1)).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.arena_count, 1);
        assert_eq!(stats.totals.used_bytes, 300);
        assert_eq!(stats.totals.live_blocks, 2);

        a.free().unwrap();
        drop(b);
        let stats = pool.stats();
        assert_eq!(stats.totals.used_bytes, 0);
        assert_eq!(stats.totals.free_regions, 1);
    }
}
