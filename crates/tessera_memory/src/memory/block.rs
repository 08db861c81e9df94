//! # Blocks
//!
//! A [`Block`] is the exclusive right to use one interval of an arena.
//! It is freed explicitly with [`Block::free`] or implicitly on drop, so a
//! block cannot be released twice through this type.

#![allow(unsafe_code)]

use std::cell::RefCell;
use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use bytemuck::Pod;

use crate::device::{DeviceError, MemoryDevice, MemoryLocation};
use crate::error::{MemoryError, MemoryResult};

use super::arena::{Arena, ArenaId, Region};

/// An allocated interval of an arena.
///
/// Holds a reference to its arena (the arena outlives every block carved
/// from it) plus the `{offset, size}` it was handed. The size is the
/// requested size; alignment padding stays with the arena.
pub struct Block<D: MemoryDevice> {
    arena: Rc<RefCell<Arena<D>>>,
    arena_id: ArenaId,
    region: Region,
    released: bool,
}

impl<D: MemoryDevice> Block<D> {
    pub(super) fn new(arena: Rc<RefCell<Arena<D>>>, arena_id: ArenaId, region: Region) -> Self {
        Self { arena, arena_id, region, released: false }
    }

    /// Byte offset inside the arena.
    #[inline]
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.region.offset
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.region.size
    }

    /// The `{offset, size}` interval.
    #[inline]
    #[must_use]
    pub const fn region(&self) -> Region {
        self.region
    }

    /// Identifier of the owning arena.
    #[inline]
    #[must_use]
    pub const fn arena_id(&self) -> ArenaId {
        self.arena_id
    }

    /// Location class of the owning arena.
    #[inline]
    #[must_use]
    pub const fn location(&self) -> MemoryLocation {
        self.arena_id.location
    }

    /// Memory type index of the owning arena.
    #[must_use]
    pub fn memory_type_index(&self) -> u32 {
        self.arena.borrow().memory_type().index
    }

    /// Runs `f` with the device and the arena's physical allocation.
    ///
    /// This is how resources get bound and how transfer paths find the
    /// backing memory of a block. The arena is not borrowed while `f` runs,
    /// so `f` may map or free other blocks of the same arena.
    pub fn with_memory<R>(&self, f: impl FnOnce(&D, &D::Memory) -> R) -> R {
        let (device, memory) = {
            let arena = self.arena.borrow();
            (arena.shared_device(), arena.memory().clone())
        };
        f(&device, &memory)
    }

    /// Maps the block starting `offset` bytes in.
    ///
    /// The mapping stays active until the returned guard is unmapped or dropped.
    ///
    /// # Errors
    ///
    /// - `NotHostVisible` for device-local blocks
    /// - `AlreadyMapped` if another block of the same arena is mapped
    /// - `MapOffsetOutOfRange` if `offset >= size()`
    pub fn map(&self, offset: u64) -> MemoryResult<MappedRange<'_, D>> {
        let mut arena = self.arena.borrow_mut();
        let (ptr, len) = arena.map(self.region, offset)?;
        let Ok(len) = usize::try_from(len) else {
            arena.unmap()?;
            return Err(DeviceError::MapFailed(format!("{len} bytes exceed the address space")).into());
        };
        Ok(MappedRange { block: self, ptr, len, active: true })
    }

    /// Returns the interval to its arena.
    ///
    /// # Errors
    ///
    /// Ownership and double-free violations reported by the arena.
    pub fn free(mut self) -> MemoryResult<()> {
        self.release()
    }

    fn release(&mut self) -> MemoryResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.arena.borrow_mut().release(self.region)
    }
}

impl<D: MemoryDevice> Drop for Block<D> {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::error!(
                "Failed to free block {:?} of arena {:?}: {}",
                self.region,
                self.arena_id,
                err,
            );
        }
    }
}

impl<D: MemoryDevice> fmt::Debug for Block<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("arena", &self.arena_id)
            .field("offset", &self.region.offset)
            .field("size", &self.region.size)
            .finish()
    }
}

/// An active host mapping of (part of) a block.
///
/// Only one exists per arena at a time. Dropping it unmaps.
pub struct MappedRange<'a, D: MemoryDevice> {
    block: &'a Block<D>,
    ptr: NonNull<u8>,
    len: usize,
    active: bool,
}

impl<D: MemoryDevice> MappedRange<'_, D> {
    /// Number of mapped bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is mapped (never the case for a live guard).
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The mapped bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the device guarantees `len` bytes at `ptr` stay valid until
        // unmap, and only this guard can unmap the arena. No other guard for
        // the same arena can exist (AlreadyMapped), and `MemoryDevice`
        // implementors must not touch mapped bytes themselves until unmap.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The mapped bytes, writable.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: see `as_slice`; `&mut self` makes the borrow exclusive.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Copies `bytes` into the mapping at `offset`.
    ///
    /// # Errors
    ///
    /// `MapOffsetOutOfRange` if the write does not fit.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> MemoryResult<()> {
        let end = offset.checked_add(bytes.len()).filter(|&end| end <= self.len);
        let Some(end) = end else {
            return Err(MemoryError::MapOffsetOutOfRange {
                offset: offset as u64,
                size: self.len as u64,
            });
        };
        self.as_mut_slice()[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies plain-old-data values into the mapping at `offset`.
    ///
    /// # Errors
    ///
    /// `MapOffsetOutOfRange` if the write does not fit.
    pub fn write_pod<T: Pod>(&mut self, offset: usize, values: &[T]) -> MemoryResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(values))
    }

    /// Makes writes visible to the device (no-op on coherent memory).
    ///
    /// # Errors
    ///
    /// Device flush failures.
    pub fn flush(&self) -> MemoryResult<()> {
        self.block.arena.borrow().flush()
    }

    /// Releases the mapping.
    ///
    /// # Errors
    ///
    /// `NotMapped` if the arena lost its mapping (should not happen).
    pub fn unmap(mut self) -> MemoryResult<()> {
        self.active = false;
        self.block.arena.borrow_mut().unmap()
    }
}

impl<D: MemoryDevice> Drop for MappedRange<'_, D> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Err(err) = self.block.arena.borrow_mut().unmap() {
            tracing::error!("Failed to unmap arena {:?}: {}", self.block.arena_id, err);
        }
    }
}

impl<D: MemoryDevice> fmt::Debug for MappedRange<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRange")
            .field("block", self.block)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::host::HostMemoryDevice;
    use crate::memory::SharedArena;

    const ALL_TYPES: u32 = 0b1111;

    fn shared(device: &Rc<HostMemoryDevice>, location: MemoryLocation, size: u64) -> SharedArena<HostMemoryDevice> {
        let config = PoolConfig { debug_checks: true, ..PoolConfig::for_location(location) };
        let arena = Arena::new(Rc::clone(device), ArenaId { location, index: 0 }, size, ALL_TYPES, &config).unwrap();
        SharedArena::new(arena)
    }

    #[test]
    fn test_drop_frees_interval() {
        let device = Rc::new(HostMemoryDevice::new());
        let arena = shared(&device, MemoryLocation::DeviceLocal, 1024);

        let block = arena.try_allocate(100, 1, ALL_TYPES).unwrap().unwrap();
        assert_eq!(arena.stats().live_blocks, 1);
        drop(block);

        assert_eq!(arena.stats().live_blocks, 0);
        assert_eq!(arena.inspect(|a| a.free_regions().to_vec()), vec![Region::new(0, 1024)]);
    }

    #[test]
    fn test_explicit_free() {
        let device = Rc::new(HostMemoryDevice::new());
        let arena = shared(&device, MemoryLocation::DeviceLocal, 1024);

        let block = arena.try_allocate(1024, 1, ALL_TYPES).unwrap().unwrap();
        assert!(arena.try_allocate(1, 1, ALL_TYPES).unwrap().is_none());
        block.free().unwrap();

        let again = arena.try_allocate(1024, 1, ALL_TYPES).unwrap().unwrap();
        assert_eq!(again.offset(), 0);
    }

    #[test]
    fn test_arena_outlives_its_pool_handle() {
        let device = Rc::new(HostMemoryDevice::new());
        let block = {
            let arena = shared(&device, MemoryLocation::DeviceLocal, 512);
            arena.try_allocate(64, 1, ALL_TYPES).unwrap().unwrap()
        };
        assert_eq!(device.live_allocations(), 1);

        drop(block);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_write_through_mapping() {
        let device = Rc::new(HostMemoryDevice::new());
        let arena = shared(&device, MemoryLocation::HostVisible, 1024);
        let block = arena.try_allocate(16, 256, ALL_TYPES).unwrap().unwrap();
        let _other = arena.try_allocate(16, 256, ALL_TYPES).unwrap().unwrap();

        {
            let mut mapped = block.map(4).unwrap();
            assert_eq!(mapped.len(), 12);
            mapped.write_pod(0, &[1u32, 2, 3]).unwrap();
            mapped.flush().unwrap();
            mapped.unmap().unwrap();
        }

        let memory = block.with_memory(|_, memory| *memory);
        let bytes = device.read_memory(memory, 0, 16).unwrap();
        assert_eq!(&bytes[4..], bytemuck::cast_slice::<u32, u8>(&[1, 2, 3]));
        assert!(!device.is_mapped(memory));
    }

    #[test]
    fn test_device_transfers_refused_while_mapped() {
        let device = Rc::new(HostMemoryDevice::new());
        let arena = shared(&device, MemoryLocation::HostVisible, 1024);
        let block = arena.try_allocate(16, 1, ALL_TYPES).unwrap().unwrap();
        let memory = block.with_memory(|_, memory| *memory);
        let source = device.allocate_memory(1, 16).unwrap();

        let mut mapped = block.map(0).unwrap();
        let slice = mapped.as_mut_slice();
        slice[0] = 1;
        assert!(matches!(device.read_memory(memory, 0, 16), Err(DeviceError::MapFailed(_))));
        assert!(matches!(device.copy_memory(source, 0, memory, 0, 16), Err(DeviceError::MapFailed(_))));
        assert_eq!(slice[0], 1);
        mapped.unmap().unwrap();

        assert_eq!(device.read_memory(memory, 0, 1).unwrap(), vec![1]);
    }

    #[test]
    fn test_arena_usable_inside_with_memory() {
        let device = Rc::new(HostMemoryDevice::new());
        let arena = shared(&device, MemoryLocation::HostVisible, 1024);
        let block = arena.try_allocate(16, 1, ALL_TYPES).unwrap().unwrap();
        let other = arena.try_allocate(16, 1, ALL_TYPES).unwrap().unwrap();

        let offset = block.with_memory(|_, _| {
            let mut mapped = other.map(0).unwrap();
            mapped.write_bytes(0, &[9u8; 16]).unwrap();
            drop(mapped);
            arena.try_allocate(32, 1, ALL_TYPES).unwrap().unwrap().offset()
        });
        other.free().unwrap();

        assert_eq!(offset, 32);
        assert_eq!(arena.stats().live_blocks, 1);
    }

    #[test]
    fn test_second_map_in_same_arena_fails() {
        let device = Rc::new(HostMemoryDevice::new());
        let arena = shared(&device, MemoryLocation::HostVisible, 1024);
        let a = arena.try_allocate(64, 1, ALL_TYPES).unwrap().unwrap();
        let b = arena.try_allocate(64, 1, ALL_TYPES).unwrap().unwrap();

        let mapped = a.map(0).unwrap();
        assert_eq!(b.map(0).unwrap_err(), MemoryError::AlreadyMapped);
        assert_eq!(a.map(0).unwrap_err(), MemoryError::AlreadyMapped);

        drop(mapped);
        assert!(b.map(0).is_ok());
    }

    #[test]
    fn test_write_out_of_range() {
        let device = Rc::new(HostMemoryDevice::new());
        let arena = shared(&device, MemoryLocation::HostVisible, 1024);
        let block = arena.try_allocate(8, 1, ALL_TYPES).unwrap().unwrap();

        let mut mapped = block.map(0).unwrap();
        assert_eq!(
            mapped.write_bytes(4, &[0u8; 8]),
            Err(MemoryError::MapOffsetOutOfRange { offset: 4, size: 8 })
        );
        assert!(mapped.write_bytes(0, &[7u8; 8]).is_ok());
        assert_eq!(mapped.as_slice(), &[7u8; 8]);
    }

    #[test]
    fn test_debug_format() {
        let device = Rc::new(HostMemoryDevice::new());
        let arena = shared(&device, MemoryLocation::DeviceLocal, 1024);
        let block = arena.try_allocate(32, 1, ALL_TYPES).unwrap().unwrap();
        let text = format!("{block:?}");
        assert!(text.contains("offset: 0"));
        assert!(text.contains("size: 32"));
    }
}
