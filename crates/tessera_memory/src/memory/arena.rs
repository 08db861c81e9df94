//! # Arena
//!
//! One fixed-size physical allocation carved up by a first-fit free-list.
//!
//! The free-list is kept sorted by offset, so "first fit" means "lowest
//! address that fits" and both neighbours of a released interval can be found
//! with one binary search.

use std::cell::RefCell;
use std::ptr::NonNull;
use std::rc::Rc;

use crate::config::PoolConfig;
use crate::device::{DeviceError, MemoryDevice, MemoryLocation, MemoryProperties, MemoryRequirements, MemoryType};
use crate::error::{MemoryError, MemoryResult};

use super::block::Block;
use super::stats::ArenaStats;

/// Identifies an arena inside its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArenaId {
    /// Location class of the owning pool.
    pub location: MemoryLocation,
    /// Creation index inside the pool.
    pub index: u32,
}

/// A `{offset, size}` interval of an arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    /// Byte offset from the start of the arena.
    pub offset: u64,
    /// Length in bytes.
    pub size: u64,
}

impl Region {
    /// Creates a region.
    #[inline]
    #[must_use]
    pub const fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// One past the last byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.offset + self.size
    }

    /// Returns true if the two regions share at least one byte.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Bytes needed to move `offset` up to a multiple of `alignment`.
#[inline]
#[must_use]
pub const fn alignment_padding(offset: u64, alignment: u64) -> u64 {
    (alignment - offset % alignment) % alignment
}

/// A fixed-size region of device memory with its own free-list.
///
/// # Thread Safety
///
/// Not thread-safe. All calls must come from the render/setup thread.
pub struct Arena<D: MemoryDevice> {
    id: ArenaId,
    device: Rc<D>,
    memory: D::Memory,
    memory_type: MemoryType,
    size: u64,
    /// Sorted by offset, never overlapping, never adjacent after a release.
    free_list: Vec<Region>,
    /// Active mapping, absolute within the arena.
    mapping: Option<Region>,
    live_blocks: usize,
    debug_checks: bool,
}

impl<D: MemoryDevice> Arena<D> {
    /// Allocates the physical memory for a new arena.
    ///
    /// The memory type is the lowest index in `type_filter` that carries the
    /// properties `location` requires (see [`MemoryLocation::required_properties`]).
    ///
    /// # Errors
    ///
    /// - `ZeroSizedAllocation` if `size` is zero
    /// - `NoCompatibleMemoryType` if no memory type qualifies
    /// - `OutOfDeviceMemory` if the device refuses the allocation
    pub fn new(
        device: Rc<D>,
        id: ArenaId,
        size: u64,
        type_filter: u32,
        config: &PoolConfig,
    ) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }

        let location = id.location;
        let required = location.required_properties(config.require_coherent);
        let memory_type = *device
            .find_memory_type(type_filter, required)
            .ok_or(MemoryError::NoCompatibleMemoryType { location, type_filter })?;

        let memory = device
            .allocate_memory(memory_type.index, size)
            .map_err(|e| match e {
                DeviceError::OutOfMemory => MemoryError::OutOfDeviceMemory {
                    size,
                    memory_type: memory_type.index,
                },
                other => MemoryError::Device(other),
            })?;

        tracing::debug!(
            "Arena {:?}/{} created: {} bytes in memory type {} ({:?})",
            location,
            id.index,
            size,
            memory_type.index,
            memory_type.properties,
        );

        Ok(Self {
            id,
            device,
            memory,
            memory_type,
            size,
            free_list: vec![Region::new(0, size)],
            mapping: None,
            live_blocks: 0,
            debug_checks: config.debug_checks,
        })
    }

    /// Arena identifier.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ArenaId {
        self.id
    }

    /// Location class.
    #[inline]
    #[must_use]
    pub const fn location(&self) -> MemoryLocation {
        self.id.location
    }

    /// Total size in bytes, fixed at construction.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// The memory type backing this arena.
    #[inline]
    #[must_use]
    pub const fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    /// The physical allocation, for binding resources.
    #[inline]
    #[must_use]
    pub const fn memory(&self) -> &D::Memory {
        &self.memory
    }

    /// The device the arena allocates from.
    #[inline]
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    pub(super) fn shared_device(&self) -> Rc<D> {
        Rc::clone(&self.device)
    }

    /// Free intervals, sorted by offset.
    #[inline]
    #[must_use]
    pub fn free_regions(&self) -> &[Region] {
        &self.free_list
    }

    /// Number of blocks handed out and not yet released.
    #[inline]
    #[must_use]
    pub const fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    /// Active mapping, if any.
    #[inline]
    #[must_use]
    pub const fn mapping(&self) -> Option<Region> {
        self.mapping
    }

    /// Returns true if this arena's memory type is allowed by the request.
    #[inline]
    #[must_use]
    pub const fn is_supported(&self, requirements: &MemoryRequirements) -> bool {
        requirements.allows(self.memory_type.index)
    }

    /// Carves `size` bytes aligned to `alignment` out of the free-list.
    ///
    /// First fit in address order. Padding in front of the returned region
    /// stays on the free-list. Returns `Ok(None)` when nothing fits, in which
    /// case the free-list is untouched.
    ///
    /// # Errors
    ///
    /// - `ZeroSizedAllocation` / `InvalidAlignment` for malformed requests
    /// - `IncompatibleMemoryType` if `type_filter` excludes this arena
    pub fn try_allocate(&mut self, size: u64, alignment: u64, type_filter: u32) -> MemoryResult<Option<Region>> {
        if size == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        if alignment == 0 {
            return Err(MemoryError::InvalidAlignment(alignment));
        }
        let requirements = MemoryRequirements { size, alignment, type_filter };
        if !self.is_supported(&requirements) {
            return Err(MemoryError::IncompatibleMemoryType {
                memory_type: self.memory_type.index,
                type_filter,
            });
        }

        for index in 0..self.free_list.len() {
            let entry = self.free_list[index];
            let padding = alignment_padding(entry.offset, alignment);
            let Some(padded) = size.checked_add(padding) else {
                continue;
            };
            if entry.size < padded {
                continue;
            }

            let remainder = entry.size - padded;
            match (padding, remainder) {
                (0, 0) => {
                    self.free_list.remove(index);
                }
                (0, _) => {
                    self.free_list[index] = Region::new(entry.offset + padded, remainder);
                }
                (_, 0) => {
                    self.free_list[index] = Region::new(entry.offset, padding);
                }
                _ => {
                    self.free_list[index] = Region::new(entry.offset + padded, remainder);
                    self.free_list.insert(index, Region::new(entry.offset, padding));
                }
            }

            self.live_blocks += 1;
            let region = Region::new(entry.offset + padding, size);
            tracing::trace!(
                "Arena {}: allocated {} bytes at {} (padding {})",
                self.id.index,
                size,
                region.offset,
                padding,
            );
            return Ok(Some(region));
        }

        Ok(None)
    }

    /// Returns a region to the free-list, merging it with both neighbours.
    ///
    /// # Errors
    ///
    /// - `BlockNotOwnedByThisArena` if the region lies outside the arena
    /// - `DoubleFreeDetected` if the region overlaps a free interval
    ///   (only checked when `debug_checks` is enabled)
    pub fn release(&mut self, region: Region) -> MemoryResult<()> {
        let owned = region.size > 0
            && region.offset.checked_add(region.size).is_some_and(|end| end <= self.size);
        if !owned {
            return Err(MemoryError::BlockNotOwnedByThisArena {
                offset: region.offset,
                size: region.size,
            });
        }

        if self.debug_checks && self.free_list.iter().any(|free| free.overlaps(&region)) {
            return Err(MemoryError::DoubleFreeDetected {
                offset: region.offset,
                size: region.size,
            });
        }

        let index = self.free_list.partition_point(|free| free.offset < region.offset);
        let merge_left = index > 0 && self.free_list[index - 1].end() == region.offset;
        let merge_right = index < self.free_list.len() && self.free_list[index].offset == region.end();

        match (merge_left, merge_right) {
            (true, true) => {
                let right = self.free_list.remove(index);
                self.free_list[index - 1].size += region.size + right.size;
            }
            (true, false) => {
                self.free_list[index - 1].size += region.size;
            }
            (false, true) => {
                let right = &mut self.free_list[index];
                right.offset = region.offset;
                right.size += region.size;
            }
            (false, false) => {
                self.free_list.insert(index, region);
            }
        }

        self.live_blocks = self.live_blocks.saturating_sub(1);
        tracing::trace!(
            "Arena {}: released {} bytes at {}",
            self.id.index,
            region.size,
            region.offset,
        );
        Ok(())
    }

    /// Maps `region` starting `offset` bytes into it.
    ///
    /// Returns the host address of the first mapped byte and the mapped length
    /// (`region.size - offset`).
    ///
    /// # Errors
    ///
    /// - `NotHostVisible` for device-local arenas
    /// - `AlreadyMapped` if a mapping is active
    /// - `MapOffsetOutOfRange` if `offset >= region.size`
    pub fn map(&mut self, region: Region, offset: u64) -> MemoryResult<(NonNull<u8>, u64)> {
        if self.id.location != MemoryLocation::HostVisible {
            return Err(MemoryError::NotHostVisible);
        }
        if self.mapping.is_some() {
            return Err(MemoryError::AlreadyMapped);
        }
        if offset >= region.size {
            return Err(MemoryError::MapOffsetOutOfRange { offset, size: region.size });
        }

        let mapped = Region::new(region.offset + offset, region.size - offset);
        let ptr = self.device.map_memory(&self.memory, mapped.offset, mapped.size)?;
        self.mapping = Some(mapped);

        tracing::trace!("Arena {}: mapped {} bytes at {}", self.id.index, mapped.size, mapped.offset);
        Ok((ptr, mapped.size))
    }

    /// Makes host writes to the mapped range visible to the device.
    ///
    /// A no-op on coherent memory.
    ///
    /// # Errors
    ///
    /// `NotMapped` if nothing is mapped.
    pub fn flush(&self) -> MemoryResult<()> {
        let mapped = self.mapping.ok_or(MemoryError::NotMapped)?;
        if !self.memory_type.properties.contains(MemoryProperties::HOST_COHERENT) {
            self.device.flush_mapped_range(&self.memory, mapped.offset, mapped.size)?;
        }
        Ok(())
    }

    /// Releases the active mapping.
    ///
    /// # Errors
    ///
    /// `NotMapped` if nothing is mapped.
    pub fn unmap(&mut self) -> MemoryResult<()> {
        let mapped = self.mapping.take().ok_or(MemoryError::NotMapped)?;
        self.device.unmap_memory(&self.memory);
        tracing::trace!("Arena {}: unmapped {} bytes at {}", self.id.index, mapped.size, mapped.offset);
        Ok(())
    }

    /// Snapshot of the arena's occupancy.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        let free_bytes: u64 = self.free_list.iter().map(|r| r.size).sum();
        ArenaStats {
            total_size: self.size,
            free_bytes,
            used_bytes: self.size - free_bytes,
            free_regions: self.free_list.len(),
            largest_free_region: self.free_list.iter().map(|r| r.size).max().unwrap_or(0),
            live_blocks: self.live_blocks,
        }
    }
}

impl<D: MemoryDevice> Drop for Arena<D> {
    fn drop(&mut self) {
        if self.mapping.take().is_some() {
            self.device.unmap_memory(&self.memory);
        }
        self.device.free_memory(&self.memory);
        tracing::debug!(
            "Arena {:?}/{} destroyed ({} bytes)",
            self.id.location,
            self.id.index,
            self.size,
        );
    }
}

/// An arena shared between its pool and the blocks carved from it.
pub struct SharedArena<D: MemoryDevice> {
    inner: Rc<RefCell<Arena<D>>>,
    id: ArenaId,
}

impl<D: MemoryDevice> SharedArena<D> {
    /// Wraps an arena so blocks can refer back to it.
    #[must_use]
    pub fn new(arena: Arena<D>) -> Self {
        let id = arena.id();
        Self { inner: Rc::new(RefCell::new(arena)), id }
    }

    /// Arena identifier.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ArenaId {
        self.id
    }

    /// See [`Arena::is_supported`].
    #[must_use]
    pub fn is_supported(&self, requirements: &MemoryRequirements) -> bool {
        self.inner.borrow().is_supported(requirements)
    }

    /// See [`Arena::try_allocate`]; a fit is returned as an owned [`Block`].
    ///
    /// # Errors
    ///
    /// Precondition violations reported by the arena.
    pub fn try_allocate(&self, size: u64, alignment: u64, type_filter: u32) -> MemoryResult<Option<Block<D>>> {
        let region = self.inner.borrow_mut().try_allocate(size, alignment, type_filter)?;
        Ok(region.map(|region| Block::new(Rc::clone(&self.inner), self.id, region)))
    }

    /// Runs `f` with read access to the arena.
    pub fn inspect<R>(&self, f: impl FnOnce(&Arena<D>) -> R) -> R {
        f(&self.inner.borrow())
    }

    /// See [`Arena::stats`].
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        self.inner.borrow().stats()
    }
}
