//! # Device Interface
//!
//! The seam between the sub-allocator and the graphics API.
//!
//! The allocator never creates buffers or images. It only needs:
//! 1. The memory-type table (to pick a type for a new arena)
//! 2. Physical allocate / free (one call per arena)
//! 3. Map / unmap / flush for host-visible memory
//! 4. A way to bind memory + offset to a caller-owned resource

use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::ptr::NonNull;

use thiserror::Error;

/// Where an arena's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Fast GPU memory, not CPU-accessible.
    DeviceLocal,
    /// CPU-mappable memory, used for staging and uniforms.
    HostVisible,
}

impl MemoryLocation {
    /// Properties a memory type must carry to back this location.
    ///
    /// Host-visible memory additionally requires coherence unless the caller
    /// opts out (then writes must be flushed explicitly).
    #[must_use]
    pub const fn required_properties(self, require_coherent: bool) -> MemoryProperties {
        match self {
            Self::DeviceLocal => MemoryProperties::DEVICE_LOCAL,
            Self::HostVisible if require_coherent => MemoryProperties(
                MemoryProperties::HOST_VISIBLE.0 | MemoryProperties::HOST_COHERENT.0,
            ),
            Self::HostVisible => MemoryProperties::HOST_VISIBLE,
        }
    }
}

/// Property flags of a memory type.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MemoryProperties(pub u32);

impl MemoryProperties {
    /// No properties.
    pub const NONE: Self = Self(0);
    /// Memory is local to the GPU.
    pub const DEVICE_LOCAL: Self = Self(1 << 0);
    /// Memory can be mapped by the host.
    pub const HOST_VISIBLE: Self = Self(1 << 1);
    /// Host writes are visible to the device without a flush.
    pub const HOST_COHERENT: Self = Self(1 << 2);
    /// Host reads are cached.
    pub const HOST_CACHED: Self = Self(1 << 3);

    /// Returns true if every flag in `other` is set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MemoryProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for MemoryProperties {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for MemoryProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(MemoryProperties, &str); 4] = [
            (MemoryProperties::DEVICE_LOCAL, "DEVICE_LOCAL"),
            (MemoryProperties::HOST_VISIBLE, "HOST_VISIBLE"),
            (MemoryProperties::HOST_COHERENT, "HOST_COHERENT"),
            (MemoryProperties::HOST_CACHED, "HOST_CACHED"),
        ];

        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// One entry of the device's memory-type table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryType {
    /// Index used in type filters (bit `index`).
    pub index: u32,
    /// Property flags.
    pub properties: MemoryProperties,
    /// Heap this type allocates from.
    pub heap_index: u32,
}

/// Memory requirements reported by the device for one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryRequirements {
    /// Bytes required.
    pub size: u64,
    /// Required offset alignment.
    pub alignment: u64,
    /// Bitmask of acceptable memory-type indices.
    pub type_filter: u32,
}

impl MemoryRequirements {
    /// Returns true if memory type `index` is acceptable for this request.
    #[inline]
    #[must_use]
    pub const fn allows(&self, index: u32) -> bool {
        index < 32 && self.type_filter & (1 << index) != 0
    }
}

/// Errors reported by device primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The heap backing the memory type is exhausted.
    #[error("device heap exhausted")]
    OutOfMemory,

    /// The memory type index does not exist.
    #[error("unknown memory type {0}")]
    UnknownMemoryType(u32),

    /// A memory handle that was never allocated or already freed.
    #[error("invalid memory handle")]
    InvalidMemory,

    /// The memory type cannot be mapped, or the range is invalid.
    #[error("memory map failed: {0}")]
    MapFailed(String),

    /// Binding memory to a resource failed.
    #[error("resource binding failed: {0}")]
    BindFailed(String),

    /// The device cannot create a resource with the given description.
    #[error("resource creation failed: {0}")]
    CreateFailed(String),
}

/// Physical memory primitives of a graphics device.
///
/// Methods take `&self` the way API device objects do; implementations are
/// responsible for their own interior bookkeeping.
pub trait MemoryDevice {
    /// Handle to one physical allocation. Cloning copies the handle, not the memory.
    type Memory: Clone + fmt::Debug;

    /// The device's memory-type table.
    fn memory_types(&self) -> &[MemoryType];

    /// Allocates `size` bytes in memory type `memory_type`.
    ///
    /// # Errors
    ///
    /// `DeviceError::OutOfMemory` when the heap cannot serve the request.
    fn allocate_memory(&self, memory_type: u32, size: u64) -> Result<Self::Memory, DeviceError>;

    /// Releases a physical allocation. The handle must not be used afterwards.
    fn free_memory(&self, memory: &Self::Memory);

    /// Maps `size` bytes at `offset` and returns the host address of the first byte.
    ///
    /// The address stays valid until `unmap_memory` is called for `memory`.
    /// Until then the host owns the mapped bytes: the device must not read or
    /// write them through any other path.
    ///
    /// # Errors
    ///
    /// `DeviceError::MapFailed` if the memory is not host visible or already mapped.
    fn map_memory(
        &self,
        memory: &Self::Memory,
        offset: u64,
        size: u64,
    ) -> Result<NonNull<u8>, DeviceError>;

    /// Releases the mapping of `memory`.
    fn unmap_memory(&self, memory: &Self::Memory);

    /// Makes host writes in the range visible to the device.
    ///
    /// # Errors
    ///
    /// `DeviceError::InvalidMemory` for unknown handles.
    fn flush_mapped_range(
        &self,
        memory: &Self::Memory,
        offset: u64,
        size: u64,
    ) -> Result<(), DeviceError>;

    /// Picks the lowest memory-type index allowed by `type_filter` that
    /// carries every flag in `required`.
    fn find_memory_type(&self, type_filter: u32, required: MemoryProperties) -> Option<&MemoryType> {
        self.memory_types().iter().find(|ty| {
            ty.index < 32 && type_filter & (1 << ty.index) != 0 && ty.properties.contains(required)
        })
    }
}

/// A caller-owned graphics resource (buffer, image) that memory can be bound to.
pub trait BindableResource<D: MemoryDevice + ?Sized> {
    /// Size, alignment and type filter the device requires for this resource.
    fn memory_requirements(&self, device: &D) -> MemoryRequirements;

    /// Binds `memory` at `offset` to the resource.
    ///
    /// # Errors
    ///
    /// `DeviceError::BindFailed` if the device rejects the binding.
    fn bind_memory(&mut self, device: &D, memory: &D::Memory, offset: u64) -> Result<(), DeviceError>;
}
