//! # Host Memory Device
//!
//! A software `MemoryDevice` that backs every "physical" allocation with host
//! bytes. Used by the headless server build and by tests: it enforces the
//! same rules a real driver would (heap budget, single mapping per
//! allocation, host-visibility for mapping) and records bindings and flushes
//! so they can be inspected.

use std::collections::HashMap;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::device::{
    BindableResource, DeviceError, MemoryDevice, MemoryProperties, MemoryRequirements, MemoryType,
};

/// Handle to one allocation made by a [`HostMemoryDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostMemory {
    id: u64,
}

impl HostMemory {
    /// Device-unique id of the allocation.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.id
    }
}

/// One flush recorded by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushRecord {
    /// Flushed allocation.
    pub memory: HostMemory,
    /// Start of the flushed range.
    pub offset: u64,
    /// Length of the flushed range.
    pub size: u64,
}

struct Allocation {
    memory_type: u32,
    bytes: Box<[u8]>,
    mapped: bool,
}

#[derive(Default)]
struct DeviceState {
    allocations: HashMap<u64, Allocation>,
    next_id: u64,
    used: u64,
    total_allocations: u64,
    flushes: Vec<FlushRecord>,
}

/// Software device with a configurable memory-type table and heap budget.
pub struct HostMemoryDevice {
    memory_types: Vec<MemoryType>,
    budget: u64,
    state: Mutex<DeviceState>,
}

impl HostMemoryDevice {
    /// Default heap budget: 1 GiB.
    pub const DEFAULT_BUDGET: u64 = 1024 * 1024 * 1024;

    /// Creates a device with the default memory-type table:
    ///
    /// | index | properties                         |
    /// |-------|------------------------------------|
    /// | 0     | device local                       |
    /// | 1     | host visible, coherent             |
    /// | 2     | host visible, cached (not coherent)|
    /// | 3     | device local, host visible         |
    #[must_use]
    pub fn new() -> Self {
        let types = vec![
            MemoryType { index: 0, properties: MemoryProperties::DEVICE_LOCAL, heap_index: 0 },
            MemoryType {
                index: 1,
                properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_COHERENT,
                heap_index: 1,
            },
            MemoryType {
                index: 2,
                properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_CACHED,
                heap_index: 1,
            },
            MemoryType {
                index: 3,
                properties: MemoryProperties::DEVICE_LOCAL | MemoryProperties::HOST_VISIBLE,
                heap_index: 0,
            },
        ];
        Self::with_memory_types(types)
    }

    /// Creates a device exposing exactly `memory_types`.
    #[must_use]
    pub fn with_memory_types(memory_types: Vec<MemoryType>) -> Self {
        Self {
            memory_types,
            budget: Self::DEFAULT_BUDGET,
            state: Mutex::new(DeviceState::default()),
        }
    }

    /// Limits the total bytes the device will hand out.
    #[must_use]
    pub const fn with_budget(mut self, budget: u64) -> Self {
        self.budget = budget;
        self
    }

    /// Bitmask with one bit per exposed memory type.
    #[must_use]
    pub fn all_types_filter(&self) -> u32 {
        self.memory_types
            .iter()
            .filter(|ty| ty.index < 32)
            .fold(0, |mask, ty| mask | (1 << ty.index))
    }

    /// Bytes currently allocated.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.state.lock().used
    }

    /// Number of live physical allocations.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().allocations.len()
    }

    /// Number of physical allocations made over the device's lifetime.
    #[must_use]
    pub fn total_allocations(&self) -> u64 {
        self.state.lock().total_allocations
    }

    /// Memory type an allocation was made in.
    #[must_use]
    pub fn memory_type_of(&self, memory: HostMemory) -> Option<u32> {
        self.state.lock().allocations.get(&memory.id).map(|a| a.memory_type)
    }

    /// Returns true if the allocation is currently mapped.
    #[must_use]
    pub fn is_mapped(&self, memory: HostMemory) -> bool {
        self.state.lock().allocations.get(&memory.id).is_some_and(|a| a.mapped)
    }

    /// Flushes recorded so far.
    #[must_use]
    pub fn flushes(&self) -> Vec<FlushRecord> {
        self.state.lock().flushes.clone()
    }

    /// Copies bytes out of an allocation.
    ///
    /// # Errors
    ///
    /// - `InvalidMemory` for unknown handles or out-of-range reads
    /// - `MapFailed` while the allocation is mapped
    pub fn read_memory(&self, memory: HostMemory, offset: u64, size: u64) -> Result<Vec<u8>, DeviceError> {
        let state = self.state.lock();
        let alloc = unmapped(state.allocations.get(&memory.id))?;
        let range = byte_range(offset, size, alloc.bytes.len())?;
        Ok(alloc.bytes[range].to_vec())
    }

    /// Copies `size` bytes between two allocations, as a transfer queue would.
    ///
    /// # Errors
    ///
    /// - `InvalidMemory` for unknown handles or out-of-range copies
    /// - `MapFailed` while either allocation is mapped
    pub fn copy_memory(
        &self,
        src: HostMemory,
        src_offset: u64,
        dst: HostMemory,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let staged = {
            let alloc = unmapped(state.allocations.get(&src.id))?;
            let range = byte_range(src_offset, size, alloc.bytes.len())?;
            alloc.bytes[range].to_vec()
        };
        let alloc = state.allocations.get_mut(&dst.id).ok_or(DeviceError::InvalidMemory)?;
        if alloc.mapped {
            return Err(DeviceError::MapFailed("memory is mapped".into()));
        }
        let range = byte_range(dst_offset, size, alloc.bytes.len())?;
        alloc.bytes[range].copy_from_slice(&staged);
        Ok(())
    }

    fn properties_of(&self, memory_type: u32) -> Option<MemoryProperties> {
        self.memory_types
            .iter()
            .find(|ty| ty.index == memory_type)
            .map(|ty| ty.properties)
    }
}

impl Default for HostMemoryDevice {
    fn default() -> Self {
        Self::new()
    }
}

// The host holds a live slice over mapped bytes, so the device must not
// create references over them until unmap.
fn unmapped(alloc: Option<&Allocation>) -> Result<&Allocation, DeviceError> {
    let alloc = alloc.ok_or(DeviceError::InvalidMemory)?;
    if alloc.mapped {
        return Err(DeviceError::MapFailed("memory is mapped".into()));
    }
    Ok(alloc)
}

fn byte_range(offset: u64, size: u64, len: usize) -> Result<std::ops::Range<usize>, DeviceError> {
    let start = usize::try_from(offset).map_err(|_| DeviceError::InvalidMemory)?;
    let size = usize::try_from(size).map_err(|_| DeviceError::InvalidMemory)?;
    let end = start.checked_add(size).ok_or(DeviceError::InvalidMemory)?;
    if end > len {
        return Err(DeviceError::InvalidMemory);
    }
    Ok(start..end)
}

impl MemoryDevice for HostMemoryDevice {
    type Memory = HostMemory;

    fn memory_types(&self) -> &[MemoryType] {
        &self.memory_types
    }

    fn allocate_memory(&self, memory_type: u32, size: u64) -> Result<HostMemory, DeviceError> {
        if self.properties_of(memory_type).is_none() {
            return Err(DeviceError::UnknownMemoryType(memory_type));
        }

        let mut state = self.state.lock();
        if state.used.saturating_add(size) > self.budget {
            return Err(DeviceError::OutOfMemory);
        }
        let len = usize::try_from(size).map_err(|_| DeviceError::OutOfMemory)?;

        let id = state.next_id;
        state.next_id += 1;
        state.used += size;
        state.total_allocations += 1;
        state.allocations.insert(
            id,
            Allocation { memory_type, bytes: vec![0u8; len].into_boxed_slice(), mapped: false },
        );
        Ok(HostMemory { id })
    }

    fn free_memory(&self, memory: &HostMemory) {
        let mut state = self.state.lock();
        if let Some(alloc) = state.allocations.remove(&memory.id) {
            state.used -= alloc.bytes.len() as u64;
        }
    }

    fn map_memory(&self, memory: &HostMemory, offset: u64, size: u64) -> Result<NonNull<u8>, DeviceError> {
        let mut state = self.state.lock();
        let alloc = state.allocations.get_mut(&memory.id).ok_or(DeviceError::InvalidMemory)?;

        let visible = self
            .properties_of(alloc.memory_type)
            .is_some_and(|p| p.contains(MemoryProperties::HOST_VISIBLE));
        if !visible {
            return Err(DeviceError::MapFailed(format!(
                "memory type {} is not host visible",
                alloc.memory_type
            )));
        }
        if alloc.mapped {
            return Err(DeviceError::MapFailed("memory is already mapped".into()));
        }

        let range = byte_range(offset, size, alloc.bytes.len())
            .map_err(|_| DeviceError::MapFailed(format!("range {offset}+{size} out of bounds")))?;
        // The boxed slice never moves while the allocation lives, so the
        // address stays valid until the caller unmaps.
        let ptr = alloc.bytes[range].as_mut_ptr();
        let ptr = NonNull::new(ptr).ok_or_else(|| DeviceError::MapFailed("null mapping".into()))?;
        alloc.mapped = true;
        Ok(ptr)
    }

    fn unmap_memory(&self, memory: &HostMemory) {
        if let Some(alloc) = self.state.lock().allocations.get_mut(&memory.id) {
            alloc.mapped = false;
        }
    }

    fn flush_mapped_range(&self, memory: &HostMemory, offset: u64, size: u64) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if !state.allocations.contains_key(&memory.id) {
            return Err(DeviceError::InvalidMemory);
        }
        state.flushes.push(FlushRecord { memory: *memory, offset, size });
        Ok(())
    }
}

/// Where a host resource was bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostBinding {
    /// Backing allocation.
    pub memory: HostMemory,
    /// Offset inside the allocation.
    pub offset: u64,
}

/// A buffer object of the software device.
#[derive(Debug, Clone)]
pub struct HostBuffer {
    requirements: MemoryRequirements,
    binding: Option<HostBinding>,
}

impl HostBuffer {
    /// Creates an unbound buffer with explicit memory requirements.
    #[must_use]
    pub const fn new(requirements: MemoryRequirements) -> Self {
        Self { requirements, binding: None }
    }

    /// Memory requirements the buffer was created with.
    #[must_use]
    pub const fn requirements(&self) -> MemoryRequirements {
        self.requirements
    }

    /// Where the buffer is bound, if it is.
    #[must_use]
    pub const fn binding(&self) -> Option<HostBinding> {
        self.binding
    }
}

/// An image object of the software device.
#[derive(Debug, Clone)]
pub struct HostImage {
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    requirements: MemoryRequirements,
    binding: Option<HostBinding>,
}

impl HostImage {
    /// Images are placed on 4 KiB boundaries, like optimal-tiling images on
    /// most drivers.
    pub const ALIGNMENT: u64 = 4096;

    /// Creates an unbound image restricted to `type_filter`.
    ///
    /// # Errors
    ///
    /// `CreateFailed` if the byte size does not fit in `u64`.
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32, type_filter: u32) -> Result<Self, DeviceError> {
        let size = u64::from(width)
            .checked_mul(u64::from(height))
            .and_then(|texels| texels.checked_mul(u64::from(bytes_per_pixel)))
            .ok_or_else(|| {
                DeviceError::CreateFailed(format!("{width}x{height} image at {bytes_per_pixel} bytes per pixel overflows"))
            })?;
        Ok(Self {
            width,
            height,
            bytes_per_pixel,
            requirements: MemoryRequirements { size, alignment: Self::ALIGNMENT, type_filter },
            binding: None,
        })
    }

    /// Image extent in pixels.
    #[must_use]
    pub const fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Bytes per pixel.
    #[must_use]
    pub const fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// Memory requirements derived from the extent.
    #[must_use]
    pub const fn requirements(&self) -> MemoryRequirements {
        self.requirements
    }

    /// Where the image is bound, if it is.
    #[must_use]
    pub const fn binding(&self) -> Option<HostBinding> {
        self.binding
    }
}

fn bind(
    device: &HostMemoryDevice,
    slot: &mut Option<HostBinding>,
    requirements: &MemoryRequirements,
    memory: HostMemory,
    offset: u64,
) -> Result<(), DeviceError> {
    if slot.is_some() {
        return Err(DeviceError::BindFailed("resource is already bound".into()));
    }
    let memory_type = device.memory_type_of(memory).ok_or(DeviceError::InvalidMemory)?;
    if !requirements.allows(memory_type) {
        return Err(DeviceError::BindFailed(format!(
            "memory type {memory_type} not in filter {:#b}",
            requirements.type_filter
        )));
    }
    if offset % requirements.alignment.max(1) != 0 {
        return Err(DeviceError::BindFailed(format!(
            "offset {offset} violates alignment {}",
            requirements.alignment
        )));
    }
    *slot = Some(HostBinding { memory, offset });
    Ok(())
}

impl BindableResource<HostMemoryDevice> for HostBuffer {
    fn memory_requirements(&self, _device: &HostMemoryDevice) -> MemoryRequirements {
        self.requirements
    }

    fn bind_memory(&mut self, device: &HostMemoryDevice, memory: &HostMemory, offset: u64) -> Result<(), DeviceError> {
        bind(device, &mut self.binding, &self.requirements, *memory, offset)
    }
}

impl BindableResource<HostMemoryDevice> for HostImage {
    fn memory_requirements(&self, _device: &HostMemoryDevice) -> MemoryRequirements {
        self.requirements
    }

    fn bind_memory(&mut self, device: &HostMemoryDevice, memory: &HostMemory, offset: u64) -> Result<(), DeviceError> {
        bind(device, &mut self.binding, &self.requirements, *memory, offset)
    }
}
