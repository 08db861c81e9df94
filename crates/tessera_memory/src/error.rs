//! # Memory Error Types
//!
//! All errors that can occur while carving, mapping or releasing GPU memory.

use thiserror::Error;

use crate::device::{DeviceError, MemoryLocation};

/// Errors that can occur in the memory sub-allocator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The device refused the physical allocation backing a new arena.
    #[error("out of device memory: {size} bytes in memory type {memory_type}")]
    OutOfDeviceMemory {
        /// Requested arena size.
        size: u64,
        /// Memory type index the allocation was attempted in.
        memory_type: u32,
    },

    /// No memory type satisfies both the filter and the location's properties.
    #[error("no compatible memory type for {location:?} in filter {type_filter:#b}")]
    NoCompatibleMemoryType {
        /// The location class that was requested.
        location: MemoryLocation,
        /// The type filter that was offered.
        type_filter: u32,
    },

    /// An arena was asked for memory its memory type cannot serve.
    #[error("memory type {memory_type} is not in request filter {type_filter:#b}")]
    IncompatibleMemoryType {
        /// The arena's memory type index.
        memory_type: u32,
        /// The request's type filter.
        type_filter: u32,
    },

    /// Neither an existing arena nor a freshly created one could serve the request.
    #[error("allocation of {size} bytes (alignment {alignment}) failed")]
    AllocationFailed {
        /// Requested size.
        size: u64,
        /// Requested alignment.
        alignment: u64,
        /// Underlying cause, when arena construction failed.
        #[source]
        cause: Option<Box<MemoryError>>,
    },

    /// Zero-byte requests are rejected.
    #[error("zero-sized allocation requested")]
    ZeroSizedAllocation,

    /// Alignment must be at least one.
    #[error("invalid alignment: {0}")]
    InvalidAlignment(u64),

    /// The arena already has an active mapping.
    #[error("arena is already mapped")]
    AlreadyMapped,

    /// Unmap or flush was called while nothing was mapped.
    #[error("arena is not mapped")]
    NotMapped,

    /// Device-local arenas cannot be mapped.
    #[error("arena memory is not host visible")]
    NotHostVisible,

    /// Map offset must lie inside the block.
    #[error("map offset {offset} out of range for block of {size} bytes")]
    MapOffsetOutOfRange {
        /// Offset passed to map.
        offset: u64,
        /// Size of the block.
        size: u64,
    },

    /// The released interval overlaps an interval that is already free.
    #[error("double free detected at offset {offset} ({size} bytes)")]
    DoubleFreeDetected {
        /// Offset of the released interval.
        offset: u64,
        /// Size of the released interval.
        size: u64,
    },

    /// The released interval does not belong to this arena.
    #[error("block at offset {offset} ({size} bytes) is not owned by this arena")]
    BlockNotOwnedByThisArena {
        /// Offset of the released interval.
        offset: u64,
        /// Size of the released interval.
        size: u64,
    },

    /// A device primitive failed (binding, mapping, flushing).
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
