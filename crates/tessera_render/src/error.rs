//! # Render Error Types

use tessera_memory::{DeviceError, MemoryError};
use thiserror::Error;

/// Errors that can occur while creating or filling GPU resources.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The memory sub-allocator failed.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// A device primitive failed (creation, copy).
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Upload data does not fit in the destination.
    #[error("upload of {len} bytes exceeds buffer of {capacity} bytes")]
    UploadTooLarge {
        /// Bytes offered.
        len: u64,
        /// Buffer size.
        capacity: u64,
    },

    /// A resource description is unusable (zero size, zero extent).
    #[error("invalid resource description: {0}")]
    InvalidDescription(String),
}

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;
