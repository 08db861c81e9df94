//! # Buffers
//!
//! A [`Buffer`] pairs a raw device buffer with the block it is bound to.
//! The raw object is destroyed before its memory goes back to the pool.

use std::fmt;

use bytemuck::Pod;
use tessera_memory::{Block, MemoryError, MemoryLocation};

use crate::error::{RenderError, RenderResult};
use crate::resource::{BufferDesc, ResourceDevice};

/// A buffer bound to pool memory.
pub struct Buffer<D: ResourceDevice> {
    // Field order is drop order: raw before block.
    raw: D::Buffer,
    block: Block<D>,
    desc: BufferDesc,
}

impl<D: ResourceDevice> Buffer<D> {
    pub(crate) fn new(raw: D::Buffer, block: Block<D>, desc: BufferDesc) -> Self {
        Self { raw, block, desc }
    }

    /// The raw device buffer.
    #[must_use]
    pub const fn raw(&self) -> &D::Buffer {
        &self.raw
    }

    /// The backing block.
    #[must_use]
    pub const fn block(&self) -> &Block<D> {
        &self.block
    }

    /// Description the buffer was created from.
    #[must_use]
    pub const fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.desc.size
    }

    /// Pool the buffer was allocated from.
    #[must_use]
    pub const fn location(&self) -> MemoryLocation {
        self.desc.location
    }

    /// Writes `data` at `offset` through a temporary mapping, then flushes.
    ///
    /// # Errors
    ///
    /// - `NotHostVisible` for device-local buffers (use an upload instead)
    /// - `UploadTooLarge` if the data runs past the end of the buffer
    /// - Mapping failures, e.g. `AlreadyMapped` while another block of the
    ///   same arena is mapped
    pub fn write<T: Pod>(&self, offset: u64, data: &[T]) -> RenderResult<()> {
        if self.desc.location != MemoryLocation::HostVisible {
            return Err(MemoryError::NotHostVisible.into());
        }
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = bytes.len() as u64;
        match offset.checked_add(len) {
            Some(end) if end <= self.desc.size => {}
            _ => {
                return Err(RenderError::UploadTooLarge {
                    len: offset.saturating_add(len),
                    capacity: self.desc.size,
                });
            }
        }
        if bytes.is_empty() {
            return Ok(());
        }

        let mut mapped = self.block.map(offset)?;
        mapped.write_bytes(0, bytes)?;
        mapped.flush()?;
        mapped.unmap()?;

        tracing::trace!("Wrote {} bytes at {} into {:?}", len, offset, self.block);
        Ok(())
    }
}

impl<D: ResourceDevice> fmt::Debug for Buffer<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("desc", &self.desc)
            .field("block", &self.block)
            .finish_non_exhaustive()
    }
}
