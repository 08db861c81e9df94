//! # Render Device
//!
//! Owns the graphics device and the pools every resource is carved from.
//!
//! ## Upload paths
//!
//! ```text
//! host-visible buffer:  map → write → flush → unmap
//! device-local buffer:  staging block (host-visible) → write → device copy → free staging
//! ```

use std::path::Path;
use std::rc::Rc;

use bytemuck::Pod;
use tessera_memory::{MemoryConfig, MemoryLocation, PoolGroup, PoolStats};

use crate::buffer::Buffer;
use crate::error::{RenderError, RenderResult};
use crate::image::Image;
use crate::resource::{BufferDesc, BufferUsage, ImageDesc, ResourceDevice};

/// A device plus its memory pools.
pub struct RenderDevice<D: ResourceDevice> {
    device: Rc<D>,
    pools: PoolGroup<D>,
}

impl<D: ResourceDevice> RenderDevice<D> {
    /// Creates the device-local and host-visible pools from `config`.
    ///
    /// No memory is allocated until the first resource is created.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if a pool configuration is invalid.
    pub fn new(device: Rc<D>, config: &MemoryConfig) -> RenderResult<Self> {
        let pools = PoolGroup::new(Rc::clone(&device), config)?;
        tracing::debug!(
            "Render device ready: device-local arenas {} bytes, host-visible arenas {} bytes",
            config.device_local.arena_size,
            config.host_visible.arena_size,
        );
        Ok(Self { device, pools })
    }

    /// Like [`RenderDevice::new`] with the configuration read from a TOML file.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the file cannot be read, parsed or validated.
    pub fn from_config_file(device: Rc<D>, path: impl AsRef<Path>) -> RenderResult<Self> {
        let config = MemoryConfig::load(path)?;
        Self::new(device, &config)
    }

    /// The underlying device.
    #[must_use]
    pub fn device(&self) -> &Rc<D> {
        &self.device
    }

    /// The pools resources are allocated from.
    #[must_use]
    pub const fn pools(&self) -> &PoolGroup<D> {
        &self.pools
    }

    /// Creates a buffer and binds it to memory from `desc.location`'s pool.
    ///
    /// # Errors
    ///
    /// - `InvalidDescription` for zero-sized buffers
    /// - Device creation, allocation and binding failures
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> RenderResult<Buffer<D>> {
        if desc.size == 0 {
            return Err(RenderError::InvalidDescription("buffer size is zero".into()));
        }
        let mut raw = self.device.create_buffer(desc)?;
        let block = self.pools.allocate_and_bind(desc.location, &mut raw)?;
        tracing::trace!("Created buffer {:?} in {:?}", desc.usage, block);
        Ok(Buffer::new(raw, block, *desc))
    }

    /// Creates an image bound to device-local memory.
    ///
    /// # Errors
    ///
    /// - `InvalidDescription` for zero extents
    /// - Device creation, allocation and binding failures
    pub fn create_image(&mut self, desc: &ImageDesc) -> RenderResult<Image<D>> {
        if desc.width == 0 || desc.height == 0 {
            return Err(RenderError::InvalidDescription(format!(
                "image extent {}x{} is empty",
                desc.width, desc.height
            )));
        }
        let mut raw = self.device.create_image(desc)?;
        let block = self.pools.allocate_and_bind(MemoryLocation::DeviceLocal, &mut raw)?;
        tracing::trace!("Created {}x{} {:?} image in {:?}", desc.width, desc.height, desc.format, block);
        Ok(Image::new(raw, block, *desc))
    }

    /// Fills the start of `buffer` with `data`.
    ///
    /// Host-visible buffers are written directly. Device-local buffers go
    /// through a host-visible staging buffer that is freed once the copy
    /// has completed.
    ///
    /// # Errors
    ///
    /// - `UploadTooLarge` if `data` does not fit in `buffer`
    /// - Staging allocation, mapping and copy failures
    pub fn upload_buffer<T: Pod>(&mut self, buffer: &Buffer<D>, data: &[T]) -> RenderResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let len = bytes.len() as u64;
        if len > buffer.size() {
            return Err(RenderError::UploadTooLarge { len, capacity: buffer.size() });
        }
        if len == 0 {
            return Ok(());
        }

        match buffer.location() {
            MemoryLocation::HostVisible => buffer.write(0, bytes),
            MemoryLocation::DeviceLocal => {
                let staging = self.create_buffer(&BufferDesc::host_visible(len, BufferUsage::TRANSFER_SRC))?;
                staging.write(0, bytes)?;
                self.device.copy_buffer(staging.raw(), buffer.raw(), len)?;
                tracing::trace!("Uploaded {} bytes through staging {:?}", len, staging.block());
                Ok(())
            }
        }
    }

    /// Occupancy of both pools.
    #[must_use]
    pub fn memory_stats(&self) -> PoolStats {
        self.pools.stats()
    }
}
