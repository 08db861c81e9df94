//! The pair of pools a render device allocates from.

use std::rc::Rc;

use crate::config::MemoryConfig;
use crate::device::{BindableResource, MemoryDevice, MemoryLocation, MemoryRequirements};
use crate::error::MemoryResult;

use super::block::Block;
use super::pool::Pool;
use super::stats::PoolStats;

/// One device-local and one host-visible pool over the same device.
pub struct PoolGroup<D: MemoryDevice> {
    device: Rc<D>,
    device_local: Pool<D>,
    host_visible: Pool<D>,
}

impl<D: MemoryDevice> PoolGroup<D> {
    /// Creates both pools from `config`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if either pool configuration is invalid.
    pub fn new(device: Rc<D>, config: &MemoryConfig) -> MemoryResult<Self> {
        let device_local = Pool::new(
            Rc::clone(&device),
            MemoryLocation::DeviceLocal,
            config.device_local.clone(),
        )?;
        let host_visible = Pool::new(
            Rc::clone(&device),
            MemoryLocation::HostVisible,
            config.host_visible.clone(),
        )?;
        Ok(Self { device, device_local, host_visible })
    }

    /// The shared device.
    #[inline]
    #[must_use]
    pub fn device(&self) -> &Rc<D> {
        &self.device
    }

    /// The pool serving `location`.
    #[must_use]
    pub const fn pool(&self, location: MemoryLocation) -> &Pool<D> {
        match location {
            MemoryLocation::DeviceLocal => &self.device_local,
            MemoryLocation::HostVisible => &self.host_visible,
        }
    }

    /// The pool serving `location`, mutably.
    pub fn pool_mut(&mut self, location: MemoryLocation) -> &mut Pool<D> {
        match location {
            MemoryLocation::DeviceLocal => &mut self.device_local,
            MemoryLocation::HostVisible => &mut self.host_visible,
        }
    }

    /// See [`Pool::allocate`].
    ///
    /// # Errors
    ///
    /// Errors of the selected pool.
    pub fn allocate(&mut self, location: MemoryLocation, requirements: &MemoryRequirements) -> MemoryResult<Block<D>> {
        self.pool_mut(location).allocate(requirements)
    }

    /// See [`Pool::allocate_and_bind`].
    ///
    /// # Errors
    ///
    /// Errors of the selected pool.
    pub fn allocate_and_bind<R: BindableResource<D>>(
        &mut self,
        location: MemoryLocation,
        resource: &mut R,
    ) -> MemoryResult<Block<D>> {
        self.pool_mut(location).allocate_and_bind(resource)
    }

    /// Statistics summed over both pools.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.device_local.stats() + self.host_visible.stats()
    }
}
