//! # TESSERA Memory
//!
//! GPU memory sub-allocator designed for:
//! - A handful of large physical allocations per device
//! - Thousands of buffers and images carved out of them
//! - Predictable, synchronous failure (no hidden retries)
//!
//! ## Architecture Rules
//!
//! 1. **Arenas never resize** - A full pool grows by adding arenas
//! 2. **First fit everywhere** - Across arenas in creation order, inside an arena by address
//! 3. **Blocks own their interval** - Dropping a block frees it
//! 4. **One mapping per arena** - A second map fails with `AlreadyMapped`
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use tessera_memory::{HostMemoryDevice, MemoryConfig, MemoryLocation, PoolGroup};
//!
//! let device = Rc::new(HostMemoryDevice::new());
//! let mut pools = PoolGroup::new(device, &MemoryConfig::default())?;
//! let block = pools.allocate(MemoryLocation::HostVisible, &requirements)?;
//! let mut mapped = block.map(0)?;
//! mapped.write_pod(0, &vertices)?;
//! mapped.flush()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod device;
pub mod error;
pub mod host;
pub mod memory;

pub use config::{MemoryConfig, PoolConfig};
pub use device::{
    BindableResource, DeviceError, MemoryDevice, MemoryLocation, MemoryProperties, MemoryRequirements,
    MemoryType,
};
pub use error::{MemoryError, MemoryResult};
pub use host::{HostBinding, HostBuffer, HostImage, HostMemory, HostMemoryDevice};
pub use memory::{
    Arena, ArenaId, ArenaStats, Block, MappedRange, Pool, PoolGroup, PoolStats, Region, SharedArena,
};
