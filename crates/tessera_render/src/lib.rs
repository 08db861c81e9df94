//! # TESSERA Render
//!
//! Resource binding glue on top of `tessera_memory`:
//! - Buffers and images allocate and bind at construction
//! - Dropping a resource frees its block
//! - Host-visible buffers are written through a mapping
//! - Device-local buffers are filled through a staging buffer
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     RenderDevice                          │
//! ├──────────────────────────────────────────────────────────┤
//! │  BufferDesc / ImageDesc → ResourceDevice::create_*        │
//! │       ↓                                                   │
//! │  PoolGroup::allocate_and_bind → Block (memory + offset)   │
//! │       ↓                                                   │
//! │  Buffer / Image  (raw object + block, freed on drop)      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use tessera_memory::{HostMemoryDevice, MemoryConfig};
//! use tessera_render::{BufferDesc, BufferUsage, RenderDevice};
//!
//! let mut render = RenderDevice::new(Rc::new(HostMemoryDevice::new()), &MemoryConfig::default())?;
//! let vertices = render.create_buffer(&BufferDesc::device_local(4096, BufferUsage::VERTEX))?;
//! render.upload_buffer(&vertices, &positions)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod buffer;
pub mod device;
pub mod error;
pub mod host;
pub mod image;
pub mod resource;

pub use buffer::Buffer;
pub use device::RenderDevice;
pub use error::{RenderError, RenderResult};
pub use image::Image;
pub use resource::{BufferDesc, BufferUsage, ImageDesc, ResourceDevice, TextureFormat};
