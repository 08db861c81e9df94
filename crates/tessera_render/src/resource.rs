//! Resource descriptions and the device-side resource interface.

use std::ops::BitOr;

use tessera_memory::{BindableResource, DeviceError, MemoryDevice, MemoryLocation};

/// How a buffer will be used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferUsage(pub u32);

impl BufferUsage {
    /// Vertex input.
    pub const VERTEX: Self = Self(1 << 0);
    /// Index input.
    pub const INDEX: Self = Self(1 << 1);
    /// Uniform block.
    pub const UNIFORM: Self = Self(1 << 2);
    /// Storage block.
    pub const STORAGE: Self = Self(1 << 3);
    /// Source of a transfer.
    pub const TRANSFER_SRC: Self = Self(1 << 4);
    /// Destination of a transfer.
    pub const TRANSFER_DST: Self = Self(1 << 5);

    /// Returns true if every flag in `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Offset alignment a buffer with this usage needs.
    ///
    /// Uniform offsets follow the common 256-byte limit; storage 64; the
    /// rest 16.
    #[must_use]
    pub const fn min_alignment(self) -> u64 {
        if self.contains(Self::UNIFORM) {
            256
        } else if self.contains(Self::STORAGE) {
            64
        } else {
            16
        }
    }
}

impl BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Description of a buffer to create.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    /// Size in bytes.
    pub size: u64,
    /// Intended usage.
    pub usage: BufferUsage,
    /// Pool to allocate from.
    pub location: MemoryLocation,
}

impl BufferDesc {
    /// A device-local buffer that is filled through staging uploads.
    #[must_use]
    pub fn device_local(size: u64, usage: BufferUsage) -> Self {
        Self { size, usage: usage | BufferUsage::TRANSFER_DST, location: MemoryLocation::DeviceLocal }
    }

    /// A host-visible buffer that is written through a mapping.
    #[must_use]
    pub const fn host_visible(size: u64, usage: BufferUsage) -> Self {
        Self { size, usage, location: MemoryLocation::HostVisible }
    }
}

/// Pixel formats the engine uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA, linear.
    Rgba8Unorm,
    /// 8-bit BGRA, linear (swapchain order).
    Bgra8Unorm,
    /// 32-bit float, single channel.
    R32Float,
    /// 32-bit float depth.
    Depth32Float,
}

impl TextureFormat {
    /// Bytes per texel.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float | Self::Depth32Float => 4,
        }
    }
}

/// Description of a 2D image to create. Images always live in device-local memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format.
    pub format: TextureFormat,
}

/// A device that can create buffers and images and copy between buffers.
///
/// Creation returns unbound resources; memory comes from the pools.
pub trait ResourceDevice: MemoryDevice + Sized {
    /// Raw buffer object.
    type Buffer: BindableResource<Self>;
    /// Raw image object.
    type Image: BindableResource<Self>;

    /// Creates an unbound buffer.
    ///
    /// # Errors
    ///
    /// Device creation failures.
    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer, DeviceError>;

    /// Creates an unbound image.
    ///
    /// # Errors
    ///
    /// Device creation failures.
    fn create_image(&self, desc: &ImageDesc) -> Result<Self::Image, DeviceError>;

    /// Copies the first `size` bytes of `src` into `dst` and waits for completion.
    ///
    /// # Errors
    ///
    /// `InvalidMemory` if either buffer is unbound or too small.
    fn copy_buffer(&self, src: &Self::Buffer, dst: &Self::Buffer, size: u64) -> Result<(), DeviceError>;
}

#[cfg(feature = "wgpu")]
impl From<BufferUsage> for wgpu::BufferUsages {
    fn from(usage: BufferUsage) -> Self {
        const TABLE: [(BufferUsage, wgpu::BufferUsages); 6] = [
            (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
            (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
            (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
            (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
            (BufferUsage::TRANSFER_SRC, wgpu::BufferUsages::COPY_SRC),
            (BufferUsage::TRANSFER_DST, wgpu::BufferUsages::COPY_DST),
        ];
        TABLE
            .iter()
            .filter(|(ours, _)| usage.contains(*ours))
            .fold(wgpu::BufferUsages::empty(), |acc, (_, theirs)| acc | *theirs)
    }
}

#[cfg(feature = "wgpu")]
impl From<TextureFormat> for wgpu::TextureFormat {
    fn from(format: TextureFormat) -> Self {
        match format {
            TextureFormat::Rgba8Unorm => Self::Rgba8Unorm,
            TextureFormat::Bgra8Unorm => Self::Bgra8Unorm,
            TextureFormat::R32Float => Self::R32Float,
            TextureFormat::Depth32Float => Self::Depth32Float,
        }
    }
}
