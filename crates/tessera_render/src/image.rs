//! Images bound to device-local pool memory.

use std::fmt;

use tessera_memory::Block;

use crate::resource::{ImageDesc, ResourceDevice};

/// A 2D image bound to device-local memory.
pub struct Image<D: ResourceDevice> {
    raw: D::Image,
    block: Block<D>,
    desc: ImageDesc,
}

impl<D: ResourceDevice> Image<D> {
    pub(crate) fn new(raw: D::Image, block: Block<D>, desc: ImageDesc) -> Self {
        Self { raw, block, desc }
    }

    /// The raw device image.
    #[must_use]
    pub const fn raw(&self) -> &D::Image {
        &self.raw
    }

    /// The backing block.
    #[must_use]
    pub const fn block(&self) -> &Block<D> {
        &self.block
    }

    /// Description the image was created from.
    #[must_use]
    pub const fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Extent in texels.
    #[must_use]
    pub const fn extent(&self) -> (u32, u32) {
        (self.desc.width, self.desc.height)
    }
}

impl<D: ResourceDevice> fmt::Debug for Image<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("desc", &self.desc)
            .field("block", &self.block)
            .finish_non_exhaustive()
    }
}
