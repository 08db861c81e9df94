//! Resource creation for the software device.

use tessera_memory::{
    DeviceError, HostBuffer, HostImage, HostMemoryDevice, MemoryDevice, MemoryProperties, MemoryRequirements,
};

use crate::resource::{BufferDesc, ImageDesc, ResourceDevice};

fn device_local_filter(device: &HostMemoryDevice) -> u32 {
    device
        .memory_types()
        .iter()
        .filter(|ty| ty.index < 32 && ty.properties.contains(MemoryProperties::DEVICE_LOCAL))
        .fold(0, |mask, ty| mask | (1 << ty.index))
}

impl ResourceDevice for HostMemoryDevice {
    type Buffer = HostBuffer;
    type Image = HostImage;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<HostBuffer, DeviceError> {
        Ok(HostBuffer::new(MemoryRequirements {
            size: desc.size,
            alignment: desc.usage.min_alignment(),
            type_filter: self.all_types_filter(),
        }))
    }

    fn create_image(&self, desc: &ImageDesc) -> Result<HostImage, DeviceError> {
        let filter = device_local_filter(self);
        if filter == 0 {
            return Err(DeviceError::CreateFailed("device exposes no device-local memory type".into()));
        }
        HostImage::new(desc.width, desc.height, desc.format.bytes_per_pixel(), filter)
    }

    fn copy_buffer(&self, src: &HostBuffer, dst: &HostBuffer, size: u64) -> Result<(), DeviceError> {
        let (Some(from), Some(to)) = (src.binding(), dst.binding()) else {
            return Err(DeviceError::InvalidMemory);
        };
        if size > src.requirements().size || size > dst.requirements().size {
            return Err(DeviceError::InvalidMemory);
        }
        self.copy_memory(from.memory, from.offset, to.memory, to.offset, size)
    }
}
