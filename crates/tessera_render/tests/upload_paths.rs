//! End-to-end upload paths over the software device.

use std::rc::Rc;

use tessera_memory::{HostMemoryDevice, MemoryConfig, MemoryLocation, MemoryProperties, MemoryType, PoolConfig};
use tessera_render::{BufferDesc, BufferUsage, RenderDevice, RenderError};

fn config() -> MemoryConfig {
    MemoryConfig {
        device_local: PoolConfig::for_location(MemoryLocation::DeviceLocal).with_arena_size(64 * 1024),
        host_visible: PoolConfig::for_location(MemoryLocation::HostVisible).with_arena_size(16 * 1024),
    }
}

#[test]
fn test_device_local_upload_goes_through_staging() {
    let device = Rc::new(HostMemoryDevice::new());
    let mut render = RenderDevice::new(Rc::clone(&device), &config()).unwrap();

    let data: Vec<u32> = (0..64).collect();
    let buffer = render
        .create_buffer(&BufferDesc::device_local(256, BufferUsage::VERTEX))
        .unwrap();
    render.upload_buffer(&buffer, &data).unwrap();

    let binding = buffer.raw().binding().unwrap();
    let bytes = device.read_memory(binding.memory, binding.offset, 256).unwrap();
    assert_eq!(bytes, bytemuck::cast_slice::<u32, u8>(&data));

    // The staging block is gone, its arena stays for reuse.
    let staging = render.pools().pool(MemoryLocation::HostVisible).stats();
    assert_eq!(staging.arena_count, 1);
    assert_eq!(staging.totals.live_blocks, 0);
    assert_eq!(staging.totals.free_regions, 1);
}

#[test]
fn test_host_visible_upload_writes_in_place() {
    let device = Rc::new(HostMemoryDevice::new());
    let mut render = RenderDevice::new(Rc::clone(&device), &config()).unwrap();

    let buffer = render
        .create_buffer(&BufferDesc::host_visible(64, BufferUsage::UNIFORM))
        .unwrap();
    render.upload_buffer(&buffer, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();

    let binding = buffer.raw().binding().unwrap();
    let bytes = device.read_memory(binding.memory, binding.offset, 16).unwrap();
    assert_eq!(bytes, bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0, 3.0, 4.0]));
    assert!(!device.is_mapped(binding.memory));
    assert_eq!(render.pools().pool(MemoryLocation::DeviceLocal).arena_count(), 0);
}

#[test]
fn test_partial_write_at_offset() {
    let device = Rc::new(HostMemoryDevice::new());
    let mut render = RenderDevice::new(Rc::clone(&device), &config()).unwrap();

    let buffer = render
        .create_buffer(&BufferDesc::host_visible(16, BufferUsage::STORAGE))
        .unwrap();
    buffer.write(8, &[0xABu8; 8]).unwrap();
    assert_eq!(
        buffer.write(12, &[0u8; 8]),
        Err(RenderError::UploadTooLarge { len: 20, capacity: 16 })
    );

    let binding = buffer.raw().binding().unwrap();
    let bytes = device.read_memory(binding.memory, binding.offset, 16).unwrap();
    assert_eq!(&bytes[..8], &[0u8; 8]);
    assert_eq!(&bytes[8..], &[0xABu8; 8]);
}

#[test]
fn test_non_coherent_staging_is_flushed() {
    let device = Rc::new(HostMemoryDevice::with_memory_types(vec![
        MemoryType { index: 0, properties: MemoryProperties::DEVICE_LOCAL, heap_index: 0 },
        MemoryType {
            index: 1,
            properties: MemoryProperties::HOST_VISIBLE | MemoryProperties::HOST_CACHED,
            heap_index: 1,
        },
    ]));
    let mut config = config();
    config.host_visible.require_coherent = false;
    let mut render = RenderDevice::new(Rc::clone(&device), &config).unwrap();

    let buffer = render
        .create_buffer(&BufferDesc::device_local(32, BufferUsage::INDEX))
        .unwrap();
    render.upload_buffer(&buffer, &[7u16; 16]).unwrap();

    let flushes = device.flushes();
    assert_eq!(flushes.len(), 1);
    assert_eq!(flushes[0].size, 32);
}

#[test]
fn test_resources_release_all_device_memory_on_teardown() {
    let device = Rc::new(HostMemoryDevice::new());
    {
        let mut render = RenderDevice::new(Rc::clone(&device), &config()).unwrap();
        let buffer = render
            .create_buffer(&BufferDesc::device_local(1024, BufferUsage::VERTEX))
            .unwrap();
        render.upload_buffer(&buffer, &[0u8; 1024]).unwrap();
        assert_eq!(device.live_allocations(), 2);
    }
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.allocated_bytes(), 0);
}
