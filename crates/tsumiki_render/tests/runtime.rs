mod common;

use bytemuck::Zeroable;
use tsumiki_render::{Frame, PerFrameData, PerObjectData, SsaoData};
use tsumiki_vulkan::{vk, MockObject, HOST_WRITABLE};

use common::fixture;

#[test]
fn all_slots_allocated_after_create() {
    let fixture = fixture();
    fixture.runtime.create_resources().unwrap();

    for slot in 0..3 {
        let per_frame = fixture.runtime.per_frame_buffer(slot).unwrap();
        let per_object = fixture.runtime.per_object_buffer(slot).unwrap();
        assert!(fixture.mock.is_live(per_frame.buffer));
        assert!(fixture.mock.is_live(per_object.buffer));
        assert_eq!(per_object.size, 1024 * std::mem::size_of::<PerObjectData>() as u64);
        assert_eq!(
            fixture.mock.buffer_properties(per_frame.buffer),
            Some((vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_WRITABLE))
        );
        assert_eq!(
            fixture.mock.buffer_properties(per_object.buffer),
            Some((vk::BufferUsageFlags::STORAGE_BUFFER, HOST_WRITABLE))
        );
    }
    let kernel = fixture.runtime.ssao_kernel_buffer().unwrap();
    assert_eq!(
        fixture.mock.buffer_properties(kernel.buffer),
        Some((vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_WRITABLE))
    );
    assert!(HOST_WRITABLE
        .contains(vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT));
    assert_eq!(kernel.size, 64 * 16);
    assert_eq!(kernel.size as usize, std::mem::size_of::<SsaoData>());
    assert_eq!(fixture.mock.live_count(MockObject::Buffer), 7);
}

#[test]
fn slot_writes_are_isolated() {
    let fixture = fixture();
    let runtime = &fixture.runtime;
    runtime.create_resources().unwrap();

    let mut data = PerFrameData::zeroed();
    data.frame_number = 11;
    runtime.write_per_frame(&Frame::new(0, 11), &data).unwrap();
    data.frame_number = 12;
    runtime.write_per_frame(&Frame::new(1, 12), &data).unwrap();

    let read_frame_number = |slot: usize| {
        let buffer = runtime.per_frame_buffer(slot).unwrap();
        let bytes = fixture.mock.read_memory(buffer.memory).unwrap();
        bytemuck::pod_read_unaligned::<PerFrameData>(&bytes).frame_number
    };
    assert_eq!(read_frame_number(0), 11);
    assert_eq!(read_frame_number(1), 12);
    assert_eq!(read_frame_number(2), 0);
}

#[test]
fn dropping_runtime_frees_buffers() {
    let fixture = fixture();
    fixture.runtime.create_resources().unwrap();
    let mock = fixture.mock.clone();
    drop(fixture);
    assert_eq!(mock.live_count(MockObject::Buffer), 0);
}
