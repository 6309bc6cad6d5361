use ash::vk;

/// A buffer and the device memory bound to it.
///
/// Both handles are created together and destroyed together, so a
/// `GpuBuffer` is never half valid. Slots that may be empty hold an
/// `Option<GpuBuffer>` instead of null handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

/// Memory properties for buffers the CPU writes directly. Coherent memory
/// makes writes visible to the device without explicit flushes.
pub const HOST_WRITABLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

pub(crate) fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    memory_properties.memory_types[..memory_properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            (type_bits >> index) & 1 == 1 && memory_type.property_flags.contains(properties)
        })
        .map(|(index, _)| index as u32)
}
