use ash::vk;

use crate::GpuBuffer;

/// Triangle geometry for a bottom-level build. Vertices are read as
/// `R32G32B32_SFLOAT` positions at the start of each `vertex_stride` record;
/// indices are `u32`.
#[derive(Clone, Copy, Debug)]
pub struct TriangleGeometry {
    pub vertex_buffer: GpuBuffer,
    pub vertex_stride: vk::DeviceSize,
    pub vertex_count: u32,
    pub index_buffer: GpuBuffer,
    pub index_count: u32,
}

impl TriangleGeometry {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// One placement of a bottom-level structure inside a top-level one.
#[derive(Clone, Copy, Debug)]
pub struct AccelerationStructureInstance {
    /// Row-major 3x4 object-to-world transform.
    pub transform: [f32; 12],
    pub custom_index: u32,
    pub mask: u8,
    pub bottom_level_address: vk::DeviceAddress,
}

pub enum AccelerationStructureInput<'a> {
    BottomLevel(&'a TriangleGeometry),
    TopLevel(&'a [AccelerationStructureInstance]),
}

impl AccelerationStructureInput<'_> {
    pub fn level(&self) -> vk::AccelerationStructureTypeKHR {
        match self {
            Self::BottomLevel(_) => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            Self::TopLevel(_) => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }
}

/// A built acceleration structure together with the buffer backing it.
///
/// Only produced by a successful build, so the structure, its buffer and the
/// buffer's memory are always live together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccelerationStructure {
    pub handle: vk::AccelerationStructureKHR,
    pub buffer: GpuBuffer,
    pub device_address: vk::DeviceAddress,
    pub level: vk::AccelerationStructureTypeKHR,
}
