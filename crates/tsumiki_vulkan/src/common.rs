use ash::vk;
use thiserror::Error;

pub type TsResult<T> = std::result::Result<T, TsError>;

#[derive(Error, Debug)]
pub enum TsError {
    #[error("Vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("Failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("No Vulkan device with graphics and acceleration structure support was found")]
    NoSuitableDevice,

    #[error("No memory type matches bits {type_bits:#x} with properties {properties:?}")]
    NoSuitableMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    #[error("Write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds {
        offset: vk::DeviceSize,
        len: usize,
        size: vk::DeviceSize,
    },

    #[error("Invalid shader: {0}")]
    InvalidShader(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid string: {0}")]
    Nul(#[from] std::ffi::NulError),
}

pub struct QueueFamilyIndices {
    pub graphics_family: u32,
}
