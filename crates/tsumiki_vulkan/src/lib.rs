mod acceleration_structure;
mod buffer;
mod common;
mod device;
mod image_block;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod shader;
mod vulkan_device;

pub use acceleration_structure::*;
pub use buffer::*;
pub use common::*;
pub use device::*;
pub use image_block::*;
#[cfg(any(test, feature = "mock"))]
pub use mock::*;
pub use shader::*;
pub use vulkan_device::*;

pub use ash::vk;
