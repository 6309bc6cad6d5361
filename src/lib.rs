pub use tsumiki_render as render;
pub use tsumiki_vulkan as vulkan;
