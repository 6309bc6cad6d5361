use tsumiki_vulkan::vk;

use crate::{Frame, Result};

/// A unit of GPU work that records one command buffer per frame.
///
/// Passes declare the images they sample and the images they render to so a
/// scheduler can order them. Recording never submits; the caller owns
/// submission and synchronisation.
pub trait RenderPass {
    fn name(&self) -> &str;

    /// Creates every GPU object the pass needs. If anything fails, whatever
    /// was created is released before the error is returned.
    fn initialize(&mut self) -> Result<()>;

    /// Releases the pass's GPU objects. Safe to call more than once.
    fn shutdown(&mut self);

    /// Records the pass into the command buffer of `frame`'s slot.
    fn draw(&mut self, frame: &Frame) -> Result<vk::CommandBuffer>;

    fn reads(&self) -> &[vk::Image];
    fn writes(&self) -> &[vk::Image];
}
