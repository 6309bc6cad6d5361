use ash::vk;

/// Creation parameters for an attachment image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageBlockDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
}

impl ImageBlockDesc {
    /// A color attachment that later passes sample from.
    pub fn color_attachment(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        }
    }

    /// A small texture meant to be tiled across the screen.
    pub fn tiling_texture(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            aspect: vk::ImageAspectFlags::COLOR,
            filter: vk::Filter::NEAREST,
            address_mode: vk::SamplerAddressMode::REPEAT,
        }
    }
}

/// An image with its memory, default view and sampler.
///
/// Attachments are owned by whoever created them. Passes keep copies of the
/// handles as borrowed inputs and outputs and never destroy them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageBlock {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl ImageBlock {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Descriptor info for sampling this image from a fragment shader.
    pub fn sampled_descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}
