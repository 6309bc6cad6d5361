use ash::vk;

use crate::{
    AccelerationStructure, AccelerationStructureInput, GpuBuffer, ImageBlock, ImageBlockDesc,
    TsResult,
};

/// The logical device as seen by the renderer.
///
/// Everything that creates, records into or destroys a GPU object goes
/// through this trait, so the same renderer code runs on [`crate::VulkanDevice`]
/// and on the headless mock used by tests. Destroy calls take the handles by
/// value; callers reset their own copies afterwards.
pub trait Device {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> TsResult<GpuBuffer>;

    /// Maps the buffer memory, copies `data` at `offset` and unmaps it again.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: vk::DeviceSize, data: &[u8])
        -> TsResult<()>;

    /// Destroys the buffer, then frees its memory.
    fn destroy_buffer(&self, buffer: GpuBuffer);

    fn create_image_block(&self, desc: &ImageBlockDesc) -> TsResult<ImageBlock>;
    fn destroy_image_block(&self, image: ImageBlock);

    /// Moves a freshly created image into `SHADER_READ_ONLY_OPTIMAL` and waits
    /// for it. With `texels` the data is copied in through a staging buffer
    /// first, which needs an image created with `TRANSFER_DST`.
    fn prepare_sampled_image(&self, image: &ImageBlock, texels: Option<&[u8]>) -> TsResult<()>;

    fn create_shader_module(&self, code: &[u32]) -> TsResult<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> TsResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> TsResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> TsResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> TsResult<vk::DescriptorPool>;
    /// Destroying the pool frees every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> TsResult<Vec<vk::DescriptorSet>>;
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]);

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> TsResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> TsResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn allocate_command_buffers(&self, count: u32) -> TsResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);

    /// Begins recording. Any previous contents of the buffer are discarded.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> TsResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> TsResult<()>;

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
    );
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);
    fn cmd_set_viewport_and_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_bind_graphics_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    );
    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    );
    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32);

    /// Builds an acceleration structure and waits for the build to finish.
    fn build_acceleration_structure(
        &self,
        input: &AccelerationStructureInput,
    ) -> TsResult<AccelerationStructure>;
    /// Destroys the structure, then its buffer, then the buffer memory.
    fn destroy_acceleration_structure(&self, accel: AccelerationStructure);

    fn wait_idle(&self) -> TsResult<()>;
}
