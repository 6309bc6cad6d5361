use std::{mem::size_of, rc::Rc, slice};

use log::debug;
use tsumiki_vulkan::{vk, Device, ImageBlock, ShaderProgram, TsResult};

use crate::{Frame, Mesh, Vertex};

/// One descriptor bound by a full-screen pass. Bindings are numbered in the
/// order the inputs are listed.
#[derive(Clone, Copy)]
pub(crate) enum DescriptorInput {
    Image(vk::DescriptorImageInfo),
    UniformBuffer(vk::DescriptorBufferInfo),
}

impl DescriptorInput {
    fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::Image(_) => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::UniformBuffer(_) => vk::DescriptorType::UNIFORM_BUFFER,
        }
    }
}

pub(crate) struct PassDesc<'a> {
    pub descriptor_types: &'a [vk::DescriptorType],
    pub push_constant_size: u32,
    pub output: &'a ImageBlock,
    pub frames: usize,
}

/// The Vulkan objects a full-screen pass owns. Every handle starts out null
/// and is reset to null when released.
pub(crate) struct PassResources {
    device: Rc<dyn Device>,
    command_buffers: Vec<vk::CommandBuffer>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,
}

impl PassResources {
    pub fn new(device: &Rc<dyn Device>) -> Self {
        Self {
            device: device.clone(),
            command_buffers: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.pipeline != vk::Pipeline::null()
    }

    /// Creates everything described by `desc`. Call [`PassResources::release`]
    /// on failure.
    pub fn create(&mut self, desc: &PassDesc, program: &ShaderProgram) -> TsResult<()> {
        let device = self.device.clone();

        self.command_buffers = device.allocate_command_buffers(desc.frames as u32)?;
        self.render_pass = create_color_render_pass(device.as_ref(), desc.output.format)?;

        let attachments = [desc.output.view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(self.render_pass)
            .attachments(&attachments)
            .width(desc.output.extent.width)
            .height(desc.output.extent.height)
            .layers(1)
            .build();
        for _ in 0..desc.frames {
            let framebuffer = device.create_framebuffer(&framebuffer_info)?;
            self.framebuffers.push(framebuffer);
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .descriptor_types
            .iter()
            .enumerate()
            .map(|(binding, &descriptor_type)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding as u32)
                    .descriptor_type(descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::FRAGMENT)
                    .build()
            })
            .collect();
        self.descriptor_set_layout = device.create_descriptor_set_layout(&bindings)?;

        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: desc.push_constant_size,
        };
        self.pipeline_layout =
            device.create_pipeline_layout(&[self.descriptor_set_layout], &[push_constant_range])?;

        self.pipeline = create_fullscreen_pipeline(
            device.as_ref(),
            self.render_pass,
            self.pipeline_layout,
            program,
        )?;

        let pool_sizes: Vec<vk::DescriptorPoolSize> = desc
            .descriptor_types
            .iter()
            .map(|&ty| vk::DescriptorPoolSize {
                ty,
                descriptor_count: desc.frames as u32,
            })
            .collect();
        self.descriptor_pool = device.create_descriptor_pool(desc.frames as u32, &pool_sizes)?;
        let layouts = vec![self.descriptor_set_layout; desc.frames];
        self.descriptor_sets = device.allocate_descriptor_sets(self.descriptor_pool, &layouts)?;

        debug!(
            "Created pass resources for {} frames at {}x{}",
            desc.frames, desc.output.extent.width, desc.output.extent.height
        );
        Ok(())
    }

    /// Points the descriptor set of `slot` at `inputs`.
    pub fn write_descriptors(&self, slot: usize, inputs: &[DescriptorInput]) {
        let set = self.descriptor_sets[slot];
        let writes: Vec<vk::WriteDescriptorSet> = inputs
            .iter()
            .enumerate()
            .map(|(binding, input)| {
                let write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding as u32)
                    .descriptor_type(input.descriptor_type());
                match input {
                    DescriptorInput::Image(info) => write.image_info(slice::from_ref(info)),
                    DescriptorInput::UniformBuffer(info) => {
                        write.buffer_info(slice::from_ref(info))
                    }
                }
                .build()
            })
            .collect();
        self.device.update_descriptor_sets(&writes);
    }

    /// Records a full-screen draw of `plane` into the command buffer of
    /// `frame`'s slot and returns it.
    pub fn record(
        &self,
        frame: &Frame,
        extent: vk::Extent2D,
        plane: &Mesh,
        push_constants: &[u8],
    ) -> TsResult<vk::CommandBuffer> {
        let slot = frame.index();
        let command_buffer = self.command_buffers[slot];
        let device = &self.device;

        device.begin_command_buffer(command_buffer)?;

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[slot])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .build();
        device.cmd_begin_render_pass(command_buffer, &begin_info);
        device.cmd_set_viewport_and_scissor(command_buffer, extent);
        device.cmd_bind_graphics_pipeline(command_buffer, self.pipeline);
        device.cmd_bind_descriptor_sets(
            command_buffer,
            self.pipeline_layout,
            &[self.descriptor_sets[slot]],
        );
        device.cmd_push_constants(
            command_buffer,
            self.pipeline_layout,
            vk::ShaderStageFlags::FRAGMENT,
            push_constants,
        );
        device.cmd_bind_vertex_buffer(command_buffer, plane.vertex_buffer().handle());
        device.cmd_bind_index_buffer(command_buffer, plane.index_buffer().handle());
        device.cmd_draw_indexed(command_buffer, plane.index_count());
        device.cmd_end_render_pass(command_buffer);

        device.end_command_buffer(command_buffer)?;
        Ok(command_buffer)
    }

    /// Destroys whatever was created, pipeline first and command buffers
    /// last, and resets every handle to null.
    pub fn release(&mut self) {
        let device = &self.device;
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline);
            self.pipeline = vk::Pipeline::null();
        }
        if self.pipeline_layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.pipeline_layout);
            self.pipeline_layout = vk::PipelineLayout::null();
        }
        if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
            device.destroy_descriptor_set_layout(self.descriptor_set_layout);
            self.descriptor_set_layout = vk::DescriptorSetLayout::null();
        }
        if self.descriptor_pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.descriptor_pool);
            self.descriptor_pool = vk::DescriptorPool::null();
        }
        self.descriptor_sets.clear();
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
        if !self.command_buffers.is_empty() {
            device.free_command_buffers(&self.command_buffers);
            self.command_buffers.clear();
        }
    }
}

impl Drop for PassResources {
    fn drop(&mut self) {
        self.release();
    }
}

/// A single color attachment whose previous contents are discarded and which
/// ends up ready to be sampled by the next pass.
fn create_color_render_pass(device: &dyn Device, format: vk::Format) -> TsResult<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::DONT_CARE)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        .build()];

    let color_references = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_references)
        .build()];

    let dependencies = [
        vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::SHADER_READ)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build(),
        vk::SubpassDependency::builder()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .build(),
    ];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies)
        .build();
    device.create_render_pass(&create_info)
}

fn create_fullscreen_pipeline(
    device: &dyn Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    program: &ShaderProgram,
) -> TsResult<vk::Pipeline> {
    let stages = program.stages();

    let bindings = [Vertex::binding_description()];
    let attributes = Vertex::attribute_descriptions();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes)
        .build();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .build();

    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1)
        .build();

    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0)
        .build();

    let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1)
        .build();

    let blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build()];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
        .attachments(&blend_attachments)
        .build();

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
        .dynamic_states(&dynamic_states)
        .build();

    let create_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();
    device.create_graphics_pipeline(&create_info)
}

pub(crate) fn push_constant_size<T>() -> u32 {
    size_of::<T>() as u32
}
