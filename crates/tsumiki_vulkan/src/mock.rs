use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
};

use ash::vk::{self, Handle};

use crate::{
    AccelerationStructure, AccelerationStructureInput, Device, GpuBuffer, ImageBlock,
    ImageBlockDesc, TsError, TsResult, HOST_WRITABLE,
};

/// Kinds of object the mock keeps track of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockObject {
    Buffer,
    Image,
    ShaderModule,
    RenderPass,
    Framebuffer,
    DescriptorSetLayout,
    DescriptorPool,
    DescriptorSet,
    PipelineLayout,
    Pipeline,
    CommandBuffer,
    AccelerationStructure,
}

/// A command recorded into a mock command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum MockCommand {
    BeginRenderPass {
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
    },
    EndRenderPass,
    SetViewportAndScissor(vk::Extent2D),
    BindPipeline(vk::Pipeline),
    BindDescriptorSets(Vec<vk::DescriptorSet>),
    PushConstants(Vec<u8>),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    DrawIndexed(u32),
}

/// A descriptor write as the mock saw it.
#[derive(Clone, Debug, PartialEq)]
pub struct MockDescriptorWrite {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub image_views: Vec<vk::ImageView>,
    pub buffers: Vec<vk::Buffer>,
}

#[derive(Default)]
struct MockState {
    live: HashMap<u64, MockObject>,
    memory: HashMap<u64, Vec<u8>>,
    buffer_properties: HashMap<u64, (vk::BufferUsageFlags, vk::MemoryPropertyFlags)>,
    sampled_images: HashMap<u64, Vec<u8>>,
    commands: HashMap<u64, Vec<MockCommand>>,
    recording: HashSet<u64>,
    descriptor_writes: Vec<MockDescriptorWrite>,
    pool_sets: HashMap<u64, Vec<u64>>,
    destroyed: Vec<MockObject>,
    failing: HashSet<MockObject>,
}

/// A device that needs no GPU.
///
/// Every create call hands out a fresh non-null handle and records it as
/// live; destroy calls remove it. Buffer memory is backed by host vectors so
/// written contents can be read back. Creation of any [`MockObject`] kind can
/// be made to fail with [`MockDevice::fail_on`].
pub struct MockDevice {
    next_handle: Cell<u64>,
    state: RefCell<MockState>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            next_handle: Cell::new(0x1000),
            state: Default::default(),
        }
    }

    /// Makes every following creation of `kind` fail with
    /// `ERROR_OUT_OF_DEVICE_MEMORY`.
    pub fn fail_on(&self, kind: MockObject) {
        self.state.borrow_mut().failing.insert(kind);
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failing.clear();
    }

    pub fn live_count(&self, kind: MockObject) -> usize {
        self.state
            .borrow()
            .live
            .values()
            .filter(|&&object| object == kind)
            .count()
    }

    pub fn total_live(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn is_live<H: Handle>(&self, handle: H) -> bool {
        self.state.borrow().live.contains_key(&handle.as_raw())
    }

    /// Order in which objects were destroyed.
    pub fn destroyed(&self) -> Vec<MockObject> {
        self.state.borrow().destroyed.clone()
    }

    pub fn read_memory(&self, memory: vk::DeviceMemory) -> Option<Vec<u8>> {
        self.state.borrow().memory.get(&memory.as_raw()).cloned()
    }

    /// Usage and memory properties the buffer was created with.
    pub fn buffer_properties(
        &self,
        buffer: vk::Buffer,
    ) -> Option<(vk::BufferUsageFlags, vk::MemoryPropertyFlags)> {
        self.state
            .borrow()
            .buffer_properties
            .get(&buffer.as_raw())
            .copied()
    }

    /// Texel data of an image made ready for sampling, empty when it was
    /// only transitioned. `None` while the image is still undefined.
    pub fn sampled_image(&self, image: vk::Image) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .sampled_images
            .get(&image.as_raw())
            .cloned()
    }

    pub fn commands(&self, command_buffer: vk::CommandBuffer) -> Vec<MockCommand> {
        self.state
            .borrow()
            .commands
            .get(&command_buffer.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    pub fn descriptor_writes(&self) -> Vec<MockDescriptorWrite> {
        self.state.borrow().descriptor_writes.clone()
    }

    fn create<H: Handle>(&self, kind: MockObject) -> TsResult<H> {
        if self.state.borrow().failing.contains(&kind) {
            return Err(TsError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        self.state.borrow_mut().live.insert(raw, kind);
        Ok(H::from_raw(raw))
    }

    fn destroy<H: Handle>(&self, handle: H) {
        let mut state = self.state.borrow_mut();
        if let Some(kind) = state.live.remove(&handle.as_raw()) {
            state.destroyed.push(kind);
        }
    }

    fn record(&self, command_buffer: vk::CommandBuffer, command: MockCommand) {
        let mut state = self.state.borrow_mut();
        if state.recording.contains(&command_buffer.as_raw()) {
            state
                .commands
                .entry(command_buffer.as_raw())
                .or_default()
                .push(command);
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for MockDevice {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> TsResult<GpuBuffer> {
        let buffer: vk::Buffer = self.create(MockObject::Buffer)?;
        let memory = vk::DeviceMemory::from_raw(buffer.as_raw() | (1 << 48));
        let mut state = self.state.borrow_mut();
        state.memory.insert(memory.as_raw(), vec![0; size as usize]);
        state
            .buffer_properties
            .insert(buffer.as_raw(), (usage, properties));
        Ok(GpuBuffer {
            buffer,
            memory,
            size,
            usage,
        })
    }

    fn write_buffer(
        &self,
        buffer: &GpuBuffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> TsResult<()> {
        if offset + data.len() as vk::DeviceSize > buffer.size {
            return Err(TsError::OutOfBounds {
                offset,
                len: data.len(),
                size: buffer.size,
            });
        }
        let mut state = self.state.borrow_mut();
        let host_writable = state
            .buffer_properties
            .get(&buffer.buffer.as_raw())
            .map_or(false, |(_, properties)| properties.contains(HOST_WRITABLE));
        if !host_writable {
            return Err(TsError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        let memory = state
            .memory
            .get_mut(&buffer.memory.as_raw())
            .ok_or(TsError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let start = offset as usize;
        memory[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) {
        self.destroy(buffer.buffer);
        let mut state = self.state.borrow_mut();
        state.memory.remove(&buffer.memory.as_raw());
        state.buffer_properties.remove(&buffer.buffer.as_raw());
    }

    fn create_image_block(&self, desc: &ImageBlockDesc) -> TsResult<ImageBlock> {
        let image: vk::Image = self.create(MockObject::Image)?;
        Ok(ImageBlock {
            image,
            memory: vk::DeviceMemory::from_raw(image.as_raw() | (1 << 48)),
            view: vk::ImageView::from_raw(image.as_raw() | (2 << 48)),
            sampler: vk::Sampler::from_raw(image.as_raw() | (3 << 48)),
            format: desc.format,
            extent: desc.extent,
        })
    }

    fn destroy_image_block(&self, image: ImageBlock) {
        self.destroy(image.image);
        self.state
            .borrow_mut()
            .sampled_images
            .remove(&image.image.as_raw());
    }

    fn prepare_sampled_image(&self, image: &ImageBlock, texels: Option<&[u8]>) -> TsResult<()> {
        if !self.is_live(image.image) {
            return Err(TsError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }
        self.state
            .borrow_mut()
            .sampled_images
            .insert(image.image.as_raw(), texels.unwrap_or_default().to_vec());
        Ok(())
    }

    fn create_shader_module(&self, _code: &[u32]) -> TsResult<vk::ShaderModule> {
        self.create(MockObject::ShaderModule)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy(module);
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo) -> TsResult<vk::RenderPass> {
        self.create(MockObject::RenderPass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy(render_pass);
    }

    fn create_framebuffer(&self, _info: &vk::FramebufferCreateInfo) -> TsResult<vk::Framebuffer> {
        self.create(MockObject::Framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy(framebuffer);
    }

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> TsResult<vk::DescriptorSetLayout> {
        self.create(MockObject::DescriptorSetLayout)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy(layout);
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> TsResult<vk::DescriptorPool> {
        self.create(MockObject::DescriptorPool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let sets = self
            .state
            .borrow_mut()
            .pool_sets
            .remove(&pool.as_raw())
            .unwrap_or_default();
        for set in sets {
            self.destroy(vk::DescriptorSet::from_raw(set));
        }
        self.destroy(pool);
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> TsResult<Vec<vk::DescriptorSet>> {
        if !self.is_live(pool) {
            return Err(TsError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        let sets = layouts
            .iter()
            .map(|_| self.create(MockObject::DescriptorSet))
            .collect::<TsResult<Vec<vk::DescriptorSet>>>()?;
        self.state
            .borrow_mut()
            .pool_sets
            .entry(pool.as_raw())
            .or_default()
            .extend(sets.iter().map(|set| set.as_raw()));
        Ok(sets)
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        let mut state = self.state.borrow_mut();
        for write in writes {
            let count = write.descriptor_count as usize;
            let image_views = if write.p_image_info.is_null() {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(write.p_image_info, count) }
                    .iter()
                    .map(|info| info.image_view)
                    .collect()
            };
            let buffers = if write.p_buffer_info.is_null() {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(write.p_buffer_info, count) }
                    .iter()
                    .map(|info| info.buffer)
                    .collect()
            };
            state.descriptor_writes.push(MockDescriptorWrite {
                set: write.dst_set,
                binding: write.dst_binding,
                descriptor_type: write.descriptor_type,
                image_views,
                buffers,
            });
        }
    }

    fn create_pipeline_layout(
        &self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> TsResult<vk::PipelineLayout> {
        self.create(MockObject::PipelineLayout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy(layout);
    }

    fn create_graphics_pipeline(
        &self,
        _info: &vk::GraphicsPipelineCreateInfo,
    ) -> TsResult<vk::Pipeline> {
        self.create(MockObject::Pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy(pipeline);
    }

    fn allocate_command_buffers(&self, count: u32) -> TsResult<Vec<vk::CommandBuffer>> {
        (0..count)
            .map(|_| self.create(MockObject::CommandBuffer))
            .collect()
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        for &command_buffer in command_buffers {
            self.destroy(command_buffer);
            let mut state = self.state.borrow_mut();
            state.commands.remove(&command_buffer.as_raw());
            state.recording.remove(&command_buffer.as_raw());
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> TsResult<()> {
        if !self.is_live(command_buffer) {
            return Err(TsError::Vulkan(vk::Result::ERROR_DEVICE_LOST));
        }
        let mut state = self.state.borrow_mut();
        state.commands.insert(command_buffer.as_raw(), Vec::new());
        state.recording.insert(command_buffer.as_raw());
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> TsResult<()> {
        if self
            .state
            .borrow_mut()
            .recording
            .remove(&command_buffer.as_raw())
        {
            Ok(())
        } else {
            Err(TsError::Vulkan(vk::Result::ERROR_VALIDATION_FAILED_EXT))
        }
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
    ) {
        self.record(
            command_buffer,
            MockCommand::BeginRenderPass {
                render_pass: info.render_pass,
                framebuffer: info.framebuffer,
                extent: info.render_area.extent,
            },
        );
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.record(command_buffer, MockCommand::EndRenderPass);
    }

    fn cmd_set_viewport_and_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) {
        self.record(command_buffer, MockCommand::SetViewportAndScissor(extent));
    }

    fn cmd_bind_graphics_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    ) {
        self.record(command_buffer, MockCommand::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        self.record(command_buffer, MockCommand::BindDescriptorSets(sets.to_vec()));
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.record(command_buffer, MockCommand::PushConstants(data.to_vec()));
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(command_buffer, MockCommand::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(command_buffer, MockCommand::BindIndexBuffer(buffer));
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32) {
        self.record(command_buffer, MockCommand::DrawIndexed(index_count));
    }

    fn build_acceleration_structure(
        &self,
        input: &AccelerationStructureInput,
    ) -> TsResult<AccelerationStructure> {
        match input {
            AccelerationStructureInput::BottomLevel(triangles) => {
                if !self.is_live(triangles.vertex_buffer.buffer)
                    || !self.is_live(triangles.index_buffer.buffer)
                {
                    return Err(TsError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED));
                }
            }
            AccelerationStructureInput::TopLevel(instances) => {
                let state = self.state.borrow();
                let all_live = instances.iter().all(|instance| {
                    state.live.get(&instance.bottom_level_address)
                        == Some(&MockObject::AccelerationStructure)
                });
                if !all_live {
                    return Err(TsError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED));
                }
            }
        }

        let handle: vk::AccelerationStructureKHR = self.create(MockObject::AccelerationStructure)?;
        let buffer = match self.create_buffer(
            256,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                self.destroy(handle);
                return Err(err);
            }
        };
        Ok(AccelerationStructure {
            handle,
            buffer,
            device_address: handle.as_raw(),
            level: input.level(),
        })
    }

    fn destroy_acceleration_structure(&self, accel: AccelerationStructure) {
        self.destroy(accel.handle);
        self.destroy_buffer(accel.buffer);
    }

    fn wait_idle(&self) -> TsResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_buffer_roundtrip() {
        let device = MockDevice::new();
        let buffer = device
            .create_buffer(
                8,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                HOST_WRITABLE,
            )
            .unwrap();
        device.write_buffer(&buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(
            device.read_memory(buffer.memory).unwrap(),
            vec![0, 0, 0, 0, 1, 2, 3, 4]
        );
        assert!(device.write_buffer(&buffer, 6, &[0; 4]).is_err());

        device.destroy_buffer(buffer);
        assert_eq!(device.live_count(MockObject::Buffer), 0);
        assert!(device.read_memory(buffer.memory).is_none());
    }

    #[test]
    fn test_mock_keeps_buffer_properties() {
        let device = MockDevice::new();
        let local = device
            .create_buffer(
                16,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .unwrap();
        assert_eq!(
            device.buffer_properties(local.buffer),
            Some((
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::DEVICE_LOCAL
            ))
        );
        assert!(device.write_buffer(&local, 0, &[1; 4]).is_err());

        device.destroy_buffer(local);
        assert_eq!(device.buffer_properties(local.buffer), None);
    }

    #[test]
    fn test_mock_tracks_sampled_images() {
        let device = MockDevice::new();
        let extent = vk::Extent2D {
            width: 2,
            height: 1,
        };
        let noise = device
            .create_image_block(&ImageBlockDesc::tiling_texture(
                extent,
                vk::Format::R8G8B8A8_UNORM,
            ))
            .unwrap();
        let target = device
            .create_image_block(&ImageBlockDesc::color_attachment(
                extent,
                vk::Format::R8_UNORM,
            ))
            .unwrap();
        assert_eq!(device.sampled_image(noise.image), None);

        device.prepare_sampled_image(&noise, Some(&[7; 8])).unwrap();
        device.prepare_sampled_image(&target, None).unwrap();
        assert_eq!(device.sampled_image(noise.image), Some(vec![7; 8]));
        assert_eq!(device.sampled_image(target.image), Some(Vec::new()));

        device.destroy_image_block(noise);
        assert_eq!(device.sampled_image(noise.image), None);
        assert!(device.prepare_sampled_image(&noise, None).is_err());
    }

    #[test]
    fn test_mock_failure_injection() {
        let device = MockDevice::new();
        device.fail_on(MockObject::Pipeline);
        assert!(device
            .create_graphics_pipeline(&vk::GraphicsPipelineCreateInfo::default())
            .is_err());
        device.clear_failures();
        assert!(device
            .create_graphics_pipeline(&vk::GraphicsPipelineCreateInfo::default())
            .is_ok());
    }

    #[test]
    fn test_mock_pool_frees_sets() {
        let device = MockDevice::new();
        let layout = device.create_descriptor_set_layout(&[]).unwrap();
        let pool = device.create_descriptor_pool(2, &[]).unwrap();
        let sets = device.allocate_descriptor_sets(pool, &[layout, layout]).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(device.live_count(MockObject::DescriptorSet), 2);

        device.destroy_descriptor_pool(pool);
        assert_eq!(device.live_count(MockObject::DescriptorSet), 0);
    }

    #[test]
    fn test_mock_records_only_while_recording() {
        let device = MockDevice::new();
        let command_buffer = device.allocate_command_buffers(1).unwrap()[0];
        device.cmd_draw_indexed(command_buffer, 6);
        assert!(device.commands(command_buffer).is_empty());

        device.begin_command_buffer(command_buffer).unwrap();
        device.cmd_draw_indexed(command_buffer, 6);
        device.end_command_buffer(command_buffer).unwrap();
        assert_eq!(
            device.commands(command_buffer),
            vec![MockCommand::DrawIndexed(6)]
        );
    }
}
