use std::ffi::{c_char, CStr, CString};

use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;

use crate::buffer::find_memory_type_index;
use crate::{
    AccelerationStructure, AccelerationStructureInput, AccelerationStructureInstance, Device,
    GpuBuffer, ImageBlock, ImageBlockDesc, QueueFamilyIndices, TsError, TsResult, HOST_WRITABLE,
};

/// Vulkan device with ray query support, backed by ash.
pub struct VulkanDevice {
    entry: Entry,
    instance: Instance,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    scratch_alignment: vk::DeviceSize,
    queue_family_indices: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    command_pool: vk::CommandPool,
    acceleration_structure_loader: khr::AccelerationStructure,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanDevice {
    /// Creates the instance and logical device.
    ///
    /// Pass the display handle when a swapchain will be attached later so the
    /// surface extensions get enabled. `None` creates a headless device.
    pub fn new(display_handle: Option<RawDisplayHandle>) -> TsResult<Self> {
        let entry = unsafe { Entry::load()? };
        let instance = create_instance(&entry, display_handle)?;

        let debug_messenger = if cfg!(feature = "debug") {
            Some(create_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let with_swapchain = display_handle.is_some();
        let (physical_device, queue_family_indices) =
            pick_physical_device_and_queue_family(&instance, with_swapchain)?;
        let device = create_device(
            &instance,
            physical_device,
            &queue_family_indices,
            with_swapchain,
        )?;
        let graphics_queue =
            unsafe { device.get_device_queue(queue_family_indices.graphics_family, 0) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let scratch_alignment = query_scratch_alignment(&instance, physical_device);

        let command_pool_create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_indices.graphics_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&command_pool_create_info, None)? };

        let acceleration_structure_loader = khr::AccelerationStructure::new(&instance, &device);

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Vulkan device ready: {} (queue family {})",
            device_name.to_string_lossy(),
            queue_family_indices.graphics_family
        );

        Ok(Self {
            entry,
            instance,
            device,
            physical_device,
            memory_properties,
            scratch_alignment,
            queue_family_indices,
            graphics_queue,
            command_pool,
            acceleration_structure_loader,
            debug_messenger,
        })
    }

    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn queue_family_indices(&self) -> &QueueFamilyIndices {
        &self.queue_family_indices
    }

    /// Submits the command buffers in order and blocks until the queue is idle.
    pub fn submit_and_wait(&self, command_buffers: &[vk::CommandBuffer]) -> TsResult<()> {
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(command_buffers)
            .build();
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())?;
            self.device.queue_wait_idle(self.graphics_queue)?;
        }
        Ok(())
    }

    fn one_time_submit<F: FnOnce(vk::CommandBuffer)>(&self, record: F) -> TsResult<()> {
        let command_buffer = self
            .allocate_command_buffers(1)?
            .into_iter()
            .next()
            .ok_or(TsError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))?;

        let result: TsResult<()> = (|| {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(command_buffer, &begin_info)? };
            record(command_buffer);
            unsafe { self.device.end_command_buffer(command_buffer)? };
            self.submit_and_wait(&[command_buffer])
        })();

        self.free_command_buffers(&[command_buffer]);
        result
    }

    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
        device_address: bool,
    ) -> TsResult<vk::DeviceMemory> {
        let memory_type_index = find_memory_type_index(
            &self.memory_properties,
            requirements.memory_type_bits,
            properties,
        )
        .ok_or(TsError::NoSuitableMemoryType {
            type_bits: requirements.memory_type_bits,
            properties,
        })?;

        let mut flags_info = vk::MemoryAllocateFlagsInfo::builder()
            .flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let mut allocate_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        if device_address {
            allocate_info = allocate_info.push_next(&mut flags_info);
        }

        Ok(unsafe { self.device.allocate_memory(&allocate_info, None)? })
    }

    fn buffer_device_address(&self, buffer: &GpuBuffer) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer.buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    fn build(
        &self,
        level: vk::AccelerationStructureTypeKHR,
        geometry: vk::AccelerationStructureGeometryKHR,
        primitive_count: u32,
    ) -> TsResult<AccelerationStructure> {
        let loader = &self.acceleration_structure_loader;
        let geometries = [geometry];
        let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(level)
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .build();

        let sizes = unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[primitive_count],
            )
        };

        let buffer = self.create_buffer(
            sizes.acceleration_structure_size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.buffer)
            .size(sizes.acceleration_structure_size)
            .ty(level);
        let handle = match unsafe { loader.create_acceleration_structure(&create_info, None) } {
            Ok(handle) => handle,
            Err(err) => {
                self.destroy_buffer(buffer);
                return Err(err.into());
            }
        };

        let scratch = match self.create_buffer(
            sizes.build_scratch_size + self.scratch_alignment,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ) {
            Ok(scratch) => scratch,
            Err(err) => {
                unsafe { loader.destroy_acceleration_structure(handle, None) };
                self.destroy_buffer(buffer);
                return Err(err);
            }
        };

        build_info.dst_acceleration_structure = handle;
        build_info.scratch_data = vk::DeviceOrHostAddressKHR {
            device_address: align_up(self.buffer_device_address(&scratch), self.scratch_alignment),
        };
        let ranges = [vk::AccelerationStructureBuildRangeInfoKHR::builder()
            .primitive_count(primitive_count)
            .build()];

        let result = self.one_time_submit(|command_buffer| unsafe {
            loader.cmd_build_acceleration_structures(
                command_buffer,
                std::slice::from_ref(&build_info),
                &[&ranges[..]],
            )
        });
        self.destroy_buffer(scratch);

        if let Err(err) = result {
            unsafe { loader.destroy_acceleration_structure(handle, None) };
            self.destroy_buffer(buffer);
            return Err(err);
        }

        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::builder().acceleration_structure(handle);
        let device_address =
            unsafe { loader.get_acceleration_structure_device_address(&address_info) };

        log::debug!(
            "Built {:?} acceleration structure ({} primitives, {} bytes)",
            level,
            primitive_count,
            sizes.acceleration_structure_size
        );

        Ok(AccelerationStructure {
            handle,
            buffer,
            device_address,
            level,
        })
    }
}

impl Device for VulkanDevice {
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> TsResult<GpuBuffer> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None)? };

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let device_address = usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS);
        let memory = match self.allocate_memory(requirements, properties, device_address) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };

        if let Err(err) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(err.into());
        }

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
        if data.is_empty() {
            return Ok(());
        }

        unsafe {
            let mapped = self.device.map_memory(
                buffer.memory,
                offset,
                data.len() as vk::DeviceSize,
                vk::MemoryMapFlags::empty(),
            )?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
            self.device.unmap_memory(buffer.memory);
        }
        Ok(())
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) {
        unsafe {
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn create_image_block(&self, desc: &ImageBlockDesc) -> TsResult<ImageBlock> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None)? };

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory =
            match self.allocate_memory(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL, false)
            {
                Ok(memory) => memory,
                Err(err) => {
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(err);
                }
            };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::R,
                g: vk::ComponentSwizzle::G,
                b: vk::ComponentSwizzle::B,
                a: vk::ComponentSwizzle::A,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe {
            self.device
                .bind_image_memory(image, memory, 0)
                .and_then(|()| self.device.create_image_view(&view_info, None))
        } {
            Ok(view) => view,
            Err(err) => {
                unsafe {
                    self.device.destroy_image(image, None);
                    self.device.free_memory(memory, None);
                }
                return Err(err.into());
            }
        };

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .max_lod(1.0);
        let sampler = match unsafe { self.device.create_sampler(&sampler_info, None) } {
            Ok(sampler) => sampler,
            Err(err) => {
                unsafe {
                    self.device.destroy_image_view(view, None);
                    self.device.destroy_image(image, None);
                    self.device.free_memory(memory, None);
                }
                return Err(err.into());
            }
        };

        Ok(ImageBlock {
            image,
            memory,
            view,
            sampler,
            format: desc.format,
            extent: desc.extent,
        })
    }

    fn destroy_image_block(&self, image: ImageBlock) {
        unsafe {
            self.device.destroy_sampler(image.sampler, None);
            self.device.destroy_image_view(image.view, None);
            self.device.destroy_image(image.image, None);
            self.device.free_memory(image.memory, None);
        }
    }

    fn prepare_sampled_image(&self, image: &ImageBlock, texels: Option<&[u8]>) -> TsResult<()> {
        let staging = match texels {
            Some(texels) if !texels.is_empty() => {
                let staging = self.create_buffer(
                    texels.len() as vk::DeviceSize,
                    vk::BufferUsageFlags::TRANSFER_SRC,
                    HOST_WRITABLE,
                )?;
                if let Err(err) = self.write_buffer(&staging, 0, texels) {
                    self.destroy_buffer(staging);
                    return Err(err);
                }
                Some(staging)
            }
            _ => None,
        };

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let barrier = |old_layout, new_layout, src_access_mask, dst_access_mask| {
            vk::ImageMemoryBarrier::builder()
                .old_layout(old_layout)
                .new_layout(new_layout)
                .src_access_mask(src_access_mask)
                .dst_access_mask(dst_access_mask)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image.image)
                .subresource_range(subresource_range)
                .build()
        };

        let result = self.one_time_submit(|command_buffer| unsafe {
            match staging {
                Some(staging) => {
                    self.device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier(
                            vk::ImageLayout::UNDEFINED,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            vk::AccessFlags::empty(),
                            vk::AccessFlags::TRANSFER_WRITE,
                        )],
                    );
                    let region = vk::BufferImageCopy::builder()
                        .image_subresource(vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: 0,
                            base_array_layer: 0,
                            layer_count: 1,
                        })
                        .image_extent(vk::Extent3D {
                            width: image.extent.width,
                            height: image.extent.height,
                            depth: 1,
                        })
                        .build();
                    self.device.cmd_copy_buffer_to_image(
                        command_buffer,
                        staging.buffer,
                        image.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[region],
                    );
                    self.device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier(
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            vk::AccessFlags::TRANSFER_WRITE,
                            vk::AccessFlags::SHADER_READ,
                        )],
                    );
                }
                None => {
                    self.device.cmd_pipeline_barrier(
                        command_buffer,
                        vk::PipelineStageFlags::TOP_OF_PIPE,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier(
                            vk::ImageLayout::UNDEFINED,
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                            vk::AccessFlags::empty(),
                            vk::AccessFlags::SHADER_READ,
                        )],
                    );
                }
            }
        });

        if let Some(staging) = staging {
            self.destroy_buffer(staging);
        }
        result
    }

    fn create_shader_module(&self, code: &[u32]) -> TsResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        Ok(unsafe { self.device.create_shader_module(&create_info, None)? })
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) };
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> TsResult<vk::RenderPass> {
        Ok(unsafe { self.device.create_render_pass(info, None)? })
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) };
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> TsResult<vk::Framebuffer> {
        Ok(unsafe { self.device.create_framebuffer(info, None)? })
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) };
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> TsResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        Ok(unsafe {
            self.device
                .create_descriptor_set_layout(&create_info, None)?
        })
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> TsResult<vk::DescriptorPool> {
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        Ok(unsafe { self.device.create_descriptor_pool(&create_info, None)? })
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> TsResult<Vec<vk::DescriptorSet>> {
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        Ok(unsafe { self.device.allocate_descriptor_sets(&allocate_info)? })
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        unsafe { self.device.update_descriptor_sets(writes, &[]) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> TsResult<vk::PipelineLayout> {
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        Ok(unsafe { self.device.create_pipeline_layout(&create_info, None)? })
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) };
    }

    fn create_graphics_pipeline(
        &self,
        info: &vk::GraphicsPipelineCreateInfo,
    ) -> TsResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(
                    vk::PipelineCache::null(),
                    std::slice::from_ref(info),
                    None,
                )
                .map_err(|(_, err)| err)?
        };
        pipelines
            .into_iter()
            .next()
            .ok_or(TsError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) };
    }

    fn allocate_command_buffers(&self, count: u32) -> TsResult<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device.allocate_command_buffers(&allocate_info)? })
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, command_buffers)
        };
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> TsResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info)? };
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> TsResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer)? };
        Ok(())
    }

    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        info: &vk::RenderPassBeginInfo,
    ) {
        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, info, vk::SubpassContents::INLINE)
        };
    }

    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(command_buffer) };
    }

    fn cmd_set_viewport_and_scissor(
        &self,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        unsafe {
            self.device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            self.device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    fn cmd_bind_graphics_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    ) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
        };
    }

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        sets: &[vk::DescriptorSet],
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                sets,
                &[],
            )
        };
    }

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .cmd_push_constants(command_buffer, layout, stages, 0, data)
        };
    }

    fn cmd_bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[0])
        };
    }

    fn cmd_bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(command_buffer, buffer, 0, vk::IndexType::UINT32)
        };
    }

    fn cmd_draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32) {
        unsafe {
            self.device
                .cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0)
        };
    }

    fn build_acceleration_structure(
        &self,
        input: &AccelerationStructureInput,
    ) -> TsResult<AccelerationStructure> {
        match input {
            AccelerationStructureInput::BottomLevel(triangles) => {
                let triangles_data = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
                    .vertex_format(vk::Format::R32G32B32_SFLOAT)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: self.buffer_device_address(&triangles.vertex_buffer),
                    })
                    .vertex_stride(triangles.vertex_stride)
                    .max_vertex(triangles.vertex_count.saturating_sub(1))
                    .index_type(vk::IndexType::UINT32)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: self.buffer_device_address(&triangles.index_buffer),
                    })
                    .build();
                let geometry = vk::AccelerationStructureGeometryKHR::builder()
                    .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                    .geometry(vk::AccelerationStructureGeometryDataKHR {
                        triangles: triangles_data,
                    })
                    .flags(vk::GeometryFlagsKHR::OPAQUE)
                    .build();
                self.build(input.level(), geometry, triangles.triangle_count())
            }
            AccelerationStructureInput::TopLevel(instances) => {
                let records = instances
                    .iter()
                    .map(to_vk_instance)
                    .collect::<Vec<vk::AccelerationStructureInstanceKHR>>();
                let byte_len =
                    std::mem::size_of::<vk::AccelerationStructureInstanceKHR>() * records.len();
                let instance_buffer = self.create_buffer(
                    byte_len.max(1) as vk::DeviceSize,
                    vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                        | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
                    HOST_WRITABLE,
                )?;

                let bytes =
                    unsafe { std::slice::from_raw_parts(records.as_ptr().cast::<u8>(), byte_len) };
                let result = self.write_buffer(&instance_buffer, 0, bytes).and_then(|()| {
                    let instances_data =
                        vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                            .array_of_pointers(false)
                            .data(vk::DeviceOrHostAddressConstKHR {
                                device_address: self.buffer_device_address(&instance_buffer),
                            })
                            .build();
                    let geometry = vk::AccelerationStructureGeometryKHR::builder()
                        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                        .geometry(vk::AccelerationStructureGeometryDataKHR {
                            instances: instances_data,
                        })
                        .build();
                    self.build(input.level(), geometry, records.len() as u32)
                });
                self.destroy_buffer(instance_buffer);
                result
            }
        }
    }

    fn destroy_acceleration_structure(&self, accel: AccelerationStructure) {
        unsafe {
            self.acceleration_structure_loader
                .destroy_acceleration_structure(accel.handle, None)
        };
        self.destroy_buffer(accel.buffer);
    }

    fn wait_idle(&self) -> TsResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        _ = unsafe { self.device.device_wait_idle() };
        unsafe { self.device.destroy_command_pool(self.command_pool, None) };
        if let Some(messenger) = self.debug_messenger.take() {
            let debug_utils_loader = DebugUtils::new(&self.entry, &self.instance);
            unsafe { debug_utils_loader.destroy_debug_utils_messenger(messenger, None) };
        }
        unsafe { self.device.destroy_device(None) };
        unsafe { self.instance.destroy_instance(None) };
    }
}

fn to_vk_instance(instance: &AccelerationStructureInstance) -> vk::AccelerationStructureInstanceKHR {
    vk::AccelerationStructureInstanceKHR {
        transform: vk::TransformMatrixKHR {
            matrix: instance.transform,
        },
        instance_custom_index_and_mask: vk::Packed24_8::new(instance.custom_index, instance.mask),
        instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
            0,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8,
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: instance.bottom_level_address,
        },
    }
}

fn align_up(address: vk::DeviceAddress, alignment: vk::DeviceSize) -> vk::DeviceAddress {
    let alignment = alignment.max(1);
    (address + alignment - 1) / alignment * alignment
}

fn create_instance(entry: &Entry, display_handle: Option<RawDisplayHandle>) -> TsResult<Instance> {
    let app_name = CString::new("tsumiki")?;
    let engine_name = CString::new("tsumiki")?;

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(0)
        .engine_name(&engine_name)
        .engine_version(0)
        .api_version(vk::make_api_version(0, 1, 3, 0));

    let validation_layer = CString::new("VK_LAYER_KHRONOS_validation")?;
    let layer_properties = entry.enumerate_instance_layer_properties()?;
    let has_validation = layer_properties.iter().any(|prop| {
        let name = unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) };
        name == validation_layer.as_c_str()
    });
    let layer_names = if cfg!(feature = "debug") && has_validation {
        vec![validation_layer.as_ptr()]
    } else {
        Vec::new()
    };

    let mut extension_names = match display_handle {
        Some(display_handle) => ash_window::enumerate_required_extensions(display_handle)?.to_vec(),
        None => Vec::<*const c_char>::new(),
    };
    if cfg!(feature = "debug") {
        extension_names.push(DebugUtils::name().as_ptr());
    }
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        extension_names.push(vk::KhrPortabilityEnumerationFn::name().as_ptr());
        // Enabling this extension is a requirement when using `VK_KHR_portability_subset`
        extension_names.push(vk::KhrGetPhysicalDeviceProperties2Fn::name().as_ptr());
    }

    let create_flags = if cfg!(any(target_os = "macos", target_os = "ios")) {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::default()
    };

    let create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_layer_names(&layer_names)
        .enabled_extension_names(&extension_names)
        .flags(create_flags);

    let instance = unsafe { entry.create_instance(&create_info, None)? };

    Ok(instance)
}

fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> TsResult<vk::DebugUtilsMessengerEXT> {
    let debug_utils_loader = DebugUtils::new(entry, instance);
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));
    Ok(unsafe { debug_utils_loader.create_debug_utils_messenger(&create_info, None)? })
}

fn required_device_extensions(with_swapchain: bool) -> Vec<&'static CStr> {
    let mut names = vec![
        khr::AccelerationStructure::name(),
        khr::DeferredHostOperations::name(),
    ];
    if with_swapchain {
        names.push(khr::Swapchain::name());
    }
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    names.push(vk::KhrPortabilitySubsetFn::name());
    names
}

fn supports_extensions(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    required: &[&CStr],
) -> bool {
    let available = match unsafe { instance.enumerate_device_extension_properties(physical_device) }
    {
        Ok(available) => available,
        Err(_) => return false,
    };
    required.iter().all(|&name| {
        available
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == name)
    })
}

/// Picks a device with a graphics queue and the acceleration structure
/// extensions. DISCRETE_GPU type is preferred.
fn pick_physical_device_and_queue_family(
    instance: &Instance,
    with_swapchain: bool,
) -> TsResult<(vk::PhysicalDevice, QueueFamilyIndices)> {
    let physical_devices = unsafe { instance.enumerate_physical_devices()? };
    let required = required_device_extensions(with_swapchain);

    let candidates = physical_devices
        .iter()
        .filter(|&&physical_device| supports_extensions(instance, physical_device, &required))
        .filter_map(|&physical_device| {
            let graphics_family = unsafe {
                instance.get_physical_device_queue_family_properties(physical_device)
            }
            .iter()
            .position(|info| info.queue_flags.contains(vk::QueueFlags::GRAPHICS))?;
            Some((physical_device, graphics_family as u32))
        })
        .collect::<Vec<(vk::PhysicalDevice, u32)>>();

    let discrete = candidates.iter().find(|(physical_device, _)| {
        unsafe { instance.get_physical_device_properties(*physical_device) }.device_type
            == vk::PhysicalDeviceType::DISCRETE_GPU
    });

    discrete
        .or_else(|| candidates.first())
        .map(|&(physical_device, graphics_family)| {
            (physical_device, QueueFamilyIndices { graphics_family })
        })
        .ok_or(TsError::NoSuitableDevice)
}

fn create_device(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_indices: &QueueFamilyIndices,
    with_swapchain: bool,
) -> TsResult<ash::Device> {
    let extension_names = required_device_extensions(with_swapchain)
        .iter()
        .map(|name| name.as_ptr())
        .collect::<Vec<*const c_char>>();

    let queue_priorities = [1.0];
    let queue_infos = [vk::DeviceQueueCreateInfo::builder()
        .queue_family_index(queue_family_indices.graphics_family)
        .queue_priorities(&queue_priorities)
        .build()];

    let mut vulkan12_features =
        vk::PhysicalDeviceVulkan12Features::builder().buffer_device_address(true);
    let mut acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::builder().acceleration_structure(true);

    let create_info = vk::DeviceCreateInfo::builder()
        .enabled_extension_names(&extension_names)
        .queue_create_infos(&queue_infos)
        .push_next(&mut vulkan12_features)
        .push_next(&mut acceleration_structure_features);

    let device = unsafe { instance.create_device(physical_device, &create_info, None)? };
    Ok(device)
}

fn query_scratch_alignment(
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> vk::DeviceSize {
    let mut acceleration_structure_properties =
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
    {
        let mut properties = vk::PhysicalDeviceProperties2::builder()
            .push_next(&mut acceleration_structure_properties);
        unsafe { instance.get_physical_device_properties2(physical_device, &mut properties) };
    }
    acceleration_structure_properties
        .min_acceleration_structure_scratch_offset_alignment
        .max(1) as vk::DeviceSize
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    let callback_data = *p_callback_data;
    let message_id_number = callback_data.message_id_number;

    let message_id_name = if callback_data.p_message_id_name.is_null() {
        std::borrow::Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message_id_name).to_string_lossy()
    };

    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::from("")
    } else {
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    let level = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else {
        log::Level::Debug
    };
    log::log!(
        level,
        "{:?} [{} ({})] : {}",
        message_type,
        message_id_name,
        message_id_number,
        message,
    );

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 128), 0);
        assert_eq!(align_up(1, 128), 128);
        assert_eq!(align_up(256, 128), 256);
        assert_eq!(align_up(257, 0), 257);
    }

    #[test]
    fn test_required_device_extensions() {
        let headless = required_device_extensions(false);
        assert!(headless.contains(&khr::AccelerationStructure::name()));
        assert!(!headless.contains(&khr::Swapchain::name()));
        assert!(required_device_extensions(true).contains(&khr::Swapchain::name()));
    }
}
