use std::rc::Rc;

use log::info;
use tsumiki_vulkan::{vk, ImageBlock, ShaderProgram};

use super::common::{push_constant_size, DescriptorInput, PassDesc, PassResources};
use crate::{Frame, Mesh, RenderError, RenderPass, Result, Runtime, SsaoParams};

const DESCRIPTOR_TYPES: [vk::DescriptorType; 5] = [
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER,
];

/// Attachments sampled by the SSAO pass.
#[derive(Clone, Copy, Debug)]
pub struct SsaoInputs {
    pub position_depth: ImageBlock,
    pub normal: ImageBlock,
    pub noise: ImageBlock,
}

/// Estimates ambient occlusion from the G-buffer.
///
/// Binding 0 is position and depth, 1 the normals, 2 the tiled rotation
/// noise, 3 the SSAO kernel and 4 the slot's per-frame uniform buffer.
pub struct CompositionPassSsao {
    runtime: Rc<Runtime>,
    program: Rc<ShaderProgram>,
    plane: Rc<Mesh>,
    inputs: SsaoInputs,
    output: ImageBlock,
    reads: [vk::Image; 3],
    writes: [vk::Image; 1],
    resources: PassResources,
}

impl CompositionPassSsao {
    pub fn new(
        runtime: &Rc<Runtime>,
        program: &Rc<ShaderProgram>,
        plane: &Rc<Mesh>,
        inputs: SsaoInputs,
        output: ImageBlock,
    ) -> Self {
        Self {
            runtime: runtime.clone(),
            program: program.clone(),
            plane: plane.clone(),
            reads: [
                inputs.position_depth.handle(),
                inputs.normal.handle(),
                inputs.noise.handle(),
            ],
            writes: [output.handle()],
            inputs,
            output,
            resources: PassResources::new(runtime.device()),
        }
    }

    pub fn output(&self) -> &ImageBlock {
        &self.output
    }

    pub fn params(&self) -> SsaoParams {
        let config = self.runtime.config();
        let noise = self.inputs.noise.extent();
        SsaoParams {
            radius: config.ssao_radius,
            bias: config.ssao_bias,
            noise_scale: [
                self.output.extent.width as f32 / noise.width.max(1) as f32,
                self.output.extent.height as f32 / noise.height.max(1) as f32,
            ],
        }
    }

    fn descriptor_inputs(&self) -> Result<Vec<[DescriptorInput; 5]>> {
        let kernel = self.runtime.ssao_kernel_buffer()?;
        (0..self.runtime.config().max_frames_in_flight)
            .map(|slot| -> Result<[DescriptorInput; 5]> {
                let per_frame = self.runtime.per_frame_buffer(slot)?;
                Ok([
                    DescriptorInput::Image(self.inputs.position_depth.sampled_descriptor_info()),
                    DescriptorInput::Image(self.inputs.normal.sampled_descriptor_info()),
                    DescriptorInput::Image(self.inputs.noise.sampled_descriptor_info()),
                    DescriptorInput::UniformBuffer(kernel.descriptor_info()),
                    DescriptorInput::UniformBuffer(per_frame.descriptor_info()),
                ])
            })
            .collect()
    }
}

impl RenderPass for CompositionPassSsao {
    fn name(&self) -> &str {
        "ssao"
    }

    fn initialize(&mut self) -> Result<()> {
        if self.resources.is_initialized() {
            return Ok(());
        }
        // Runtime buffers are looked up first so a missing one creates nothing.
        let descriptor_inputs = self.descriptor_inputs()?;

        let desc = PassDesc {
            descriptor_types: &DESCRIPTOR_TYPES,
            push_constant_size: push_constant_size::<SsaoParams>(),
            output: &self.output,
            frames: descriptor_inputs.len(),
        };
        if let Err(err) = self.resources.create(&desc, &self.program) {
            self.resources.release();
            return Err(RenderError::init("SSAO pass")(err));
        }
        for (slot, inputs) in descriptor_inputs.iter().enumerate() {
            self.resources.write_descriptors(slot, inputs);
        }

        info!("Initialized {} pass", self.name());
        Ok(())
    }

    fn shutdown(&mut self) {
        self.resources.release();
    }

    fn draw(&mut self, frame: &Frame) -> Result<vk::CommandBuffer> {
        if !self.resources.is_initialized() {
            return Err(RenderError::PassNotInitialized(self.name().to_string()));
        }
        self.runtime.config().check_frame_index(frame.index())?;

        let params = self.params();
        self.resources
            .record(
                frame,
                self.output.extent(),
                &self.plane,
                bytemuck::bytes_of(&params),
            )
            .map_err(RenderError::init("SSAO command buffer"))
    }

    fn reads(&self) -> &[vk::Image] {
        &self.reads
    }

    fn writes(&self) -> &[vk::Image] {
        &self.writes
    }
}
