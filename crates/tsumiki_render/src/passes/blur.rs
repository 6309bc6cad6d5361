use std::rc::Rc;

use log::info;
use tsumiki_vulkan::{vk, ImageBlock, ShaderProgram};

use super::common::{push_constant_size, DescriptorInput, PassDesc, PassResources};
use crate::{BlurParams, Frame, Mesh, RenderError, RenderPass, Result, Runtime};

const DESCRIPTOR_TYPES: [vk::DescriptorType; 2] = [
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
];

/// Smooths the raw occlusion written by the SSAO pass. Binding 0 is the SSAO
/// attachment and binding 1 a secondary attachment.
pub struct CompositionPassBlur {
    runtime: Rc<Runtime>,
    program: Rc<ShaderProgram>,
    plane: Rc<Mesh>,
    ssao: ImageBlock,
    secondary: ImageBlock,
    output: ImageBlock,
    reads: [vk::Image; 2],
    writes: [vk::Image; 1],
    resources: PassResources,
}

impl CompositionPassBlur {
    pub fn new(
        runtime: &Rc<Runtime>,
        program: &Rc<ShaderProgram>,
        plane: &Rc<Mesh>,
        ssao: ImageBlock,
        secondary: ImageBlock,
        output: ImageBlock,
    ) -> Self {
        Self {
            runtime: runtime.clone(),
            program: program.clone(),
            plane: plane.clone(),
            reads: [ssao.handle(), secondary.handle()],
            writes: [output.handle()],
            ssao,
            secondary,
            output,
            resources: PassResources::new(runtime.device()),
        }
    }

    pub fn output(&self) -> &ImageBlock {
        &self.output
    }

    pub fn params(&self) -> BlurParams {
        let extent = self.ssao.extent();
        BlurParams {
            texel_size: [
                1.0 / extent.width.max(1) as f32,
                1.0 / extent.height.max(1) as f32,
            ],
            radius: self.runtime.config().blur_radius as i32,
            _padding: 0,
        }
    }
}

impl RenderPass for CompositionPassBlur {
    fn name(&self) -> &str {
        "blur"
    }

    fn initialize(&mut self) -> Result<()> {
        if self.resources.is_initialized() {
            return Ok(());
        }
        let frames = self.runtime.config().max_frames_in_flight;
        let desc = PassDesc {
            descriptor_types: &DESCRIPTOR_TYPES,
            push_constant_size: push_constant_size::<BlurParams>(),
            output: &self.output,
            frames,
        };
        if let Err(err) = self.resources.create(&desc, &self.program) {
            self.resources.release();
            return Err(RenderError::init("blur pass")(err));
        }
        let inputs = [
            DescriptorInput::Image(self.ssao.sampled_descriptor_info()),
            DescriptorInput::Image(self.secondary.sampled_descriptor_info()),
        ];
        for slot in 0..frames {
            self.resources.write_descriptors(slot, &inputs);
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
            .map_err(RenderError::init("blur command buffer"))
    }

    fn reads(&self) -> &[vk::Image] {
        &self.reads
    }

    fn writes(&self) -> &[vk::Image] {
        &self.writes
    }
}
