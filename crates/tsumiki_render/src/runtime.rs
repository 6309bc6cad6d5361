use std::{cell::RefCell, mem::size_of, rc::Rc};

use log::{debug, info};
use rand::{rngs::StdRng, SeedableRng};
use tsumiki_vulkan::{vk, Device, GpuBuffer, HOST_WRITABLE};

use crate::{
    generate_ssao_kernel, EngineConfig, Frame, PerFrameData, PerObjectData, RenderError, Result,
    SsaoData,
};

struct FrameResources {
    per_frame: Vec<Option<GpuBuffer>>,
    per_object: Vec<Option<GpuBuffer>>,
    ssao_kernel: Option<GpuBuffer>,
}

/// Owns the GPU buffers that are shared by every pass: one per-frame uniform
/// buffer and one per-object storage buffer for each frame in flight, plus
/// the SSAO kernel which is written once and then only read.
pub struct Runtime {
    device: Rc<dyn Device>,
    config: EngineConfig,
    resources: RefCell<FrameResources>,
}

impl Runtime {
    pub fn new(device: &Rc<dyn Device>, config: EngineConfig) -> Self {
        let slots = config.max_frames_in_flight;
        Self {
            device: device.clone(),
            config,
            resources: RefCell::new(FrameResources {
                per_frame: vec![None; slots],
                per_object: vec![None; slots],
                ssao_kernel: None,
            }),
        }
    }

    pub fn device(&self) -> &Rc<dyn Device> {
        &self.device
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Allocates every empty slot. Slots that already hold a buffer are left
    /// untouched, so calling this twice is harmless. On failure the slots
    /// created so far stay allocated until [`Runtime::free_resources`].
    pub fn create_resources(&self) -> Result<()> {
        let mut resources = self.resources.borrow_mut();
        let per_object_size = (self.config.max_objects * size_of::<PerObjectData>()) as u64;

        for index in 0..self.config.max_frames_in_flight {
            if resources.per_frame[index].is_none() {
                let buffer = self
                    .device
                    .create_buffer(
                        size_of::<PerFrameData>() as u64,
                        vk::BufferUsageFlags::UNIFORM_BUFFER,
                        HOST_WRITABLE,
                    )
                    .map_err(RenderError::init("per-frame uniform buffer"))?;
                debug!("Allocated per-frame buffer for slot {index}");
                resources.per_frame[index] = Some(buffer);
            }
            if resources.per_object[index].is_none() {
                let buffer = self
                    .device
                    .create_buffer(
                        per_object_size,
                        vk::BufferUsageFlags::STORAGE_BUFFER,
                        HOST_WRITABLE,
                    )
                    .map_err(RenderError::init("per-object storage buffer"))?;
                debug!("Allocated per-object buffer for slot {index}");
                resources.per_object[index] = Some(buffer);
            }
        }

        if resources.ssao_kernel.is_none() {
            let buffer = self
                .device
                .create_buffer(
                    size_of::<SsaoData>() as u64,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    HOST_WRITABLE,
                )
                .map_err(RenderError::init("SSAO kernel buffer"))?;
            let mut rng = StdRng::seed_from_u64(self.config.ssao_kernel_seed);
            let kernel = generate_ssao_kernel(&mut rng);
            if let Err(err) = self
                .device
                .write_buffer(&buffer, 0, bytemuck::bytes_of(&kernel))
            {
                self.device.destroy_buffer(buffer);
                return Err(RenderError::init("SSAO kernel buffer")(err));
            }
            resources.ssao_kernel = Some(buffer);
        }

        info!(
            "Runtime resources ready for {} frames in flight",
            self.config.max_frames_in_flight
        );
        Ok(())
    }

    /// Releases every allocated slot and resets it to empty.
    pub fn free_resources(&self) {
        let mut resources = self.resources.borrow_mut();
        let resources = &mut *resources;
        for slot in resources
            .per_frame
            .iter_mut()
            .chain(resources.per_object.iter_mut())
            .chain(std::iter::once(&mut resources.ssao_kernel))
        {
            if let Some(buffer) = slot.take() {
                self.device.destroy_buffer(buffer);
            }
        }
    }

    pub fn write_per_frame(&self, frame: &Frame, data: &PerFrameData) -> Result<()> {
        let buffer = self.per_frame_buffer(frame.index())?;
        self.device
            .write_buffer(&buffer, 0, bytemuck::bytes_of(data))
            .map_err(RenderError::init("per-frame uniform buffer"))
    }

    /// Writes `objects` to the start of the slot's storage buffer.
    pub fn write_per_objects(&self, frame: &Frame, objects: &[PerObjectData]) -> Result<()> {
        if objects.len() > self.config.max_objects {
            return Err(RenderError::TooManyObjects {
                count: objects.len(),
                max: self.config.max_objects,
            });
        }
        let buffer = self.per_object_buffer(frame.index())?;
        self.device
            .write_buffer(&buffer, 0, bytemuck::cast_slice(objects))
            .map_err(RenderError::init("per-object storage buffer"))
    }

    pub fn per_frame_buffer(&self, index: usize) -> Result<GpuBuffer> {
        self.config.check_frame_index(index)?;
        self.resources.borrow().per_frame[index]
            .ok_or_else(|| not_created("per-frame uniform buffer"))
    }

    pub fn per_object_buffer(&self, index: usize) -> Result<GpuBuffer> {
        self.config.check_frame_index(index)?;
        self.resources.borrow().per_object[index]
            .ok_or_else(|| not_created("per-object storage buffer"))
    }

    pub fn ssao_kernel_buffer(&self) -> Result<GpuBuffer> {
        self.resources
            .borrow()
            .ssao_kernel
            .ok_or_else(|| not_created("SSAO kernel buffer"))
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.free_resources();
    }
}

fn not_created(what: &'static str) -> RenderError {
    RenderError::Initialization {
        what,
        source: vk::Result::ERROR_INITIALIZATION_FAILED.into(),
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::Zeroable;
    use tsumiki_vulkan::{MockDevice, MockObject};

    use super::*;

    fn runtime() -> (Rc<MockDevice>, Runtime) {
        let mock = Rc::new(MockDevice::new());
        let device: Rc<dyn Device> = mock.clone();
        (mock, Runtime::new(&device, EngineConfig::default()))
    }

    #[test]
    fn test_create_resources_is_idempotent() {
        let (mock, runtime) = runtime();
        runtime.create_resources().unwrap();
        let slots = |runtime: &Runtime| -> Vec<_> {
            (0..3)
                .map(|i| {
                    (
                        runtime.per_frame_buffer(i).unwrap(),
                        runtime.per_object_buffer(i).unwrap(),
                    )
                })
                .collect()
        };
        let first = slots(&runtime);
        let kernel = runtime.ssao_kernel_buffer().unwrap();

        runtime.create_resources().unwrap();
        assert_eq!(first, slots(&runtime));
        assert_eq!(kernel, runtime.ssao_kernel_buffer().unwrap());
        assert_eq!(mock.live_count(MockObject::Buffer), 7);
    }

    #[test]
    fn test_free_resources_resets_slots() {
        let (mock, runtime) = runtime();
        runtime.create_resources().unwrap();
        runtime.free_resources();
        assert_eq!(mock.live_count(MockObject::Buffer), 0);
        assert!(runtime.per_frame_buffer(0).is_err());
        assert!(runtime.ssao_kernel_buffer().is_err());

        runtime.free_resources();
        assert_eq!(mock.live_count(MockObject::Buffer), 0);
    }

    #[test]
    fn test_partial_failure_keeps_created_slots() {
        let (mock, runtime) = runtime();
        mock.fail_on(MockObject::Buffer);
        let result = runtime.create_resources();
        assert!(matches!(result, Err(RenderError::Initialization { .. })));

        mock.clear_failures();
        runtime.create_resources().unwrap();
        assert_eq!(mock.live_count(MockObject::Buffer), 7);
    }

    #[test]
    fn test_kernel_written_from_seed() {
        let (mock, runtime) = runtime();
        runtime.create_resources().unwrap();
        let kernel = runtime.ssao_kernel_buffer().unwrap();
        assert_eq!(kernel.size, 64 * 16);

        let mut rng = StdRng::seed_from_u64(EngineConfig::default().ssao_kernel_seed);
        let expected = generate_ssao_kernel(&mut rng);
        assert_eq!(
            mock.read_memory(kernel.memory).unwrap(),
            bytemuck::bytes_of(&expected)
        );
    }

    #[test]
    fn test_frame_index_out_of_range() {
        let (_mock, runtime) = runtime();
        runtime.create_resources().unwrap();
        assert!(matches!(
            runtime.per_object_buffer(3),
            Err(RenderError::FrameIndexOutOfRange { index: 3, max: 3 })
        ));
    }

    #[test]
    fn test_write_per_objects_rejects_overflow() {
        let mock = Rc::new(MockDevice::new());
        let device: Rc<dyn Device> = mock.clone();
        let config = EngineConfig::builder().max_objects(2).build().unwrap();
        let runtime = Runtime::new(&device, config);
        runtime.create_resources().unwrap();

        let objects = [PerObjectData::zeroed(); 3];
        assert!(matches!(
            runtime.write_per_objects(&Frame::new(0, 0), &objects),
            Err(RenderError::TooManyObjects { count: 3, max: 2 })
        ));
        runtime
            .write_per_objects(&Frame::new(0, 0), &objects[..2])
            .unwrap();
    }
}
