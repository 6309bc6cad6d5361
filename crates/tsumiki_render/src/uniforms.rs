use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use tsumiki_vulkan::vk;

use crate::{Camera, Entity, Frame, SSAO_KERNEL_SIZE};

/// Per-frame uniform block, binding 4 of the SSAO pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PerFrameData {
    pub view: Mat4,
    pub projection: Mat4,
    pub inverse_projection: Mat4,
    pub camera_position: Vec4,
    /// width, height, 1 / width, 1 / height
    pub viewport: Vec4,
    pub frame_number: u32,
    pub _padding: [u32; 3],
}

impl PerFrameData {
    pub fn from_camera(camera: &Camera, extent: vk::Extent2D, frame: &Frame) -> Self {
        let width = extent.width.max(1) as f32;
        let height = extent.height.max(1) as f32;
        let projection = camera.projection_matrix(width / height);
        Self {
            view: camera.view_matrix(),
            projection,
            inverse_projection: projection.inverse(),
            camera_position: camera.position.extend(1.0),
            viewport: Vec4::new(width, height, 1.0 / width, 1.0 / height),
            frame_number: frame.number() as u32,
            _padding: [0; 3],
        }
    }
}

/// Per-object storage record, indexed by draw order.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PerObjectData {
    pub model: Mat4,
    pub normal: Mat4,
    /// rgb albedo, roughness in w
    pub albedo_roughness: Vec4,
    /// metallic in x
    pub metallic: Vec4,
}

impl PerObjectData {
    pub fn from_entity(entity: &Entity) -> Self {
        let model = entity.transform.model_matrix();
        let material = &entity.material;
        Self {
            model,
            normal: model.inverse().transpose(),
            albedo_roughness: material.albedo.extend(material.roughness),
            metallic: Vec4::new(material.metallic, 0.0, 0.0, 0.0),
        }
    }
}

/// The SSAO sample kernel as uploaded to the GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SsaoData {
    pub samples: [Vec4; SSAO_KERNEL_SIZE],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SsaoParams {
    pub radius: f32,
    pub bias: f32,
    pub noise_scale: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct BlurParams {
    pub texel_size: [f32; 2],
    pub radius: i32,
    pub _padding: u32,
}

#[cfg(test)]
mod tests {
    use std::mem::size_of;

    use super::*;

    #[test]
    fn test_gpu_layout_sizes() {
        assert_eq!(size_of::<PerFrameData>(), 240);
        assert_eq!(size_of::<PerObjectData>(), 160);
        assert_eq!(size_of::<SsaoData>(), 64 * 16);
        assert_eq!(size_of::<SsaoParams>(), 16);
        assert_eq!(size_of::<BlurParams>(), 16);
    }

    #[test]
    fn test_per_frame_data_from_camera() {
        let camera = Camera::default();
        let data = PerFrameData::from_camera(
            &camera,
            vk::Extent2D {
                width: 800,
                height: 400,
            },
            &Frame::new(1, 41),
        );
        assert_eq!(data.frame_number, 41);
        assert_eq!(data.viewport.x, 800.0);
        assert_eq!(data.viewport.w, 1.0 / 400.0);
        let identity = data.projection * data.inverse_projection;
        assert!(identity.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }
}
