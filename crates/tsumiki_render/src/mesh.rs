use std::{mem::size_of, rc::Rc};

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use log::debug;
use tsumiki_vulkan::{vk, Device, GpuBuffer, TriangleGeometry, HOST_WRITABLE};

use crate::{RenderError, Result};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 12,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: 24,
            },
        ]
    }
}

/// Geometry uploaded to host-visible buffers that can feed both rasterization
/// and acceleration structure builds. The buffers are released when the mesh
/// is dropped.
pub struct Mesh {
    device: Rc<dyn Device>,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    pub fn new(device: &Rc<dyn Device>, vertices: &[Vertex], indices: &[u32]) -> Result<Self> {
        let vertex_buffer = create_geometry_buffer(
            device,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = match create_geometry_buffer(
            device,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        ) {
            Ok(buffer) => buffer,
            Err(err) => {
                device.destroy_buffer(vertex_buffer);
                return Err(err);
            }
        };
        debug!(
            "Uploaded mesh with {} vertices and {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            device: device.clone(),
            vertex_buffer,
            index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
        })
    }

    /// A unit quad in the XZ plane facing +Y.
    pub fn plane(device: &Rc<dyn Device>) -> Result<Self> {
        let vertices = [
            (Vec3::new(-0.5, 0.0, -0.5), Vec2::new(0.0, 0.0)),
            (Vec3::new(-0.5, 0.0, 0.5), Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, 0.0, 0.5), Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.0, -0.5), Vec2::new(1.0, 0.0)),
        ]
        .map(|(position, uv)| Vertex::new(position, Vec3::Y, uv));
        Self::new(device, &vertices, &[0, 1, 2, 0, 2, 3])
    }

    /// Two triangles covering clip space, used by full-screen passes.
    pub fn screen_quad(device: &Rc<dyn Device>) -> Result<Self> {
        let vertices = [
            (Vec3::new(-1.0, -1.0, 0.0), Vec2::new(0.0, 0.0)),
            (Vec3::new(-1.0, 1.0, 0.0), Vec2::new(0.0, 1.0)),
            (Vec3::new(1.0, 1.0, 0.0), Vec2::new(1.0, 1.0)),
            (Vec3::new(1.0, -1.0, 0.0), Vec2::new(1.0, 0.0)),
        ]
        .map(|(position, uv)| Vertex::new(position, Vec3::Z, uv));
        Self::new(device, &vertices, &[0, 1, 2, 0, 2, 3])
    }

    /// A unit cube centred on the origin with per-face normals.
    pub fn cube(device: &Rc<dyn Device>) -> Result<Self> {
        let faces = [
            (Vec3::X, Vec3::Y),
            (Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::Z),
            (Vec3::NEG_Y, Vec3::Z),
            (Vec3::Z, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, up) in faces {
            let right = up.cross(normal);
            let base = vertices.len() as u32;
            for (u, v) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
                let position = (normal + right * (u * 2.0 - 1.0) + up * (v * 2.0 - 1.0)) * 0.5;
                vertices.push(Vertex::new(position, normal, Vec2::new(u, v)));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Self::new(device, &vertices, &indices)
    }

    /// Geometry from bare positions. Normals are averaged from the faces that
    /// use each vertex.
    ///
    /// # Panics
    ///
    /// Panics if an index is out of range for `positions`.
    pub fn from_positions(
        device: &Rc<dyn Device>,
        positions: &[Vec3],
        indices: &[u32],
    ) -> Result<Self> {
        let mut normals = vec![Vec3::ZERO; positions.len()];
        for triangle in indices.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
            let face = (positions[b] - positions[a]).cross(positions[c] - positions[a]);
            for i in [a, b, c] {
                normals[i] += face;
            }
        }
        let vertices: Vec<Vertex> = positions
            .iter()
            .zip(normals)
            .map(|(&position, normal)| {
                Vertex::new(position, normal.normalize_or_zero(), Vec2::ZERO)
            })
            .collect();
        Self::new(device, &vertices, indices)
    }

    pub fn vertex_buffer(&self) -> &GpuBuffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &GpuBuffer {
        &self.index_buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn triangle_geometry(&self) -> TriangleGeometry {
        TriangleGeometry {
            vertex_buffer: self.vertex_buffer,
            vertex_stride: size_of::<Vertex>() as vk::DeviceSize,
            vertex_count: self.vertex_count,
            index_buffer: self.index_buffer,
            index_count: self.index_count,
        }
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.index_buffer);
        self.device.destroy_buffer(self.vertex_buffer);
    }
}

fn create_geometry_buffer(
    device: &Rc<dyn Device>,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> Result<GpuBuffer> {
    let buffer = device
        .create_buffer(
            data.len() as vk::DeviceSize,
            usage
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            HOST_WRITABLE,
        )
        .map_err(RenderError::init("mesh buffer"))?;
    if let Err(err) = device.write_buffer(&buffer, 0, data) {
        device.destroy_buffer(buffer);
        return Err(RenderError::init("mesh buffer")(err));
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use tsumiki_vulkan::{MockDevice, MockObject};

    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(size_of::<Vertex>(), 32);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn test_cube_geometry() {
        let device: Rc<dyn Device> = Rc::new(MockDevice::new());
        let cube = Mesh::cube(&device).unwrap();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert_eq!(cube.triangle_geometry().triangle_count(), 12);
    }

    #[test]
    fn test_mesh_uploads_and_releases_buffers() {
        let mock = Rc::new(MockDevice::new());
        let device: Rc<dyn Device> = mock.clone();
        let plane = Mesh::plane(&device).unwrap();
        assert_eq!(mock.live_count(MockObject::Buffer), 2);

        let indices = mock.read_memory(plane.index_buffer().memory).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, u32>(&indices), &[0, 1, 2, 0, 2, 3]);

        drop(plane);
        assert_eq!(mock.live_count(MockObject::Buffer), 0);
    }

    #[test]
    fn test_from_positions_computes_normals() {
        let device: Rc<dyn Device> = Rc::new(MockDevice::new());
        let mesh = Mesh::from_positions(
            &device,
            &[Vec3::ZERO, Vec3::Z, Vec3::X],
            &[0, 1, 2],
        )
        .unwrap();
        assert_eq!(mesh.vertex_count(), 3);
    }

    #[test]
    fn test_failed_upload_leaves_no_buffers() {
        let mock = Rc::new(MockDevice::new());
        let device: Rc<dyn Device> = mock.clone();
        mock.fail_on(MockObject::Buffer);
        assert!(matches!(
            Mesh::plane(&device),
            Err(RenderError::Initialization { .. })
        ));
        assert_eq!(mock.live_count(MockObject::Buffer), 0);
    }
}
