use std::rc::Rc;

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::{Material, Mesh};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    /// Rotation given as XYZ Euler angles in degrees.
    pub fn from_euler_degrees(translation: Vec3, rotation_degrees: Vec3, scale: Vec3) -> Self {
        Self {
            translation,
            rotation: Quat::from_euler(
                EulerRot::XYZ,
                rotation_degrees.x.to_radians(),
                rotation_degrees.y.to_radians(),
                rotation_degrees.z.to_radians(),
            ),
            scale,
        }
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// The first three rows of the model matrix, row-major, as acceleration
    /// structure instances want it.
    pub fn to_row_major_3x4(&self) -> [f32; 12] {
        let m = self.model_matrix().transpose().to_cols_array();
        let mut rows = [0.0; 12];
        rows.copy_from_slice(&m[..12]);
        rows
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

/// A mesh placed in the scene with a material.
pub struct Entity {
    pub name: String,
    pub mesh: Rc<Mesh>,
    pub material: Rc<Material>,
    pub transform: Transform,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_major_transform_carries_translation() {
        let transform = Transform::from_euler_degrees(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::ZERO,
            Vec3::splat(2.0),
        );
        assert_eq!(
            transform.to_row_major_3x4(),
            [2.0, 0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 2.0, 0.0, 0.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_euler_degrees_rotation() {
        let transform =
            Transform::from_euler_degrees(Vec3::ZERO, Vec3::new(0.0, 90.0, 0.0), Vec3::ONE);
        let rotated = transform.model_matrix().transform_vector3(Vec3::X);
        assert!(rotated.abs_diff_eq(Vec3::NEG_Z, 1e-5));
    }
}
