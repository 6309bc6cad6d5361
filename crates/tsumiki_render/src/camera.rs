use glam::{Mat4, Vec3};

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Right-handed perspective with Y pointing down in clip space, which is
    /// what Vulkan expects.
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let mut projection =
            Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_matrix_moves_target_onto_negative_z() {
        let camera = Camera::default();
        let target = camera.view_matrix().transform_point3(camera.target);
        assert!(target.x.abs() < 1e-5);
        assert!(target.y.abs() < 1e-5);
        assert!(target.z < 0.0);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::default();
        let projection = camera.projection_matrix(1.0);
        let up = projection.project_point3(Vec3::new(0.0, 1.0, -5.0));
        assert!(up.y < 0.0);
    }
}
