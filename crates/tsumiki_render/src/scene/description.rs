//! On-disk scene format.

use std::collections::BTreeMap;

use glam::Vec3;
use serde::Deserialize;

use crate::{Camera, Light, Material, Transform};

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub(crate) struct SceneDescription {
    pub camera: CameraDescription,
    #[serde(default)]
    pub materials: BTreeMap<String, MaterialDescription>,
    #[serde(default)]
    pub lights: Vec<LightDescription>,
    #[serde(default)]
    pub entities: Vec<EntityDescription>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct CameraDescription {
    pub position: [f32; 3],
    #[serde(default)]
    pub target: [f32; 3],
    #[serde(default = "default_up")]
    pub up: [f32; 3],
    #[serde(default = "default_fov")]
    pub fov_y_degrees: f32,
    #[serde(default = "default_near")]
    pub near: f32,
    #[serde(default = "default_far")]
    pub far: f32,
}

#[derive(Deserialize, Debug)]
pub(crate) struct MaterialDescription {
    pub albedo: [f32; 3],
    #[serde(default = "default_roughness")]
    pub roughness: f32,
    #[serde(default)]
    pub metallic: f32,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub(crate) enum LightDescription {
    Point {
        position: [f32; 3],
        #[serde(default = "default_color")]
        color: [f32; 3],
        #[serde(default = "default_intensity")]
        intensity: f32,
    },
    Directional {
        direction: [f32; 3],
        #[serde(default = "default_color")]
        color: [f32; 3],
        #[serde(default = "default_intensity")]
        intensity: f32,
    },
}

#[derive(Deserialize, Debug)]
pub(crate) struct EntityDescription {
    #[serde(default)]
    pub name: String,
    pub mesh: MeshDescription,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub transform: TransformDescription,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Primitive {
    Plane,
    Cube,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub(crate) enum MeshDescription {
    Primitive {
        primitive: Primitive,
    },
    Inline {
        positions: Vec<[f32; 3]>,
        indices: Vec<u32>,
    },
}

#[derive(Deserialize, Debug)]
pub(crate) struct TransformDescription {
    #[serde(default)]
    pub translation: [f32; 3],
    #[serde(default)]
    pub rotation_degrees: [f32; 3],
    #[serde(default = "default_scale")]
    pub scale: [f32; 3],
}

impl Default for TransformDescription {
    fn default() -> Self {
        Self {
            translation: [0.0; 3],
            rotation_degrees: [0.0; 3],
            scale: default_scale(),
        }
    }
}

fn default_up() -> [f32; 3] {
    [0.0, 1.0, 0.0]
}

fn default_fov() -> f32 {
    60.0
}

fn default_near() -> f32 {
    0.1
}

fn default_far() -> f32 {
    100.0
}

fn default_roughness() -> f32 {
    0.5
}

fn default_color() -> [f32; 3] {
    [1.0; 3]
}

fn default_intensity() -> f32 {
    1.0
}

fn default_scale() -> [f32; 3] {
    [1.0; 3]
}

impl From<&CameraDescription> for Camera {
    fn from(desc: &CameraDescription) -> Self {
        Camera {
            position: Vec3::from(desc.position),
            target: Vec3::from(desc.target),
            up: Vec3::from(desc.up),
            fov_y_degrees: desc.fov_y_degrees,
            near: desc.near,
            far: desc.far,
        }
    }
}

impl MaterialDescription {
    pub fn to_material(&self, name: &str) -> Material {
        Material {
            name: name.to_string(),
            albedo: Vec3::from(self.albedo),
            roughness: self.roughness,
            metallic: self.metallic,
        }
    }
}

impl From<&LightDescription> for Light {
    fn from(desc: &LightDescription) -> Self {
        match *desc {
            LightDescription::Point {
                position,
                color,
                intensity,
            } => Light::point(Vec3::from(position), Vec3::from(color), intensity),
            LightDescription::Directional {
                direction,
                color,
                intensity,
            } => Light::directional(Vec3::from(direction), Vec3::from(color), intensity),
        }
    }
}

impl From<&TransformDescription> for Transform {
    fn from(desc: &TransformDescription) -> Self {
        Transform::from_euler_degrees(
            Vec3::from(desc.translation),
            Vec3::from(desc.rotation_degrees),
            Vec3::from(desc.scale),
        )
    }
}

/// Checks that inline geometry forms whole triangles over existing vertices.
pub(crate) fn validate_inline_mesh(positions: &[[f32; 3]], indices: &[u32]) -> Result<(), String> {
    if indices.is_empty() || indices.len() % 3 != 0 {
        return Err(format!(
            "inline mesh needs a non-empty multiple of 3 indices, got {}",
            indices.len()
        ));
    }
    match indices.iter().find(|&&i| i as usize >= positions.len()) {
        Some(index) => Err(format!(
            "index {index} is out of range for {} positions",
            positions.len()
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_scene() {
        let scene: SceneDescription =
            serde_json::from_str(r#"{ "camera": { "position": [0, 1, 5] } }"#).unwrap();
        assert_eq!(scene.camera.up, [0.0, 1.0, 0.0]);
        assert_eq!(scene.camera.fov_y_degrees, 60.0);
        assert!(scene.entities.is_empty());
    }

    #[test]
    fn test_parse_mesh_sources() {
        let primitive: MeshDescription =
            serde_json::from_str(r#"{ "primitive": "cube" }"#).unwrap();
        assert!(matches!(
            primitive,
            MeshDescription::Primitive {
                primitive: Primitive::Cube
            }
        ));

        let inline: MeshDescription = serde_json::from_str(
            r#"{ "positions": [[0, 0, 0], [1, 0, 0], [0, 0, 1]], "indices": [0, 2, 1] }"#,
        )
        .unwrap();
        assert!(matches!(inline, MeshDescription::Inline { .. }));
    }

    #[test]
    fn test_parse_lights() {
        let lights: Vec<LightDescription> = serde_json::from_str(
            r#"[
                { "kind": "point", "position": [0, 4, 0], "intensity": 10 },
                { "kind": "directional", "direction": [0, -2, 0] }
            ]"#,
        )
        .unwrap();
        let lights: Vec<Light> = lights.iter().map(Light::from).collect();
        assert_eq!(lights[0].intensity, 10.0);
        assert_eq!(lights[0].color, Vec3::ONE);
        assert_eq!(
            lights[1].kind,
            crate::LightKind::Directional {
                direction: Vec3::NEG_Y
            }
        );
    }

    #[test]
    fn test_validate_inline_mesh() {
        let positions = [[0.0; 3]; 3];
        assert!(validate_inline_mesh(&positions, &[0, 1, 2]).is_ok());
        assert!(validate_inline_mesh(&positions, &[0, 1]).is_err());
        assert!(validate_inline_mesh(&positions, &[0, 1, 3]).is_err());
        assert!(validate_inline_mesh(&positions, &[]).is_err());
    }
}
