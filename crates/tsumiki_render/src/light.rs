use glam::Vec3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightKind {
    Point { position: Vec3 },
    Directional { direction: Vec3 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
}

impl Light {
    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point { position },
            color,
            intensity,
        }
    }

    /// The direction is normalized; a zero vector falls back to straight down.
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional {
                direction: direction.try_normalize().unwrap_or(Vec3::NEG_Y),
            },
            color,
            intensity,
        }
    }
}
