use derive_builder::Builder;

use crate::{RenderError, Result};

pub const MAX_NUMBER_OF_FRAMES: usize = 3;
pub const MAX_NUMBER_OF_OBJECTS: usize = 1024;
pub const SSAO_KERNEL_SIZE: usize = 64;

const FRAMES_IN_FLIGHT_LIMIT: usize = 8;

/// Engine-wide settings handed to the runtime, passes and scheduler.
///
/// ```
/// use tsumiki_render::EngineConfigBuilder;
///
/// let config = EngineConfigBuilder::default()
///     .max_frames_in_flight(2)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_frames_in_flight, 2);
/// assert_eq!(config.max_objects, 1024);
/// ```
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(build_fn(validate = "Self::validate", error = "RenderError"))]
pub struct EngineConfig {
    #[builder(default = "MAX_NUMBER_OF_FRAMES")]
    pub max_frames_in_flight: usize,
    #[builder(default = "MAX_NUMBER_OF_OBJECTS")]
    pub max_objects: usize,
    #[builder(default = "0x5eed")]
    pub ssao_kernel_seed: u64,
    #[builder(default = "0.5")]
    pub ssao_radius: f32,
    #[builder(default = "0.025")]
    pub ssao_bias: f32,
    #[builder(default = "2")]
    pub blur_radius: u32,
}

impl EngineConfigBuilder {
    fn validate(&self) -> std::result::Result<(), RenderError> {
        if let Some(frames) = self.max_frames_in_flight {
            if !(1..=FRAMES_IN_FLIGHT_LIMIT).contains(&frames) {
                return Err(RenderError::Config(format!(
                    "max_frames_in_flight must be in 1..={FRAMES_IN_FLIGHT_LIMIT}, got {frames}"
                )));
            }
        }
        if self.max_objects == Some(0) {
            return Err(RenderError::Config(
                "max_objects must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl From<derive_builder::UninitializedFieldError> for RenderError {
    fn from(err: derive_builder::UninitializedFieldError) -> Self {
        RenderError::Config(err.to_string())
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Checks the frame-in-flight index against the slot count.
    pub fn check_frame_index(&self, index: usize) -> Result<()> {
        if index < self.max_frames_in_flight {
            Ok(())
        } else {
            Err(RenderError::FrameIndexOutOfRange {
                index,
                max: self.max_frames_in_flight,
            })
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: MAX_NUMBER_OF_FRAMES,
            max_objects: MAX_NUMBER_OF_OBJECTS,
            ssao_kernel_seed: 0x5eed,
            ssao_radius: 0.5,
            ssao_bias: 0.025,
            blur_radius: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_match_default() {
        let built = EngineConfig::builder().build().unwrap();
        assert_eq!(built, EngineConfig::default());
        assert_eq!(built.max_frames_in_flight, MAX_NUMBER_OF_FRAMES);
    }

    #[test]
    fn test_builder_rejects_out_of_range_frames() {
        let result = EngineConfig::builder().max_frames_in_flight(0).build();
        assert!(matches!(result, Err(RenderError::Config(_))));

        let result = EngineConfig::builder().max_frames_in_flight(9).build();
        assert!(matches!(result, Err(RenderError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_zero_objects() {
        let result = EngineConfig::builder().max_objects(0).build();
        assert!(matches!(result, Err(RenderError::Config(_))));
    }

    #[test]
    fn test_check_frame_index() {
        let config = EngineConfig::default();
        assert!(config.check_frame_index(2).is_ok());
        assert!(matches!(
            config.check_frame_index(3),
            Err(RenderError::FrameIndexOutOfRange { index: 3, max: 3 })
        ));
    }
}
