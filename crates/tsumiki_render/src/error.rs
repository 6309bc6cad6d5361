use std::path::PathBuf;

use thiserror::Error;
use tsumiki_vulkan::TsError;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to initialize {what}: {source}")]
    Initialization {
        what: &'static str,
        #[source]
        source: TsError,
    },

    #[error("Failed to load scene {path:?}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Render pass {0} is not initialized")]
    PassNotInitialized(String),

    #[error("Frame index {index} is out of range (max {max})")]
    FrameIndexOutOfRange { index: usize, max: usize },

    #[error("{count} objects exceed the per-frame capacity of {max}")]
    TooManyObjects { count: usize, max: usize },

    #[error("Render passes form a dependency cycle")]
    DependencyCycle,

    #[error("Invalid engine configuration: {0}")]
    Config(String),
}

impl RenderError {
    pub(crate) fn init(what: &'static str) -> impl FnOnce(TsError) -> Self {
        move |source| Self::Initialization { what, source }
    }
}
