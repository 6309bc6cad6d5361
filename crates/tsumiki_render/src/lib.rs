mod camera;
mod config;
mod entity;
mod error;
mod frame;
mod light;
mod material;
mod mesh;
mod passes;
mod render_pass;
mod runtime;
mod scene;
mod scheduler;
mod ssao_kernel;
mod uniforms;

pub use camera::*;
pub use config::*;
pub use entity::*;
pub use error::*;
pub use frame::*;
pub use light::*;
pub use material::*;
pub use mesh::*;
pub use passes::*;
pub use render_pass::*;
pub use runtime::*;
pub use scene::*;
pub use scheduler::*;
pub use ssao_kernel::*;
pub use uniforms::*;
