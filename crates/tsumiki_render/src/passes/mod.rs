mod blur;
mod common;
mod ssao;

pub use blur::*;
pub use ssao::*;
