//! Resource management
//!
//! Meshes, materials, the shader cache and the per-frame uniform ring buffer.

pub mod cache;
mod material;
mod mesh;
pub mod ring_buffer;
mod uniforms;

pub use cache::{ShaderCache, ShaderKey};
pub use material::*;
pub use mesh::*;
pub use ring_buffer::{align_up, UniformLayout, UniformRegion, UniformRingBuffer};
pub use uniforms::{FrameUniforms, ObjectUniforms};
