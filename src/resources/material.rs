//! Material definitions for PBR rendering

use glam::{Vec3, Vec4};

use crate::backend::{ShaderSource, ShaderStage};

/// Built-in clustered forward vertex shader.
pub const FORWARD_VERTEX_SHADER: &str = "\
// clustered forward: transform to clip space
void vs_main(uint vertex_id) {}
";

/// Built-in clustered forward pixel shader.
pub const FORWARD_PIXEL_SHADER: &str = "\
// clustered forward: walk the fragment's cluster light list
void ps_main(float4 position) {}
";

/// Vertex shader of the depth prepass pipeline.
pub const DEPTH_ONLY_VERTEX_SHADER: &str = "\
// depth prepass: position only
void vs_main(uint vertex_id) {}
";

/// PBR material properties
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub emissive: Vec3,
    pub emissive_strength: f32,

    pub vertex_shader: ShaderSource,
    pub pixel_shader: ShaderSource,

    /// Set when shaders change; the engine rebuilds the pipeline and clears it.
    dirty: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: Vec4::new(1.0, 1.0, 1.0, 1.0),
            metallic: 0.0,
            roughness: 0.5,
            emissive: Vec3::ZERO,
            emissive_strength: 1.0,
            vertex_shader: ShaderSource::new("forward", ShaderStage::Vertex, FORWARD_VERTEX_SHADER),
            pixel_shader: ShaderSource::new("forward", ShaderStage::Pixel, FORWARD_PIXEL_SHADER),
            dirty: true,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_base_color(mut self, color: Vec4) -> Self {
        self.base_color = color;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3, strength: f32) -> Self {
        self.emissive = emissive;
        self.emissive_strength = strength;
        self
    }

    pub fn with_shaders(mut self, vertex: ShaderSource, pixel: ShaderSource) -> Self {
        self.vertex_shader = vertex;
        self.pixel_shader = pixel;
        self.dirty = true;
        self
    }

    /// Replace the pixel shader and flag the material for a rebuild.
    pub fn set_pixel_shader(&mut self, pixel: ShaderSource) {
        self.pixel_shader = pixel;
        self.dirty = true;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    // Preset materials

    pub fn plastic(color: Vec3) -> Self {
        Self::new("plastic")
            .with_base_color(color.extend(1.0))
            .with_metallic(0.0)
            .with_roughness(0.4)
    }

    pub fn metal(color: Vec3, roughness: f32) -> Self {
        Self::new("metal")
            .with_base_color(color.extend(1.0))
            .with_metallic(1.0)
            .with_roughness(roughness)
    }

    pub fn gold() -> Self {
        Self::metal(Vec3::new(1.0, 0.766, 0.336), 0.3)
    }

    pub fn emissive(color: Vec3, strength: f32) -> Self {
        Self::new("emissive")
            .with_base_color(Vec4::ONE)
            .with_emissive(color, strength)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_material_is_dirty() {
        let mut material = Material::gold();
        assert!(material.is_dirty());
        material.clear_dirty();
        assert!(!material.is_dirty());

        material.set_pixel_shader(ShaderSource::new("gold", ShaderStage::Pixel, "void ps_main() {}"));
        assert!(material.is_dirty());
        assert_eq!(material.pixel_shader.name, "gold");
    }

    #[test]
    fn test_default_shaders_have_entry_points() {
        let material = Material::default();
        assert!(material.vertex_shader.code.contains(&material.vertex_shader.entry_point));
        assert!(material.pixel_shader.code.contains(&material.pixel_shader.entry_point));
    }
}
