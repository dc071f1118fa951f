//! Light types for the scene

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Dynamic point light. Lights affect nothing outside `radius`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    /// World-space position
    pub position: Vec3,
    pub radius: f32,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            radius: 10.0,
            color: Vec3::ONE,
            intensity: 1.0,
        }
    }
}

impl Light {
    pub fn new(position: Vec3, radius: f32) -> Self {
        Self {
            position,
            radius,
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    /// Light center in the space of `view`.
    pub fn view_position(&self, view: &Mat4) -> Vec3 {
        view.transform_point3(self.position)
    }

    /// Convert to GPU data format with a view-space position
    pub fn to_gpu_data(&self, view: &Mat4) -> GpuLight {
        GpuLight {
            position_radius: self.view_position(view).extend(self.radius),
            color_intensity: self.color.extend(self.intensity),
        }
    }
}

/// GPU-friendly light record stored after the cluster table
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    /// xyz = view-space position, w = radius
    pub position_radius: Vec4,
    /// xyz = color, w = intensity
    pub color_intensity: Vec4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_layout() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 32);
    }

    #[test]
    fn test_view_space_position() {
        let light = Light::new(Vec3::new(0.0, 0.0, -5.0), 2.0).with_intensity(3.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let gpu = light.to_gpu_data(&view);
        assert!((gpu.position_radius.truncate() - Vec3::new(0.0, 0.0, -10.0)).length() < 1e-5);
        assert_eq!(gpu.position_radius.w, 2.0);
        assert_eq!(gpu.color_intensity, Vec4::new(1.0, 1.0, 1.0, 3.0));
    }
}
