//! Camera system

use glam::{Mat4, Vec3};

use crate::backend::Extent2d;
use crate::clustering::ViewFrustum;

/// Perspective projection parameters. The aspect ratio comes from the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_4, // 45 degrees
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            near,
            far,
        }
    }

    pub fn matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }
}

/// Camera for viewing the scene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }
}

/// A camera rendered into a viewport of a given size.
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    pub camera: Camera,
    pub extent: Extent2d,
}

impl View {
    pub fn new(camera: Camera, extent: Extent2d) -> Self {
        Self { camera, extent }
    }

    pub fn aspect(&self) -> f32 {
        self.extent.aspect_ratio()
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.camera.view_matrix()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.camera.projection.matrix(self.aspect())
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn frustum(&self) -> ViewFrustum {
        let projection = &self.camera.projection;
        ViewFrustum::perspective(
            projection.fov_y,
            self.aspect(),
            projection.near,
            projection.far,
            self.view_matrix(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frustum_from_view() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO)
            .with_projection(Projection::perspective(90.0, 0.5, 50.0));
        let view = View::new(camera, Extent2d::new(800, 400));
        let frustum = view.frustum();
        assert_eq!(frustum.aspect, 2.0);
        assert_eq!(frustum.near, 0.5);
        assert!((frustum.fov_y - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert_eq!(frustum.projection, view.projection_matrix());

        let origin = frustum.view.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(0.0, 0.0, -10.0)).length() < 1e-5);
    }
}
