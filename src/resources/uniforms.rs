//! Shader parameter blocks written into the uniform ring buffer

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec4, Vec3, Vec4};

use crate::clustering::{ClusterGrid, DepthSlicing};
use crate::resources::Material;

/// Frame-scope parameters: camera and cluster lookup data
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    /// xyz = camera position, w = unused
    pub view_position: Vec4,
    /// xyz = cluster grid dimensions, w = light count
    pub light_info: UVec4,
    /// x = near, y = far, zw = slice scale and bias
    pub depth_params: Vec4,
    /// x = slicing mode (0 exponential, 1 linear), y = max lights per cluster
    pub cluster_params: UVec4,
}

impl FrameUniforms {
    /// Pack camera matrices and the parameters shaders need to find a
    /// fragment's cluster.
    ///
    /// Exponential slicing maps view depth `z` to
    /// `floor(ln(z) * scale - bias)`; linear slicing to
    /// `floor(z * scale - bias)`.
    pub fn new(
        view: Mat4,
        projection: Mat4,
        camera_position: Vec3,
        grid: &ClusterGrid,
        light_count: u32,
        max_lights_per_cluster: u32,
    ) -> Self {
        let dims = grid.dims();
        let (near, far) = (grid.near(), grid.far());
        let slices = dims.z as f32;
        let (scale, bias, mode) = match grid.slicing() {
            DepthSlicing::Exponential => {
                let log_ratio = (far / near).ln();
                (slices / log_ratio, slices * near.ln() / log_ratio, 0)
            }
            DepthSlicing::Linear => {
                let range = far - near;
                (slices / range, slices * near / range, 1)
            }
        };

        Self {
            view,
            projection,
            view_position: camera_position.extend(1.0),
            light_info: UVec4::new(dims.x, dims.y, dims.z, light_count),
            depth_params: Vec4::new(near, far, scale, bias),
            cluster_params: UVec4::new(mode, max_lights_per_cluster, 0, 0),
        }
    }
}

/// Per-object parameters: transforms and material constants
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: Mat4,
    pub view_projection: Mat4,
    pub albedo: Vec4,
    /// xyz = emissive color, w = strength
    pub emissive: Vec4,
    /// x = metallic, y = roughness
    pub metallic_roughness: Vec4,
    /// x = object index, y = material index
    pub ids: UVec4,
}

impl ObjectUniforms {
    /// The same block serves the depth prepass and the shading pass.
    pub fn new(
        model: Mat4,
        view_projection: Mat4,
        material: &Material,
        object_index: u32,
        material_index: u32,
    ) -> Self {
        Self {
            model,
            view_projection,
            albedo: material.base_color,
            emissive: material.emissive.extend(material.emissive_strength),
            metallic_roughness: Vec4::new(material.metallic, material.roughness, 0.0, 0.0),
            ids: UVec4::new(object_index, material_index, 0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::ViewFrustum;
    use glam::UVec3;

    #[test]
    fn test_struct_sizes_are_gpu_friendly() {
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 192);
        assert_eq!(std::mem::size_of::<ObjectUniforms>(), 192);
        assert_eq!(std::mem::size_of::<FrameUniforms>() % 16, 0);
    }

    #[test]
    fn test_slice_params_recover_slice_index() {
        let frustum = ViewFrustum::perspective(60f32.to_radians(), 1.0, 0.5, 200.0, Mat4::IDENTITY);
        let grid = ClusterGrid::build(&frustum, UVec3::new(4, 4, 16), DepthSlicing::Exponential).unwrap();
        let frame = FrameUniforms::new(
            Mat4::IDENTITY,
            frustum.projection,
            Vec3::ZERO,
            &grid,
            3,
            32,
        );

        let scale = frame.depth_params.z;
        let bias = frame.depth_params.w;
        for k in 0..16 {
            let mid = (grid.slice_depths()[k] * grid.slice_depths()[k + 1]).sqrt();
            let slice = (mid.ln() * scale - bias).floor() as usize;
            assert_eq!(slice, k);
        }
        assert_eq!(frame.light_info, UVec4::new(4, 4, 16, 3));
        assert_eq!(frame.cluster_params.y, 32);
    }

    #[test]
    fn test_object_uniforms_from_material() {
        let material = Material::new("gold")
            .with_base_color(Vec4::new(1.0, 0.8, 0.2, 1.0))
            .with_metallic(1.0)
            .with_roughness(0.3);
        let object = ObjectUniforms::new(Mat4::IDENTITY, Mat4::IDENTITY, &material, 7, 2);
        assert_eq!(object.albedo, Vec4::new(1.0, 0.8, 0.2, 1.0));
        assert_eq!(object.metallic_roughness.x, 1.0);
        assert_eq!(object.metallic_roughness.y, 0.3);
        assert_eq!(object.ids, UVec4::new(7, 2, 0, 0));
    }
}
