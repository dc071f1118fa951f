//! Per-frame light-to-cluster assignment
//!
//! Every frame the light lists are cleared and rebuilt from a snapshot of the
//! scene lights. The test is conservative: a light is kept for a cluster when
//! its bounding sphere is not entirely outside any of the six cluster planes.
//! This over-includes near cluster edges and corners but never drops a light
//! that actually touches the cluster.

use glam::{Mat4, Vec3};
use rayon::prelude::*;

use crate::clustering::grid::{Cluster, ClusterGrid};
use crate::error::{RenderError, Result};
use crate::scene::{GpuLight, Light};

/// Relative slack applied to every plane test so that boundary contacts
/// (a zero-radius light sitting on a corner) stay deterministic.
pub const PLANE_TOLERANCE: f32 = 1e-4;

/// Conservative sphere-versus-cluster test against outward planes.
pub fn sphere_intersects_cluster(cluster: &Cluster, center: Vec3, radius: f32) -> bool {
    let slack = radius.max(0.0) + PLANE_TOLERANCE * (1.0 + center.abs().max_element());
    cluster
        .planes
        .iter()
        .all(|plane| plane.signed_distance(center) <= slack)
}

/// Light indices per cluster for one frame.
#[derive(Debug, Clone, Default)]
pub struct LightAssignment {
    lists: Vec<Vec<u32>>,
    light_count: usize,
}

impl LightAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every list, keeping allocations for reuse.
    pub fn clear(&mut self) {
        self.lists.iter_mut().for_each(Vec::clear);
        self.light_count = 0;
    }

    /// Rebuild the lists for `grid` from the lights as seen through `view`.
    pub fn assign(&mut self, grid: &ClusterGrid, view: &Mat4, lights: &[Light]) {
        let centers: Vec<(Vec3, f32)> = lights
            .iter()
            .map(|light| (light.view_position(view), light.radius))
            .collect();

        self.lists.resize_with(grid.cluster_count(), Vec::new);
        self.light_count = lights.len();

        self.lists
            .par_iter_mut()
            .zip(grid.clusters().par_iter())
            .for_each(|(list, cluster)| {
                list.clear();
                list.extend(
                    centers
                        .iter()
                        .enumerate()
                        .filter(|(_, (center, radius))| {
                            sphere_intersects_cluster(cluster, *center, *radius)
                        })
                        .map(|(index, _)| index as u32),
                );
            });

        log::trace!(
            "Assigned {} lights to {} clusters ({} entries)",
            lights.len(),
            self.lists.len(),
            self.total_assignments()
        );
    }

    pub fn cluster_count(&self) -> usize {
        self.lists.len()
    }

    pub fn light_count(&self) -> usize {
        self.light_count
    }

    /// Indices of the lights influencing `cluster`, ascending.
    pub fn lights_for(&self, cluster: usize) -> &[u32] {
        self.lists.get(cluster).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Clusters whose list contains `light`.
    pub fn clusters_for_light(&self, light: u32) -> Vec<usize> {
        self.lists
            .iter()
            .enumerate()
            .filter(|(_, list)| list.binary_search(&light).is_ok())
            .map(|(index, _)| index)
            .collect()
    }

    pub fn total_assignments(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    pub fn max_lights_in_cluster(&self) -> usize {
        self.lists.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Flatten into `(offset, count)` ranges plus one index list, keeping at
    /// most `max_per_cluster` lights per cluster.
    pub fn pack(&self, max_per_cluster: u32) -> ClusterLightTable {
        let cap = max_per_cluster as usize;
        let mut ranges = Vec::with_capacity(self.lists.len());
        let mut indices = Vec::with_capacity(self.total_assignments().min(self.lists.len() * cap));
        let mut dropped = 0;

        for list in &self.lists {
            let kept = list.len().min(cap);
            dropped += list.len() - kept;
            ranges.push([indices.len() as u32, kept as u32]);
            indices.extend_from_slice(&list[..kept]);
        }

        if dropped > 0 {
            log::warn!(
                "{} light assignments dropped: clusters exceed {} lights",
                dropped,
                max_per_cluster
            );
        }

        ClusterLightTable {
            ranges,
            indices,
            max_per_cluster,
            dropped,
        }
    }
}

/// Cluster light lists in the form shaders read them.
///
/// Encoded layout, all `u32` words except the light records:
///
/// ```text
/// [header: clusters, ranges_at, indices_at, lights_at, light_count, max_per_cluster, 0, 0]
/// [ranges: (offset, count) per cluster]
/// [indices: clusters * max_per_cluster slots]
/// [lights: max_lights GpuLight records]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterLightTable {
    pub ranges: Vec<[u32; 2]>,
    pub indices: Vec<u32>,
    pub max_per_cluster: u32,
    /// Assignments that did not fit under the per-cluster cap.
    pub dropped: usize,
}

impl ClusterLightTable {
    const HEADER_SIZE: usize = 32;

    /// Bytes needed for a table of `clusters` clusters and `max_lights` lights.
    pub fn size_for(clusters: usize, max_per_cluster: u32, max_lights: usize) -> usize {
        Self::HEADER_SIZE
            + clusters * std::mem::size_of::<[u32; 2]>()
            + clusters * max_per_cluster as usize * std::mem::size_of::<u32>()
            + max_lights * std::mem::size_of::<GpuLight>()
    }

    pub fn lights_for(&self, cluster: usize) -> &[u32] {
        match self.ranges.get(cluster) {
            Some(&[offset, count]) => {
                &self.indices[offset as usize..(offset + count) as usize]
            }
            None => &[],
        }
    }

    /// Encode with fixed section offsets, zero-padded to
    /// [`ClusterLightTable::size_for`].
    pub fn encode(&self, lights: &[GpuLight], max_lights: usize) -> Result<Vec<u8>> {
        if lights.len() > max_lights {
            return Err(RenderError::CapacityExceeded(format!(
                "{} lights exceed the table capacity of {}",
                lights.len(),
                max_lights
            )));
        }

        let clusters = self.ranges.len();
        let size = Self::size_for(clusters, self.max_per_cluster, max_lights);
        let ranges_at = Self::HEADER_SIZE;
        let indices_at = ranges_at + clusters * std::mem::size_of::<[u32; 2]>();
        let lights_at =
            indices_at + clusters * self.max_per_cluster as usize * std::mem::size_of::<u32>();

        let header: [u32; 8] = [
            clusters as u32,
            ranges_at as u32,
            indices_at as u32,
            lights_at as u32,
            lights.len() as u32,
            self.max_per_cluster,
            0,
            0,
        ];

        let mut bytes = vec![0u8; size];
        bytes[..Self::HEADER_SIZE].copy_from_slice(bytemuck::cast_slice(&header));
        let ranges: &[u8] = bytemuck::cast_slice(&self.ranges);
        bytes[ranges_at..ranges_at + ranges.len()].copy_from_slice(ranges);
        let indices: &[u8] = bytemuck::cast_slice(&self.indices);
        bytes[indices_at..indices_at + indices.len()].copy_from_slice(indices);
        let light_bytes: &[u8] = bytemuck::cast_slice(lights);
        bytes[lights_at..lights_at + light_bytes.len()].copy_from_slice(light_bytes);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::{DepthSlicing, ViewFrustum};
    use glam::UVec3;

    fn grid(dims: UVec3) -> ClusterGrid {
        let frustum = ViewFrustum::perspective(60f32.to_radians(), 1.0, 1.0, 50.0, Mat4::IDENTITY);
        ClusterGrid::build(&frustum, dims, DepthSlicing::Exponential).unwrap()
    }

    #[test]
    fn test_light_in_single_cluster() {
        let grid = grid(UVec3::new(4, 4, 8));
        let center = grid.cluster_center(grid.cluster_index(1, 2, 3)).unwrap();
        let light = Light::new(center, 1e-3);

        let mut assignment = LightAssignment::new();
        assignment.assign(&grid, &Mat4::IDENTITY, &[light]);
        assert_eq!(assignment.clusters_for_light(0), vec![grid.cluster_index(1, 2, 3)]);
        assert_eq!(assignment.total_assignments(), 1);
    }

    #[test]
    fn test_large_light_covers_everything() {
        let grid = grid(UVec3::new(3, 3, 3));
        let light = Light::new(Vec3::new(0.0, 0.0, -10.0), 1000.0);
        let mut assignment = LightAssignment::new();
        assignment.assign(&grid, &Mat4::IDENTITY, &[light]);
        assert_eq!(assignment.total_assignments(), grid.cluster_count());
    }

    #[test]
    fn test_zero_radius_corner_light() {
        let grid = grid(UVec3::new(4, 4, 4));
        let cluster_index = grid.cluster_index(2, 1, 2);
        let cluster = grid.cluster(cluster_index).unwrap();
        for &corner in &cluster.corners {
            let position = grid.vertices()[corner as usize];
            let mut assignment = LightAssignment::new();
            assignment.assign(&grid, &Mat4::IDENTITY, &[Light::new(position, 0.0)]);
            assert!(assignment.lights_for(cluster_index).contains(&0));
        }
    }

    #[test]
    fn test_light_behind_near_plane() {
        let grid = grid(UVec3::new(4, 4, 4));
        // Near plane sits at z = -1; the sphere stops 0.5 short of it.
        let light = Light::new(Vec3::new(0.0, 0.0, -1.0 + 2.5), 2.0);
        let mut assignment = LightAssignment::new();
        assignment.assign(&grid, &Mat4::IDENTITY, &[light]);
        assert!(assignment.clusters_for_light(0).is_empty());
    }

    #[test]
    fn test_reassign_clears_previous_frame() {
        let grid = grid(UVec3::new(2, 2, 2));
        let mut assignment = LightAssignment::new();
        assignment.assign(&grid, &Mat4::IDENTITY, &[Light::new(Vec3::new(0.0, 0.0, -5.0), 100.0)]);
        assert_eq!(assignment.total_assignments(), 8);
        assignment.assign(&grid, &Mat4::IDENTITY, &[]);
        assert_eq!(assignment.total_assignments(), 0);
        assert_eq!(assignment.cluster_count(), 8);
    }

    #[test]
    fn test_pack_caps_per_cluster() {
        let grid = grid(UVec3::new(1, 1, 1));
        let lights: Vec<Light> = (0..5)
            .map(|i| Light::new(Vec3::new(0.0, 0.0, -2.0 - i as f32), 1.0))
            .collect();
        let mut assignment = LightAssignment::new();
        assignment.assign(&grid, &Mat4::IDENTITY, &lights);
        assert_eq!(assignment.lights_for(0), &[0, 1, 2, 3, 4]);

        let table = assignment.pack(3);
        assert_eq!(table.ranges, vec![[0, 3]]);
        assert_eq!(table.lights_for(0), &[0, 1, 2]);
        assert_eq!(table.dropped, 2);
    }

    #[test]
    fn test_encode_layout() {
        let grid = grid(UVec3::new(2, 1, 1));
        let mut assignment = LightAssignment::new();
        let light = Light::new(Vec3::new(0.0, 0.0, -3.0), 100.0);
        assignment.assign(&grid, &Mat4::IDENTITY, &[light]);
        let table = assignment.pack(4);
        let gpu = [light.to_gpu_data(&Mat4::IDENTITY)];

        let bytes = table.encode(&gpu, 2).unwrap();
        assert_eq!(bytes.len(), ClusterLightTable::size_for(2, 4, 2));
        assert_eq!(&bytes[0..4], bytemuck::bytes_of(&2u32));
        // Ranges start right after the header.
        assert_eq!(&bytes[32..48], bytemuck::bytes_of(&[0u32, 1, 1, 1]));

        assert!(matches!(
            table.encode(&[gpu[0]; 3], 2),
            Err(RenderError::CapacityExceeded(_))
        ));
    }
}
