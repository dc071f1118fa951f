//! Cluster grid and light assignment integration tests.
//!
//! Build grids the way the engine does and check coverage and the
//! conservative light test against brute-force expectations.

mod common;

use std::collections::BTreeSet;

use glam::{Mat4, UVec3, Vec3};
use rstest::rstest;

use clustered_renderer::clustering::{
    sphere_intersects_cluster, ClusterGrid, DepthSlicing, LightAssignment, ViewFrustum,
};
use clustered_renderer::scene::Light;

use common::init_logging;

fn frustum(aspect: f32) -> ViewFrustum {
    ViewFrustum::perspective(60f32.to_radians(), aspect, 0.5, 200.0, Mat4::IDENTITY)
}

fn grid(slicing: DepthSlicing) -> ClusterGrid {
    ClusterGrid::build(&frustum(16.0 / 9.0), UVec3::new(8, 5, 12), slicing).unwrap()
}

/// Deterministic sample points spread through the frustum volume.
fn frustum_samples(frustum: &ViewFrustum, count: usize) -> Vec<Vec3> {
    let mut state = 0x2545_f491_u32;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state as f32 / u32::MAX as f32
    };
    (0..count)
        .map(|_| {
            let depth = frustum.near + (frustum.far - frustum.near) * next() * next();
            let (half_w, half_h) = frustum.half_extents_at(depth);
            Vec3::new(
                (next() * 2.0 - 1.0) * half_w,
                (next() * 2.0 - 1.0) * half_h,
                -depth,
            )
        })
        .collect()
}

fn tolerance(point: Vec3) -> f32 {
    1e-3 * (1.0 + point.abs().max_element())
}

// ============================================================================
// Grid Coverage Tests
// ============================================================================

#[rstest]
#[case::exponential(DepthSlicing::Exponential)]
#[case::linear(DepthSlicing::Linear)]
fn test_points_map_to_containing_cluster(#[case] slicing: DepthSlicing) {
    init_logging();
    let grid = grid(slicing);

    for point in frustum_samples(grid.frustum(), 2000) {
        let index = grid
            .cluster_index_for_point(point)
            .unwrap_or_else(|| panic!("{} should be inside the frustum", point));
        let cluster = grid.cluster(index).unwrap();
        assert!(
            cluster.contains_point(point, tolerance(point)),
            "cluster {} does not contain {}",
            index,
            point
        );
    }
}

#[rstest]
#[case::exponential(DepthSlicing::Exponential)]
#[case::linear(DepthSlicing::Linear)]
fn test_cluster_centers_are_exclusive(#[case] slicing: DepthSlicing) {
    let grid = grid(slicing);

    for index in 0..grid.cluster_count() {
        let center = grid.cluster_center(index).unwrap();
        assert_eq!(grid.cluster_index_for_point(center), Some(index));

        let containing = grid
            .clusters()
            .iter()
            .filter(|c| c.contains_point(center, 0.0))
            .count();
        assert_eq!(containing, 1, "center of cluster {} is shared", index);
    }
}

#[rstest]
#[case::exponential(DepthSlicing::Exponential)]
#[case::linear(DepthSlicing::Linear)]
fn test_slice_boundaries_belong_to_upper_slice(#[case] slicing: DepthSlicing) {
    let grid = grid(slicing);
    let depths = grid.slice_depths().to_vec();
    let last = grid.dims().z - 1;

    for (k, &depth) in depths.iter().enumerate() {
        let expected = (k as u32).min(last);
        assert_eq!(grid.slice_for_depth(depth), Some(expected), "depth {}", depth);
    }
    assert_eq!(grid.slice_for_depth(grid.near() * 0.5), None);
    assert_eq!(grid.slice_for_depth(grid.far() * 1.01), None);
}

#[test]
fn test_exponential_slices_grow_with_depth() {
    let exponential = grid(DepthSlicing::Exponential);
    let linear = grid(DepthSlicing::Linear);

    let thickness = |g: &ClusterGrid| -> Vec<f32> {
        g.slice_depths().windows(2).map(|w| w[1] - w[0]).collect()
    };
    let exp = thickness(&exponential);
    let lin = thickness(&linear);

    assert!(exp.windows(2).all(|w| w[1] > w[0]));
    for pair in lin.windows(2) {
        assert!((pair[1] - pair[0]).abs() < 1e-3);
    }
    // Constant depth ratio between consecutive exponential slices.
    let depths = exponential.slice_depths();
    let ratio = depths[1] / depths[0];
    for pair in depths.windows(2) {
        assert!((pair[1] / pair[0] - ratio).abs() < 1e-3);
    }
}

// ============================================================================
// Light Assignment Tests
// ============================================================================

#[test]
fn test_point_light_on_shared_corner() {
    init_logging();
    let grid = grid(DepthSlicing::Exponential);
    let dims = grid.dims();
    let (x, y, z) = (3u32, 2u32, 5u32);
    let vertex = x + y * (dims.x + 1) + z * (dims.x + 1) * (dims.y + 1);
    let position = grid.vertices()[vertex as usize];

    let expected: BTreeSet<usize> = grid
        .clusters()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.corners.contains(&vertex))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(expected.len(), 8);

    let mut assignment = LightAssignment::new();
    assignment.assign(&grid, &Mat4::IDENTITY, &[Light::new(position, 0.0)]);
    let assigned: BTreeSet<usize> = assignment.clusters_for_light(0).into_iter().collect();
    assert_eq!(assigned, expected);
}

#[test]
fn test_light_behind_near_plane() {
    let grid = grid(DepthSlicing::Exponential);
    let lights = [
        Light::new(Vec3::new(0.0, 0.0, 1.0), 0.4),
        Light::new(Vec3::new(0.0, 0.0, -0.05), 0.3),
    ];

    let mut assignment = LightAssignment::new();
    assignment.assign(&grid, &Mat4::IDENTITY, &lights);
    assert_eq!(assignment.total_assignments(), 0);
}

#[test]
fn test_assignment_matches_brute_force() {
    let grid = grid(DepthSlicing::Exponential);
    let lights: Vec<Light> = frustum_samples(grid.frustum(), 64)
        .into_iter()
        .enumerate()
        .map(|(i, p)| Light::new(p, 0.5 + (i % 7) as f32))
        .collect();

    let mut assignment = LightAssignment::new();
    assignment.assign(&grid, &Mat4::IDENTITY, &lights);

    for (index, cluster) in grid.clusters().iter().enumerate() {
        let expected: Vec<u32> = lights
            .iter()
            .enumerate()
            .filter(|(_, light)| sphere_intersects_cluster(cluster, light.position, light.radius))
            .map(|(i, _)| i as u32)
            .collect();
        assert_eq!(assignment.lights_for(index), &expected[..], "cluster {}", index);
    }
}

#[test]
fn test_lights_follow_the_camera() {
    let grid = grid(DepthSlicing::Exponential);
    let view = Mat4::look_at_rh(Vec3::new(10.0, 0.0, 10.0), Vec3::new(10.0, 0.0, 0.0), Vec3::Y);
    // World (10, 0, 0) sits 10 units in front of the camera.
    let light = Light::new(Vec3::new(10.0, 0.0, 0.0), 0.0);

    let mut assignment = LightAssignment::new();
    assignment.assign(&grid, &view, &[light]);
    let clusters = assignment.clusters_for_light(0);
    assert!(!clusters.is_empty());

    let in_view = light.view_position(&view);
    let home = grid.cluster_index_for_point(in_view).unwrap();
    assert!(clusters.contains(&home));
}

#[test]
fn test_packed_table_caps_clusters() {
    let grid = grid(DepthSlicing::Linear);
    let lights: Vec<Light> = (0..10)
        .map(|i| Light::new(Vec3::new(0.0, 0.0, -5.0 - i as f32 * 0.1), 50.0))
        .collect();

    let mut assignment = LightAssignment::new();
    assignment.assign(&grid, &Mat4::IDENTITY, &lights);
    assert_eq!(assignment.max_lights_in_cluster(), 10);

    let table = assignment.pack(4);
    assert!(table.dropped > 0);
    for cluster in 0..grid.cluster_count() {
        let packed = table.lights_for(cluster);
        assert!(packed.len() <= 4);
        assert_eq!(packed, &assignment.lights_for(cluster)[..packed.len()]);
    }
}
