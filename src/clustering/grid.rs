//! Cluster grid construction.
//!
//! The view frustum is cut into `Nx × Ny` columns in screen space and `Nz`
//! depth slices. Everything is computed in view space (right-handed, camera
//! looking down `-Z`), so the grid only depends on the projection and is
//! reused while the camera moves.
//!
//! ```text
//!   side view (y/z)                   slice k spans [z_k, z_k+1]
//!
//!   eye ─┬──────────────────────────────────────────── far
//!        │ ╲        │           │                   │
//!        │   ╲      │  cluster  │                   │
//!        │     ╲    │  (x,y,k)  │                   │
//!       near   z_1        z_2          ...         z_Nz
//! ```
//!
//! Exponential slicing (`z_k = n · (f/n)^(k/Nz)`) is the default: slices
//! near the camera stay thin, which keeps per-cluster light counts balanced
//! in scenes with a deep view range.

use glam::{Mat4, UVec3, Vec3};

use crate::clustering::plane::Plane;
use crate::error::{RenderError, Result};

/// Upper bound on clusters per grid.
pub const MAX_CLUSTERS: u64 = 1 << 20;

/// How depth slice boundaries are distributed between near and far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthSlicing {
    /// `z_k = near * (far / near)^(k / Nz)`
    #[default]
    Exponential,
    /// `z_k = near + (far - near) * k / Nz`
    Linear,
}

impl DepthSlicing {
    /// Depth of slice boundary `k` out of `slices`.
    pub fn slice_depth(&self, near: f32, far: f32, k: u32, slices: u32) -> f32 {
        if k == 0 {
            return near;
        }
        if k >= slices {
            return far;
        }
        let t = k as f32 / slices as f32;
        match self {
            DepthSlicing::Exponential => near * (far / near).powf(t),
            DepthSlicing::Linear => near + (far - near) * t,
        }
    }
}

/// Camera parameters the grid is built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewFrustum {
    pub near: f32,
    pub far: f32,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub view: Mat4,
    pub projection: Mat4,
}

impl ViewFrustum {
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32, view: Mat4) -> Self {
        Self {
            near,
            far,
            fov_y,
            aspect,
            view,
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.near, self.far, self.fov_y, self.aspect]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(RenderError::InvalidParameter(
                "frustum parameters must be finite".into(),
            ));
        }
        if self.near <= 0.0 || self.far <= self.near {
            return Err(RenderError::InvalidParameter(format!(
                "need 0 < near < far, got near {} far {}",
                self.near, self.far
            )));
        }
        if self.fov_y <= 0.0 || self.fov_y >= std::f32::consts::PI {
            return Err(RenderError::InvalidParameter(format!(
                "vertical fov {} out of (0, pi)",
                self.fov_y
            )));
        }
        if self.aspect <= 0.0 {
            return Err(RenderError::InvalidParameter(format!(
                "aspect ratio {} must be positive",
                self.aspect
            )));
        }
        Ok(())
    }

    /// Half extents of the frustum cross-section at view depth `depth`.
    pub fn half_extents_at(&self, depth: f32) -> (f32, f32) {
        let half_h = depth * (self.fov_y * 0.5).tan();
        (half_h * self.aspect, half_h)
    }
}

/// One cell of the grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cluster {
    /// Indices into [`ClusterGrid::vertices`]: near face counter-clockwise
    /// from bottom-left, then the far face in the same order.
    pub corners: [u32; 8],
    /// Outward planes in the order near, far, left, right, bottom, top.
    pub planes: [Plane; 6],
}

impl Cluster {
    pub const NEAR: usize = 0;
    pub const FAR: usize = 1;
    pub const LEFT: usize = 2;
    pub const RIGHT: usize = 3;
    pub const BOTTOM: usize = 4;
    pub const TOP: usize = 5;

    /// Whether `point` lies within `tolerance` of the cluster volume.
    pub fn contains_point(&self, point: Vec3, tolerance: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(point) <= tolerance)
    }
}

/// View-space cluster grid for one view.
#[derive(Debug, Clone)]
pub struct ClusterGrid {
    dims: UVec3,
    slicing: DepthSlicing,
    frustum: ViewFrustum,
    slice_depths: Vec<f32>,
    vertices: Vec<Vec3>,
    clusters: Vec<Cluster>,
}

impl ClusterGrid {
    /// Compute slice depths, shared corner vertices and cluster planes.
    pub fn build(frustum: &ViewFrustum, dims: UVec3, slicing: DepthSlicing) -> Result<Self> {
        frustum.validate()?;
        if dims.min_element() == 0 {
            return Err(RenderError::InvalidParameter(format!(
                "cluster dimensions must be non-zero, got {}x{}x{}",
                dims.x, dims.y, dims.z
            )));
        }
        let count = dims.x as u64 * dims.y as u64 * dims.z as u64;
        if count > MAX_CLUSTERS {
            return Err(RenderError::CapacityExceeded(format!(
                "{} clusters exceeds the limit of {}",
                count, MAX_CLUSTERS
            )));
        }

        let slice_depths: Vec<f32> = (0..=dims.z)
            .map(|k| slicing.slice_depth(frustum.near, frustum.far, k, dims.z))
            .collect();

        let (nx, ny) = (dims.x as f32, dims.y as f32);
        let mut vertices = Vec::with_capacity(((dims.x + 1) * (dims.y + 1) * (dims.z + 1)) as usize);
        for &depth in &slice_depths {
            let (half_w, half_h) = frustum.half_extents_at(depth);
            for y in 0..=dims.y {
                for x in 0..=dims.x {
                    vertices.push(Vec3::new(
                        -half_w + 2.0 * half_w * x as f32 / nx,
                        -half_h + 2.0 * half_h * y as f32 / ny,
                        -depth,
                    ));
                }
            }
        }

        let mut grid = Self {
            dims,
            slicing,
            frustum: *frustum,
            slice_depths,
            vertices,
            clusters: Vec::with_capacity(count as usize),
        };

        for z in 0..dims.z {
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let cluster = grid.make_cluster(x, y, z)?;
                    grid.clusters.push(cluster);
                }
            }
        }

        log::debug!(
            "Built {}x{}x{} cluster grid ({:?}, near {}, far {})",
            dims.x,
            dims.y,
            dims.z,
            slicing,
            frustum.near,
            frustum.far
        );
        Ok(grid)
    }

    fn make_cluster(&self, x: u32, y: u32, z: u32) -> Result<Cluster> {
        let corners = [
            self.vertex_index(x, y, z),
            self.vertex_index(x + 1, y, z),
            self.vertex_index(x + 1, y + 1, z),
            self.vertex_index(x, y + 1, z),
            self.vertex_index(x, y, z + 1),
            self.vertex_index(x + 1, y, z + 1),
            self.vertex_index(x + 1, y + 1, z + 1),
            self.vertex_index(x, y + 1, z + 1),
        ];
        let p = corners.map(|i| self.vertices[i as usize]);
        let centroid = p.iter().copied().sum::<Vec3>() / 8.0;

        let faces = [
            (p[0], p[1], p[2]), // near
            (p[4], p[5], p[6]), // far
            (p[0], p[3], p[7]), // left
            (p[1], p[2], p[6]), // right
            (p[0], p[1], p[5]), // bottom
            (p[3], p[2], p[6]), // top
        ];
        let mut planes = [Plane {
            normal: Vec3::Z,
            d: 0.0,
        }; 6];
        for (plane, (a, b, c)) in planes.iter_mut().zip(faces) {
            *plane = Plane::from_points(a, b, c)
                .ok_or_else(|| {
                    RenderError::InvalidParameter(format!("degenerate cluster ({}, {}, {})", x, y, z))
                })?
                .facing_away_from(centroid);
        }

        Ok(Cluster { corners, planes })
    }

    /// Whether the grid must be rebuilt for this projection and resolution.
    ///
    /// The view matrix is irrelevant: the grid lives in view space.
    pub fn is_stale(&self, frustum: &ViewFrustum, dims: UVec3, slicing: DepthSlicing) -> bool {
        self.dims != dims
            || self.slicing != slicing
            || self.frustum.near != frustum.near
            || self.frustum.far != frustum.far
            || self.frustum.fov_y != frustum.fov_y
            || self.frustum.aspect != frustum.aspect
    }

    pub fn dims(&self) -> UVec3 {
        self.dims
    }

    pub fn slicing(&self) -> DepthSlicing {
        self.slicing
    }

    pub fn near(&self) -> f32 {
        self.frustum.near
    }

    pub fn far(&self) -> f32 {
        self.frustum.far
    }

    pub fn frustum(&self) -> &ViewFrustum {
        &self.frustum
    }

    /// `Nz + 1` boundary depths, from near to far.
    pub fn slice_depths(&self) -> &[f32] {
        &self.slice_depths
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    pub fn cluster(&self, index: usize) -> Option<&Cluster> {
        self.clusters.get(index)
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    pub fn cluster_index(&self, x: u32, y: u32, z: u32) -> usize {
        (x + y * self.dims.x + z * self.dims.x * self.dims.y) as usize
    }

    pub fn cluster_coords(&self, index: usize) -> UVec3 {
        let index = index as u32;
        let per_slice = self.dims.x * self.dims.y;
        UVec3::new(
            index % self.dims.x,
            (index % per_slice) / self.dims.x,
            index / per_slice,
        )
    }

    /// Average of a cluster's corners.
    pub fn cluster_center(&self, index: usize) -> Option<Vec3> {
        let cluster = self.clusters.get(index)?;
        Some(
            cluster
                .corners
                .iter()
                .map(|&i| self.vertices[i as usize])
                .sum::<Vec3>()
                / 8.0,
        )
    }

    /// Slice containing view depth `depth`.
    ///
    /// Slices are half-open `[z_k, z_k+1)` except the last, which includes
    /// the far plane.
    pub fn slice_for_depth(&self, depth: f32) -> Option<u32> {
        if !(self.frustum.near..=self.frustum.far).contains(&depth) {
            return None;
        }
        let above = self.slice_depths.partition_point(|&s| s <= depth);
        Some((above.saturating_sub(1) as u32).min(self.dims.z - 1))
    }

    /// Cluster containing a view-space point, or `None` outside the frustum.
    ///
    /// Columns and rows are half-open like slices, so every point maps to
    /// exactly one cluster.
    pub fn cluster_index_for_point(&self, point: Vec3) -> Option<usize> {
        let depth = -point.z;
        let z = self.slice_for_depth(depth)?;
        let (half_w, half_h) = self.frustum.half_extents_at(depth);
        let x = cell_along(point.x, half_w, self.dims.x)?;
        let y = cell_along(point.y, half_h, self.dims.y)?;
        Some(self.cluster_index(x, y, z))
    }

    /// Every lattice edge as a pair of vertex indices.
    ///
    /// Edges shared by neighbouring clusters appear once: rows along X,
    /// then columns along Y, then depth lines along Z.
    pub fn edges(&self) -> Vec<[u32; 2]> {
        let UVec3 { x: nx, y: ny, z: nz } = self.dims;
        let count = nx * (ny + 1) * (nz + 1) + ny * (nx + 1) * (nz + 1) + nz * (nx + 1) * (ny + 1);
        let mut edges = Vec::with_capacity(count as usize);
        for z in 0..=nz {
            for y in 0..=ny {
                for x in 0..nx {
                    edges.push([self.vertex_index(x, y, z), self.vertex_index(x + 1, y, z)]);
                }
            }
        }
        for z in 0..=nz {
            for y in 0..ny {
                for x in 0..=nx {
                    edges.push([self.vertex_index(x, y, z), self.vertex_index(x, y + 1, z)]);
                }
            }
        }
        for z in 0..nz {
            for y in 0..=ny {
                for x in 0..=nx {
                    edges.push([self.vertex_index(x, y, z), self.vertex_index(x, y, z + 1)]);
                }
            }
        }
        edges
    }

    /// Line segments of every lattice edge, transformed by `transform`.
    ///
    /// Pass the inverse view matrix to get world-space lines for debug
    /// drawing, or `Mat4::IDENTITY` to stay in view space.
    pub fn edge_segments(&self, transform: &Mat4) -> Vec<(Vec3, Vec3)> {
        self.edges()
            .into_iter()
            .map(|[a, b]| {
                (
                    transform.transform_point3(self.vertices[a as usize]),
                    transform.transform_point3(self.vertices[b as usize]),
                )
            })
            .collect()
    }

    fn vertex_index(&self, x: u32, y: u32, z: u32) -> u32 {
        x + y * (self.dims.x + 1) + z * (self.dims.x + 1) * (self.dims.y + 1)
    }
}

/// Cell index of `value` in `[-half, half]` split into `cells`.
fn cell_along(value: f32, half: f32, cells: u32) -> Option<u32> {
    const EPSILON: f32 = 1e-4;
    let u = (value + half) / (2.0 * half) * cells as f32;
    if !u.is_finite() || u < -EPSILON || u > cells as f32 + EPSILON {
        return None;
    }
    Some((u.max(0.0) as u32).min(cells - 1))
}
