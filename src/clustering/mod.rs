//! Clustered light culling
//!
//! [`ClusterGrid`] partitions a view frustum into cells once per projection,
//! and [`LightAssignment`] maps lights to those cells every frame.

pub mod assignment;
pub mod grid;
pub mod plane;

pub use assignment::{sphere_intersects_cluster, ClusterLightTable, LightAssignment, PLANE_TOLERANCE};
pub use grid::{Cluster, ClusterGrid, DepthSlicing, ViewFrustum, MAX_CLUSTERS};
pub use plane::Plane;
