//! Mesh data structures, generation and geometry packing

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Interleaved vertex as stored in the shared vertex buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            uv: uv.to_array(),
        }
    }
}

/// A mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        let faces = [
            (Vec3::Z, Vec3::X),
            (-Vec3::Z, -Vec3::X),
            (Vec3::X, -Vec3::Z),
            (-Vec3::X, Vec3::Z),
            (Vec3::Y, Vec3::X),
            (-Vec3::Y, Vec3::X),
        ];

        for (face, (normal, right)) in faces.into_iter().enumerate() {
            let up = normal.cross(right);
            let corners = [(-0.5, -0.5), (0.5, -0.5), (0.5, 0.5), (-0.5, 0.5)];
            for (u, v) in corners {
                let position = normal * 0.5 + right * u + up * v;
                mesh.vertices
                    .push(Vertex::new(position, normal, Vec2::new(u + 0.5, 0.5 - v)));
            }

            let base = face as u32 * 4;
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// Create a UV sphere
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");
        let segments = segments.max(3);
        let rings = rings.max(2);

        let segment_angle = 2.0 * std::f32::consts::PI / segments as f32;
        let ring_angle = std::f32::consts::PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());
                let uv = Vec2::new(
                    segment as f32 / segments as f32,
                    ring as f32 / rings as f32,
                );
                mesh.vertices.push(Vertex::new(normal * 0.5, normal, uv));
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;

                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }

    /// Create a plane on the XZ axis
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let subdivisions = subdivisions.max(1);

        let half_width = width / 2.0;
        let half_depth = depth / 2.0;
        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let px = -half_width + x as f32 * step_x;
                let pz = -half_depth + z as f32 * step_z;
                mesh.vertices.push(Vertex::new(
                    Vec3::new(px, 0.0, pz),
                    Vec3::Y,
                    Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32),
                ));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;

                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }
}

/// Where one mesh lives inside the shared geometry buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRange {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
}

/// All meshes of a scene concatenated into one vertex and one index list
#[derive(Debug, Clone, Default)]
pub struct PackedGeometry {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub ranges: Vec<MeshRange>,
}

impl PackedGeometry {
    /// Concatenate `meshes`, keeping indices local to each mesh.
    pub fn pack(meshes: &[Mesh]) -> Self {
        let mut packed = Self {
            vertices: Vec::with_capacity(meshes.iter().map(Mesh::vertex_count).sum()),
            indices: Vec::with_capacity(meshes.iter().map(Mesh::index_count).sum()),
            ranges: Vec::with_capacity(meshes.len()),
        };

        for mesh in meshes {
            packed.ranges.push(MeshRange {
                first_index: packed.indices.len() as u32,
                index_count: mesh.indices.len() as u32,
                base_vertex: packed.vertices.len() as i32,
            });
            packed.vertices.extend_from_slice(&mesh.vertices);
            packed.indices.extend_from_slice(&mesh.indices);
        }

        packed
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
