//! Scene management

mod camera;
pub mod hierarchy;
mod light;
mod transform;

pub use camera::*;
pub use hierarchy::{NodeId, SceneGraph, SceneNode};
pub use light::*;
pub use transform::*;

use glam::Vec3;

use crate::resources::{Material, Mesh};

/// A renderable object in the scene
#[derive(Debug, Clone, PartialEq)]
pub struct RenderObject {
    pub mesh_id: usize,
    pub material_id: usize,
    pub transform: Transform,
}

impl RenderObject {
    pub fn new(mesh_id: usize, material_id: usize) -> Self {
        Self {
            mesh_id,
            material_id,
            transform: Transform::default(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.transform.scale = scale;
        self
    }
}

/// Everything the engine draws: geometry, materials, instances and lights
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub meshes: Vec<Mesh>,
    pub materials: Vec<Material>,
    pub objects: Vec<RenderObject>,
    pub lights: Vec<Light>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> usize {
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    /// Add a render object to the scene
    pub fn add_object(&mut self, object: RenderObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }

    /// Append one object per mesh attached to `graph`.
    pub fn add_graph(&mut self, graph: &SceneGraph) -> usize {
        let objects = graph.flatten();
        let added = objects.len();
        self.objects.extend(objects);
        added
    }

    pub fn material_mut(&mut self, id: usize) -> Option<&mut Material> {
        self.materials.get_mut(id)
    }

    pub fn has_dirty_materials(&self) -> bool {
        self.materials.iter().any(Material::is_dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_ids() {
        let mut scene = Scene::new();
        let cube = scene.add_mesh(Mesh::cube());
        let gold = scene.add_material(Material::gold());
        assert_eq!((cube, gold), (0, 0));

        let object = scene.add_object(RenderObject::new(cube, gold).with_position(Vec3::X));
        assert_eq!(object, 0);
        assert_eq!(scene.add_light(Light::new(Vec3::Y, 3.0)), 0);
        assert!(scene.has_dirty_materials());
    }

    #[test]
    fn test_add_graph() {
        let mut graph = SceneGraph::new("root");
        let child = graph
            .add_child(SceneGraph::ROOT, "child", Transform::from_position(Vec3::Z))
            .unwrap();
        graph.attach_mesh(SceneGraph::ROOT, 0, 0).unwrap();
        graph.attach_mesh(child, 0, 0).unwrap();

        let mut scene = Scene::new();
        assert_eq!(scene.add_graph(&graph), 2);
        assert_eq!(scene.objects[1].transform.position, Vec3::Z);
    }
}
