//! Parent/child node hierarchy flattened into render objects
//!
//! Nodes live in an arena and refer to each other by index. A child can only
//! be attached to an existing node, so the graph is always a tree rooted at
//! node 0 and traversal needs no cycle detection.

use glam::Mat4;

use crate::error::{RenderError, Result};
use crate::scene::{RenderObject, Transform};

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    /// Transform relative to the parent node
    pub local: Transform,
    /// `(mesh_id, material_id)` pairs drawn at this node
    pub meshes: Vec<(usize, usize)>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl SceneNode {
    fn new(name: &str, local: Transform, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            local,
            meshes: Vec::new(),
            parent,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: Vec<SceneNode>,
}

impl SceneGraph {
    pub const ROOT: NodeId = 0;

    pub fn new(root_name: &str) -> Self {
        Self {
            nodes: vec![SceneNode::new(root_name, Transform::default(), None)],
        }
    }

    pub fn add_child(&mut self, parent: NodeId, name: &str, local: Transform) -> Result<NodeId> {
        self.check(parent)?;
        let id = self.nodes.len();
        self.nodes.push(SceneNode::new(name, local, Some(parent)));
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    pub fn attach_mesh(&mut self, node: NodeId, mesh_id: usize, material_id: usize) -> Result<()> {
        self.check(node)?;
        self.nodes[node].meshes.push((mesh_id, material_id));
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// World matrix of `id`, composed from the root down.
    pub fn world_matrix(&self, id: NodeId) -> Option<Mat4> {
        let mut node = self.nodes.get(id)?;
        let mut world = node.local.matrix();
        while let Some(parent) = node.parent {
            node = &self.nodes[parent];
            world = node.local.matrix() * world;
        }
        Some(world)
    }

    /// One render object per attached mesh, in depth-first order.
    pub fn flatten(&self) -> Vec<RenderObject> {
        let mut objects = Vec::new();
        let mut stack = vec![(Self::ROOT, Mat4::IDENTITY)];

        while let Some((id, parent_world)) = stack.pop() {
            let node = &self.nodes[id];
            let world = parent_world * node.local.matrix();

            for &(mesh_id, material_id) in &node.meshes {
                objects.push(
                    RenderObject::new(mesh_id, material_id)
                        .with_transform(Transform::from_matrix(world)),
                );
            }

            // Reversed so the first child is visited first.
            stack.extend(node.children.iter().rev().map(|&child| (child, world)));
        }

        log::debug!("Flattened {} nodes into {} objects", self.nodes.len(), objects.len());
        objects
    }

    fn check(&self, id: NodeId) -> Result<()> {
        if id < self.nodes.len() {
            Ok(())
        } else {
            Err(RenderError::InvalidParameter(format!(
                "scene node {} does not exist ({} nodes)",
                id,
                self.nodes.len()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_flatten_composes_transforms() {
        let mut graph = SceneGraph::new("root");
        let arm = graph
            .add_child(SceneGraph::ROOT, "arm", Transform::from_position(Vec3::X))
            .unwrap();
        let hand = graph
            .add_child(arm, "hand", Transform::from_position(Vec3::Y))
            .unwrap();
        graph.attach_mesh(hand, 2, 1).unwrap();

        let objects = graph.flatten();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].mesh_id, 2);
        assert_eq!(objects[0].material_id, 1);
        assert!((objects[0].transform.position - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-6);
        assert_eq!(graph.world_matrix(hand).unwrap(), Mat4::from_translation(Vec3::new(1.0, 1.0, 0.0)));
    }

    #[test]
    fn test_depth_first_order() {
        let mut graph = SceneGraph::new("root");
        let a = graph.add_child(SceneGraph::ROOT, "a", Transform::default()).unwrap();
        let b = graph.add_child(SceneGraph::ROOT, "b", Transform::default()).unwrap();
        let a1 = graph.add_child(a, "a1", Transform::default()).unwrap();
        graph.attach_mesh(a, 0, 0).unwrap();
        graph.attach_mesh(b, 2, 0).unwrap();
        graph.attach_mesh(a1, 1, 0).unwrap();

        let order: Vec<usize> = graph.flatten().iter().map(|o| o.mesh_id).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_deep_chain_does_not_recurse() {
        let mut graph = SceneGraph::new("root");
        let mut node = SceneGraph::ROOT;
        for i in 0..10_000 {
            node = graph
                .add_child(node, &format!("n{i}"), Transform::default())
                .unwrap();
        }
        graph.attach_mesh(node, 0, 0).unwrap();
        assert_eq!(graph.flatten().len(), 1);
    }

    #[test]
    fn test_unknown_parent() {
        let mut graph = SceneGraph::new("root");
        assert!(graph.add_child(7, "orphan", Transform::default()).is_err());
        assert!(graph.attach_mesh(3, 0, 0).is_err());
    }
}
