//! Arena scene graph.
//!
//! Nodes live in a `Vec` and refer to each other by [`NodeId`]. A parent
//! link is a lookup index only; the graph owns every node. Mesh payloads are
//! generic so the graph stays independent of how meshes are stored on the
//! GPU.

use std::sync::Arc;

use glam::Mat4;
use tracing::warn;

use crate::render_object::DrawContext;

/// Something that emits render objects when drawn with a world matrix.
pub trait Renderable {
    fn draw(&self, world: &Mat4, ctx: &mut DrawContext);
}

impl<T: Renderable + ?Sized> Renderable for Arc<T> {
    fn draw(&self, world: &Mat4, ctx: &mut DrawContext) {
        (**self).draw(world, ctx)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind<M> {
    Empty,
    Mesh(M),
}

#[derive(Debug, Clone)]
pub struct SceneNode<M> {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub local_transform: Mat4,
    pub world_transform: Mat4,
    pub kind: NodeKind<M>,
}

#[derive(Debug, Clone)]
pub struct SceneGraph<M> {
    nodes: Vec<SceneNode<M>>,
}

impl<M> Default for SceneGraph<M> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<M> SceneGraph<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parentless node. Its world transform starts equal to `local`.
    pub fn add_node(&mut self, name: impl Into<String>, local: Mat4, kind: NodeKind<M>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(SceneNode {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            local_transform: local,
            world_transform: local,
            kind,
        });
        id
    }

    /// Makes `child` a child of `parent`.
    ///
    /// Returns `false` and leaves the graph untouched if either id is
    /// invalid, `child` already has a parent, or the link would form a cycle.
    pub fn set_parent(&mut self, child: NodeId, parent: NodeId) -> bool {
        if child.0 >= self.nodes.len() || parent.0 >= self.nodes.len() {
            return false;
        }
        if self.nodes[child.0].parent.is_some() {
            warn!("Node '{}' already has a parent", self.nodes[child.0].name);
            return false;
        }

        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                warn!(
                    "Refusing to parent '{}' under its own descendant",
                    self.nodes[child.0].name
                );
                return false;
            }
            cursor = self.nodes[id.0].parent;
        }

        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        true
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode<M>> {
        self.nodes.get(id.0)
    }

    /// Nodes without a parent, in insertion order.
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(i, _)| NodeId(i))
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Recomputes world transforms top-down: roots get
    /// `parent_matrix × local`, every other node `parent_world × local`.
    pub fn refresh_transforms(&mut self, parent_matrix: Mat4) {
        let mut stack: Vec<(NodeId, Mat4)> =
            self.roots().map(|root| (root, parent_matrix)).collect();

        while let Some((id, parent_world)) = stack.pop() {
            let node = &mut self.nodes[id.0];
            node.world_transform = parent_world * node.local_transform;
            let world = node.world_transform;
            stack.extend(node.children.iter().map(|&child| (child, world)));
        }
    }
}

impl<M: Renderable> SceneGraph<M> {
    /// Visits every node reachable from the roots, depth first in child
    /// order. Mesh nodes draw with `top_matrix × world_transform`.
    pub fn draw(&self, top_matrix: &Mat4, ctx: &mut DrawContext) {
        let mut stack: Vec<NodeId> = self.roots().collect();
        stack.reverse();

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if let NodeKind::Mesh(mesh) = &node.kind {
                mesh.draw(&(*top_matrix * node.world_transform), ctx);
            }
            stack.extend(node.children.iter().rev().copied());
        }
    }
}
