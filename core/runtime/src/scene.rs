// Copyright (c) 2024 the Kiln contributors.
// SPDX-License-Identifier: AGPL-3.0-or-later
//
// This file is part of Kiln.
//
// Kiln is free software: you can redistribute it and/or modify it under the
// terms of the GNU Affero General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Kiln is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with Kiln. If not, see <https://www.gnu.org/licenses/>.

//! The in-memory scene graph.
//!
//! Nodes live in a [Slab] arena and refer to each other by [NodeId]. A node
//! removed from the arena invalidates its id; lookups of stale ids return
//! [None] rather than panicking.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};
use slab::Slab;

use crate::{geometry::Geometry, material::Material};

/// A handle to a node in a [Scene].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// A decomposed local transform.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// The material(s) of a mesh.
#[derive(Clone, Debug)]
pub enum MaterialSlot {
    Single(Arc<Material>),

    /// One material per geometry group, indexed by the group's material index.
    Multi(Vec<Arc<Material>>),
}

impl MaterialSlot {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Material>> {
        match self {
            MaterialSlot::Single(material) => std::slice::from_ref(material).iter(),
            MaterialSlot::Multi(materials) => materials.iter(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Mesh {
    pub geometry: Arc<Geometry>,
    pub material: MaterialSlot,
}

/// The bones deforming a skinned mesh.
#[derive(Clone, Debug, Default)]
pub struct Skeleton {
    /// Bone nodes, in joint order.
    pub bones: Vec<NodeId>,

    /// One matrix per bone. When absent they are derived from the bones'
    /// current world transforms.
    pub inverse_bind_matrices: Option<Vec<Mat4>>,
}

#[derive(Clone, Debug)]
pub struct SkinnedMesh {
    pub mesh: Mesh,
    pub skeleton: Skeleton,
    pub bind_matrix: Option<Mat4>,
}

/// How a [Helper] is drawn.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HelperStyle {
    Fill,
    Lines,
}

/// Non-exported visuals such as editor overlays.
#[derive(Clone, Debug)]
pub struct Helper {
    pub geometry: Arc<Geometry>,
    pub material: Arc<Material>,
    pub style: HelperStyle,
}

/// What a node is.
#[derive(Clone, Debug)]
pub enum NodeKind {
    Group,
    Bone,
    StaticMesh(Mesh),
    SkinnedMesh(SkinnedMesh),
    Other(Helper),
}

impl NodeKind {
    /// Narrows to the mesh part of either mesh kind.
    pub fn as_mesh(&self) -> Option<&Mesh> {
        match self {
            NodeKind::StaticMesh(mesh) => Some(mesh),
            NodeKind::SkinnedMesh(skinned) => Some(&skinned.mesh),
            _ => None,
        }
    }

    pub fn as_mesh_mut(&mut self) -> Option<&mut Mesh> {
        match self {
            NodeKind::StaticMesh(mesh) => Some(mesh),
            NodeKind::SkinnedMesh(skinned) => Some(&mut skinned.mesh),
            _ => None,
        }
    }

    pub fn as_skinned(&self) -> Option<&SkinnedMesh> {
        match self {
            NodeKind::SkinnedMesh(skinned) => Some(skinned),
            _ => None,
        }
    }

    pub fn is_mesh(&self) -> bool {
        self.as_mesh().is_some()
    }

    pub fn is_bone(&self) -> bool {
        matches!(self, NodeKind::Bone)
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    pub kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            transform: Transform::IDENTITY,
            kind,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Group)
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Default)]
pub struct Scene {
    nodes: Slab<Node>,
    roots: Vec<NodeId>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node under `parent`, or as a new root.
    ///
    /// A stale parent id makes the node a root.
    pub fn add(&mut self, mut node: Node, parent: Option<NodeId>) -> NodeId {
        let parent = parent.filter(|parent| self.nodes.contains(parent.0));
        node.parent = parent;
        node.children.clear();

        let id = NodeId(self.nodes.insert(node));
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }

        id
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id.0)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The absolute transform of a node. Stale ids resolve to identity.
    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut cursor = Some(id);
        while let Some(node) = cursor.and_then(|id| self.get(id)) {
            matrix = node.transform.matrix() * matrix;
            cursor = node.parent;
        }

        matrix
    }

    /// Lists `root` and all of its descendants in pre-order.
    pub fn traverse(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.get(id) else {
                continue;
            };

            order.push(id);
            stack.extend(node.children.iter().rev());
        }

        order
    }

    /// Moves `id` under a new parent (or to the roots). Refuses to create a
    /// cycle.
    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> bool {
        if !self.contains(id) {
            return false;
        }

        if let Some(parent) = parent {
            if !self.contains(parent) || self.traverse(id).contains(&parent) {
                return false;
            }
        }

        self.detach(id);
        self.nodes[id.0].parent = parent;
        match parent {
            Some(parent) => self.nodes[parent.0].children.push(id),
            None => self.roots.push(id),
        }

        true
    }

    /// Removes `id` and all of its descendants, returning the removed nodes in
    /// pre-order.
    pub fn remove_subtree(&mut self, id: NodeId) -> Vec<Node> {
        if !self.contains(id) {
            return Vec::new();
        }

        self.detach(id);
        self.traverse(id)
            .into_iter()
            .map(|id| self.nodes.remove(id.0))
            .collect()
    }

    /// Swaps the geometry of a mesh or helper node, returning the previous
    /// geometry so the caller can release it.
    pub fn replace_geometry(
        &mut self,
        id: NodeId,
        geometry: Arc<Geometry>,
    ) -> Option<Arc<Geometry>> {
        let node = self.get_mut(id)?;
        let slot = match &mut node.kind {
            NodeKind::Other(helper) => &mut helper.geometry,
            kind => &mut kind.as_mesh_mut()?.geometry,
        };

        Some(std::mem::replace(slot, geometry))
    }

    /// Finds the first node under `root` with the given name.
    pub fn find_by_name(&self, root: NodeId, name: &str) -> Option<NodeId> {
        self.traverse(root)
            .into_iter()
            .find(|id| self.nodes[id.0].name == name)
    }

    fn detach(&mut self, id: NodeId) {
        match self.nodes[id.0].parent.take() {
            Some(parent) => {
                if let Some(parent) = self.nodes.get_mut(parent.0) {
                    parent.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }
    }
}
