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

use std::sync::Arc;

use kiln_runtime::{
    config::EditorConfig,
    geometry::Geometry,
    glam::{Vec3, Vec4},
    material::Material,
    scene::{Helper, HelperStyle, Node, NodeId, NodeKind},
    tracing::debug,
    viewer::Viewer,
};

use crate::selection::Aabb;

#[derive(Copy, Clone, Debug)]
struct BoxVisual {
    fill: NodeId,
    edges: NodeId,
}

/// Editor-only box visuals, kept under one group node in the viewer's scene.
///
/// Every visual owns its geometry and material so disposal releases all of
/// them.
#[derive(Debug)]
pub struct Overlay {
    root: NodeId,
    live: Option<BoxVisual>,
    persistent: Vec<BoxVisual>,
    fill_color: Vec4,
    edge_color: Vec4,
}

impl Overlay {
    pub fn attach(viewer: &mut impl Viewer, config: &EditorConfig) -> Self {
        let root = viewer
            .scene_mut()
            .add(Node::group("box-erase-overlay"), None);

        Self {
            root,
            live: None,
            persistent: Vec::new(),
            fill_color: Vec4::from(config.box_color),
            edge_color: Vec4::from(config.edge_color),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of boxes currently drawn, the live one included.
    pub fn visual_count(&self) -> usize {
        self.persistent.len() + self.live.iter().count()
    }

    /// Shows or moves the box being drawn.
    pub fn show_live(&mut self, viewer: &mut impl Viewer, aabb: &Aabb) {
        let Some(live) = self.live else {
            self.live = Some(self.spawn(viewer, aabb));
            return;
        };

        let scene = viewer.scene_mut();
        let old_fill = scene.replace_geometry(live.fill, Arc::new(fill_geometry(aabb)));
        let old_edges = scene.replace_geometry(live.edges, Arc::new(edge_geometry(aabb)));
        for old in old_fill.into_iter().chain(old_edges) {
            viewer.release_geometry(old);
        }
    }

    pub fn clear_live(&mut self, viewer: &mut impl Viewer) {
        if let Some(live) = self.live.take() {
            dispose_visual(viewer, live);
        }
    }

    /// Replaces the persistent visuals with one per box.
    pub fn set_boxes(&mut self, viewer: &mut impl Viewer, boxes: &[Aabb]) {
        for visual in std::mem::take(&mut self.persistent) {
            dispose_visual(viewer, visual);
        }

        self.persistent = boxes.iter().map(|aabb| self.spawn(viewer, aabb)).collect();
        debug!("overlay shows {} box(es)", self.persistent.len());
    }

    /// Removes the overlay group and releases everything under it.
    pub fn dispose(self, viewer: &mut impl Viewer) {
        viewer.dispose_subtree(self.root);
    }

    fn spawn(&self, viewer: &mut impl Viewer, aabb: &Aabb) -> BoxVisual {
        let fill = Helper {
            geometry: Arc::new(fill_geometry(aabb)),
            material: Arc::new(helper_material("box-fill", self.fill_color)),
            style: HelperStyle::Fill,
        };

        let edges = Helper {
            geometry: Arc::new(edge_geometry(aabb)),
            material: Arc::new(helper_material("box-edges", self.edge_color)),
            style: HelperStyle::Lines,
        };

        let scene = viewer.scene_mut();
        BoxVisual {
            fill: scene.add(Node::new("box-fill", NodeKind::Other(fill)), Some(self.root)),
            edges: scene.add(Node::new("box-edges", NodeKind::Other(edges)), Some(self.root)),
        }
    }
}

fn dispose_visual(viewer: &mut impl Viewer, visual: BoxVisual) {
    viewer.dispose_subtree(visual.fill);
    viewer.dispose_subtree(visual.edges);
}

fn fill_geometry(aabb: &Aabb) -> Geometry {
    Geometry::cuboid(aabb.min, aabb.max)
}

fn edge_geometry(aabb: &Aabb) -> Geometry {
    Geometry::cuboid_edges(aabb.min, aabb.max)
}

fn helper_material(name: &str, rgba: Vec4) -> Material {
    Material {
        color: Some(Vec3::new(rgba.x, rgba.y, rgba.z)),
        opacity: Some(rgba.w),
        transparent: rgba.w < 1.0,
        double_sided: true,
        ..Material::named(name)
    }
}
