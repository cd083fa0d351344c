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

use glam::{Vec2, Vec3};
use tracing::debug;

use crate::{
    camera::Camera,
    geometry::Geometry,
    material::Material,
    scene::{NodeId, NodeKind, Scene},
};

/// The capabilities Kiln needs from whatever displays the scene.
pub trait Viewer {
    fn scene(&self) -> &Scene;

    fn scene_mut(&mut self) -> &mut Scene;

    fn camera(&self) -> &Camera;

    /// Whether pointer drags currently orbit the camera.
    fn orbit_controls(&self) -> bool;

    fn set_orbit_controls(&mut self, enabled: bool);

    /// Frees whatever GPU-side state backs a geometry.
    fn release_geometry(&mut self, geometry: Arc<Geometry>);

    /// Frees whatever GPU-side state backs a material.
    fn release_material(&mut self, material: Arc<Material>);

    /// Removes a subtree and releases the resources of every mesh and helper
    /// in it.
    fn dispose_subtree(&mut self, id: NodeId) {
        for node in self.scene_mut().remove_subtree(id) {
            match node.kind {
                NodeKind::Other(helper) => {
                    self.release_geometry(helper.geometry);
                    self.release_material(helper.material);
                }
                kind => {
                    let Some(mesh) = kind.as_mesh() else {
                        continue;
                    };

                    self.release_geometry(mesh.geometry.clone());
                    for material in mesh.material.iter() {
                        self.release_material(material.clone());
                    }
                }
            }
        }
    }
}

/// A [Viewer] without a display, used by the CLI and tests.
#[derive(Debug)]
pub struct HeadlessViewer {
    pub scene: Scene,
    pub camera: Camera,
    pub orbit: bool,
    pub released_geometries: usize,
    pub released_materials: usize,
}

impl Default for HeadlessViewer {
    fn default() -> Self {
        Self {
            scene: Scene::new(),
            camera: Camera::look_at(
                Vec3::new(0.0, 5.0, 10.0),
                Vec3::ZERO,
                50f32.to_radians(),
                Vec2::new(1280.0, 720.0),
            ),
            orbit: true,
            released_geometries: 0,
            released_materials: 0,
        }
    }
}

impl Viewer for HeadlessViewer {
    fn scene(&self) -> &Scene {
        &self.scene
    }

    fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn orbit_controls(&self) -> bool {
        self.orbit
    }

    fn set_orbit_controls(&mut self, enabled: bool) {
        self.orbit = enabled;
    }

    fn release_geometry(&mut self, geometry: Arc<Geometry>) {
        debug!(vertices = geometry.vertex_count(), "released geometry");
        self.released_geometries += 1;
    }

    fn release_material(&mut self, material: Arc<Material>) {
        debug!(name = %material.name, "released material");
        self.released_materials += 1;
    }
}
