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

//! Turning a pointer drag into a world-space box.
//!
//! The press picks an anchor on the target mesh, or on the ground plane if
//! the mesh is missed. Dragging sweeps the box's footprint across the
//! horizontal plane through the anchor, and vertical pointer travel raises or
//! lowers its top.

use kiln_runtime::{
    camera::{Camera, Ray},
    geometry::Geometry,
    glam::{Mat4, Vec2, Vec3},
    scene::{NodeId, Scene},
};

use crate::selection::Aabb;

/// Casts a ray against a mesh node's triangles in world space, returning the
/// nearest hit distance.
pub fn raycast_mesh(scene: &Scene, mesh: NodeId, ray: &Ray) -> Option<f32> {
    let node = scene.get(mesh)?;
    let geometry = &node.kind.as_mesh()?.geometry;
    raycast_geometry(geometry, scene.world_matrix(mesh), ray)
}

fn raycast_geometry(geometry: &Geometry, world: Mat4, ray: &Ray) -> Option<f32> {
    let position = geometry.position()?;
    let triangles = geometry.triangle_count().ok()?;

    let mut nearest: Option<f32> = None;
    for triangle in 0..triangles {
        let Ok([a, b, c]) = geometry.triangle(triangle) else {
            continue;
        };

        let [a, b, c] = [a, b, c].map(|vertex| world.transform_point3(position.read_vec3(vertex)));
        if let Some(t) = ray.intersect_triangle(a, b, c) {
            nearest = Some(nearest.map_or(t, |best| best.min(t)));
        }
    }

    nearest
}

/// Picks where a box starts for a press at `pixel`.
pub fn pick_anchor(scene: &Scene, camera: &Camera, target: NodeId, pixel: Vec2) -> Option<Vec3> {
    let ray = camera.ray(pixel);
    match raycast_mesh(scene, target, &ray) {
        Some(t) => Some(ray.at(t)),
        None => ray.intersect_plane_y(0.0),
    }
}

/// A box being drawn.
#[derive(Copy, Clone, Debug)]
pub struct DrawGesture {
    anchor: Vec3,
    start_pixel: Vec2,
    footprint: Vec2,
    height: f32,
}

impl DrawGesture {
    pub fn new(anchor: Vec3, start_pixel: Vec2) -> Self {
        Self {
            anchor,
            start_pixel,
            footprint: Vec2::new(anchor.x, anchor.z),
            height: 0.0,
        }
    }

    pub fn anchor(&self) -> Vec3 {
        self.anchor
    }

    /// Follows the pointer to `pixel`. The footprint holds still while the
    /// pointer is above the horizon.
    pub fn update(&mut self, camera: &Camera, pixel: Vec2) -> Aabb {
        if let Some(hit) = camera.ray(pixel).intersect_plane_y(self.anchor.y) {
            self.footprint = Vec2::new(hit.x, hit.z);
        }

        let distance = camera.position().distance(self.anchor);
        self.height = (self.start_pixel.y - pixel.y) * camera.world_units_per_pixel(distance);
        self.current()
    }

    pub fn current(&self) -> Aabb {
        let corner = Vec3::new(
            self.footprint.x,
            self.anchor.y + self.height,
            self.footprint.y,
        );

        Aabb::from_corners(self.anchor, corner)
    }

    /// The finished box, unless it has no volume.
    pub fn finish(self) -> Option<Aabb> {
        Some(self.current()).filter(|aabb| !aabb.is_degenerate())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kiln_runtime::{
        material::Material,
        scene::{MaterialSlot, Mesh, Node, NodeKind, Transform},
    };

    use super::*;

    fn top_down() -> Camera {
        Camera::look_at(
            Vec3::new(0.0, 10.0, 0.001),
            Vec3::ZERO,
            60f32.to_radians(),
            Vec2::new(800.0, 600.0),
        )
    }

    fn slab_scene() -> (Scene, NodeId) {
        let mut scene = Scene::new();
        let id = scene.add(
            Node::new(
                "slab",
                NodeKind::StaticMesh(Mesh {
                    geometry: Arc::new(Geometry::cuboid(Vec3::splat(-1.0), Vec3::ONE)),
                    material: MaterialSlot::Single(Arc::new(Material::default())),
                }),
            )
            .with_transform(Transform::from_translation(Vec3::Y)),
            None,
        );

        (scene, id)
    }

    #[test]
    fn anchor_prefers_the_mesh() {
        let (scene, slab) = slab_scene();
        let camera = top_down();
        let center = Vec2::new(400.0, 300.0);

        let anchor = pick_anchor(&scene, &camera, slab, center).unwrap();
        assert!((anchor.y - 2.0).abs() < 1e-3, "{anchor}");

        // a corner pixel misses the slab and lands on the ground
        let anchor = pick_anchor(&scene, &camera, slab, Vec2::new(10.0, 10.0)).unwrap();
        assert!(anchor.y.abs() < 1e-4, "{anchor}");
    }

    #[test]
    fn drag_sweeps_footprint_and_height() {
        let camera = top_down();
        let start = Vec2::new(400.0, 300.0);
        let mut gesture = DrawGesture::new(Vec3::ZERO, start);

        let flat = gesture.update(&camera, Vec2::new(500.0, 300.0));
        assert!(flat.max.x > 0.5);
        assert_eq!(flat.size().y, 0.0);
        assert!(gesture.finish().is_none());

        // moving the pointer up raises the top
        let raised = gesture.update(&camera, Vec2::new(500.0, 200.0));
        let expected = 100.0 * camera.world_units_per_pixel(camera.position().length());
        assert!((raised.max.y - expected).abs() < 1e-4);
        assert_eq!(raised.min.y, 0.0);
        assert!(gesture.finish().is_some());
    }

    #[test]
    fn footprint_holds_above_horizon() {
        let camera = Camera::look_at(
            Vec3::new(0.0, 1.0, 10.0),
            Vec3::new(0.0, 1.0, 0.0),
            60f32.to_radians(),
            Vec2::new(800.0, 600.0),
        );

        let mut gesture = DrawGesture::new(Vec3::ZERO, Vec2::new(400.0, 500.0));
        let before = gesture.update(&camera, Vec2::new(450.0, 500.0));
        let after = gesture.update(&camera, Vec2::new(700.0, 10.0));
        assert_eq!(before.min.x, after.min.x);
        assert_eq!(before.max.x, after.max.x);
        assert!(after.max.y > before.max.y);
    }
}
