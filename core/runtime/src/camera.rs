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

use glam::{Mat4, Vec2, Vec3};

/// A perspective camera looking at the scene through a pixel viewport.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Camera {
    /// World-to-camera transform.
    pub view: Mat4,

    /// Vertical field of view in radians.
    pub fov_y: f32,

    pub near: f32,
    pub far: f32,

    /// Viewport size in pixels.
    pub viewport: Vec2,
}

impl Camera {
    pub fn look_at(eye: Vec3, target: Vec3, fov_y: f32, viewport: Vec2) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, Vec3::Y),
            fov_y,
            near: 0.1,
            far: 1000.0,
            viewport,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }

    pub fn projection(&self) -> Mat4 {
        let aspect = self.viewport.x / self.viewport.y.max(1.0);
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }

    /// Casts a ray from the camera through a pixel (origin top-left).
    pub fn ray(&self, pixel: Vec2) -> Ray {
        let ndc = Vec2::new(
            2.0 * pixel.x / self.viewport.x - 1.0,
            1.0 - 2.0 * pixel.y / self.viewport.y,
        );

        let unproject = (self.projection() * self.view).inverse();
        let near = unproject.project_point3(ndc.extend(0.0));
        let far = unproject.project_point3(ndc.extend(1.0));

        Ray {
            origin: self.position(),
            direction: (far - near).normalize_or_zero(),
        }
    }

    /// The world-space height of one pixel at `distance` from the camera.
    pub fn world_units_per_pixel(&self, distance: f32) -> f32 {
        2.0 * distance * (self.fov_y * 0.5).tan() / self.viewport.y.max(1.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Intersects the horizontal plane `y = height`. Misses when parallel or
    /// behind the origin.
    pub fn intersect_plane_y(&self, height: f32) -> Option<Vec3> {
        if self.direction.y.abs() < f32::EPSILON {
            return None;
        }

        let t = (height - self.origin.y) / self.direction.y;
        (t >= 0.0).then(|| self.at(t))
    }

    /// Möller–Trumbore intersection with a double-sided triangle. Returns the
    /// distance along the ray.
    pub fn intersect_triangle(&self, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
        let edge1 = b - a;
        let edge2 = c - a;
        let p = self.direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < 1e-8 {
            return None;
        }

        let inv = 1.0 / det;
        let s = self.origin - a;
        let u = s.dot(p) * inv;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = self.direction.dot(q) * inv;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = edge2.dot(q) * inv;
        (t >= 0.0).then_some(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::look_at(
            Vec3::new(0.0, 10.0, 0.01),
            Vec3::ZERO,
            60f32.to_radians(),
            Vec2::new(800.0, 600.0),
        )
    }

    #[test]
    fn center_ray_hits_origin_plane() {
        let camera = camera();
        let ray = camera.ray(Vec2::new(400.0, 300.0));
        let hit = ray.intersect_plane_y(0.0).unwrap();
        assert!(hit.length() < 1e-2, "{hit:?}");
    }

    #[test]
    fn triangle_hit_and_miss() {
        let ray = Ray {
            origin: Vec3::new(0.25, 5.0, 0.25),
            direction: Vec3::NEG_Y,
        };

        let t = ray.intersect_triangle(Vec3::ZERO, Vec3::X, Vec3::Z).unwrap();
        assert!((t - 5.0).abs() < 1e-5);

        let away = Ray {
            direction: Vec3::Y,
            ..ray
        };
        assert!(away.intersect_triangle(Vec3::ZERO, Vec3::X, Vec3::Z).is_none());
    }

    #[test]
    fn pixel_scale_matches_frustum() {
        let camera = camera();
        let expected = 2.0 * 5.0 * (30f32.to_radians()).tan() / 600.0;
        assert!((camera.world_units_per_pixel(5.0) - expected).abs() < 1e-6);
    }
}
