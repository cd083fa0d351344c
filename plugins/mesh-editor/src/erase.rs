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

use std::{sync::Arc, time::Duration};

use itertools::Itertools;
use kiln_runtime::{
    geometry::Geometry,
    glam::Mat4,
    kiln_schema::{AttributeBuffer, AttributeName, DescriptorError, GeometryGroup},
    tracing::{debug, info},
    yield_to_host,
};

use crate::selection::Aabb;

#[derive(Debug, thiserror::Error)]
pub enum EraseError {
    #[error("no selection boxes to erase")]
    NothingSelected,

    #[error("target geometry is malformed: {0}")]
    Geometry(#[from] DescriptorError),
}

/// The rebuilt geometry of a finished erase.
#[derive(Clone, Debug)]
pub struct EraseOutcome {
    pub geometry: Geometry,
    pub removed: usize,
    pub kept: usize,
}

/// Removes every triangle whose world-space centroid lies in a box.
///
/// Skinned meshes are tested in their bind pose.
#[derive(Debug)]
pub struct EraseJob {
    geometry: Arc<Geometry>,
    world: Mat4,
    boxes: Vec<Aabb>,
    chunk: usize,
}

impl EraseJob {
    /// `chunk` is the number of triangles tested between yields to the host.
    pub fn new(geometry: Arc<Geometry>, world: Mat4, boxes: Vec<Aabb>, chunk: usize) -> Self {
        Self {
            geometry,
            world,
            boxes,
            chunk: chunk.max(1),
        }
    }

    /// Builds the erased geometry. The source geometry is never modified.
    pub async fn run(self) -> Result<EraseOutcome, EraseError> {
        if self.boxes.is_empty() {
            return Err(EraseError::NothingSelected);
        }

        let working = self.geometry.to_non_indexed()?;
        let triangles = working.triangle_count()?;
        let position = working
            .position()
            .ok_or(DescriptorError::MissingPositions)?;

        info!(triangles, boxes = self.boxes.len(), "erasing");

        let mut attributes: Vec<(AttributeName, &AttributeBuffer, AttributeBuffer)> = working
            .attributes
            .iter()
            .map(|(name, buffer)| (*name, buffer, buffer.empty_like(triangles * 3)))
            .collect();

        let group_of = |triangle: usize| {
            let vertex = triangle as u64 * 3;
            working
                .groups
                .iter()
                .find(|group| {
                    let start = group.start as u64;
                    vertex >= start && vertex < start + group.count as u64
                })
                .map(|group| group.material_index)
        };

        let mut kept_groups = Vec::new();
        let mut removed = 0;
        for triangle in 0..triangles {
            if triangle > 0 && triangle % self.chunk == 0 {
                yield_to_host(Duration::ZERO).await;
            }

            let base = triangle * 3;
            let centroid = (position.read_vec3(base)
                + position.read_vec3(base + 1)
                + position.read_vec3(base + 2))
                / 3.0;

            let centroid = self.world.transform_point3(centroid);
            if self.boxes.iter().any(|aabb| aabb.contains_point(centroid)) {
                removed += 1;
                continue;
            }

            for (_, source, out) in attributes.iter_mut() {
                for vertex in base..base + 3 {
                    out.push_item_from(source, vertex);
                }
            }

            kept_groups.push(group_of(triangle));
        }

        let kept = triangles - removed;
        let groups = if working.groups.is_empty() {
            Vec::new()
        } else {
            regroup(&kept_groups)
        };

        let mut geometry = Geometry {
            attributes: attributes
                .into_iter()
                .map(|(name, _, buffer)| (name, buffer))
                .collect(),
            index: None,
            groups,
            bounding_box: None,
            morph_targets: Vec::new(),
        };

        geometry.compute_bounding_box();
        if kept > 0 {
            geometry.compute_vertex_normals()?;
        } else {
            geometry
                .attributes
                .insert(AttributeName::Normal, AttributeBuffer::from_f32(3, &[]));
        }

        debug!(removed, kept, "erase finished");
        Ok(EraseOutcome {
            geometry,
            removed,
            kept,
        })
    }
}

/// Turns per-triangle material indices back into contiguous groups.
/// Triangles outside every group stay ungrouped.
fn regroup(materials: &[Option<u32>]) -> Vec<GeometryGroup> {
    let mut groups = Vec::new();
    let mut start = 0u32;
    for (material, run) in &materials.iter().group_by(|material| **material) {
        let count = run.count() as u32 * 3;
        if let Some(material_index) = material {
            groups.push(GeometryGroup {
                start,
                count,
                material_index,
            });
        }

        start += count;
    }

    groups
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kiln_runtime::glam::Vec3;

    use super::*;

    /// A row of `count` small triangles along +X, one unit apart, with a
    /// distinct uv and color on every vertex.
    fn strip(count: usize) -> Geometry {
        let positions: Vec<Vec3> = (0..count)
            .flat_map(|i| {
                let x = i as f32;
                [
                    Vec3::new(x, 0.0, 0.0),
                    Vec3::new(x + 0.5, 0.0, 0.0),
                    Vec3::new(x, 0.5, 0.0),
                ]
            })
            .collect();

        let uvs: Vec<f32> = (0..count * 3).flat_map(|v| [v as f32, -(v as f32)]).collect();
        let colors: Vec<u8> = (0..count * 3).flat_map(|v| [v as u8, 0, 0, 255]).collect();

        Geometry::from_positions(&positions)
            .with_attribute(AttributeName::Uv, AttributeBuffer::from_f32(2, &uvs))
            .with_attribute(
                AttributeName::Color,
                AttributeBuffer::new(kiln_runtime::kiln_schema::ElementType::U8, 4, true, colors),
            )
    }

    fn boxed(min: Vec3, max: Vec3) -> Vec<Aabb> {
        vec![Aabb::from_corners(min, max)]
    }

    async fn erase(geometry: Geometry, world: Mat4, boxes: Vec<Aabb>) -> EraseOutcome {
        EraseJob::new(Arc::new(geometry), world, boxes, 4)
            .run()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn removes_exactly_the_enclosed_triangles() {
        // centroids sit at x = i + 1/6, so this box holds triangles 3..=6
        let boxes = boxed(Vec3::new(2.5, -1.0, -1.0), Vec3::new(6.5, 1.0, 1.0));
        let outcome = erase(strip(10), Mat4::IDENTITY, boxes).await;

        assert_eq!(outcome.removed, 4);
        assert_eq!(outcome.kept, 6);
        assert_eq!(outcome.geometry.triangle_count().unwrap(), 6);
        for (name, buffer) in outcome.geometry.attributes.iter() {
            assert_eq!(buffer.count(), 18, "{name:?}");
        }
    }

    #[tokio::test]
    async fn kept_triangles_keep_every_attribute() {
        let source = strip(10);
        let boxes = boxed(Vec3::new(2.5, -1.0, -1.0), Vec3::new(6.5, 1.0, 1.0));
        let outcome = erase(source.clone(), Mat4::IDENTITY, boxes).await;

        let kept_triangles = [0, 1, 2, 7, 8, 9];
        for name in [AttributeName::Position, AttributeName::Uv, AttributeName::Color] {
            let before = source.attribute(name).unwrap();
            let after = outcome.geometry.attribute(name).unwrap();
            assert_eq!(after.element, before.element);
            assert_eq!(after.item_size, before.item_size);
            assert_eq!(after.normalized, before.normalized);

            for (slot, triangle) in kept_triangles.iter().enumerate() {
                assert_eq!(
                    after.items(slot * 3..slot * 3 + 3),
                    before.items(triangle * 3..triangle * 3 + 3),
                    "{name:?} of triangle {triangle}"
                );
            }
        }

        let normals = outcome.geometry.attribute(AttributeName::Normal).unwrap();
        assert_eq!(normals.count(), 18);
        assert_eq!(normals.read_vec3(0), Vec3::Z);

        let bounds = outcome.geometry.bounding_box.unwrap();
        assert_eq!(bounds.max.x, 9.5);
    }

    #[tokio::test]
    async fn centroids_are_tested_in_world_space() {
        let world = Mat4::from_translation(Vec3::new(100.0, 0.0, 0.0));
        let local = boxed(Vec3::new(-0.5, -1.0, -1.0), Vec3::new(0.5, 1.0, 1.0));
        let outcome = erase(strip(3), world, local).await;
        assert_eq!(outcome.removed, 0);

        let shifted = boxed(Vec3::new(99.5, -1.0, -1.0), Vec3::new(100.5, 1.0, 1.0));
        let outcome = erase(strip(3), world, shifted).await;
        assert_eq!(outcome.removed, 1);
    }

    #[tokio::test]
    async fn indexed_groups_are_rebuilt() {
        // two faces per material: -z, +z with 0, the other four with 1
        let cube = Geometry::cuboid(Vec3::ZERO, Vec3::ONE).with_groups(vec![
            GeometryGroup {
                start: 0,
                count: 12,
                material_index: 0,
            },
            GeometryGroup {
                start: 12,
                count: 24,
                material_index: 1,
            },
        ]);

        // the +z face centroids sit at z = 1
        let boxes = boxed(Vec3::new(-1.0, -1.0, 0.9), Vec3::new(2.0, 2.0, 1.1));
        let outcome = erase(cube, Mat4::IDENTITY, boxes).await;

        assert_eq!(outcome.removed, 2);
        assert!(outcome.geometry.index.is_none());
        assert_eq!(
            outcome.geometry.groups,
            vec![
                GeometryGroup {
                    start: 0,
                    count: 6,
                    material_index: 0,
                },
                GeometryGroup {
                    start: 6,
                    count: 24,
                    material_index: 1,
                },
            ]
        );
    }

    #[tokio::test]
    async fn everything_erased_leaves_empty_buffers() {
        let boxes = boxed(Vec3::splat(-10.0), Vec3::splat(10.0));
        let outcome = erase(strip(5), Mat4::IDENTITY, boxes).await;
        assert_eq!(outcome.kept, 0);
        assert!(outcome.geometry.position().unwrap().is_empty());
        assert!(outcome.geometry.bounding_box.is_none());
    }

    #[tokio::test]
    async fn no_boxes_is_an_error() {
        let result = EraseJob::new(Arc::new(strip(2)), Mat4::IDENTITY, Vec::new(), 10)
            .run()
            .await;
        assert!(matches!(result, Err(EraseError::NothingSelected)));
    }

    #[tokio::test]
    async fn short_attributes_are_an_error() {
        let positions = [Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z, Vec3::ONE, Vec3::NEG_X];
        let uv = AttributeBuffer::from_f32(2, &[0.0, 0.0]);
        let boxes = boxed(Vec3::splat(-2.0), Vec3::splat(2.0));

        let flat = Geometry::from_positions(&positions).with_attribute(AttributeName::Uv, uv);
        let indexed = flat.clone().with_index(&[0, 1, 2, 3, 4, 5]);

        for geometry in [flat, indexed] {
            let result = EraseJob::new(Arc::new(geometry), Mat4::IDENTITY, boxes.clone(), 4)
                .run()
                .await;

            assert!(matches!(
                result,
                Err(EraseError::Geometry(DescriptorError::AttributeCount {
                    name: AttributeName::Uv,
                    count: 1,
                    vertices: 6,
                }))
            ));
        }
    }

    #[tokio::test]
    async fn long_erases_let_other_tasks_run() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = tokio::spawn({
            let ticks = ticks.clone();
            async move {
                loop {
                    ticks.fetch_add(1, Ordering::Relaxed);
                    tokio::task::yield_now().await;
                }
            }
        });

        let boxes = boxed(Vec3::new(9.5, -1.0, -1.0), Vec3::new(20.5, 1.0, 1.0));
        let outcome = EraseJob::new(Arc::new(strip(40)), Mat4::IDENTITY, boxes, 4)
            .run()
            .await
            .unwrap();

        let during = ticks.load(Ordering::Relaxed);
        ticker.abort();

        assert_eq!(outcome.removed, 11);
        assert!(during > 0, "erase never yielded");
    }

    #[test]
    fn regroup_skips_ungrouped_runs() {
        let groups = regroup(&[Some(0), Some(0), None, Some(1), Some(0)]);
        assert_eq!(
            groups,
            vec![
                GeometryGroup {
                    start: 0,
                    count: 6,
                    material_index: 0
                },
                GeometryGroup {
                    start: 9,
                    count: 3,
                    material_index: 1
                },
                GeometryGroup {
                    start: 12,
                    count: 3,
                    material_index: 0
                },
            ]
        );
    }
}
