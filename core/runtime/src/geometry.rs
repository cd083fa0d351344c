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

use std::collections::{BTreeMap, HashMap};

use glam::Vec3;
use kiln_schema::{
    check_attribute_counts, triangle_count, AttributeBuffer, AttributeName, BoundingBox,
    DescriptorError, GeometryGroup,
};

/// Per-vertex displacement data for blend shapes.
#[derive(Clone, Debug, Default)]
pub struct MorphTarget {
    pub positions: Option<AttributeBuffer>,
    pub normals: Option<AttributeBuffer>,
}

/// Triangle geometry as held by a live scene mesh.
///
/// All attributes must have the same item count.
#[derive(Clone, Debug, Default)]
pub struct Geometry {
    pub attributes: BTreeMap<AttributeName, AttributeBuffer>,
    pub index: Option<AttributeBuffer>,
    pub groups: Vec<GeometryGroup>,
    pub bounding_box: Option<BoundingBox>,
    pub morph_targets: Vec<MorphTarget>,
}

impl Geometry {
    /// Creates non-indexed geometry from a list of positions.
    pub fn from_positions(positions: &[Vec3]) -> Self {
        let flat: Vec<f32> = positions.iter().flat_map(|p| p.to_array()).collect();
        let mut geometry = Self::default();
        geometry
            .attributes
            .insert(AttributeName::Position, AttributeBuffer::from_f32(3, &flat));
        geometry
    }

    pub fn with_attribute(mut self, name: AttributeName, buffer: AttributeBuffer) -> Self {
        self.attributes.insert(name, buffer);
        self
    }

    pub fn with_index(mut self, indices: &[u32]) -> Self {
        self.index = Some(AttributeBuffer::from_u32(1, indices));
        self
    }

    pub fn with_groups(mut self, groups: Vec<GeometryGroup>) -> Self {
        self.groups = groups;
        self
    }

    pub fn attribute(&self, name: AttributeName) -> Option<&AttributeBuffer> {
        self.attributes.get(&name)
    }

    pub fn position(&self) -> Option<&AttributeBuffer> {
        self.attribute(AttributeName::Position)
    }

    pub fn vertex_count(&self) -> usize {
        self.position().map(AttributeBuffer::count).unwrap_or(0)
    }

    /// Counts triangles, failing if any attribute or morph target has a
    /// different number of items than the position attribute.
    pub fn triangle_count(&self) -> Result<usize, DescriptorError> {
        let triangles = triangle_count(self.position(), self.index.as_ref())?;
        let vertices = self.vertex_count();
        check_attribute_counts(&self.attributes, vertices)?;

        for target in self.morph_targets.iter() {
            let positions = target.positions.iter().map(|b| (&AttributeName::Position, b));
            let normals = target.normals.iter().map(|b| (&AttributeName::Normal, b));
            check_attribute_counts(positions.chain(normals), vertices)?;
        }

        Ok(triangles)
    }

    /// Resolves the vertex indices of one triangle.
    pub fn triangle(&self, triangle: usize) -> Result<[usize; 3], DescriptorError> {
        let base = triangle * 3;
        let Some(index) = self.index.as_ref() else {
            return Ok([base, base + 1, base + 2]);
        };

        let vertices = self.vertex_count();
        let mut out = [0; 3];
        for (slot, vertex) in out.iter_mut().enumerate() {
            let value = index.read_index(base + slot)?;
            if value as usize >= vertices {
                return Err(DescriptorError::IndexOutOfRange {
                    index: value,
                    vertices,
                });
            }

            *vertex = value as usize;
        }

        Ok(out)
    }

    /// Recomputes [Geometry::bounding_box] from the position attribute.
    pub fn compute_bounding_box(&mut self) {
        self.bounding_box = self
            .position()
            .and_then(AttributeBuffer::bounds)
            .map(|(min, max)| BoundingBox { min, max });
    }

    /// Returns a copy where every triangle owns its three vertices.
    ///
    /// Groups keep their ranges since they already address the index stream.
    pub fn to_non_indexed(&self) -> Result<Geometry, DescriptorError> {
        if self.index.is_none() {
            return Ok(self.clone());
        }

        let triangles = self.triangle_count()?;
        let mut order = Vec::with_capacity(triangles * 3);
        for triangle in 0..triangles {
            order.extend(self.triangle(triangle)?);
        }

        let expand = |buffer: &AttributeBuffer| {
            let mut out = buffer.empty_like(order.len());
            for &vertex in order.iter() {
                out.push_item_from(buffer, vertex);
            }
            out
        };

        let attributes = self
            .attributes
            .iter()
            .map(|(name, buffer)| (*name, expand(buffer)))
            .collect();

        let morph_targets = self
            .morph_targets
            .iter()
            .map(|target| MorphTarget {
                positions: target.positions.as_ref().map(expand),
                normals: target.normals.as_ref().map(expand),
            })
            .collect();

        Ok(Geometry {
            attributes,
            index: None,
            groups: self.groups.clone(),
            bounding_box: self.bounding_box,
            morph_targets,
        })
    }

    /// Replaces the normal attribute with area-weighted smooth normals.
    ///
    /// Vertices at bit-identical positions share one normal, so split
    /// (non-indexed) geometry still shades smoothly.
    pub fn compute_vertex_normals(&mut self) -> Result<(), DescriptorError> {
        let triangles = self.triangle_count()?;
        let Some(position) = self.position() else {
            return Err(DescriptorError::MissingPositions);
        };

        let count = position.count();
        let mut slots = Vec::with_capacity(count);
        let mut welded = HashMap::new();
        for vertex in 0..count {
            let key = position.read_vec3(vertex).to_array().map(f32::to_bits);
            let next = welded.len();
            slots.push(*welded.entry(key).or_insert(next));
        }

        let mut sums = vec![Vec3::ZERO; welded.len()];
        for triangle in 0..triangles {
            let [a, b, c] = self.triangle(triangle)?;
            let pa = position.read_vec3(a);
            let pb = position.read_vec3(b);
            let pc = position.read_vec3(c);
            let face = (pb - pa).cross(pc - pa);
            for vertex in [a, b, c] {
                sums[slots[vertex]] += face;
            }
        }

        let normals: Vec<f32> = slots
            .iter()
            .flat_map(|slot| sums[*slot].normalize_or_zero().to_array())
            .collect();

        self.attributes
            .insert(AttributeName::Normal, AttributeBuffer::from_f32(3, &normals));

        Ok(())
    }

    /// An axis-aligned box spanning `min` to `max`.
    pub fn cuboid(min: Vec3, max: Vec3) -> Self {
        let corners = cuboid_corners(min, max);

        #[rustfmt::skip]
        let indices = [
            0, 2, 1, 0, 3, 2, // -z
            4, 5, 6, 4, 6, 7, // +z
            0, 1, 5, 0, 5, 4, // -y
            3, 7, 6, 3, 6, 2, // +y
            0, 4, 7, 0, 7, 3, // -x
            1, 2, 6, 1, 6, 5, // +x
        ];

        let mut geometry = Self::from_positions(&corners).with_index(&indices);
        geometry.compute_bounding_box();
        geometry
    }

    /// The twelve edges of an axis-aligned box as a line list.
    pub fn cuboid_edges(min: Vec3, max: Vec3) -> Self {
        let corners = cuboid_corners(min, max);

        let edges = [
            (0, 1),
            (1, 2),
            (2, 3),
            (3, 0),
            (4, 5),
            (5, 6),
            (6, 7),
            (7, 4),
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7),
        ];

        let points: Vec<Vec3> = edges
            .iter()
            .flat_map(|(a, b)| [corners[*a], corners[*b]])
            .collect();

        let mut geometry = Self::from_positions(&points);
        geometry.compute_bounding_box();
        geometry
    }
}

fn cuboid_corners(min: Vec3, max: Vec3) -> [Vec3; 8] {
    [
        Vec3::new(min.x, min.y, min.z),
        Vec3::new(max.x, min.y, min.z),
        Vec3::new(max.x, max.y, min.z),
        Vec3::new(min.x, max.y, min.z),
        Vec3::new(min.x, min.y, max.z),
        Vec3::new(max.x, min.y, max.z),
        Vec3::new(max.x, max.y, max.z),
        Vec3::new(min.x, max.y, max.z),
    ]
}
