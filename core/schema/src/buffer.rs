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

//! Raw vertex attribute storage shared by live geometry and descriptors.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::DescriptorError;

/// The names of the vertex attributes Kiln knows how to carry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum AttributeName {
    Position,
    Normal,
    Uv,
    Uv1,
    Color,
    Tangent,
    SkinIndex,
    SkinWeight,
}

/// The scalar type of every component in an [AttributeBuffer].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ElementType {
    I8,
    U8,
    I16,
    U16,
    U32,
    F32,
}

impl ElementType {
    /// The size of a single component in bytes.
    pub fn size(self) -> usize {
        match self {
            ElementType::I8 | ElementType::U8 => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::U32 | ElementType::F32 => 4,
        }
    }
}

/// A tightly-packed, little-endian buffer of per-vertex (or per-index) items.
///
/// Each item is `item_size` components of `element`. The payload is owned, so
/// handing an [AttributeBuffer] to another thread moves it there.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AttributeBuffer {
    pub element: ElementType,
    pub item_size: usize,
    pub normalized: bool,
    #[serde_as(as = "Base64")]
    pub data: Vec<u8>,
}

impl AttributeBuffer {
    pub fn new(element: ElementType, item_size: usize, normalized: bool, data: Vec<u8>) -> Self {
        Self {
            element,
            item_size,
            normalized,
            data,
        }
    }

    pub fn from_f32(item_size: usize, values: &[f32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(ElementType::F32, item_size, false, data)
    }

    pub fn from_u16(item_size: usize, values: &[u16]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(ElementType::U16, item_size, false, data)
    }

    pub fn from_u32(item_size: usize, values: &[u32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(ElementType::U32, item_size, false, data)
    }

    /// Creates an empty buffer with this buffer's layout and room for
    /// `capacity` items.
    pub fn empty_like(&self, capacity: usize) -> Self {
        Self {
            element: self.element,
            item_size: self.item_size,
            normalized: self.normalized,
            data: Vec::with_capacity(capacity * self.stride()),
        }
    }

    /// The number of bytes taken by one item.
    pub fn stride(&self) -> usize {
        self.element.size() * self.item_size
    }

    /// The number of items in this buffer.
    pub fn count(&self) -> usize {
        match self.stride() {
            0 => 0,
            stride => self.data.len() / stride,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns the raw bytes of item `index`.
    pub fn item(&self, index: usize) -> &[u8] {
        let stride = self.stride();
        &self.data[index * stride..(index + 1) * stride]
    }

    /// Returns the raw bytes of the items in `range`.
    pub fn items(&self, range: std::ops::Range<usize>) -> &[u8] {
        let stride = self.stride();
        &self.data[range.start * stride..range.end * stride]
    }

    /// Appends item `index` of `other`, which must share this buffer's layout.
    pub fn push_item_from(&mut self, other: &AttributeBuffer, index: usize) {
        debug_assert_eq!(self.stride(), other.stride());
        self.data.extend_from_slice(other.item(index));
    }

    /// Reads one component as a float, applying normalization if set.
    ///
    /// Components past `item_size` read as zero.
    pub fn read_f32(&self, index: usize, component: usize) -> f32 {
        if component >= self.item_size {
            return 0.0;
        }

        let size = self.element.size();
        let at = index * self.stride() + component * size;
        let bytes = &self.data[at..at + size];

        match (self.element, self.normalized) {
            (ElementType::F32, _) => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            (ElementType::U8, false) => bytes[0] as f32,
            (ElementType::U8, true) => bytes[0] as f32 / u8::MAX as f32,
            (ElementType::I8, false) => bytes[0] as i8 as f32,
            (ElementType::I8, true) => (bytes[0] as i8 as f32 / i8::MAX as f32).max(-1.0),
            (ElementType::U16, false) => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            (ElementType::U16, true) => {
                u16::from_le_bytes([bytes[0], bytes[1]]) as f32 / u16::MAX as f32
            }
            (ElementType::I16, false) => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
            (ElementType::I16, true) => {
                (i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / i16::MAX as f32).max(-1.0)
            }
            (ElementType::U32, false) => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
            }
            (ElementType::U32, true) => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    / u32::MAX as f32
            }
        }
    }

    pub fn read_vec3(&self, index: usize) -> Vec3 {
        Vec3::new(
            self.read_f32(index, 0),
            self.read_f32(index, 1),
            self.read_f32(index, 2),
        )
    }

    /// Reads item `index` of a scalar index buffer.
    pub fn read_index(&self, index: usize) -> Result<u32, DescriptorError> {
        let bytes = self.item(index);
        match self.element {
            ElementType::U8 => Ok(bytes[0] as u32),
            ElementType::U16 => Ok(u16::from_le_bytes([bytes[0], bytes[1]]) as u32),
            ElementType::U32 => Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            other => Err(DescriptorError::IndexElement(other)),
        }
    }

    /// Computes the axis-aligned bounds of the first three components.
    ///
    /// Returns [None] for an empty buffer.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let count = self.count();
        if count == 0 {
            return None;
        }

        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..count {
            let p = self.read_vec3(i);
            min = min.min(p);
            max = max.max(p);
        }

        Some((min, max))
    }
}

/// Counts the triangles described by a position buffer and an optional index.
///
/// Errors if positions are missing or empty, or if the vertex stream does not
/// divide evenly into triangles.
pub fn triangle_count(
    position: Option<&AttributeBuffer>,
    index: Option<&AttributeBuffer>,
) -> Result<usize, DescriptorError> {
    let position = position.ok_or(DescriptorError::MissingPositions)?;

    if position.is_empty() {
        return Err(DescriptorError::EmptyPositions);
    }

    let count = match index {
        Some(index) => index.count(),
        None => position.count(),
    };

    if count % 3 != 0 {
        return Err(DescriptorError::PartialTriangle { count });
    }

    Ok(count / 3)
}

/// Checks that every attribute carries one item per vertex.
pub fn check_attribute_counts<'a>(
    attributes: impl IntoIterator<Item = (&'a AttributeName, &'a AttributeBuffer)>,
    vertices: usize,
) -> Result<(), DescriptorError> {
    for (name, buffer) in attributes {
        let count = buffer.count();
        if count != vertices {
            return Err(DescriptorError::AttributeCount {
                name: *name,
                count,
                vertices,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_and_stride() {
        let buf = AttributeBuffer::from_f32(3, &[0.0; 9]);
        assert_eq!(buf.stride(), 12);
        assert_eq!(buf.count(), 3);
    }

    #[test]
    fn read_normalized_u8() {
        let buf = AttributeBuffer::new(ElementType::U8, 4, true, vec![255, 0, 51, 255]);
        assert_eq!(buf.read_f32(0, 0), 1.0);
        assert_eq!(buf.read_f32(0, 1), 0.0);
        assert!((buf.read_f32(0, 2) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn read_signed_normalized_clamps() {
        let buf = AttributeBuffer::new(ElementType::I8, 1, true, vec![0x80]);
        assert_eq!(buf.read_f32(0, 0), -1.0);
    }

    #[test]
    fn read_indices() {
        let buf = AttributeBuffer::from_u16(1, &[7, 300]);
        assert_eq!(buf.read_index(1).unwrap(), 300);

        let floats = AttributeBuffer::from_f32(1, &[1.0]);
        assert!(floats.read_index(0).is_err());
    }

    #[test]
    fn bounds_of_positions() {
        let buf = AttributeBuffer::from_f32(3, &[1.0, -2.0, 0.0, -1.0, 4.0, 3.0]);
        let (min, max) = buf.bounds().unwrap();
        assert_eq!(min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(max, Vec3::new(1.0, 4.0, 3.0));
    }

    #[test]
    fn triangle_count_rules() {
        let positions = AttributeBuffer::from_f32(3, &[0.0; 18]);
        assert_eq!(triangle_count(Some(&positions), None).unwrap(), 2);

        let index = AttributeBuffer::from_u32(1, &[0, 1, 2, 2, 3, 4, 4, 5, 0]);
        assert_eq!(triangle_count(Some(&positions), Some(&index)).unwrap(), 3);

        let partial = AttributeBuffer::from_u32(1, &[0, 1, 2, 3]);
        assert!(matches!(
            triangle_count(Some(&positions), Some(&partial)),
            Err(DescriptorError::PartialTriangle { count: 4 })
        ));

        assert!(matches!(
            triangle_count(None, None),
            Err(DescriptorError::MissingPositions)
        ));

        let empty = AttributeBuffer::from_f32(3, &[]);
        assert!(matches!(
            triangle_count(Some(&empty), None),
            Err(DescriptorError::EmptyPositions)
        ));
    }
}
