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

//! Serializable snapshots of scene meshes, built on the interactive side and
//! consumed by the export worker.

use std::collections::BTreeMap;

use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::{
    check_attribute_counts, triangle_count, AttributeBuffer, AttributeName, DescriptorError,
};

/// Whether a mesh is deformed by a skeleton.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum MeshKind {
    StaticMesh,
    SkinnedMesh,
}

/// One renderable primitive, ready to cross into the export worker.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MeshDescriptor {
    pub kind: MeshKind,

    /// The mesh's name. May be empty.
    pub name: String,

    /// The absolute placement of this mesh at export time.
    pub world_transform: Mat4,

    pub geometry: GeometryDescriptor,

    pub material: MaterialBinding,

    /// Only present when `kind` is [MeshKind::SkinnedMesh].
    pub skeleton: Option<SkeletonDescriptor>,
}

/// A mesh's material, or one material per geometry group.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum MaterialBinding {
    Single(MaterialDescriptor),
    Multi(Vec<MaterialDescriptor>),
}

impl MaterialBinding {
    pub fn iter(&self) -> impl Iterator<Item = &MaterialDescriptor> {
        match self {
            MaterialBinding::Single(material) => std::slice::from_ref(material).iter(),
            MaterialBinding::Multi(materials) => materials.iter(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GeometryDescriptor {
    pub attributes: BTreeMap<AttributeName, AttributeBuffer>,

    /// Triangle index order. Absence implies sequential triples.
    pub index: Option<AttributeBuffer>,

    pub groups: Vec<GeometryGroup>,

    /// Precomputed bounds. Trusted verbatim by the worker.
    pub bounding_box: Option<BoundingBox>,
}

impl GeometryDescriptor {
    /// The number of triangles in this geometry.
    ///
    /// Also fails if the attributes disagree on the vertex count.
    pub fn triangle_count(&self) -> Result<usize, DescriptorError> {
        let position = self.attributes.get(&AttributeName::Position);
        let triangles = triangle_count(position, self.index.as_ref())?;
        let vertices = position.map_or(0, AttributeBuffer::count);
        check_attribute_counts(&self.attributes, vertices)?;
        Ok(triangles)
    }
}

/// A range of the index (or vertex) stream rendered with one material.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct GeometryGroup {
    pub start: u32,
    pub count: u32,
    pub material_index: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

/// A fully-resolved material. Every scalar is present; fallbacks have been
/// applied by the encoder.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MaterialDescriptor {
    pub name: String,
    pub color: Vec3,
    pub metalness: f32,
    pub roughness: f32,
    pub transparent: bool,
    pub opacity: f32,
    pub double_sided: bool,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub maps: BTreeMap<TextureRole, TextureDescriptor>,
}

/// The slot a texture fills in a material.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum TextureRole {
    BaseColor,
    Normal,
    Roughness,
    Metalness,
    AmbientOcclusion,
    Emissive,
}

impl TextureRole {
    /// Color maps are sRGB; data maps are linear.
    pub fn color_space(self) -> ColorSpace {
        match self {
            TextureRole::BaseColor | TextureRole::Emissive => ColorSpace::Srgb,
            _ => ColorSpace::Linear,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ColorSpace {
    Srgb,
    Linear,
}

/// Identifies one source image within an export session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct TextureId(pub u32);

/// A lightweight reference to a texture whose pixels travel separately as a
/// [TextureAttachment].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TextureDescriptor {
    pub id: TextureId,
    pub role: TextureRole,
    pub color_space: ColorSpace,
    pub flip_y: bool,
    pub transform: Option<UvTransform>,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct UvTransform {
    pub offset: Vec2,
    pub repeat: Vec2,
    pub rotation: f32,
    pub center: Vec2,
}

impl Default for UvTransform {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            repeat: Vec2::ONE,
            rotation: 0.0,
            center: Vec2::ZERO,
        }
    }
}

/// Decoded RGBA8 pixels.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,

    /// Must be `width * height * 4` bytes long.
    #[serde_as(as = "Base64")]
    pub rgba: Vec<u8>,
}

/// The pixel payload of a texture, sent at most once per [TextureId].
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TextureAttachment {
    pub id: TextureId,
    pub bitmap: Bitmap,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SkeletonDescriptor {
    pub bones: Vec<BoneDescriptor>,
    pub bind_matrix: Option<Mat4>,
    pub inverse_bind_matrices: Option<Vec<Mat4>>,
}

impl SkeletonDescriptor {
    /// Returns the index of the root bone.
    ///
    /// This is the first bone without a parent. If every bone claims a parent
    /// the first bone is used instead.
    pub fn root_index(&self) -> usize {
        self.bones
            .iter()
            .position(|bone| bone.parent < 0)
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BoneDescriptor {
    pub name: String,

    /// This bone's transform relative to its parent bone. Root bones carry
    /// their absolute transform.
    pub local: Mat4,

    /// Index of the parent bone in the same skeleton, or -1 for a root.
    pub parent: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bone(name: &str, parent: i32) -> BoneDescriptor {
        BoneDescriptor {
            name: name.to_string(),
            local: Mat4::IDENTITY,
            parent,
        }
    }

    #[test]
    fn attribute_counts_must_agree() {
        let mut geometry = GeometryDescriptor {
            attributes: BTreeMap::new(),
            index: None,
            groups: Vec::new(),
            bounding_box: None,
        };

        geometry
            .attributes
            .insert(AttributeName::Position, AttributeBuffer::from_f32(3, &[0.0; 9]));
        geometry
            .attributes
            .insert(AttributeName::Normal, AttributeBuffer::from_f32(3, &[0.0; 6]));

        assert_eq!(
            geometry.triangle_count(),
            Err(DescriptorError::AttributeCount {
                name: AttributeName::Normal,
                count: 2,
                vertices: 3,
            })
        );

        geometry
            .attributes
            .insert(AttributeName::Normal, AttributeBuffer::from_f32(3, &[0.0; 9]));
        assert_eq!(geometry.triangle_count(), Ok(1));
    }

    #[test]
    fn root_is_first_parentless_bone() {
        let skeleton = SkeletonDescriptor {
            bones: vec![bone("hand", 1), bone("hips", -1), bone("other", -1)],
            bind_matrix: None,
            inverse_bind_matrices: None,
        };

        assert_eq!(skeleton.root_index(), 1);
    }

    #[test]
    fn root_falls_back_to_first_bone() {
        let skeleton = SkeletonDescriptor {
            bones: vec![bone("a", 1), bone("b", 0)],
            bind_matrix: None,
            inverse_bind_matrices: None,
        };

        assert_eq!(skeleton.root_index(), 0);
    }

    #[test]
    fn color_spaces_follow_role() {
        assert_eq!(TextureRole::BaseColor.color_space(), ColorSpace::Srgb);
        assert_eq!(TextureRole::Emissive.color_space(), ColorSpace::Srgb);
        assert_eq!(TextureRole::Normal.color_space(), ColorSpace::Linear);
        assert_eq!(TextureRole::Roughness.color_space(), ColorSpace::Linear);
    }

    #[test]
    fn descriptor_json_keeps_payload() {
        let geometry = GeometryDescriptor {
            attributes: BTreeMap::from([(
                AttributeName::Position,
                AttributeBuffer::from_f32(3, &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            )]),
            index: None,
            groups: vec![],
            bounding_box: None,
        };

        let json = serde_json::to_string(&geometry).unwrap();
        let back: GeometryDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.attributes, geometry.attributes);
        assert_eq!(back.triangle_count().unwrap(), 1);
    }
}
