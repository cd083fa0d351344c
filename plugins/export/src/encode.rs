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

//! Snapshots live scene meshes into [MeshDescriptor]s.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use kiln_runtime::{
    anyhow::{self, bail},
    glam::Mat4,
    kiln_schema::*,
    material::{ImageSource, Material, Texture, TextureImage},
    scene::{MaterialSlot, NodeId, NodeKind, Scene},
    tracing::{debug, warn},
};

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("node {0:?} is not a mesh")]
    NotAMesh(NodeId),

    #[error("mesh {name:?} has no position attribute")]
    MissingPositions { name: String },

    #[error("mesh {name:?} has malformed geometry: {source}")]
    Malformed {
        name: String,
        #[source]
        source: DescriptorError,
    },

    #[error("bone {bone:?} of mesh {name:?} is not in the scene")]
    MissingBone { name: String, bone: NodeId },
}

/// One encoded mesh and the pixels of any textures it introduced.
#[derive(Clone, Debug)]
pub struct EncodedMesh {
    pub descriptor: MeshDescriptor,
    pub attachments: Vec<TextureAttachment>,
}

/// Lists every mesh node under `root` in traversal order.
pub fn collect_meshes(scene: &Scene, root: NodeId) -> Vec<NodeId> {
    scene
        .traverse(root)
        .into_iter()
        .filter(|id| scene.get(*id).map_or(false, |node| node.kind.is_mesh()))
        .collect()
}

/// Encodes meshes for one export session.
///
/// Textures are identified by their source image. The first mesh to use an
/// image carries its pixels as an attachment; later meshes only reference it.
#[derive(Debug, Default)]
pub struct DescriptorEncoder {
    images: HashMap<usize, (Arc<TextureImage>, Option<TextureId>)>,
    next_id: u32,
}

impl DescriptorEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of distinct images seen so far.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Checks that a node can be encoded without touching the texture cache.
    pub fn validate(scene: &Scene, id: NodeId) -> Result<(), EncodeError> {
        let node = scene.get(id).ok_or(EncodeError::NotAMesh(id))?;
        let mesh = node.kind.as_mesh().ok_or(EncodeError::NotAMesh(id))?;
        let name = &node.name;

        let malformed = |source| EncodeError::Malformed {
            name: name.clone(),
            source,
        };

        let geometry = &mesh.geometry;
        match geometry.triangle_count() {
            Ok(_) => {}
            Err(DescriptorError::MissingPositions) => {
                return Err(EncodeError::MissingPositions { name: name.clone() })
            }
            Err(err) => return Err(malformed(err)),
        }

        if let Some(index) = geometry.index.as_ref() {
            let vertices = geometry.vertex_count();
            for i in 0..index.count() {
                let value = index.read_index(i).map_err(malformed)?;
                if value as usize >= vertices {
                    return Err(malformed(DescriptorError::IndexOutOfRange {
                        index: value,
                        vertices,
                    }));
                }
            }
        }

        if let NodeKind::SkinnedMesh(skinned) = &node.kind {
            for bone in skinned.skeleton.bones.iter() {
                if !scene.contains(*bone) {
                    return Err(EncodeError::MissingBone {
                        name: name.clone(),
                        bone: *bone,
                    });
                }
            }
        }

        Ok(())
    }

    /// Encodes one mesh node.
    ///
    /// Attribute data is copied; the scene is never modified.
    pub fn encode(&mut self, scene: &Scene, id: NodeId) -> Result<EncodedMesh, EncodeError> {
        Self::validate(scene, id)?;

        let node = scene.get(id).ok_or(EncodeError::NotAMesh(id))?;
        let mesh = node.kind.as_mesh().ok_or(EncodeError::NotAMesh(id))?;

        let mut attachments = Vec::new();
        let material = match &mesh.material {
            MaterialSlot::Single(material) => {
                MaterialBinding::Single(self.material(material, &mut attachments))
            }
            MaterialSlot::Multi(materials) => MaterialBinding::Multi(
                materials
                    .iter()
                    .map(|material| self.material(material, &mut attachments))
                    .collect(),
            ),
        };

        let geometry = &mesh.geometry;
        let bounding_box = geometry
            .position()
            .and_then(AttributeBuffer::bounds)
            .map(|(min, max)| BoundingBox { min, max });

        let geometry = GeometryDescriptor {
            attributes: geometry.attributes.clone(),
            index: geometry.index.clone(),
            groups: geometry.groups.clone(),
            bounding_box,
        };

        let (kind, skeleton) = match &node.kind {
            NodeKind::SkinnedMesh(skinned) => {
                let mut skeleton = flatten_skeleton(scene, &skinned.skeleton.bones);
                skeleton.bind_matrix = skinned.bind_matrix;
                skeleton.inverse_bind_matrices = skinned.skeleton.inverse_bind_matrices.clone();
                (MeshKind::SkinnedMesh, Some(skeleton))
            }
            _ => (MeshKind::StaticMesh, None),
        };

        debug!(
            "encoded mesh {:?} with {} new texture(s)",
            node.name,
            attachments.len()
        );

        Ok(EncodedMesh {
            descriptor: MeshDescriptor {
                kind,
                name: node.name.clone(),
                world_transform: scene.world_matrix(id),
                geometry,
                material,
                skeleton,
            },
            attachments,
        })
    }

    fn material(
        &mut self,
        material: &Material,
        attachments: &mut Vec<TextureAttachment>,
    ) -> MaterialDescriptor {
        let mut maps = BTreeMap::new();
        for (role, texture) in material.maps.iter() {
            let Some(id) = self.attach(texture, attachments) else {
                continue;
            };

            maps.insert(
                *role,
                TextureDescriptor {
                    id,
                    role: *role,
                    color_space: role.color_space(),
                    flip_y: texture.flip_y,
                    transform: texture.transform,
                },
            );
        }

        MaterialDescriptor {
            name: material.name.clone(),
            color: material.color.unwrap_or(Material::FALLBACK_COLOR),
            metalness: material.metalness.unwrap_or(Material::FALLBACK_METALNESS),
            roughness: material.roughness.unwrap_or(Material::FALLBACK_ROUGHNESS),
            transparent: material.transparent,
            opacity: material.opacity.unwrap_or(Material::FALLBACK_OPACITY),
            double_sided: material.double_sided,
            emissive: material.emissive.unwrap_or(Material::FALLBACK_EMISSIVE),
            emissive_intensity: material
                .emissive_intensity
                .unwrap_or(Material::FALLBACK_EMISSIVE_INTENSITY),
            maps,
        }
    }

    /// Resolves the id of a texture's image, decoding it on first sight.
    ///
    /// Images that fail to decode are remembered as unusable and their maps
    /// are dropped.
    fn attach(
        &mut self,
        texture: &Texture,
        attachments: &mut Vec<TextureAttachment>,
    ) -> Option<TextureId> {
        let key = Arc::as_ptr(&texture.image) as usize;
        if let Some((_, id)) = self.images.get(&key) {
            return *id;
        }

        let id = match decode(&texture.image) {
            Ok(bitmap) => {
                let id = TextureId(self.next_id);
                self.next_id += 1;
                attachments.push(TextureAttachment { id, bitmap });
                Some(id)
            }
            Err(err) => {
                warn!("dropping texture {:?}: {err:#}", texture.image.name);
                None
            }
        };

        self.images.insert(key, (texture.image.clone(), id));
        id
    }
}

/// Decodes an image to RGBA8, trusting its MIME type first and sniffing the
/// format if that fails.
fn decode(image: &TextureImage) -> anyhow::Result<Bitmap> {
    match &image.source {
        ImageSource::Pixels(bitmap) => {
            let expected = bitmap.width as usize * bitmap.height as usize * 4;
            if bitmap.rgba.len() != expected {
                bail!(
                    "{}x{} bitmap has {} bytes",
                    bitmap.width,
                    bitmap.height,
                    bitmap.rgba.len()
                );
            }

            Ok(bitmap.clone())
        }
        ImageSource::Encoded { bytes, mime_type } => {
            let format = mime_type
                .as_deref()
                .and_then(image::ImageFormat::from_mime_type);

            let decoded = match format {
                Some(format) => image::load_from_memory_with_format(bytes, format)
                    .or_else(|_| image::load_from_memory(bytes)),
                None => image::load_from_memory(bytes),
            }?;

            let rgba = decoded.into_rgba8();
            Ok(Bitmap {
                width: rgba.width(),
                height: rgba.height(),
                rgba: rgba.into_raw(),
            })
        }
    }
}

/// Flattens bone nodes into parent indices.
///
/// A bone's parent is its nearest ancestor that is also in `bones`. Parented
/// bones carry their transform relative to that ancestor; roots carry their
/// absolute transform.
fn flatten_skeleton(scene: &Scene, bones: &[NodeId]) -> SkeletonDescriptor {
    let slots: HashMap<NodeId, usize> = bones
        .iter()
        .enumerate()
        .map(|(slot, bone)| (*bone, slot))
        .collect();

    let bones = bones
        .iter()
        .map(|bone| {
            let world = scene.world_matrix(*bone);

            let mut parent = None;
            let mut cursor = scene.get(*bone).and_then(|node| node.parent());
            while let Some(ancestor) = cursor {
                if let Some(slot) = slots.get(&ancestor) {
                    parent = Some((*slot, ancestor));
                    break;
                }

                cursor = scene.get(ancestor).and_then(|node| node.parent());
            }

            let (parent, local) = match parent {
                Some((slot, ancestor)) => {
                    let parent_world: Mat4 = scene.world_matrix(ancestor);
                    (slot as i32, parent_world.inverse() * world)
                }
                None => (-1, world),
            };

            BoneDescriptor {
                name: scene
                    .get(*bone)
                    .map(|node| node.name.clone())
                    .unwrap_or_default(),
                local,
                parent,
            }
        })
        .collect();

    SkeletonDescriptor {
        bones,
        bind_matrix: None,
        inverse_bind_matrices: None,
    }
}
