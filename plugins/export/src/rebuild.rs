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

use std::{collections::HashMap, sync::Arc};

use kiln_runtime::{
    anyhow::{self, bail, Context},
    geometry::Geometry,
    glam::Mat4,
    glb::save_glb,
    kiln_schema::*,
    material::{ImageSource, Material, Texture, TextureImage},
    scene::*,
    tracing::{debug, warn},
};

/// Rebuilds streamed [MeshDescriptor]s into a private scene for export.
#[derive(Debug, Default)]
pub struct SceneRebuilder {
    scene: Scene,
    roots: Vec<NodeId>,
    images: HashMap<TextureId, Arc<TextureImage>>,
    textures: Vec<(TextureDescriptor, Arc<Texture>)>,
    materials: Vec<(MaterialDescriptor, Arc<Material>)>,
    skeletons: Vec<(Vec<BoneDescriptor>, Vec<NodeId>)>,
}

impl SceneRebuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// The top-level nodes that will be exported, in insertion order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Registers texture pixels. A repeated id replaces the earlier pixels.
    pub fn add_attachments(&mut self, attachments: Vec<TextureAttachment>) {
        for TextureAttachment { id, bitmap } in attachments {
            let image = TextureImage {
                name: Some(format!("texture_{}", id.0)),
                source: ImageSource::Pixels(bitmap),
            };

            self.images.insert(id, Arc::new(image));
        }
    }

    /// Resolves a texture descriptor against the received attachments.
    ///
    /// Returns [None] if the pixels for its id never arrived.
    pub fn build_texture(&mut self, descriptor: &TextureDescriptor) -> Option<Arc<Texture>> {
        let same_sampling = |other: &TextureDescriptor| {
            other.id == descriptor.id
                && other.flip_y == descriptor.flip_y
                && other.transform == descriptor.transform
        };

        if let Some((_, texture)) = self.textures.iter().find(|(other, _)| same_sampling(other)) {
            return Some(texture.clone());
        }

        let Some(image) = self.images.get(&descriptor.id) else {
            warn!("no attachment for texture {:?}", descriptor.id);
            return None;
        };

        let texture = Arc::new(Texture {
            image: image.clone(),
            flip_y: descriptor.flip_y,
            transform: descriptor.transform,
        });

        self.textures.push((descriptor.clone(), texture.clone()));
        Some(texture)
    }

    fn build_material(&mut self, descriptor: &MaterialDescriptor) -> Arc<Material> {
        if let Some((_, material)) = self.materials.iter().find(|(other, _)| other == descriptor) {
            return material.clone();
        }

        let mut material = Material {
            name: descriptor.name.clone(),
            color: Some(descriptor.color),
            metalness: Some(descriptor.metalness),
            roughness: Some(descriptor.roughness),
            transparent: descriptor.transparent,
            opacity: Some(descriptor.opacity),
            double_sided: descriptor.double_sided,
            emissive: Some(descriptor.emissive),
            emissive_intensity: Some(descriptor.emissive_intensity),
            maps: Default::default(),
        };

        for (role, texture) in descriptor.maps.iter() {
            if let Some(texture) = self.build_texture(texture) {
                material.maps.insert(*role, texture);
            }
        }

        let material = Arc::new(material);
        self.materials.push((descriptor.clone(), material.clone()));
        material
    }

    /// Instantiates one bone node per descriptor bone and links them by parent
    /// index. Identical bone lists share one set of nodes.
    fn build_skeleton(&mut self, descriptor: &SkeletonDescriptor) -> Vec<NodeId> {
        if let Some((_, bones)) = self
            .skeletons
            .iter()
            .find(|(other, _)| *other == descriptor.bones)
        {
            return bones.clone();
        }

        let bones: Vec<NodeId> = descriptor
            .bones
            .iter()
            .map(|bone| {
                let node = Node::new(bone.name.clone(), NodeKind::Bone)
                    .with_transform(Transform::from_matrix(bone.local));
                self.scene.add(node, None)
            })
            .collect();

        let root = descriptor.root_index();
        for (index, bone) in descriptor.bones.iter().enumerate() {
            if index == root || bone.parent < 0 {
                continue;
            }

            let Some(parent) = bones.get(bone.parent as usize) else {
                warn!(
                    "bone {:?} has out-of-range parent {}",
                    bone.name, bone.parent
                );
                continue;
            };

            if !self.scene.set_parent(bones[index], Some(*parent)) {
                warn!("bone {:?} would form a cycle; left as a root", bone.name);
            }
        }

        for bone in bones.iter() {
            let is_root = self
                .scene
                .get(*bone)
                .map_or(false, |node| node.parent().is_none());

            if is_root {
                self.roots.push(*bone);
            }
        }

        self.skeletons.push((descriptor.bones.clone(), bones.clone()));

        bones
    }

    /// Adds one mesh to the scene, consuming its buffers.
    pub fn add_mesh(&mut self, descriptor: MeshDescriptor) -> anyhow::Result<NodeId> {
        let MeshDescriptor {
            kind,
            name,
            world_transform,
            geometry,
            material,
            skeleton,
        } = descriptor;

        geometry
            .triangle_count()
            .with_context(|| format!("mesh {name:?}"))?;

        let mut geometry = Geometry {
            attributes: geometry.attributes,
            index: geometry.index,
            groups: geometry.groups,
            bounding_box: geometry.bounding_box,
            morph_targets: Vec::new(),
        };

        if geometry.bounding_box.is_none() {
            geometry.compute_bounding_box();
        }

        let material = match &material {
            MaterialBinding::Single(material) => {
                MaterialSlot::Single(self.build_material(material))
            }
            MaterialBinding::Multi(materials) => MaterialSlot::Multi(
                materials
                    .iter()
                    .map(|material| self.build_material(material))
                    .collect(),
            ),
        };

        let mesh = Mesh {
            geometry: Arc::new(geometry),
            material,
        };

        let kind = match (kind, skeleton) {
            (MeshKind::StaticMesh, _) => NodeKind::StaticMesh(mesh),
            (MeshKind::SkinnedMesh, None) => bail!("skinned mesh {name:?} has no skeleton"),
            (MeshKind::SkinnedMesh, Some(skeleton)) => {
                let bones = self.build_skeleton(&skeleton);

                let inverse_bind_matrices = match skeleton.inverse_bind_matrices {
                    Some(ibms) if ibms.len() == bones.len() => Some(ibms),
                    Some(ibms) => {
                        warn!(
                            "mesh {name:?} has {} inverse bind matrices for {} bones; recomputing",
                            ibms.len(),
                            bones.len()
                        );
                        None
                    }
                    None => None,
                };

                NodeKind::SkinnedMesh(SkinnedMesh {
                    mesh,
                    skeleton: Skeleton {
                        bones,
                        inverse_bind_matrices,
                    },
                    bind_matrix: Some(skeleton.bind_matrix.unwrap_or(Mat4::IDENTITY)),
                })
            }
        };

        let node = Node::new(name, kind).with_transform(Transform::from_matrix(world_transform));
        let id = self.scene.add(node, None);
        self.roots.push(id);

        debug!("rebuilt mesh {id:?}");
        Ok(id)
    }

    /// Serializes everything rebuilt so far into a GLB.
    pub fn export(&self, generator: &str) -> anyhow::Result<Vec<u8>> {
        if self.roots.is_empty() {
            bail!("nothing to export");
        }

        save_glb(&self.scene, &self.roots, generator)
    }
}
